// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! How the finalizer is allowed to use the machine it runs on.
//!
//! Nothing in the library reads environment variables; everything it needs to
//! know about scratch space and parallelism is in [`RuntimeConfig`].

use std::{num::NonZeroUsize, path::PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

/// How per-channel work is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Use `num_workers` threads.
    #[strum(serialize = "threads")]
    Threads,

    /// Do everything on a single thread.
    #[strum(serialize = "synchronous")]
    Synchronous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Where scratch files are written. A temporary directory is made inside
    /// this directory for every cube and removed afterwards.
    pub scratch_dir: PathBuf,

    pub num_workers: NonZeroUsize,

    pub scheduler_kind: SchedulerKind,
}

impl RuntimeConfig {
    /// The number of threads that will actually be used.
    pub fn effective_num_workers(&self) -> usize {
        match self.scheduler_kind {
            SchedulerKind::Threads => self.num_workers.get(),
            SchedulerKind::Synchronous => 1,
        }
    }

    /// A rayon pool sized for this configuration. All parallel per-channel
    /// work is installed into this pool.
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool, RuntimeConfigError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.effective_num_workers())
            .thread_name(|i| format!("alma-jvm-{i}"))
            .build()
            .map_err(RuntimeConfigError::ThreadPool)
    }

    /// A fresh temporary directory inside the scratch directory. It (and
    /// everything in it) is removed when dropped.
    pub fn scratch_tempdir(&self) -> Result<tempfile::TempDir, RuntimeConfigError> {
        tempfile::Builder::new()
            .prefix("alma_jvm_")
            .tempdir_in(&self.scratch_dir)
            .map_err(|err| RuntimeConfigError::Scratch {
                dir: self.scratch_dir.clone(),
                err,
            })
    }
}

#[derive(Error, Debug)]
pub enum RuntimeConfigError {
    #[error("Couldn't build a thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Couldn't create a scratch directory in '{dir}': {err}")]
    Scratch { dir: PathBuf, err: std::io::Error },
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn synchronous_uses_one_thread() {
        let config = RuntimeConfig {
            scratch_dir: PathBuf::from("/tmp"),
            num_workers: NonZeroUsize::new(8).unwrap(),
            scheduler_kind: SchedulerKind::Synchronous,
        };
        assert_eq!(config.effective_num_workers(), 1);
        let pool = config.thread_pool().unwrap();
        assert_eq!(pool.current_num_threads(), 1);

        let config = RuntimeConfig {
            scheduler_kind: SchedulerKind::Threads,
            ..config
        };
        assert_eq!(config.effective_num_workers(), 8);
    }

    #[test]
    fn scheduler_kind_strings() {
        assert_eq!(SchedulerKind::from_str("threads").unwrap(), SchedulerKind::Threads);
        assert_eq!(
            SchedulerKind::from_str("synchronous").unwrap(),
            SchedulerKind::Synchronous
        );
        assert!(SchedulerKind::from_str("distributed").is_err());
        assert_eq!(SchedulerKind::Synchronous.to_string(), "synchronous");
    }

    #[test]
    fn scratch_dirs_are_cleaned_up() {
        let scratch = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            scratch_dir: scratch.path().to_path_buf(),
            num_workers: NonZeroUsize::new(1).unwrap(),
            scheduler_kind: SchedulerKind::Threads,
        };
        let dir = config.scratch_tempdir().unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.starts_with(scratch.path()));
        std::fs::write(path.join("x"), b"x").unwrap();
        drop(dir);
        assert!(!path.exists());

        let config = RuntimeConfig {
            scratch_dir: scratch.path().join("does/not/exist"),
            ..config
        };
        assert!(matches!(
            config.scratch_tempdir(),
            Err(RuntimeConfigError::Scratch { .. })
        ));
    }
}
