// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Common arguments for command-line interfaces, and reading arguments from
//! files.

#[cfg(test)]
mod tests;

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::Parser;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::config::{RuntimeConfig, SchedulerKind};

lazy_static::lazy_static! {
    pub(super) static ref ARG_FILE_TYPES_COMMA_SEPARATED: String = ArgFileTypes::iter().join(", ");

    pub(super) static ref ARG_FILE_HELP: String =
        format!("All arguments may be specified in a file. Any CLI arguments override arguments set in the file. Supported formats: {}", *ARG_FILE_TYPES_COMMA_SEPARATED);

    static ref SCHEDULER_HELP: String =
        format!("How per-channel work is scheduled. Supported schedulers: {}. Default: threads", SchedulerKind::iter().join(", "));
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(super) enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

macro_rules! unpack_arg_file {
    ($arg_file:expr) => ({
        use std::{fs::File, io::Read, str::FromStr};

        use crate::cli::common::{ArgFileTypes, ARG_FILE_TYPES_COMMA_SEPARATED};

        debug!("Attempting to parse argument file {}", $arg_file.display());

        let mut contents = String::new();
        let arg_file_type = $arg_file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok());

        match arg_file_type {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match toml::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(AlmaJvmError::ArgFile(format!(
                            "Couldn't decode toml structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }
            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match serde_json::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(AlmaJvmError::ArgFile(format!(
                            "Couldn't decode json structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }

            _ => {
                return Err(AlmaJvmError::ArgFile(format!(
                    "Argument file '{:?}' doesn't have a recognised file extension! Valid extensions are: {}", $arg_file, *ARG_FILE_TYPES_COMMA_SEPARATED)
                ))
            }
        }
    });
}

/// Where scratch files go and how many threads may be used.
#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct RuntimeArgs {
    /// The directory in which scratch files are written. Default: the system's
    /// temporary directory
    #[clap(long, help_heading = "RUNTIME")]
    pub(super) scratch_dir: Option<PathBuf>,

    /// The number of worker threads. Default: the number of available CPUs
    #[clap(long, help_heading = "RUNTIME")]
    pub(super) num_workers: Option<usize>,

    #[clap(long, help = SCHEDULER_HELP.as_str(), help_heading = "RUNTIME")]
    pub(super) scheduler: Option<String>,
}

#[derive(Error, Debug)]
pub(super) enum RuntimeArgsError {
    #[error("The number of workers can't be 0")]
    ZeroWorkers,

    #[error("Unrecognised scheduler '{0}'; supported schedulers: {}", SchedulerKind::iter().join(", "))]
    Scheduler(String),
}

impl RuntimeArgs {
    pub(super) fn merge(self, other: Self) -> Self {
        Self {
            scratch_dir: self.scratch_dir.or(other.scratch_dir),
            num_workers: self.num_workers.or(other.num_workers),
            scheduler: self.scheduler.or(other.scheduler),
        }
    }

    /// Fill in a [`RuntimeConfig`], using the machine's defaults for anything
    /// not given.
    pub(super) fn parse(self) -> Result<RuntimeConfig, RuntimeArgsError> {
        let RuntimeArgs {
            scratch_dir,
            num_workers,
            scheduler,
        } = self;

        let num_workers = match num_workers {
            Some(n) => NonZeroUsize::new(n).ok_or(RuntimeArgsError::ZeroWorkers)?,
            None => std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
        };
        let scheduler_kind = match scheduler {
            Some(s) => SchedulerKind::from_str(&s.to_lowercase())
                .map_err(|_| RuntimeArgsError::Scheduler(s))?,
            None => SchedulerKind::Threads,
        };

        Ok(RuntimeConfig {
            scratch_dir: scratch_dir.unwrap_or_else(std::env::temp_dir),
            num_workers,
            scheduler_kind,
        })
    }
}
