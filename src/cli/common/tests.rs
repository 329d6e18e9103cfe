// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests against command-line interfaces that aren't big enough to go in their
//! own modules.

use std::path::PathBuf;

use super::*;

#[test]
fn runtime_args_merge_prefers_cli() {
    let cli = RuntimeArgs {
        num_workers: Some(4),
        ..Default::default()
    };
    let file = RuntimeArgs {
        scratch_dir: Some(PathBuf::from("/scratch")),
        num_workers: Some(16),
        scheduler: Some("synchronous".to_string()),
    };
    let merged = cli.merge(file);
    assert_eq!(merged.num_workers, Some(4));
    assert_eq!(merged.scratch_dir, Some(PathBuf::from("/scratch")));
    assert_eq!(merged.scheduler.as_deref(), Some("synchronous"));
}

#[test]
fn runtime_args_parse() {
    let config = RuntimeArgs {
        scratch_dir: Some(PathBuf::from("/scratch")),
        num_workers: Some(3),
        scheduler: Some("Synchronous".to_string()),
    }
    .parse()
    .unwrap();
    assert_eq!(config.scratch_dir, PathBuf::from("/scratch"));
    assert_eq!(config.num_workers.get(), 3);
    assert_eq!(config.scheduler_kind, SchedulerKind::Synchronous);
    assert_eq!(config.effective_num_workers(), 1);

    let config = RuntimeArgs::default().parse().unwrap();
    assert_eq!(config.scheduler_kind, SchedulerKind::Threads);
    assert!(config.num_workers.get() >= 1);
}

#[test]
fn runtime_args_errors() {
    let result = RuntimeArgs {
        num_workers: Some(0),
        ..Default::default()
    }
    .parse();
    assert!(matches!(result, Err(RuntimeArgsError::ZeroWorkers)));

    let result = RuntimeArgs {
        scheduler: Some("dask".to_string()),
        ..Default::default()
    }
    .parse();
    match result {
        Err(e @ RuntimeArgsError::Scheduler(_)) => {
            let msg = e.to_string();
            assert!(msg.contains("'dask'"), "{msg}");
            assert!(msg.contains("threads, synchronous"), "{msg}");
        }
        other => panic!("Expected a scheduler error, got {other:?}"),
    }
}

#[test]
fn arg_file_types() {
    assert_eq!(*ARG_FILE_TYPES_COMMA_SEPARATED, "toml, json");
    assert!(ArgFileTypes::from_str("yaml").is_err());
}
