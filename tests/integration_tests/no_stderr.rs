// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests to ensure there is no stderr output for successful commands.

use ndarray::prelude::*;
use tempfile::TempDir;

use crate::{alma_jvm, get_cmd_output, write_cube, write_run};

#[test]
fn test_beam_correct_no_stderr() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let basename = write_run(tmp_dir.path(), true);

    #[rustfmt::skip]
    let cmd = alma_jvm()
        .args([
            "beam-correct",
            "--basename", &basename.display().to_string(),
            "--scratch-dir", &tmp_dir.path().display().to_string(),
        ])
        .ok();
    assert!(
        cmd.is_ok(),
        "beam-correct failed on simple test data: {}",
        cmd.err().unwrap()
    );
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}

#[test]
fn test_despeckle_no_stderr() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let model = tmp_dir.path().join("run.model.fits");
    write_cube(&model, Array3::<f32>::ones((4, 3, 3)).view(), false);

    let cmd = alma_jvm()
        .args(["despeckle", "-m", &model.display().to_string()])
        .ok();
    assert!(
        cmd.is_ok(),
        "despeckle failed on simple test data: {}",
        cmd.err().unwrap()
    );
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}
