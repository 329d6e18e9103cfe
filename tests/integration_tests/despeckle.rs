// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use ndarray::prelude::*;
use tempfile::TempDir;

use crate::{alma_jvm, get_cmd_output, read_cube, write_cube};

#[test]
fn test_despeckle_model() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let model = tmp_dir.path().join("run.model.fits");
    let mut data = Array3::<f32>::from_elem((6, 4, 4), 2.0);
    data[(3, 1, 2)] = 50.0;
    data[(0, 0, 0)] = f32::NAN;
    write_cube(&model, data.view(), false);

    let cmd = alma_jvm()
        .args(["despeckle", "--model", &model.display().to_string()])
        .ok();
    assert!(cmd.is_ok(), "despeckle failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Replaced 1 pixels"), "{stdout}");

    let despeckled = read_cube(&model);
    assert_eq!(despeckled[(3, 1, 2)], 2.0);
    assert!(despeckled[(0, 0, 0)].is_nan());
    assert_eq!(despeckled[(5, 3, 3)], 2.0);
}

#[test]
fn test_despeckle_missing_model() {
    let cmd = alma_jvm()
        .args(["despeckle", "--model", "/does/not/exist.fits"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("doesn't exist"), "{stderr}");
}
