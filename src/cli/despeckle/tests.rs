// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use clap::Parser;
use ndarray::prelude::*;
use tempfile::{Builder, TempDir};

use super::*;
use crate::{
    cube::{ChannelStream, FitsCube},
    tests::{write_test_cube, TestBeams},
};

fn args_from(cli: &[&str]) -> DespeckleArgs {
    DespeckleArgs::try_parse_from(std::iter::once("despeckle").chain(cli.iter().copied())).unwrap()
}

#[test]
fn missing_model() {
    let result = args_from(&[]).parse();
    assert!(matches!(result, Err(DespeckleArgsError::NoModel)));

    let result = args_from(&["--model", "/does/not/exist.model.fits"]).parse();
    assert!(
        matches!(result, Err(DespeckleArgsError::ModelMissing(p)) if p == PathBuf::from("/does/not/exist.model.fits"))
    );
}

#[test]
fn arg_file_is_merged() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("run.model.fits");
    write_test_cube(&model, Array3::<f32>::zeros((3, 2, 2)).view(), TestBeams::None, false);

    let mut arg_file = Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        arg_file,
        "[despeckle]\nmodel = \"{}\"\nmedian_npix = 5\nthreshold_factor = 4.0",
        model.display()
    )
    .unwrap();
    let path = arg_file.path().display().to_string();

    let (parsed_model, params) = args_from(&[&path, "--median-npix", "7"])
        .merge()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(parsed_model, model);
    assert_eq!(params.median_npix, 7);
    assert_eq!(params.threshold_factor, 4.0);

    let (_, params) = args_from(&["-m", &model.display().to_string()])
        .parse()
        .unwrap();
    assert_eq!(params, DespeckleParams::default());
}

#[test]
fn run_despeckles_in_place() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("run.model.fits");
    let mut cube = Array3::<f32>::ones((5, 3, 3));
    cube[(1, 0, 2)] = -9.0;
    write_test_cube(&model, cube.view(), TestBeams::None, true);
    let model_arg = model.display().to_string();

    // A dry run leaves the cube alone.
    args_from(&["-m", &model_arg]).run(true).unwrap();
    let data = ChannelStream::new(FitsCube::open(&model).unwrap().reader().unwrap())
        .materialize()
        .unwrap();
    assert_eq!(data[(1, 0, 2)], -9.0);

    args_from(&["-m", &model_arg]).run(false).unwrap();
    let data = ChannelStream::new(FitsCube::open(&model).unwrap().reader().unwrap())
        .materialize()
        .unwrap();
    assert_eq!(data[(1, 0, 2)], 1.0);

    let result = args_from(&["-m", &model_arg, "--median-npix", "0"]).run(false);
    assert!(matches!(result, Err(AlmaJvmError::Despeckle(_))));
}
