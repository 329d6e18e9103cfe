// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs;

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use crate::{alma_jvm, get_cmd_output, read_cube, variant_path, write_run};

#[test]
fn test_dry_run_writes_nothing() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let basename = write_run(tmp_dir.path(), true);

    #[rustfmt::skip]
    let cmd = alma_jvm()
        .args([
            "beam-correct",
            "--basename", &basename.display().to_string(),
            "--dry-run",
        ])
        .ok();
    assert!(cmd.is_ok(), "beam-correct --dry-run failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Dry run"), "{stdout}");
    assert!(!variant_path(&basename, "JvM.image").exists());
}

#[test]
fn test_beam_correct_writes_outputs() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let basename = write_run(tmp_dir.path(), true);

    #[rustfmt::skip]
    let cmd = alma_jvm()
        .args([
            "jvm",
            "-b", &basename.display().to_string(),
            "--scratch-dir", &tmp_dir.path().display().to_string(),
            "--num-workers", "2",
        ])
        .ok();
    assert!(cmd.is_ok(), "beam-correct failed: {}", cmd.err().unwrap());

    // The outputs are cropped to where the image is finite.
    let jvm = read_cube(&variant_path(&basename, "JvM.image"));
    assert_eq!(jvm.dim(), (3, 32, 24));
    assert!(jvm.iter().all(|v| v.is_finite()));
    // The restored point source sits at the centre of the input.
    assert!(jvm[(0, 16, 12)] > 0.5);

    let pbcor = read_cube(&variant_path(&basename, "JvM.image.pbcor"));
    assert_eq!(pbcor.dim(), jvm.dim());
    for (p, j) in pbcor.iter().zip(jvm.iter()) {
        assert_abs_diff_eq!(*p, *j / 0.5, epsilon = 1e-5);
    }

    let flat_pb = read_cube(&variant_path(&basename, "flatpb"));
    assert_eq!(flat_pb.dim(), (1, 32, 24));
    assert_abs_diff_eq!(flat_pb[(0, 0, 0)], 0.5);

    for variant in ["model", "residual"] {
        let exts: &[&str] = if cfg!(feature = "bzip2") {
            &["gz", "bz2"]
        } else {
            &["gz"]
        };
        for ext in exts {
            let mut copy = variant_path(&basename, &format!("{variant}.minimized")).into_os_string();
            copy.push(format!(".{ext}"));
            assert!(
                fs::metadata(&copy).map(|m| m.len() > 0).unwrap_or(false),
                "{copy:?} wasn't written"
            );
        }
    }
}

#[test]
fn test_missing_basename() {
    let cmd = alma_jvm().args(["beam-correct"]).ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("No basename was supplied"), "{stderr}");
    assert!(stderr.contains("alma-jvm beam-correct --help"), "{stderr}");
}

#[test]
fn test_missing_pb() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let basename = write_run(tmp_dir.path(), false);
    let basename_arg = basename.display().to_string();

    let cmd = alma_jvm()
        .args(["beam-correct", "-b", &basename_arg, "--no-minimized-copies"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("pb"), "{stderr}");

    let cmd = alma_jvm()
        .args([
            "beam-correct",
            "-b",
            &basename_arg,
            "--no-pbcor",
            "--no-minimized-copies",
        ])
        .ok();
    assert!(cmd.is_ok(), "beam-correct --no-pbcor failed: {}", cmd.err().unwrap());
    assert!(variant_path(&basename, "JvM.image").exists());
    assert!(!variant_path(&basename, "JvM.image.pbcor").exists());
}

#[test]
fn test_arg_file_and_save_toml() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let basename = write_run(tmp_dir.path(), true);
    let arg_file = tmp_dir.path().join("args.toml");
    fs::write(
        &arg_file,
        format!(
            "[beam-correct]\nbasename = \"{}\"\nmax_npix_peak = 20\n",
            basename.display()
        ),
    )
    .unwrap();
    let saved = tmp_dir.path().join("saved.toml");

    #[rustfmt::skip]
    let cmd = alma_jvm()
        .args([
            "beam-correct",
            &arg_file.display().to_string(),
            "--tolerances", "0.02",
            "--save-toml", &saved.display().to_string(),
            "--dry-run",
        ])
        .ok();
    assert!(cmd.is_ok(), "beam-correct with an arg file failed: {}", cmd.err().unwrap());

    let saved = fs::read_to_string(saved).unwrap();
    assert!(saved.contains("[beam-correct]"), "{saved}");
    assert!(saved.contains("max_npix_peak = 20"), "{saved}");
    assert!(saved.contains("tolerances = [0.02]"), "{saved}");
    assert!(saved.contains(&basename.display().to_string()), "{saved}");
}
