// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod beam_correct;
mod despeckle;
mod no_stderr;

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use fitsio::{
    hdu::HduInfo,
    images::{ImageDescription, ImageType},
    FitsFile,
};
use ndarray::prelude::*;

/// 0.1 arcsec pixels.
const PIXEL_SCALE: f64 = 0.1 / 3600.0;
/// A 3 pixel FWHM.
const BEAM_FWHM: f64 = 3.0 * PIXEL_SCALE;

fn alma_jvm() -> Command {
    Command::cargo_bin("alma-jvm").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

fn variant_path(basename: &Path, variant: &str) -> PathBuf {
    let mut p = OsString::from(basename.as_os_str());
    p.push(format!(".{variant}.fits"));
    PathBuf::from(p)
}

/// Write `data` (channel, y, x) as a FITS cube with a celestial and spectral
/// WCS. With `beam`, the header carries BMAJ/BMIN/BPA.
fn write_cube(path: &Path, data: ArrayView3<f32>, beam: bool) {
    let (num_chans, ny, nx) = data.dim();
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &[num_chans, ny, nx],
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()
        .unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    let flat: Vec<f32> = data.iter().copied().collect();
    hdu.write_image(&mut fptr, &flat).unwrap();

    hdu.write_key(&mut fptr, "BUNIT", "Jy/beam").unwrap();
    hdu.write_key(&mut fptr, "CTYPE1", "RA---SIN").unwrap();
    hdu.write_key(&mut fptr, "CRVAL1", 250.29).unwrap();
    hdu.write_key(&mut fptr, "CDELT1", -PIXEL_SCALE).unwrap();
    hdu.write_key(&mut fptr, "CRPIX1", (nx / 2 + 1) as f64).unwrap();
    hdu.write_key(&mut fptr, "CUNIT1", "deg").unwrap();
    hdu.write_key(&mut fptr, "CTYPE2", "DEC--SIN").unwrap();
    hdu.write_key(&mut fptr, "CRVAL2", -50.1).unwrap();
    hdu.write_key(&mut fptr, "CDELT2", PIXEL_SCALE).unwrap();
    hdu.write_key(&mut fptr, "CRPIX2", (ny / 2 + 1) as f64).unwrap();
    hdu.write_key(&mut fptr, "CUNIT2", "deg").unwrap();
    hdu.write_key(&mut fptr, "CTYPE3", "FREQ").unwrap();
    hdu.write_key(&mut fptr, "CRVAL3", 2.3e11).unwrap();
    hdu.write_key(&mut fptr, "CDELT3", 2.44e5).unwrap();
    hdu.write_key(&mut fptr, "CRPIX3", 1.0).unwrap();
    hdu.write_key(&mut fptr, "CUNIT3", "Hz").unwrap();
    if beam {
        hdu.write_key(&mut fptr, "BMAJ", BEAM_FWHM).unwrap();
        hdu.write_key(&mut fptr, "BMIN", BEAM_FWHM).unwrap();
        hdu.write_key(&mut fptr, "BPA", 0.0).unwrap();
    }
}

fn read_cube(path: &Path) -> Array3<f32> {
    let mut fptr = FitsFile::open(path).unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => panic!("{} doesn't start with an image", path.display()),
    };
    let data: Vec<f32> = hdu.read_image(&mut fptr).unwrap();
    Array3::from_shape_vec((shape[0], shape[1], shape[2]), data).unwrap()
}

/// A Gaussian main lobe with a negative sidelobe ring, so that the radial
/// profile has a first null a few pixels out.
fn psf_plane(ny: usize, nx: usize) -> Array2<f32> {
    let four_ln2 = 4.0 * std::f64::consts::LN_2;
    Array2::from_shape_fn((ny, nx), |(y, x)| {
        let dy = y as f64 - (ny / 2) as f64;
        let dx = x as f64 - (nx / 2) as f64;
        let r2 = dy * dy + dx * dx;
        let main_lobe = (-four_ln2 * r2 / 9.0).exp();
        let ring = -0.05 * (-(r2.sqrt() - 11.0).powi(2) / 4.5).exp();
        (main_lobe + ring) as f32
    })
}

/// Write a small imaging run (`<dir>/run.{image,model,residual,psf,pb}.fits`)
/// and return its basename. The image is NaN within 4 pixels of its edges.
fn write_run(dir: &Path, with_pb: bool) -> PathBuf {
    let (num_chans, ny, nx) = (3, 40, 32);
    let basename = dir.join("run");

    let psf = Array3::from_shape_fn((num_chans, ny, nx), |(_, y, x)| psf_plane(ny, nx)[(y, x)]);
    let mut model = Array3::<f32>::zeros((num_chans, ny, nx));
    model.slice_mut(s![.., ny / 2, nx / 2]).fill(1.0);
    let residual = Array3::from_shape_fn((num_chans, ny, nx), |(c, y, x)| {
        0.01 * ((y as f32 * 0.7 + x as f32 * 1.3 + c as f32).sin())
    });
    let image = Array3::from_shape_fn((num_chans, ny, nx), |(c, y, x)| {
        if (4..ny - 4).contains(&y) && (4..nx - 4).contains(&x) {
            model[(c, y, x)] + residual[(c, y, x)]
        } else {
            f32::NAN
        }
    });

    write_cube(&variant_path(&basename, "image"), image.view(), true);
    write_cube(&variant_path(&basename, "model"), model.view(), false);
    write_cube(&variant_path(&basename, "residual"), residual.view(), false);
    write_cube(&variant_path(&basename, "psf"), psf.view(), true);
    if with_pb {
        let pb = Array3::from_elem((num_chans, ny, nx), 0.5_f32);
        write_cube(&variant_path(&basename, "pb"), pb.view(), false);
    }
    basename
}
