// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpful functions for tests: synthetic PSFs and FITS cubes.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use fitsio::{
    images::{ImageDescription, ImageType},
    tables::{ColumnDataType, ColumnDescription},
    FitsFile,
};
use ndarray::prelude::*;

use crate::{
    beam::Beam,
    cube::FitsCube,
    io::read::fits::{fits_get_optional_key, fits_open, fits_open_hdu},
};

/// 0.1 arcsec pixels.
pub(crate) const PIXEL_SCALE: f64 = 0.1 / 3600.0;

/// A circular Gaussian main lobe of FWHM `fwhm_px` pixels with a negative
/// sidelobe ring, centred on `centre` (y, x). The first minimum of the radial
/// |PSF| profile lies between 5 and 6 pixels for a 3 pixel FWHM.
pub(crate) fn psf_plane(shape: (usize, usize), centre: (usize, usize), fwhm_px: f64) -> Array2<f32> {
    let four_ln2 = 4.0 * std::f64::consts::LN_2;
    Array2::from_shape_fn(shape, |(y, x)| {
        let dy = y as f64 - centre.0 as f64;
        let dx = x as f64 - centre.1 as f64;
        let r2 = dy * dy + dx * dx;
        let r = r2.sqrt();
        let main_lobe = (-four_ln2 * r2 / (fwhm_px * fwhm_px)).exp();
        let ring = -0.05 * (-(r - 11.0).powi(2) / (2.0 * 1.5 * 1.5)).exp();
        (main_lobe + ring) as f32
    })
}

/// The value of a key in the primary HDU of a FITS file, read by cfitsio.
pub(crate) fn read_primary_key<T: FromStr>(path: &Path, key: &str) -> Option<T> {
    let mut fptr = fits_open(path).unwrap();
    let hdu = fits_open_hdu(&mut fptr, 0).unwrap();
    fits_get_optional_key(&mut fptr, &hdu, key).unwrap()
}

/// How many cards of the primary HDU have this keyword (in any case).
pub(crate) fn count_primary_cards(path: &Path, key: &str) -> usize {
    FitsCube::open(path)
        .unwrap()
        .header()
        .cards_with_keyword(key)
        .count()
}

/// How beams are attached to a test cube.
pub(crate) enum TestBeams<'a> {
    None,
    /// BMAJ/BMIN/BPA header keys.
    Header(Beam),
    /// A CASA-style BEAMS table (arcsec).
    Table(&'a [Beam]),
}

/// Write `data` (channel, y, x) as a FITS cube with a celestial and spectral
/// WCS. With `stokes`, a degenerate Stokes axis is put before the spectral
/// axis, the way tclean lays out its cubes.
pub(crate) fn write_test_cube(path: &Path, data: ArrayView3<f32>, beams: TestBeams, stokes: bool) {
    let (num_chans, ny, nx) = data.dim();
    let dims: Vec<usize> = if stokes {
        vec![num_chans, 1, ny, nx]
    } else {
        vec![num_chans, ny, nx]
    };
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &dims,
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
    hdu.write_key(&mut fptr, "OBJECT", "G333.60").unwrap();
    hdu.write_key(&mut fptr, "TELESCOP", "ALMA").unwrap();
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
    let spectral_axis = if stokes {
        hdu.write_key(&mut fptr, "CTYPE3", "STOKES").unwrap();
        hdu.write_key(&mut fptr, "CRVAL3", 1.0).unwrap();
        hdu.write_key(&mut fptr, "CDELT3", 1.0).unwrap();
        hdu.write_key(&mut fptr, "CRPIX3", 1.0).unwrap();
        4
    } else {
        3
    };
    hdu.write_key(&mut fptr, &format!("CTYPE{spectral_axis}"), "FREQ").unwrap();
    hdu.write_key(&mut fptr, &format!("CRVAL{spectral_axis}"), 2.3e11).unwrap();
    hdu.write_key(&mut fptr, &format!("CDELT{spectral_axis}"), 2.44e5).unwrap();
    hdu.write_key(&mut fptr, &format!("CRPIX{spectral_axis}"), 1.0).unwrap();
    hdu.write_key(&mut fptr, &format!("CUNIT{spectral_axis}"), "Hz").unwrap();
    hdu.write_key(&mut fptr, "RADESYS", "ICRS").unwrap();
    hdu.write_key(&mut fptr, "SPECSYS", "LSRK").unwrap();
    hdu.write_key(&mut fptr, "RESTFRQ", 2.305380e11).unwrap();

    match beams {
        TestBeams::None => (),
        TestBeams::Header(beam) => {
            hdu.write_key(&mut fptr, "BMAJ", beam.major).unwrap();
            hdu.write_key(&mut fptr, "BMIN", beam.minor).unwrap();
            hdu.write_key(&mut fptr, "BPA", beam.pa).unwrap();
        }
        TestBeams::Table(beams) => {
            let cols = [
                ColumnDescription::new("BMAJ")
                    .with_type(ColumnDataType::Float)
                    .create()
                    .unwrap(),
                ColumnDescription::new("BMIN")
                    .with_type(ColumnDataType::Float)
                    .create()
                    .unwrap(),
                ColumnDescription::new("BPA")
                    .with_type(ColumnDataType::Float)
                    .create()
                    .unwrap(),
                ColumnDescription::new("CHAN")
                    .with_type(ColumnDataType::Int)
                    .create()
                    .unwrap(),
                ColumnDescription::new("POL")
                    .with_type(ColumnDataType::Int)
                    .create()
                    .unwrap(),
            ];
            let table = fptr.create_table("BEAMS", &cols).unwrap();
            table.write_key(&mut fptr, "TUNIT1", "arcsec").unwrap();
            table.write_key(&mut fptr, "TUNIT2", "arcsec").unwrap();
            table.write_key(&mut fptr, "TUNIT3", "deg").unwrap();
            let bmaj: Vec<f32> = beams.iter().map(|b| (b.major * 3600.0) as f32).collect();
            let bmin: Vec<f32> = beams.iter().map(|b| (b.minor * 3600.0) as f32).collect();
            let bpa: Vec<f32> = beams.iter().map(|b| b.pa as f32).collect();
            let chan: Vec<i32> = (0..beams.len() as i32).collect();
            let pol = vec![0_i32; beams.len()];
            table.write_col(&mut fptr, "BMAJ", &bmaj).unwrap();
            table.write_col(&mut fptr, "BMIN", &bmin).unwrap();
            table.write_col(&mut fptr, "BPA", &bpa).unwrap();
            table.write_col(&mut fptr, "CHAN", &chan).unwrap();
            table.write_col(&mut fptr, "POL", &pol).unwrap();
        }
    }
}

/// A synthetic imaging run.
pub(crate) struct TestRun {
    pub(crate) num_chans: usize,
    pub(crate) ny: usize,
    pub(crate) nx: usize,
    /// Channels whose PSF is all zeros (but whose beam is fine).
    pub(crate) zero_psf_chans: Vec<usize>,
    /// Image pixels this far from the edge are NaN.
    pub(crate) nan_border: usize,
    pub(crate) with_pb: bool,
}

impl Default for TestRun {
    fn default() -> Self {
        TestRun {
            num_chans: 5,
            ny: 48,
            nx: 40,
            zero_psf_chans: vec![2],
            nan_border: 4,
            with_pb: true,
        }
    }
}

/// The 3 pixel circular beam of every test run.
pub(crate) fn test_beam() -> Beam {
    Beam::new(3.0 * PIXEL_SCALE, 3.0 * PIXEL_SCALE, 0.0)
}

/// Write `<dir>/<name>.{image,model,residual,psf,pb}.fits` and return the
/// basename.
pub(crate) fn write_test_run(dir: &Path, name: &str, run: &TestRun) -> PathBuf {
    let basename = dir.join(name);
    let TestRun {
        num_chans,
        ny,
        nx,
        ref zero_psf_chans,
        nan_border,
        with_pb,
    } = *run;
    let shape = (num_chans, ny, nx);
    let inside =
        |y: usize, x: usize| (nan_border..ny - nan_border).contains(&y) && (nan_border..nx - nan_border).contains(&x);

    let mut psf = Array3::zeros(shape);
    for (c, mut plane) in psf.outer_iter_mut().enumerate() {
        if !zero_psf_chans.contains(&c) {
            plane.assign(&psf_plane((ny, nx), (ny / 2, nx / 2), 3.0));
        }
    }

    // A couple of point sources that move with channel.
    let mut model = Array3::<f32>::zeros(shape);
    for c in 0..num_chans {
        model[(c, ny / 2, nx / 2)] = 1.0;
        model[(c, ny / 2 + 5, nx / 2 - 3 + c % 3)] = 0.25;
    }
    let residual = Array3::from_shape_fn(shape, |(c, y, x)| {
        if inside(y, x) {
            0.01 * ((y as f32 * 0.7 + x as f32 * 1.3 + c as f32).sin())
        } else {
            f32::NAN
        }
    });
    let image = Array3::from_shape_fn(shape, |(c, y, x)| {
        if inside(y, x) {
            model[(c, y, x)] + residual[(c, y, x)]
        } else {
            f32::NAN
        }
    });

    let beams = vec![test_beam(); num_chans];
    let variant = |v: &str| {
        let mut p = basename.as_os_str().to_os_string();
        p.push(format!(".{v}.fits"));
        PathBuf::from(p)
    };
    write_test_cube(&variant("image"), image.view(), TestBeams::Table(&beams), true);
    write_test_cube(&variant("model"), model.view(), TestBeams::None, true);
    write_test_cube(&variant("residual"), residual.view(), TestBeams::None, true);
    write_test_cube(&variant("psf"), psf.view(), TestBeams::Table(&beams), true);
    if with_pb {
        let pb = Array3::from_shape_fn(shape, |(_, y, x)| {
            let dy = (y as f32 - ny as f32 / 2.0) / ny as f32;
            let dx = (x as f32 - nx as f32 / 2.0) / nx as f32;
            1.0 - (dy * dy + dx * dx)
        });
        write_test_cube(&variant("pb"), pb.view(), TestBeams::None, true);
    }

    basename
}
