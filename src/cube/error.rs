// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

use crate::{beam::BeamError, io::FitsError, io::FileWriteError};

#[derive(Error, Debug)]
pub enum CubeError {
    #[error("'{file}': the primary HDU has {naxis} axes; only images with 2 to 4 axes are supported")]
    UnsupportedAxes { file: PathBuf, naxis: i64 },

    #[error("'{file}': couldn't determine the pixel scale (no CDELT or CD keys)")]
    NoPixelScale { file: PathBuf },

    #[error("'{file}': more than one spectral axis ({first} and {second})")]
    MultipleSpectralAxes {
        file: PathBuf,
        first: usize,
        second: usize,
    },

    #[error("'{file}': problem with the beams: {err}")]
    Beams { file: PathBuf, err: BeamError },

    #[error("Requested plane {index}, but there are only {num_planes} planes")]
    PlaneOutOfRange { index: usize, num_planes: usize },

    #[error("Expected a plane of shape {expected:?}, got {got:?}")]
    PlaneShape {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Write(#[from] FileWriteError),
}
