// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from finalizing a cube.

use std::path::PathBuf;

use thiserror::Error;

use super::CubeVariant;
use crate::{
    beam::BeamError,
    config::RuntimeConfigError,
    cube::CubeError,
    io::FileWriteError,
    jvm::{ConvolveError, EpsilonError, RescaleError},
};

#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("Couldn't find the {variant} cube for '{basename}' (tried {tried:?})")]
    MissingInput {
        basename: PathBuf,
        variant: CubeVariant,
        tried: Vec<PathBuf>,
    },

    #[error("The {variant} cube has shape {got:?} (channels, y, x), but the image cube has shape {expected:?}")]
    ShapeMismatch {
        variant: CubeVariant,
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },

    #[error("Neither the PSF nor the image cube of '{basename}' has any beam information")]
    NoBeams { basename: PathBuf },

    #[error("Every channel of '{basename}' has a bad beam or an empty PSF; there is nothing to correct")]
    NoGoodChannels { basename: PathBuf },

    #[error("Couldn't fit a common beam: {0}")]
    BeamFit(#[from] BeamError),

    #[error(transparent)]
    Epsilon(#[from] EpsilonError),

    #[error(transparent)]
    Convolve(#[from] ConvolveError),

    #[error(transparent)]
    Rescale(#[from] RescaleError),

    #[error(transparent)]
    Cube(#[from] CubeError),

    #[error(transparent)]
    Write(#[from] FileWriteError),

    #[error(transparent)]
    RuntimeConfig(#[from] RuntimeConfigError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
