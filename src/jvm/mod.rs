// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The numerical parts of the JvM correction: per-channel epsilon from the
//! dirty beam, convolving the model with the common beam, and adding the
//! rescaled residual.

pub mod convolve;
pub mod epsilon;
pub mod rescale;

pub use convolve::{beam_kernel, convolve_model, fft_convolve_2d, ModelConvolver};
pub use epsilon::{
    epsilon_for_channel, epsilon_from_psf, find_first_null, peak_cutout, radial_profile,
    ChannelEpsilon, EpsilonResult,
};
pub use rescale::{rescale, rescale_plane, write_restored};

use thiserror::Error;

use crate::{
    beam::{Beam, BeamError},
    cube::CubeError,
};

#[derive(Error, Debug)]
pub enum EpsilonError {
    #[error("Channel {chan}: the PSF has no finite pixels")]
    NoPeak { chan: usize },

    #[error("Channel {chan}: couldn't find the first null of the PSF")]
    NoFirstNull { chan: usize },

    #[error("Channel {chan}: epsilon is {epsilon} (dirty beam volume {dirty_volume}); it must be finite and positive")]
    InvalidEpsilon {
        chan: usize,
        epsilon: f64,
        dirty_volume: f64,
    },

    #[error("Channel {chan} has no beam")]
    MissingBeam { chan: usize },

    #[error("The PSF cutout half-size must be at least 3 pixels, got {max_npix_peak}")]
    CutoutTooSmall { max_npix_peak: usize },

    #[error(transparent)]
    Beam(#[from] BeamError),

    #[error(transparent)]
    Cube(#[from] CubeError),
}

#[derive(Error, Debug)]
pub enum ConvolveError {
    #[error("The common beam {common_beam} is smaller than a pixel: {err}")]
    PixelBeam { common_beam: Beam, err: BeamError },

    #[error("Expected a model plane of shape {expected:?}, got {got:?}")]
    Shape {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error(transparent)]
    Cube(#[from] CubeError),
}

#[derive(Error, Debug)]
pub enum RescaleError {
    #[error("Convolved model plane has shape {convolved:?}, but the residual plane has shape {residual:?}")]
    ShapeMismatch {
        convolved: (usize, usize),
        residual: (usize, usize),
    },

    #[error("Convolved model channel {convolved} was paired with residual channel {residual}")]
    ChannelMismatch { convolved: usize, residual: usize },

    #[error("No epsilon for channel {chan}")]
    MissingEpsilon { chan: usize },

    #[error("Asked to write the restored cube, but no output path was given")]
    NoOutputPath,

    #[error("Expected to write {expected} planes, but got {got}")]
    PlaneCount { expected: usize, got: usize },

    #[error(transparent)]
    Convolve(#[from] ConvolveError),

    #[error(transparent)]
    Cube(#[from] CubeError),
}
