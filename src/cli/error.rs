// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all alma-jvm-related errors. This should be the *only*
//! error enum that is publicly visible.

use thiserror::Error;

use super::{
    beam_correct::BeamCorrectArgsError, common::RuntimeArgsError,
    despeckle::DespeckleArgsError,
};
use crate::{
    beam::BeamError,
    config::RuntimeConfigError,
    cube::CubeError,
    despeckle::DespeckleError,
    finalize::FinalizeError,
    io::{FileWriteError, FitsError},
    jvm::{ConvolveError, EpsilonError, RescaleError},
};

/// The *only* publicly visible error from alma-jvm. Each category carries a
/// hint on what can be done about it.
#[derive(Error, Debug)]
pub enum AlmaJvmError {
    /// An error related to beam-correct arguments.
    #[error("{0}\n\nSee `alma-jvm beam-correct --help` for the available options.")]
    BeamCorrect(String),

    /// An error related to despeckle arguments.
    #[error("{0}\n\nSee `alma-jvm despeckle --help` for the available options.")]
    Despeckle(String),

    /// An input cube couldn't be found or doesn't fit with the others.
    #[error("{0}\n\nAn imaging run needs <basename>.image.fits, .model.fits, .residual.fits and .psf.fits of the same shape, and .pb.fits unless --no-pbcor is given.")]
    Inputs(String),

    /// An error related to beams or the common beam.
    #[error("{0}\n\nIf the beams vary a lot between channels, try a smaller --bad-beam-threshold or more --tolerances.")]
    Beam(String),

    /// An error related to measuring epsilon from the PSF.
    #[error("{0}\n\nThe size of the PSF cutout searched for the first null is set by --max-npix-peak.")]
    Epsilon(String),

    /// An error related to scratch space and threads.
    #[error("{0}\n\nSee the RUNTIME options of `alma-jvm beam-correct --help`.")]
    Runtime(String),

    /// An error related to argument files.
    #[error("{0}\n\nArgument files are TOML or JSON, with the same keys as the long command-line options.")]
    ArgFile(String),

    /// A cfitsio error. Because these are usually quite spartan, some
    /// suggestions are provided here.
    #[error("cfitsio error: {0}\n\nIf you don't know what this means, try turning up verbosity (-v or -vv) and maybe disabling progress bars.")]
    Cfitsio(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

// Binary sub-command errors.

impl From<BeamCorrectArgsError> for AlmaJvmError {
    fn from(e: BeamCorrectArgsError) -> Self {
        match e {
            BeamCorrectArgsError::NoBasename
            | BeamCorrectArgsError::NoTolerances
            | BeamCorrectArgsError::BadTolerance(_)
            | BeamCorrectArgsError::BadBeamThreshold(_)
            | BeamCorrectArgsError::ConflictingBadBeamThreshold
            | BeamCorrectArgsError::CutoutTooSmall(_) => Self::BeamCorrect(e.to_string()),
            BeamCorrectArgsError::Runtime(e) => Self::from(e),
        }
    }
}

impl From<DespeckleArgsError> for AlmaJvmError {
    fn from(e: DespeckleArgsError) -> Self {
        match e {
            DespeckleArgsError::NoModel | DespeckleArgsError::ModelMissing(_) => {
                Self::Despeckle(e.to_string())
            }
        }
    }
}

impl From<RuntimeArgsError> for AlmaJvmError {
    fn from(e: RuntimeArgsError) -> Self {
        Self::Runtime(e.to_string())
    }
}

impl From<FinalizeError> for AlmaJvmError {
    fn from(e: FinalizeError) -> Self {
        let s = e.to_string();
        match e {
            FinalizeError::MissingInput { .. } | FinalizeError::ShapeMismatch { .. } => {
                Self::Inputs(s)
            }
            FinalizeError::NoBeams { .. } | FinalizeError::NoGoodChannels { .. } => Self::Beam(s),
            FinalizeError::BeamFit(e) => Self::from(e),
            FinalizeError::Epsilon(e) => Self::from(e),
            FinalizeError::Convolve(e) => Self::from(e),
            FinalizeError::Rescale(e) => Self::from(e),
            FinalizeError::Cube(e) => Self::from(e),
            FinalizeError::Write(e) => Self::from(e),
            FinalizeError::RuntimeConfig(e) => Self::from(e),
            FinalizeError::IO(e) => Self::from(e),
        }
    }
}

impl From<DespeckleError> for AlmaJvmError {
    fn from(e: DespeckleError) -> Self {
        let s = e.to_string();
        match e {
            DespeckleError::EmptyWindow | DespeckleError::BadThreshold { .. } => {
                Self::Despeckle(s)
            }
            DespeckleError::Cube(e) => Self::from(e),
            DespeckleError::Fits(e) => Self::from(e),
            DespeckleError::Write(e) => Self::from(e),
            DespeckleError::IO(e) => Self::from(e),
        }
    }
}

// Library code errors.

impl From<BeamError> for AlmaJvmError {
    fn from(e: BeamError) -> Self {
        Self::Beam(e.to_string())
    }
}

impl From<EpsilonError> for AlmaJvmError {
    fn from(e: EpsilonError) -> Self {
        let s = e.to_string();
        match e {
            EpsilonError::NoPeak { .. }
            | EpsilonError::NoFirstNull { .. }
            | EpsilonError::InvalidEpsilon { .. }
            | EpsilonError::CutoutTooSmall { .. } => Self::Epsilon(s),
            EpsilonError::MissingBeam { .. } => Self::Beam(s),
            EpsilonError::Beam(e) => Self::from(e),
            EpsilonError::Cube(e) => Self::from(e),
        }
    }
}

impl From<ConvolveError> for AlmaJvmError {
    fn from(e: ConvolveError) -> Self {
        let s = e.to_string();
        match e {
            ConvolveError::PixelBeam { .. } => Self::Beam(s),
            ConvolveError::Shape { .. } => Self::Generic(s),
            ConvolveError::Cube(e) => Self::from(e),
        }
    }
}

impl From<RescaleError> for AlmaJvmError {
    fn from(e: RescaleError) -> Self {
        let s = e.to_string();
        match e {
            RescaleError::ShapeMismatch { .. }
            | RescaleError::ChannelMismatch { .. }
            | RescaleError::MissingEpsilon { .. }
            | RescaleError::NoOutputPath
            | RescaleError::PlaneCount { .. } => Self::Generic(s),
            RescaleError::Convolve(e) => Self::from(e),
            RescaleError::Cube(e) => Self::from(e),
        }
    }
}

impl From<CubeError> for AlmaJvmError {
    fn from(e: CubeError) -> Self {
        let s = e.to_string();
        match e {
            CubeError::UnsupportedAxes { .. }
            | CubeError::NoPixelScale { .. }
            | CubeError::MultipleSpectralAxes { .. } => Self::Inputs(s),
            CubeError::Beams { .. } => Self::Beam(s),
            CubeError::PlaneOutOfRange { .. }
            | CubeError::PlaneShape { .. }
            | CubeError::Shape(_) => Self::Generic(s),
            CubeError::Fits(e) => Self::from(e),
            CubeError::Write(e) => Self::from(e),
        }
    }
}

impl From<RuntimeConfigError> for AlmaJvmError {
    fn from(e: RuntimeConfigError) -> Self {
        Self::Runtime(e.to_string())
    }
}

impl From<FitsError> for AlmaJvmError {
    fn from(e: FitsError) -> Self {
        Self::Cfitsio(e.to_string())
    }
}

impl From<FileWriteError> for AlmaJvmError {
    fn from(e: FileWriteError) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<std::io::Error> for AlmaJvmError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
