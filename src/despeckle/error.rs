// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::{
    cube::CubeError,
    io::{FileWriteError, FitsError},
};

#[derive(Error, Debug)]
pub enum DespeckleError {
    #[error("The median window must contain at least one channel")]
    EmptyWindow,

    #[error("The despeckling threshold must be a finite, non-negative number, got {threshold_factor}")]
    BadThreshold { threshold_factor: f64 },

    #[error(transparent)]
    Cube(#[from] CubeError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Write(#[from] FileWriteError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
