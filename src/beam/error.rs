// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with synthesized beams.

use thiserror::Error;

use super::Beam;

#[derive(Error, Debug)]
pub enum BeamError {
    #[error("Beam {larger} can't be deconvolved by {smaller}")]
    Deconvolve { larger: Beam, smaller: Beam },

    #[error("Couldn't find a common beam for {num_beams} beams with tolerance {tolerance}")]
    CommonBeamNotFound { num_beams: usize, tolerance: f64 },

    #[error("No beams were supplied to fit a common beam")]
    NoBeams,

    #[error("No common-beam fit attempts were configured")]
    NoAttempts,

    #[error("The beam table columns have differing lengths")]
    TableLength,

    #[error("The beam table refers to channel {chan}, but the cube has {num_chans} channels")]
    TableChannel { chan: i64, num_chans: usize },
}
