// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
JvM (Jorsater & van Moorsel) beam correction and finalizing of ALMA-IMF image
cubes.

The model cube of a CLEANed imaging run is convolved with a common restoring
beam and added to the residual scaled by the ratio of the clean-beam and
dirty-beam volumes, channel by channel. The results are cropped,
primary-beam corrected and annotated. See [`finalize::CubeFinalizer`].
 */

#[cfg(all(feature = "bzip2", feature = "cfitsio-static"))]
compile_error!(
    "static cfitsio and bzip2-sys both define bz_internal_error; disable the \"bzip2\" feature (--no-default-features) to link cfitsio statically"
);

pub mod beam;
mod cli;
pub mod config;
pub mod constants;
pub mod cube;
pub mod despeckle;
pub mod finalize;
pub(crate) mod io;
pub mod jvm;
mod misc;

#[cfg(test)]
mod tests;

use crossbeam_utils::atomic::AtomicCell;

/// Should progress bars be drawn? Only the binary turns these on.
pub static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);

// Re-exports.
pub use beam::{Beam, BeamError, PerChannelBeamTable};
pub use cli::{AlmaJvm, AlmaJvmError};
pub use config::{RuntimeConfig, SchedulerKind};
pub use cube::{ChannelStream, CubeError, FitsCube};
pub use despeckle::{commit_despeckled, DespeckleParams};
pub use finalize::{CubeFinalizer, CubeVariant, FinalizeError, FinalizeOptions, FinalizeOutputs};
pub use io::{FileWriteError, FitsError};
