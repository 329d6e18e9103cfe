// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.


use std::path::PathBuf;

use clap::Parser;
use itertools::Itertools;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use thiserror::Error;

use super::{
    common::{RuntimeArgs, RuntimeArgsError, ARG_FILE_HELP},
    AlmaJvmError,
};
use crate::{
    beam::BeamFitAttempt,
    config::RuntimeConfig,
    constants::{DEFAULT_BAD_BEAM_THRESHOLD, DEFAULT_BEAM_FIT_ATTEMPTS, DEFAULT_MAX_NPIX_PEAK},
    finalize::{CubeFinalizer, CubeVariant, FinalizeOptions},
};

lazy_static::lazy_static! {
    static ref BASENAME_HELP: String =
        format!("The common prefix of the imaging run's cubes, e.g. 'G333.60_B3_spw0_12M' for 'G333.60_B3_spw0_12M.image.fits'. The cubes used are: {}",
                CubeVariant::iter().map(|v| format!("<basename>.{v}.fits")).join(", "));

    static ref MAX_NPIX_PEAK_HELP: String =
        format!("The half-size of the PSF cutout that is searched for the first null [pixels]. Default: {DEFAULT_MAX_NPIX_PEAK}");

    static ref TOLERANCES_HELP: String =
        format!("The tolerances tried, in order, when fitting a common beam. Default: {}",
                DEFAULT_BEAM_FIT_ATTEMPTS.iter().map(|(t, _)| t).join(","));

    static ref BAD_BEAM_THRESHOLD_HELP: String =
        format!("Channels whose beam major axis, minor axis or area differs from the median beam's by more than this fraction are excluded. Default: {DEFAULT_BAD_BEAM_THRESHOLD}");
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct BeamCorrectCliArgs {
    #[clap(short, long, help = BASENAME_HELP.as_str(), help_heading = "INPUT FILES")]
    basename: Option<PathBuf>,

    /// Don't write a primary-beam-corrected cube. The primary beam cube is then
    /// optional.
    #[clap(long, help_heading = "OUTPUT FILES")]
    #[serde(default)]
    no_pbcor: bool,

    /// Don't crop the outputs to the finite pixels of the image and the good
    /// channels.
    #[clap(long, help_heading = "OUTPUT FILES")]
    #[serde(default)]
    no_minimize: bool,

    /// Don't write gzip and bzip2 copies of the cropped model and residual.
    #[clap(long, help_heading = "OUTPUT FILES")]
    #[serde(default)]
    no_minimized_copies: bool,

    #[clap(long, help = MAX_NPIX_PEAK_HELP.as_str(), help_heading = "JVM")]
    max_npix_peak: Option<usize>,

    #[clap(long, multiple_values(true), value_delimiter = ',', help = TOLERANCES_HELP.as_str(), help_heading = "JVM")]
    tolerances: Option<Vec<f64>>,

    #[clap(long, help = BAD_BEAM_THRESHOLD_HELP.as_str(), help_heading = "JVM")]
    bad_beam_threshold: Option<f64>,

    /// Only exclude channels with unphysical beams, no matter how different
    /// they are from the median beam.
    #[clap(long, help_heading = "JVM")]
    #[serde(default)]
    no_bad_beam_threshold: bool,
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct BeamCorrectArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(rename = "beam-correct")]
    #[serde(default)]
    beam_correct_args: BeamCorrectCliArgs,

    #[clap(flatten)]
    #[serde(rename = "runtime")]
    #[serde(default)]
    runtime_args: RuntimeArgs,
}

/// Everything needed to finalize a cube.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct BeamCorrectParams {
    pub(super) basename: PathBuf,
    pub(super) options: FinalizeOptions,
    pub(super) config: RuntimeConfig,
}

#[derive(Error, Debug)]
pub(super) enum BeamCorrectArgsError {
    #[error("No basename was supplied")]
    NoBasename,

    #[error("At least one common-beam tolerance is needed")]
    NoTolerances,

    #[error("Common-beam tolerances must be positive and finite, got {0}")]
    BadTolerance(f64),

    #[error("The bad-beam threshold must be positive and finite, got {0}")]
    BadBeamThreshold(f64),

    #[error("Both a bad-beam threshold and 'no bad-beam threshold' were given")]
    ConflictingBadBeamThreshold,

    #[error("The PSF cutout half-size must be at least 3 pixels, got {0}")]
    CutoutTooSmall(usize),

    #[error(transparent)]
    Runtime(#[from] RuntimeArgsError),
}

impl BeamCorrectArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<BeamCorrectArgs, AlmaJvmError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let BeamCorrectArgs {
                args_file: _,
                beam_correct_args,
                runtime_args,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(BeamCorrectArgs {
                args_file: None,
                beam_correct_args: cli_args.beam_correct_args.merge(beam_correct_args),
                runtime_args: cli_args.runtime_args.merge(runtime_args),
            })
        } else {
            Ok(cli_args)
        }
    }

    fn parse(self) -> Result<BeamCorrectParams, BeamCorrectArgsError> {
        debug!("{:#?}", self);

        let Self {
            args_file: _,
            beam_correct_args:
                BeamCorrectCliArgs {
                    basename,
                    no_pbcor,
                    no_minimize,
                    no_minimized_copies,
                    max_npix_peak,
                    tolerances,
                    bad_beam_threshold,
                    no_bad_beam_threshold,
                },
            runtime_args,
        } = self;

        let basename = basename.ok_or(BeamCorrectArgsError::NoBasename)?;

        let max_npix_peak = max_npix_peak.unwrap_or(DEFAULT_MAX_NPIX_PEAK);
        if max_npix_peak < 3 {
            return Err(BeamCorrectArgsError::CutoutTooSmall(max_npix_peak));
        }

        let beam_fit_attempts = match tolerances {
            Some(tolerances) => {
                if tolerances.is_empty() {
                    return Err(BeamCorrectArgsError::NoTolerances);
                }
                tolerances
                    .into_iter()
                    .enumerate()
                    .map(|(i, t)| {
                        if t.is_finite() && t > 0.0 {
                            Ok(BeamFitAttempt::new(t, &format!("user tolerance {}", i + 1)))
                        } else {
                            Err(BeamCorrectArgsError::BadTolerance(t))
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => FinalizeOptions::default().beam_fit_attempts,
        };

        let bad_beam_threshold = match (bad_beam_threshold, no_bad_beam_threshold) {
            (Some(_), true) => return Err(BeamCorrectArgsError::ConflictingBadBeamThreshold),
            (_, true) => None,
            (Some(t), false) if !(t.is_finite() && t > 0.0) => {
                return Err(BeamCorrectArgsError::BadBeamThreshold(t))
            }
            (Some(t), false) => Some(t),
            (None, false) => Some(DEFAULT_BAD_BEAM_THRESHOLD),
        };

        let config = runtime_args.parse()?;

        Ok(BeamCorrectParams {
            basename,
            options: FinalizeOptions {
                pbcor: !no_pbcor,
                minimize: !no_minimize,
                max_npix_peak,
                beam_fit_attempts,
                bad_beam_threshold,
                write_minimized_copies: !no_minimized_copies,
            },
            config,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), AlmaJvmError> {
        debug!("Converting arguments into parameters");
        trace!("{:#?}", self);
        let BeamCorrectParams {
            basename,
            options,
            config,
        } = self.parse()?;

        info!("Basename: {}", basename.display());
        info!(
            "Using {} worker threads ({} scheduler); scratch files in {}",
            config.effective_num_workers(),
            config.scheduler_kind,
            config.scratch_dir.display()
        );
        if !options.pbcor {
            info!("Not primary-beam correcting");
        }
        if !options.minimize {
            info!("Not cropping the outputs");
        }

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        let outputs = CubeFinalizer::new(config).beam_correct_cube(&basename, &options)?;
        info!("Wrote {}", outputs.jvm_image.display());
        if let Some(pbcor) = outputs.pbcor_image {
            info!("Wrote {}", pbcor.display());
        }
        if let Some(flat_pb) = outputs.flat_pb {
            info!("Wrote {}", flat_pb.display());
        }
        if !outputs.bad_channels.is_empty() {
            info!("Excluded channels: {:?}", outputs.bad_channels);
        }
        Ok(())
    }
}

impl BeamCorrectCliArgs {
    fn merge(self, other: Self) -> Self {
        Self {
            basename: self.basename.or(other.basename),
            no_pbcor: self.no_pbcor || other.no_pbcor,
            no_minimize: self.no_minimize || other.no_minimize,
            no_minimized_copies: self.no_minimized_copies || other.no_minimized_copies,
            max_npix_peak: self.max_npix_peak.or(other.max_npix_peak),
            tolerances: self.tolerances.or(other.tolerances),
            bad_beam_threshold: self.bad_beam_threshold.or(other.bad_beam_threshold),
            no_bad_beam_threshold: self.no_bad_beam_threshold || other.no_bad_beam_threshold,
        }
    }
}
