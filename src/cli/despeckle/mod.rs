// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests;

use std::path::PathBuf;

use clap::Parser;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{common::ARG_FILE_HELP, AlmaJvmError};
use crate::{
    constants::{DEFAULT_MEDIAN_NPIX, DEFAULT_THRESHOLD_FACTOR},
    despeckle::{commit_despeckled, DespeckleParams},
};

lazy_static::lazy_static! {
    static ref MEDIAN_NPIX_HELP: String =
        format!("The number of channels in the running median. Default: {DEFAULT_MEDIAN_NPIX}");

    static ref THRESHOLD_FACTOR_HELP: String =
        format!("A pixel is replaced by the running median when it differs from the median by more than this factor times the median's magnitude. Default: {DEFAULT_THRESHOLD_FACTOR}");
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct DespeckleCliArgs {
    /// The model cube to despeckle. It is overwritten.
    #[clap(short, long, help_heading = "INPUT FILES")]
    model: Option<PathBuf>,

    #[clap(long, help = MEDIAN_NPIX_HELP.as_str(), help_heading = "DESPECKLING")]
    median_npix: Option<usize>,

    #[clap(long, help = THRESHOLD_FACTOR_HELP.as_str(), help_heading = "DESPECKLING")]
    threshold_factor: Option<f64>,
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct DespeckleArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(rename = "despeckle")]
    #[serde(default)]
    despeckle_args: DespeckleCliArgs,
}

#[derive(Error, Debug)]
pub(super) enum DespeckleArgsError {
    #[error("No model cube was supplied")]
    NoModel,

    #[error("The model cube '{0}' doesn't exist")]
    ModelMissing(PathBuf),
}

impl DespeckleArgs {
    pub(super) fn merge(self) -> Result<DespeckleArgs, AlmaJvmError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let DespeckleArgs {
                args_file: _,
                despeckle_args,
            } = unpack_arg_file!(arg_file);

            Ok(DespeckleArgs {
                args_file: None,
                despeckle_args: DespeckleCliArgs {
                    model: cli_args.despeckle_args.model.or(despeckle_args.model),
                    median_npix: cli_args
                        .despeckle_args
                        .median_npix
                        .or(despeckle_args.median_npix),
                    threshold_factor: cli_args
                        .despeckle_args
                        .threshold_factor
                        .or(despeckle_args.threshold_factor),
                },
            })
        } else {
            Ok(cli_args)
        }
    }

    /// The parameters themselves are checked when despeckling starts.
    fn parse(self) -> Result<(PathBuf, DespeckleParams), DespeckleArgsError> {
        let DespeckleCliArgs {
            model,
            median_npix,
            threshold_factor,
        } = self.despeckle_args;

        let model = model.ok_or(DespeckleArgsError::NoModel)?;
        if !model.exists() {
            return Err(DespeckleArgsError::ModelMissing(model));
        }

        Ok((
            model,
            DespeckleParams {
                median_npix: median_npix.unwrap_or(DEFAULT_MEDIAN_NPIX),
                threshold_factor: threshold_factor.unwrap_or(DEFAULT_THRESHOLD_FACTOR),
            },
        ))
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), AlmaJvmError> {
        trace!("{:#?}", self);
        let (model, params) = self.parse()?;

        info!("Model cube: {}", model.display());
        info!(
            "Median window: {} channels, threshold factor: {}",
            params.median_npix, params.threshold_factor
        );

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        let summary = commit_despeckled(&model, &params)?;
        info!(
            "Replaced {} pixels over {} channels",
            summary.num_replaced, summary.num_planes
        );
        Ok(())
    }
}
