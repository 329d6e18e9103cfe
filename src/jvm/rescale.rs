// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Adding the epsilon-scaled residual to the convolved model.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use log::info;
use ndarray::prelude::*;

use super::RescaleError;
use crate::cube::{ChannelPlane, CubeWriter, OutputHeader};

/// `convolved + epsilon * residual`. Residual NaNs propagate.
pub fn rescale_plane(
    convolved: ArrayView2<f32>,
    epsilon: f64,
    residual: ArrayView2<f32>,
) -> Result<Array2<f32>, RescaleError> {
    if convolved.dim() != residual.dim() {
        return Err(RescaleError::ShapeMismatch {
            convolved: convolved.dim(),
            residual: residual.dim(),
        });
    }
    let mut restored = Array2::zeros(convolved.dim());
    azip!((r in &mut restored, &c in &convolved, &res in &residual) {
        *r = (c as f64 + epsilon * res as f64) as f32;
    });
    Ok(restored)
}

/// Lazily combine streams of convolved-model and residual planes. Both
/// streams must yield the same channels in the same order, and every channel
/// must have an epsilon.
pub fn rescale<'a, I, J, E1, E2>(
    convolved: I,
    epsilon: &'a BTreeMap<usize, f64>,
    residual: J,
) -> impl Iterator<Item = Result<ChannelPlane, RescaleError>> + 'a
where
    I: Iterator<Item = Result<ChannelPlane, E1>> + 'a,
    J: Iterator<Item = Result<ChannelPlane, E2>> + 'a,
    E1: Into<RescaleError>,
    E2: Into<RescaleError>,
{
    convolved.zip(residual).map(move |(c, r)| {
        let (c_chan, c_plane) = c.map_err(Into::into)?;
        let (r_chan, r_plane) = r.map_err(Into::into)?;
        if c_chan != r_chan {
            return Err(RescaleError::ChannelMismatch {
                convolved: c_chan,
                residual: r_chan,
            });
        }
        let &eps = epsilon
            .get(&c_chan)
            .ok_or(RescaleError::MissingEpsilon { chan: c_chan })?;
        Ok((c_chan, rescale_plane(c_plane.view(), eps, r_plane.view())?))
    })
}

/// Write a stream of restored planes to a FITS cube at `output`, along with the
/// epsilon table. Asking for a file without saying where it should go is an
/// error; nothing is silently skipped.
pub fn write_restored<I, E>(
    planes: I,
    output: Option<&Path>,
    num_planes: usize,
    plane_shape: (usize, usize),
    header: &OutputHeader,
    epsilon: &BTreeMap<usize, f64>,
) -> Result<PathBuf, RescaleError>
where
    I: Iterator<Item = Result<ChannelPlane, E>>,
    E: Into<RescaleError>,
{
    let output = output.ok_or(RescaleError::NoOutputPath)?;
    let mut writer = CubeWriter::create(output, num_planes, plane_shape, header)?;
    let mut num_written = 0;
    for plane in planes {
        let (_, plane) = plane.map_err(Into::into)?;
        writer.write_plane(num_written, plane.view())?;
        num_written += 1;
    }
    if num_written != num_planes {
        return Err(RescaleError::PlaneCount {
            expected: num_planes,
            got: num_written,
        });
    }
    writer.add_epsilon_table(epsilon)?;
    let path = writer.finish()?;
    info!("Wrote {}", path.display());
    Ok(path)
}
