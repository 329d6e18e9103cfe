// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Removing single-channel speckles from model cubes.
//!
//! A model pixel that differs from the median of its spectral neighbours by
//! more than `threshold_factor` times that median is replaced by the median.
//! The window is centred on each channel and reflected at the edges of the
//! cube (d c b a | a b c d | d c b a).

mod error;
#[cfg(test)]
mod tests;

pub use error::DespeckleError;

use std::{collections::VecDeque, ops::Range, path::Path};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use ndarray::{parallel::prelude::*, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_MEDIAN_NPIX, DEFAULT_THRESHOLD_FACTOR},
    cube::{ChannelStream, CubeError, FitsCube, PlaneSource},
    io::{
        read::fits::fits_open_hdu,
        write::{
            fits::{fits_edit, fits_write_section},
            PendingFile,
        },
    },
    PROGRESS_BARS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DespeckleParams {
    /// The number of channels in the median window.
    pub median_npix: usize,

    /// The largest allowed |value - median| / |median|.
    pub threshold_factor: f64,
}

impl Default for DespeckleParams {
    fn default() -> Self {
        DespeckleParams {
            median_npix: DEFAULT_MEDIAN_NPIX,
            threshold_factor: DEFAULT_THRESHOLD_FACTOR,
        }
    }
}

impl DespeckleParams {
    fn validate(&self) -> Result<(), DespeckleError> {
        if self.median_npix == 0 {
            return Err(DespeckleError::EmptyWindow);
        }
        if !(self.threshold_factor.is_finite() && self.threshold_factor >= 0.0) {
            return Err(DespeckleError::BadThreshold {
                threshold_factor: self.threshold_factor,
            });
        }
        Ok(())
    }
}

/// Map a possibly out-of-range channel index into `0..n` by reflecting about
/// the edges of the cube.
pub(crate) fn reflect_index(mut i: isize, n: usize) -> usize {
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

/// The (reflected) channels in the median window of channel `chan`.
pub(crate) fn median_window(chan: usize, median_npix: usize, num_planes: usize) -> Vec<usize> {
    let start = chan as isize - (median_npix / 2) as isize;
    (start..start + median_npix as isize)
        .map(|i| reflect_index(i, num_planes))
        .collect()
}

/// The median of the finite values in `buf`. For an even number of values,
/// the upper of the two middle values. NaN if nothing is finite.
fn finite_median(buf: &mut Vec<f32>) -> f32 {
    buf.retain(|v| v.is_finite());
    if buf.is_empty() {
        return f32::NAN;
    }
    buf.sort_unstable_by(f32::total_cmp);
    buf[buf.len() / 2]
}

/// Is `value` a speckle compared to `median`? A non-zero value over a zero
/// median always is; NaNs never are.
#[inline]
fn is_speckle(value: f32, median: f32, threshold_factor: f64) -> bool {
    let (v, m) = (value as f64, median as f64);
    (v - m).abs() / m.abs() > threshold_factor
}

/// Despeckled planes of a [`PlaneSource`]. Only the planes of one median
/// window are kept in memory.
pub struct Despeckled<S> {
    source: S,
    params: DespeckleParams,
    cache: VecDeque<(usize, Array2<f32>)>,
    num_replaced: usize,
}

impl<S: PlaneSource> Despeckled<S> {
    /// The number of pixels replaced so far.
    pub fn num_replaced(&self) -> usize {
        self.num_replaced
    }

    /// Read `window`'s planes into the cache, evicting the oldest planes that
    /// aren't needed.
    fn fill_cache(&mut self, window: &[usize]) -> Result<(), CubeError> {
        for &i in window {
            if self.cache.iter().any(|(c, _)| *c == i) {
                continue;
            }
            let plane = self.source.read_plane(i)?;
            self.cache.push_back((i, plane));
            while self.cache.len() > self.params.median_npix {
                match self.cache.iter().position(|(c, _)| !window.contains(c)) {
                    Some(pos) => {
                        self.cache.remove(pos);
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    fn cached(&self, chan: usize) -> Option<&Array2<f32>> {
        self.cache.iter().find(|(c, _)| *c == chan).map(|(_, p)| p)
    }
}

impl<S: PlaneSource> PlaneSource for Despeckled<S> {
    fn num_planes(&self) -> usize {
        self.source.num_planes()
    }

    fn plane_shape(&self) -> (usize, usize) {
        self.source.plane_shape()
    }

    fn read_plane(&mut self, index: usize) -> Result<Array2<f32>, CubeError> {
        let num_planes = self.num_planes();
        if index >= num_planes {
            return Err(CubeError::PlaneOutOfRange { index, num_planes });
        }
        let window = median_window(index, self.params.median_npix, num_planes);
        self.fill_cache(&window)?;

        let planes: Vec<&Array2<f32>> = window.iter().filter_map(|&c| self.cached(c)).collect();
        let Some(centre) = self.cached(index) else {
            return Err(CubeError::PlaneOutOfRange { index, num_planes });
        };
        let threshold_factor = self.params.threshold_factor;

        let mut out = centre.clone();
        let num_replaced: usize = out
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(y, mut row)| {
                let mut buf = Vec::with_capacity(planes.len());
                let mut n = 0;
                for (x, v) in row.iter_mut().enumerate() {
                    buf.clear();
                    buf.extend(planes.iter().map(|p| p[(y, x)]));
                    let median = finite_median(&mut buf);
                    if is_speckle(*v, median, threshold_factor) {
                        *v = median;
                        n += 1;
                    }
                }
                n
            })
            .sum();
        self.num_replaced += num_replaced;
        Ok(out)
    }

    fn read_rows(&mut self, index: usize, rows: Range<usize>) -> Result<Array2<f32>, CubeError> {
        let plane = self.read_plane(index)?;
        let ny = plane.len_of(Axis(0));
        let rows = rows.start.min(ny)..rows.end.min(ny);
        Ok(plane.slice(s![rows, ..]).to_owned())
    }
}

/// Despeckle the planes of `source`. Nothing is read until the returned
/// stream is iterated.
pub fn despeckle<S: PlaneSource>(
    source: S,
    params: &DespeckleParams,
) -> Result<ChannelStream<Despeckled<S>>, DespeckleError> {
    params.validate()?;
    Ok(ChannelStream::new(Despeckled {
        source,
        params: params.clone(),
        cache: VecDeque::with_capacity(params.median_npix + 1),
        num_replaced: 0,
    }))
}

/// What [`commit_despeckled`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DespeckleSummary {
    pub num_planes: usize,
    pub num_replaced: usize,
}

/// Despeckle the FITS cube at `path` in place. The despeckled cube is written
/// into a copy of the file that only replaces the original once every plane
/// has been written.
pub fn commit_despeckled(
    path: &Path,
    params: &DespeckleParams,
) -> Result<DespeckleSummary, DespeckleError> {
    let cube = FitsCube::open(path)?;
    let mut stream = despeckle(cube.reader()?, params)?;
    let num_planes = stream.num_planes();
    info!(
        "Despeckling {} ({num_planes} channels, window {}, threshold {})",
        path.display(),
        params.median_npix,
        params.threshold_factor
    );

    let pending = PendingFile::new(path)?;
    std::fs::copy(path, pending.path())?;
    let mut fptr = fits_edit(pending.path())?;
    let hdu = fits_open_hdu(&mut fptr, 0)?;

    let progress = ProgressBar::with_draw_target(
        Some(num_planes as _),
        if PROGRESS_BARS.load() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg}: [{wide_bar:.blue}] {pos:3}/{len:3} channels ({elapsed_precise}<{eta_precise})")
            .unwrap()
            .progress_chars("=> "),
    )
    .with_message("Despeckling");

    for plane in stream.by_ref() {
        let (chan, plane) = plane?;
        let data: Vec<f32> = plane.iter().copied().collect();
        fits_write_section(&mut fptr, &hdu, cube.plane_offset(chan), &data)?;
        progress.inc(1);
    }
    progress.abandon_with_message("Finished despeckling");

    // cfitsio flushes on close.
    drop(fptr);
    pending.commit()?;

    let num_replaced = stream.into_source().num_replaced();
    info!("Despeckled {}: replaced {num_replaced} pixels", path.display());
    Ok(DespeckleSummary {
        num_planes,
        num_replaced,
    })
}
