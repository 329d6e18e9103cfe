// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-channel clean-to-dirty beam volume ratios.
//!
//! The dirty beam volume is integrated out to the "first null" of the PSF,
//! taken as the first local minimum of the radially averaged |PSF|, where the
//! radius is elliptical and follows the shape of the fitted clean beam. This
//! is a heuristic; a true Airy-like pattern has its null where the amplitude
//! crosses zero, which the binned |PSF| profile only approximates.

use std::collections::BTreeMap;

use log::{debug, trace};
use ndarray::prelude::*;
use rayon::prelude::*;

use super::EpsilonError;
use crate::{
    beam::{fit_common_beam_with_attempts, Beam, BeamFitAttempt, PerChannelBeamTable},
    cube::{ChannelStream, PlaneSource},
};

/// The result of [`epsilon_from_psf`]. All maps are keyed by original channel
/// index.
#[derive(Debug, Clone, PartialEq)]
pub struct EpsilonResult {
    pub epsilon: BTreeMap<usize, f64>,
    pub common_beam: Beam,
    /// The radius \[elliptical pixels\] of the first null of each channel.
    pub null_radii: BTreeMap<usize, usize>,
}

/// The epsilon of a single channel and how it was derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelEpsilon {
    pub epsilon: f64,
    pub null_radius: usize,
    /// The summed PSF inside the first null \[pixels\].
    pub dirty_volume: f64,
    /// The clean beam area \[pixels\].
    pub clean_volume: f64,
}

/// The elliptical radius of the offset (dy, dx) for a beam with position
/// angle `pa` \[radians\] and axis ratio `ratio` (minor / major). Offsets along
/// the major axis are unscaled.
#[inline]
fn elliptical_radius(dy: f64, dx: f64, sin_pa: f64, cos_pa: f64, ratio: f64) -> f64 {
    let along_minor = (dx * cos_pa + dy * sin_pa) / ratio;
    let along_major = dx * sin_pa - dy * cos_pa;
    along_minor.hypot(along_major)
}

/// Call `f(bin, value)` for every finite pixel of `cutout`, where `bin` is the
/// integer elliptical radius from `centre` (y, x).
fn for_each_binned_pixel<F>(cutout: ArrayView2<f32>, centre: (usize, usize), beam: &Beam, mut f: F)
where
    F: FnMut(usize, f64),
{
    let (sin_pa, cos_pa) = beam.pa.to_radians().sin_cos();
    let ratio = beam.minor / beam.major;
    for ((y, x), &value) in cutout.indexed_iter() {
        if !value.is_finite() {
            continue;
        }
        let dy = y as f64 - centre.0 as f64;
        let dx = x as f64 - centre.1 as f64;
        let r = elliptical_radius(dy, dx, sin_pa, cos_pa, ratio);
        f(r.floor() as usize, value as f64);
    }
}

/// The mean |value| of `cutout` in elliptical-radius bins `0..num_bins`
/// around `centre`. Bins without any pixels are NaN.
pub fn radial_profile(
    cutout: ArrayView2<f32>,
    centre: (usize, usize),
    beam: &Beam,
    num_bins: usize,
) -> Vec<f64> {
    let mut sums = vec![0.0; num_bins];
    let mut counts = vec![0_usize; num_bins];
    for_each_binned_pixel(cutout, centre, beam, |bin, value| {
        if bin < num_bins {
            sums[bin] += value.abs();
            counts[bin] += 1;
        }
    });
    sums.into_iter()
        .zip(counts)
        .map(|(s, c)| if c == 0 { f64::NAN } else { s / c as f64 })
        .collect()
}

/// The index of the first local minimum of `profile`. This is the first peak
/// of the negated profile: the ends of the profile never count, NaNs never
/// count, and a flat-bottomed minimum resolves to the middle of the flat
/// region (rounding down).
pub fn find_first_null(profile: &[f64]) -> Option<usize> {
    let n = profile.len();
    if n < 3 {
        return None;
    }
    let neg = |i: usize| -profile[i];
    let i_max = n - 1;
    let mut i = 1;
    while i < i_max {
        if neg(i - 1) < neg(i) {
            let mut i_ahead = i + 1;
            while i_ahead < i_max && neg(i_ahead) == neg(i) {
                i_ahead += 1;
            }
            if neg(i_ahead) < neg(i) {
                return Some((i + i_ahead - 1) / 2);
            }
        }
        i += 1;
    }
    None
}

/// The position (y, x) of the largest finite value of `plane`.
fn argmax(plane: ArrayView2<f32>) -> Option<(usize, usize)> {
    plane
        .indexed_iter()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(pos, _)| pos)
}

/// The region of `psf` within `max_npix_peak` pixels of its peak, clamped to
/// the plane. `None` if the plane has no finite pixels. Everything epsilon
/// needs is inside this region, and cutting a cutout again gives it back
/// unchanged.
pub fn peak_cutout(psf: ArrayView2<f32>, max_npix_peak: usize) -> Option<ArrayView2<f32>> {
    let (ny, nx) = psf.dim();
    let peak = argmax(psf)?;
    let y_range = peak.0.saturating_sub(max_npix_peak)..(peak.0 + max_npix_peak + 1).min(ny);
    let x_range = peak.1.saturating_sub(max_npix_peak)..(peak.1 + max_npix_peak + 1).min(nx);
    Some(psf.slice_move(s![y_range, x_range]))
}

/// Compute epsilon for a single PSF plane (or its [`peak_cutout`]). `chan` is
/// only used for errors.
pub fn epsilon_for_channel(
    chan: usize,
    psf: ArrayView2<f32>,
    beam: &Beam,
    pixel_area: f64,
    max_npix_peak: usize,
) -> Result<ChannelEpsilon, EpsilonError> {
    let cutout = peak_cutout(psf, max_npix_peak).ok_or(EpsilonError::NoPeak { chan })?;
    let centre = argmax(cutout).ok_or(EpsilonError::NoPeak { chan })?;

    let profile = radial_profile(cutout, centre, beam, max_npix_peak);
    let null_radius = find_first_null(&profile).ok_or(EpsilonError::NoFirstNull { chan })?;

    let mut dirty_volume = 0.0;
    for_each_binned_pixel(cutout, centre, beam, |bin, value| {
        if bin < null_radius {
            dirty_volume += value;
        }
    });

    let clean_volume = beam.pixels_per_beam(pixel_area);
    let epsilon = clean_volume / dirty_volume;
    trace!(
        "Channel {chan}: first null at {null_radius}, clean volume {clean_volume:.4}, dirty volume {dirty_volume:.4}, epsilon {epsilon:.4}"
    );
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(EpsilonError::InvalidEpsilon {
            chan,
            epsilon,
            dirty_volume,
        });
    }

    Ok(ChannelEpsilon {
        epsilon,
        null_radius,
        dirty_volume,
        clean_volume,
    })
}

/// Compute epsilon for every plane of a PSF stream, and the common beam of the
/// streamed channels. `beams` is indexed by the original channel indices
/// labelling the stream. Planes are read a batch at a time and processed in
/// parallel on `pool`; only the cutout around the peak of each plane is kept
/// once it has been read.
pub fn epsilon_from_psf<S: PlaneSource>(
    psf: ChannelStream<S>,
    beams: &PerChannelBeamTable,
    pixel_area: f64,
    max_npix_peak: usize,
    attempts: &[BeamFitAttempt],
    pool: &rayon::ThreadPool,
) -> Result<EpsilonResult, EpsilonError> {
    if max_npix_peak < 3 {
        return Err(EpsilonError::CutoutTooSmall { max_npix_peak });
    }
    let channel_beams = psf
        .labels()
        .iter()
        .map(|&c| beams.get(c).copied().ok_or(EpsilonError::MissingBeam { chan: c }))
        .collect::<Result<Vec<_>, _>>()?;
    let common_beam = fit_common_beam_with_attempts(&channel_beams, attempts)?;
    debug!("Common beam: {common_beam}");

    let batch_size = 2 * pool.current_num_threads();
    let mut epsilon = BTreeMap::new();
    let mut null_radii = BTreeMap::new();
    let mut psf = psf.peekable();
    while psf.peek().is_some() {
        let batch = psf
            .by_ref()
            .take(batch_size)
            .map(|plane| {
                let (chan, plane) = plane?;
                let cutout = peak_cutout(plane.view(), max_npix_peak)
                    .ok_or(EpsilonError::NoPeak { chan })?
                    .to_owned();
                Ok((chan, cutout))
            })
            .collect::<Result<Vec<_>, EpsilonError>>()?;
        let results = pool.install(|| {
            batch
                .par_iter()
                .map(|(chan, cutout)| {
                    let beam = beams
                        .get(*chan)
                        .ok_or(EpsilonError::MissingBeam { chan: *chan })?;
                    epsilon_for_channel(*chan, cutout.view(), beam, pixel_area, max_npix_peak)
                        .map(|e| (*chan, e))
                })
                .collect::<Result<Vec<_>, _>>()
        })?;
        for (chan, e) in results {
            epsilon.insert(chan, e.epsilon);
            null_radii.insert(chan, e.null_radius);
        }
    }

    Ok(EpsilonResult {
        epsilon,
        common_beam,
        null_radii,
    })
}
