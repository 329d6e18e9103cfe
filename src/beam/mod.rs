// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synthesized-beam descriptions.
//!
//! A [`Beam`] is an elliptical Gaussian described by its FWHM major and minor
//! axes and its position angle (east of north). All angles are stored in
//! degrees. Every cube carries a [`PerChannelBeamTable`] with exactly one beam
//! per channel; cubes with a single beam simply repeat it.
//!
//! Beam arithmetic is done with covariance matrices in a pixel-aligned frame
//! where +y is north and +x is west (the usual orientation of a radio image
//! with a negative RA increment). In this frame the major axis of a beam with
//! position angle θ points along (-sin θ, cos θ).

mod common;
mod error;

pub use common::{fit_common_beam, fit_common_beam_with_attempts, BeamFitAttempt};
pub use error::BeamError;

use std::f64::consts::{LN_2, PI};

use serde::{Deserialize, Serialize};

use crate::constants::DECONVOLVE_TOLERANCE;

/// FWHM = `FWHM_PER_SIGMA` * σ for a Gaussian.
pub(crate) const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// An elliptical Gaussian beam. Axes are FWHMs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    /// \[degrees\]
    pub major: f64,
    /// \[degrees\]
    pub minor: f64,
    /// Position angle east of north \[degrees\]
    pub pa: f64,
}

impl std::fmt::Display for Beam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.4}\" x {:.4}\" @ {:.2}°",
            self.major * 3600.0,
            self.minor * 3600.0,
            self.pa
        )
    }
}

/// The covariance matrix of a Gaussian, in the same units squared as the axes
/// it was made from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Covariance {
    pub(crate) xx: f64,
    pub(crate) yy: f64,
    pub(crate) xy: f64,
}

impl Covariance {
    pub(crate) fn eigenvalues(&self) -> (f64, f64) {
        let mean = (self.xx + self.yy) / 2.0;
        let diff = ((self.xx - self.yy) / 2.0).hypot(self.xy);
        (mean + diff, mean - diff)
    }

    pub(crate) fn determinant(&self) -> f64 {
        self.xx * self.yy - self.xy * self.xy
    }
}

impl Beam {
    pub fn new(major: f64, minor: f64, pa: f64) -> Beam {
        Beam { major, minor, pa }
    }

    /// Make a beam from axes in arcseconds and a position angle in degrees
    /// (the CASA beam-table convention).
    pub fn from_arcsec(major: f64, minor: f64, pa: f64) -> Beam {
        Beam {
            major: major / 3600.0,
            minor: minor / 3600.0,
            pa,
        }
    }

    /// A beam is physically meaningful if everything is finite and
    /// major >= minor > 0.
    pub fn is_valid(&self) -> bool {
        self.major.is_finite()
            && self.minor.is_finite()
            && self.pa.is_finite()
            && self.minor > 0.0
            && self.major >= self.minor
    }

    /// The solid angle of the beam \[degrees^2\].
    pub fn area(&self) -> f64 {
        PI / (4.0 * LN_2) * self.major * self.minor
    }

    /// The number of pixels (each with area `pixel_area` \[degrees^2\]) in the
    /// beam.
    pub fn pixels_per_beam(&self, pixel_area: f64) -> f64 {
        self.area() / pixel_area
    }

    /// A circular beam whose Gaussian area is exactly one pixel. Convolving a
    /// per-pixel quantity "from" this beam is how per-pixel model images are
    /// given a beam.
    pub fn pixel_beam(pixel_scale: f64) -> Beam {
        let fwhm = (4.0 * LN_2 / PI).sqrt() * pixel_scale;
        Beam {
            major: fwhm,
            minor: fwhm,
            pa: 0.0,
        }
    }

    pub(crate) fn covariance(&self) -> Covariance {
        let sig_maj2 = (self.major / FWHM_PER_SIGMA).powi(2);
        let sig_min2 = (self.minor / FWHM_PER_SIGMA).powi(2);
        let (s, c) = self.pa.to_radians().sin_cos();
        Covariance {
            xx: sig_maj2 * s * s + sig_min2 * c * c,
            yy: sig_maj2 * c * c + sig_min2 * s * s,
            xy: (sig_min2 - sig_maj2) * s * c,
        }
    }

    pub(crate) fn from_covariance(cov: Covariance) -> Beam {
        let (l_max, l_min) = cov.eigenvalues();
        let pa = 0.5 * (-2.0 * cov.xy).atan2(cov.yy - cov.xx);
        Beam {
            major: l_max.max(0.0).sqrt() * FWHM_PER_SIGMA,
            minor: l_min.max(0.0).sqrt() * FWHM_PER_SIGMA,
            pa: pa.to_degrees(),
        }
    }

    /// The beam resulting from convolving `self` with `other`.
    pub fn convolve(&self, other: &Beam) -> Beam {
        let a = self.covariance();
        let b = other.covariance();
        Beam::from_covariance(Covariance {
            xx: a.xx + b.xx,
            yy: a.yy + b.yy,
            xy: a.xy + b.xy,
        })
    }

    /// The beam that, convolved with `other`, gives `self`. Deconvolving a
    /// beam by itself gives a point (zero-sized) beam.
    pub fn deconvolve(&self, other: &Beam) -> Result<Beam, BeamError> {
        let a = self.covariance();
        let b = other.covariance();
        let diff = Covariance {
            xx: a.xx - b.xx,
            yy: a.yy - b.yy,
            xy: a.xy - b.xy,
        };
        let (l_max, l_min) = diff.eigenvalues();
        let scale = a.eigenvalues().0.abs().max(f64::MIN_POSITIVE);
        if l_min < -DECONVOLVE_TOLERANCE * scale {
            return Err(BeamError::Deconvolve {
                larger: *self,
                smaller: *other,
            });
        }
        if l_max <= DECONVOLVE_TOLERANCE * scale {
            return Ok(Beam::new(0.0, 0.0, 0.0));
        }
        Ok(Beam::from_covariance(diff))
    }

    /// Can `other` be deconvolved from `self`? i.e. does `self` contain
    /// `other`?
    pub fn contains(&self, other: &Beam) -> bool {
        self.deconvolve(other).is_ok()
    }
}

/// The columns of a CASA "BEAMS" binary table.
#[derive(Debug, Clone, Default)]
pub struct BeamsTableColumns {
    pub bmaj: Vec<f64>,
    pub bmin: Vec<f64>,
    pub bpa: Vec<f64>,
    pub chan: Vec<i32>,
    pub pol: Vec<i32>,
    /// CASA writes the axes in arcsec, but the TUNIT keys are respected.
    pub axes_in_degrees: bool,
}

/// Exactly one beam per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PerChannelBeamTable {
    beams: Vec<Beam>,
}

impl PerChannelBeamTable {
    pub fn new(beams: Vec<Beam>) -> PerChannelBeamTable {
        PerChannelBeamTable { beams }
    }

    /// A cube with a single beam gets the same beam on every channel.
    pub fn uniform(beam: Beam, num_chans: usize) -> PerChannelBeamTable {
        PerChannelBeamTable {
            beams: vec![beam; num_chans],
        }
    }

    /// The beam described by the BMAJ, BMIN and BPA keys of a header
    /// (degrees), repeated for every channel. `None` if the header doesn't
    /// have a beam.
    pub fn from_header_keys(
        bmaj: Option<f64>,
        bmin: Option<f64>,
        bpa: Option<f64>,
        num_chans: usize,
    ) -> Option<PerChannelBeamTable> {
        let major = bmaj?;
        let minor = bmin?;
        let pa = bpa.unwrap_or(0.0);
        Some(PerChannelBeamTable::uniform(
            Beam::new(major, minor, pa),
            num_chans,
        ))
    }

    /// Build a table from the columns of a CASA "BEAMS" table. Only rows of
    /// the first polarisation are used. Channels without a row get a NaN beam,
    /// which is never valid.
    pub fn from_beams_table(
        columns: &BeamsTableColumns,
        num_chans: usize,
    ) -> Result<PerChannelBeamTable, BeamError> {
        let BeamsTableColumns {
            bmaj,
            bmin,
            bpa,
            chan,
            pol,
            axes_in_degrees,
        } = columns;
        let num_rows = bmaj.len();
        if [bmin.len(), bpa.len(), chan.len(), pol.len()]
            .iter()
            .any(|&l| l != num_rows)
        {
            return Err(BeamError::TableLength);
        }

        let mut beams = vec![Beam::new(f64::NAN, f64::NAN, f64::NAN); num_chans];
        for i_row in 0..num_rows {
            if pol[i_row] != 0 {
                continue;
            }
            let c = chan[i_row];
            if c < 0 || c as usize >= num_chans {
                return Err(BeamError::TableChannel {
                    chan: c.into(),
                    num_chans,
                });
            }
            beams[c as usize] = if *axes_in_degrees {
                Beam::new(bmaj[i_row], bmin[i_row], bpa[i_row])
            } else {
                Beam::from_arcsec(bmaj[i_row], bmin[i_row], bpa[i_row])
            };
        }
        Ok(PerChannelBeamTable { beams })
    }

    pub fn len(&self) -> usize {
        self.beams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beams.is_empty()
    }

    pub fn get(&self, chan: usize) -> Option<&Beam> {
        self.beams.get(chan)
    }

    pub fn iter(&self) -> std::slice::Iter<Beam> {
        self.beams.iter()
    }

    /// The beams of the requested channels.
    pub fn select(&self, chans: &[usize]) -> Vec<Beam> {
        chans.iter().map(|&c| self.beams[c]).collect()
    }

    /// The per-axis median beam. The position angle is that of the channel
    /// with the median major axis.
    pub fn median_beam(&self) -> Option<Beam> {
        let valid: Vec<&Beam> = self.beams.iter().filter(|b| b.is_valid()).collect();
        if valid.is_empty() {
            return None;
        }
        let mut by_major = valid.clone();
        by_major.sort_by(|a, b| a.major.total_cmp(&b.major));
        let mut minors: Vec<f64> = valid.iter().map(|b| b.minor).collect();
        minors.sort_by(f64::total_cmp);
        let mid = valid.len() / 2;
        Some(Beam {
            major: median_of_sorted(&by_major.iter().map(|b| b.major).collect::<Vec<_>>()),
            minor: median_of_sorted(&minors),
            pa: by_major[mid].pa,
        })
    }
}

pub(crate) fn median_of_sorted(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        f64::NAN
    } else if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Flag the channels whose beams are not usable. A beam is bad if it is not
/// physically meaningful, or (when `threshold` is given) if its major axis,
/// minor axis or area differs from the median beam by more than the
/// fractional `threshold`.
pub fn identify_bad_beams(table: &PerChannelBeamTable, threshold: Option<f64>) -> Vec<bool> {
    let median = threshold.and_then(|t| table.median_beam().map(|m| (m, t)));
    table
        .iter()
        .map(|beam| {
            if !beam.is_valid() {
                return true;
            }
            match median {
                Some((median, threshold)) => {
                    let frac = |v: f64, m: f64| ((v - m) / m).abs();
                    frac(beam.major, median.major) > threshold
                        || frac(beam.minor, median.minor) > threshold
                        || frac(beam.area(), median.area()) > threshold
                }
                None => false,
            }
        })
        .collect()
}
