// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fitting a common beam: the smallest beam that every supplied beam can be
//! deconvolved from.

use std::f64::consts::{LN_2, PI};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{Beam, BeamError, Covariance};
use crate::constants::{COMMON_BEAM_NUM_SAMPLES, KHACHIYAN_MAX_ITERATIONS};

/// One attempt at fitting a common beam. Attempts are tried in order until one
/// succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamFitAttempt {
    pub tolerance: f64,
    pub reason: String,
}

impl BeamFitAttempt {
    pub fn new(tolerance: f64, reason: &str) -> BeamFitAttempt {
        BeamFitAttempt {
            tolerance,
            reason: reason.to_string(),
        }
    }
}

/// Try each of the `attempts` in order, returning the first common beam that
/// could be fitted. If every attempt fails, the error of the last attempt is
/// returned.
pub fn fit_common_beam_with_attempts(
    beams: &[Beam],
    attempts: &[BeamFitAttempt],
) -> Result<Beam, BeamError> {
    let mut last_err = BeamError::NoAttempts;
    for (i_attempt, attempt) in attempts.iter().enumerate() {
        info!(
            "Fitting a common beam with tolerance {} ({})",
            attempt.tolerance, attempt.reason
        );
        match fit_common_beam(beams, attempt.tolerance) {
            Ok(beam) => {
                if i_attempt > 0 {
                    info!(
                        "Common beam found after {} attempts: {beam}",
                        i_attempt + 1
                    );
                }
                return Ok(beam);
            }
            Err(e) => {
                warn!("Common beam fit with tolerance {} failed: {e}", attempt.tolerance);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Fit the smallest ellipse that contains every beam in `beams`. The
/// `tolerance` sets both the convergence of the enclosing-ellipse iteration
/// and the fractional padding applied to the result.
pub fn fit_common_beam(beams: &[Beam], tolerance: f64) -> Result<Beam, BeamError> {
    let largest = beams
        .iter()
        .max_by(|a, b| a.area().total_cmp(&b.area()))
        .ok_or(BeamError::NoBeams)?;

    // Commonly, the largest beam already contains all of the others.
    if beams.iter().all(|b| largest.contains(b)) {
        debug!("The largest beam ({largest}) contains all other beams");
        return Ok(*largest);
    }

    // Anything inside the largest beam is inside the common beam too.
    let mut relevant: Vec<&Beam> = vec![largest];
    for beam in beams {
        if !largest.contains(beam) && !relevant.contains(&beam) {
            relevant.push(beam);
        }
    }

    // Sample the half-maximum contour of every remaining beam, in units of the
    // largest major axis to keep the numbers well conditioned. The ellipses
    // are centred on the origin, so half of each contour is enough.
    let scale = largest.major;
    let mut points = Vec::with_capacity(relevant.len() * COMMON_BEAM_NUM_SAMPLES);
    for beam in relevant {
        let (s, c) = beam.pa.to_radians().sin_cos();
        let semi_major = beam.major / scale / 2.0;
        let semi_minor = beam.minor / scale / 2.0;
        for i in 0..COMMON_BEAM_NUM_SAMPLES {
            let t = PI * i as f64 / COMMON_BEAM_NUM_SAMPLES as f64;
            let (st, ct) = t.sin_cos();
            let along_major = semi_major * ct;
            let along_minor = semi_minor * st;
            points.push((
                -s * along_major + c * along_minor,
                c * along_major + s * along_minor,
            ));
        }
    }

    let shape = enclosing_ellipse(&points, tolerance * 1e-3);

    // The semi-axes of the enclosing ellipse are half the FWHMs, and
    // (FWHM/2)^2 = 2 ln2 σ^2.
    let padding = (1.0 + tolerance).powi(2) * scale * scale / (2.0 * LN_2);
    let common = Beam::from_covariance(Covariance {
        xx: shape.xx * padding,
        yy: shape.yy * padding,
        xy: shape.xy * padding,
    });
    debug!("Enclosing-ellipse common beam: {common}");

    if beams.iter().all(|b| common.contains(b)) {
        Ok(common)
    } else {
        Err(BeamError::CommonBeamNotFound {
            num_beams: beams.len(),
            tolerance,
        })
    }
}

/// Khachiyan's algorithm for the minimum-area ellipse centred on the origin
/// that encloses `points`. The returned matrix `S` describes the ellipse
/// `x^T S^-1 x <= 1`. The result is scaled so that every point really is
/// enclosed.
fn enclosing_ellipse(points: &[(f64, f64)], step_tolerance: f64) -> Covariance {
    const D: f64 = 2.0;

    let n = points.len();
    let mut u = vec![1.0 / n as f64; n];
    let weighted_scatter = |u: &[f64]| {
        let mut x = Covariance {
            xx: 0.0,
            yy: 0.0,
            xy: 0.0,
        };
        for (&(px, py), &w) in points.iter().zip(u) {
            x.xx += w * px * px;
            x.yy += w * py * py;
            x.xy += w * px * py;
        }
        x
    };
    // Mahalanobis distances of every point for the scatter matrix `x`.
    let distances = |x: &Covariance| -> Vec<f64> {
        let det = x.determinant();
        points
            .iter()
            .map(|&(px, py)| (x.yy * px * px - 2.0 * x.xy * px * py + x.xx * py * py) / det)
            .collect()
    };

    for _ in 0..KHACHIYAN_MAX_ITERATIONS {
        let x = weighted_scatter(&u);
        let m = distances(&x);
        let (j, &m_max) = m
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .expect("there is at least one point");
        let step = (m_max - D) / (D * (m_max - 1.0));
        if !step.is_finite() || step < step_tolerance {
            break;
        }
        u.iter_mut().for_each(|w| *w *= 1.0 - step);
        u[j] += step;
    }

    let x = weighted_scatter(&u);
    let mut s = Covariance {
        xx: D * x.xx,
        yy: D * x.yy,
        xy: D * x.xy,
    };
    // Grow the ellipse if any point is (slightly) outside.
    let det = s.determinant();
    let outermost = points
        .iter()
        .map(|&(px, py)| (s.yy * px * px - 2.0 * s.xy * px * py + s.xx * py * py) / det)
        .fold(0.0, f64::max);
    if outermost > 1.0 {
        s.xx *= outermost;
        s.yy *= outermost;
        s.xy *= outermost;
    }
    s
}
