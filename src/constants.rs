// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All constants *must* be double precision. Calculations should be done in
double precision for as long as possible; image data is only converted to
single precision when it is written out.
 */

/// The default half-size of the PSF cutout used to find the first null of the
/// dirty beam \[pixels\].
pub const DEFAULT_MAX_NPIX_PEAK: usize = 100;

/// Channels whose beam major axis, minor axis or area differ from the median
/// beam by more than this fraction are considered bad.
pub const DEFAULT_BAD_BEAM_THRESHOLD: f64 = 0.1;

/// The tolerances (and the reason for each) that are tried, in order, when
/// fitting a common beam.
pub const DEFAULT_BEAM_FIT_ATTEMPTS: [(f64, &str); 2] =
    [(0.01, "default tolerance"), (0.005, "relaxed tolerance")];

/// The number of points sampled on half of each beam ellipse when fitting a
/// common beam.
pub(crate) const COMMON_BEAM_NUM_SAMPLES: usize = 180;

/// The maximum number of iterations of the enclosing-ellipse solver.
pub(crate) const KHACHIYAN_MAX_ITERATIONS: usize = 10_000;

/// Relative tolerance on the eigenvalues of a deconvolved covariance matrix.
/// Anything more negative than this means the deconvolution is impossible.
pub(crate) const DECONVOLVE_TOLERANCE: f64 = 1e-7;

/// Convolution kernels are sampled out to this many σ of their major axis.
pub(crate) const KERNEL_NUM_SIGMA: f64 = 5.0;

/// The default spectral window of the despeckling median filter \[channels\].
pub const DEFAULT_MEDIAN_NPIX: usize = 3;

/// Pixels whose fractional deviation from the spectral median exceeds this are
/// replaced by the median.
pub const DEFAULT_THRESHOLD_FACTOR: f64 = 2.0;

/// The number of channel planes that may be in flight between pipeline
/// threads.
pub(crate) const PLANE_QUEUE_DEPTH: usize = 4;

/// Value of the ORIGIN card on written cubes.
pub(crate) const ORIGIN: &str = "alma_jvm";

/// Credit written into every JvM-corrected cube.
pub(crate) const JVM_CREDIT: &str = "ALMA-IMF cubes were produced by the ALMA-IMF large program \
    (2017.1.01355.L; Motte et al. 2022, Ginsburg et al. 2022). JvM correction following \
    Jorsater & van Moorsel (1995) and Czekala et al. (2021).";
