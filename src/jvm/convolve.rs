// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Convolving a clean-component model with the common beam.
//!
//! Model pixels are in Jy/pixel. Each pixel is treated as a Gaussian "pixel
//! beam" of exactly one pixel in area; convolving with the kernel that takes
//! the pixel beam to the common beam and multiplying by the number of pixels
//! per common beam gives an image in Jy/beam with the same total flux.

use std::sync::Arc;

use ndarray::prelude::*;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::ConvolveError;
use crate::{
    beam::Beam,
    constants::KERNEL_NUM_SIGMA,
    cube::{ChannelPlane, ChannelStream, PlaneSource},
};

/// Sample a Gaussian `beam` (axes in degrees) on a grid of `pixel_scale`
/// degrees, out to [`KERNEL_NUM_SIGMA`] σ of its major axis. The kernel is
/// square with an odd side, centred, and normalised to a unit sum. A point
/// beam gives a 1x1 kernel.
pub fn beam_kernel(beam: &Beam, pixel_scale: f64) -> Array2<f64> {
    let cov = beam.covariance();
    let px2 = pixel_scale * pixel_scale;
    let (l_max, _) = cov.eigenvalues();
    let half = (KERNEL_NUM_SIGMA * (l_max / px2).max(0.0).sqrt()).ceil() as usize;
    if half == 0 {
        return Array2::ones((1, 1));
    }
    let (mut sxx, mut syy, mut sxy) = (cov.xx / px2, cov.yy / px2, cov.xy / px2);

    // Very thin kernels are given a tiny minor axis so the covariance can be
    // inverted.
    let floor = 1e-6;
    if sxx * syy - sxy * sxy < floor * floor {
        sxx += floor;
        syy += floor;
        if sxx * syy - sxy * sxy <= 0.0 {
            sxy = 0.0;
        }
    }
    let det = sxx * syy - sxy * sxy;

    let side = 2 * half + 1;
    let mut kernel = Array2::from_shape_fn((side, side), |(y, x)| {
        let dy = y as f64 - half as f64;
        let dx = x as f64 - half as f64;
        let m = (syy * dx * dx - 2.0 * sxy * dx * dy + sxx * dy * dy) / det;
        (-0.5 * m).exp()
    });
    let sum = kernel.sum();
    kernel /= sum;
    kernel
}

/// Forward or inverse 2D FFT of `data` in place.
fn fft_2d(data: &mut Array2<Complex<f64>>, row_fft: &Arc<dyn Fft<f64>>, col_fft: &Arc<dyn Fft<f64>>) {
    // Rows are contiguous; rustfft processes every row in one call.
    for mut row in data.rows_mut() {
        if let Some(row) = row.as_slice_mut() {
            row_fft.process(row);
        }
    }
    let mut transposed = data.t().as_standard_layout().into_owned();
    for mut col in transposed.rows_mut() {
        if let Some(col) = col.as_slice_mut() {
            col_fft.process(col);
        }
    }
    data.assign(&transposed.t());
}

/// Linear 2D convolution of `image` with a centred, odd-sized `kernel` via a
/// zero-padded FFT. The output has the shape of `image`.
pub fn fft_convolve_2d(image: ArrayView2<f64>, kernel: ArrayView2<f64>) -> Array2<f64> {
    let plan = FftConvolution::new(image.dim(), kernel);
    plan.convolve(image)
}

/// A kernel prepared for repeated FFT convolution of images of one shape.
struct FftConvolution {
    shape: (usize, usize),
    padded: (usize, usize),
    kernel_fft: Array2<Complex<f64>>,
    forward: (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>),
    inverse: (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>),
}

impl FftConvolution {
    fn new(shape: (usize, usize), kernel: ArrayView2<f64>) -> FftConvolution {
        let (ky, kx) = kernel.dim();
        let (hy, hx) = (ky / 2, kx / 2);
        let padded = (shape.0 + 2 * hy, shape.1 + 2 * hx);

        let mut planner = FftPlanner::new();
        let forward = (
            planner.plan_fft_forward(padded.1),
            planner.plan_fft_forward(padded.0),
        );
        let inverse = (
            planner.plan_fft_inverse(padded.1),
            planner.plan_fft_inverse(padded.0),
        );

        // Put the kernel's centre at the origin, wrapping negative offsets.
        let mut kernel_fft = Array2::zeros(padded);
        for ((y, x), &k) in kernel.indexed_iter() {
            let py = (y + padded.0 - hy) % padded.0;
            let px = (x + padded.1 - hx) % padded.1;
            kernel_fft[(py, px)] = Complex::new(k, 0.0);
        }
        fft_2d(&mut kernel_fft, &forward.0, &forward.1);

        FftConvolution {
            shape,
            padded,
            kernel_fft,
            forward,
            inverse,
        }
    }

    fn convolve(&self, image: ArrayView2<f64>) -> Array2<f64> {
        let (ny, nx) = self.shape;
        let mut buffer = Array2::zeros(self.padded);
        buffer
            .slice_mut(s![..ny, ..nx])
            .zip_mut_with(&image, |b, &v| *b = Complex::new(v, 0.0));
        fft_2d(&mut buffer, &self.forward.0, &self.forward.1);
        buffer *= &self.kernel_fft;
        fft_2d(&mut buffer, &self.inverse.0, &self.inverse.1);

        let norm = (self.padded.0 * self.padded.1) as f64;
        buffer.slice(s![..ny, ..nx]).mapv(|c| c.re / norm)
    }
}

/// Convolves model planes with a common beam.
pub struct ModelConvolver {
    common_beam: Beam,
    kernel_beam: Beam,
    /// Jy/pixel -> Jy/beam.
    flux_scale: f64,
    fft: FftConvolution,
}

impl ModelConvolver {
    /// Prepare to convolve planes of shape `plane_shape` (ny, nx) with
    /// `common_beam`. Pixels are `pixel_area` degrees^2.
    pub fn new(
        common_beam: Beam,
        pixel_area: f64,
        plane_shape: (usize, usize),
    ) -> Result<ModelConvolver, ConvolveError> {
        let pixel_scale = pixel_area.sqrt();
        let pixel_beam = Beam::pixel_beam(pixel_scale);
        let kernel_beam = common_beam
            .deconvolve(&pixel_beam)
            .map_err(|err| ConvolveError::PixelBeam { common_beam, err })?;
        let kernel = beam_kernel(&kernel_beam, pixel_scale);
        let flux_scale =
            common_beam.pixels_per_beam(pixel_area) / pixel_beam.pixels_per_beam(pixel_area);

        Ok(ModelConvolver {
            common_beam,
            kernel_beam,
            flux_scale,
            fft: FftConvolution::new(plane_shape, kernel.view()),
        })
    }

    pub fn common_beam(&self) -> Beam {
        self.common_beam
    }

    /// The beam that was actually convolved with the model pixels.
    pub fn kernel_beam(&self) -> Beam {
        self.kernel_beam
    }

    /// Convolve one model plane. Non-finite model pixels count as zero.
    pub fn convolve_plane(&self, plane: ArrayView2<f32>) -> Result<Array2<f32>, ConvolveError> {
        if plane.dim() != self.fft.shape {
            return Err(ConvolveError::Shape {
                expected: self.fft.shape,
                got: plane.dim(),
            });
        }
        let model = plane.mapv(|v| if v.is_finite() { v as f64 } else { 0.0 });
        let convolved = self.fft.convolve(model.view());
        Ok(convolved.mapv(|v| (v * self.flux_scale) as f32))
    }
}

/// Lazily convolve every plane of a model stream.
pub fn convolve_model<'a, S: PlaneSource + 'a>(
    model: ChannelStream<S>,
    convolver: &'a ModelConvolver,
) -> impl Iterator<Item = Result<ChannelPlane, ConvolveError>> + 'a {
    model.map(move |plane| {
        let (chan, plane) = plane?;
        Ok((chan, convolver.convolve_plane(plane.view())?))
    })
}
