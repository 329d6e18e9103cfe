// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::ops::Range;

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;
use tempfile::TempDir;

use super::*;
use crate::{
    cube::{ChannelStream, CubeError, FitsCube, PlaneSource},
    tests::{write_test_cube, TestBeams},
};

#[test]
fn test_reflect_index() {
    assert_eq!(reflect_index(-1, 5), 0);
    assert_eq!(reflect_index(-2, 5), 1);
    assert_eq!(reflect_index(0, 5), 0);
    assert_eq!(reflect_index(4, 5), 4);
    assert_eq!(reflect_index(5, 5), 4);
    assert_eq!(reflect_index(6, 5), 3);
    // Windows larger than the cube reflect more than once.
    assert_eq!(reflect_index(2, 1), 0);
    assert_eq!(reflect_index(-3, 2), 1);
    assert_eq!(reflect_index(4, 2), 0);
    assert_eq!(reflect_index(-5, 2), 0);
    assert_eq!(reflect_index(5, 2), 1);
    assert_eq!(reflect_index(6, 2), 1);
    assert_eq!(reflect_index(7, 2), 0);
    // A single plane is its own reflection.
    for i in -7..=7 {
        assert_eq!(reflect_index(i, 1), 0, "{i}");
    }
}

#[test]
fn test_reflect_index_is_periodic() {
    // Half-sample symmetric reflection repeats every 2n samples.
    for n in 1..=4_usize {
        let period = 2 * n as isize;
        for i in -3 * period..3 * period {
            let m = i.rem_euclid(period) as usize;
            let expected = if m < n { m } else { 2 * n - 1 - m };
            assert_eq!(reflect_index(i, n), expected, "i = {i}, n = {n}");
        }
    }
}

#[test]
fn test_median_window_wider_than_the_cube() {
    // 7 channels of window over 2 planes.
    assert_eq!(median_window(0, 7, 2), vec![1, 1, 0, 0, 1, 1, 0]);
    assert_eq!(median_window(1, 7, 2), vec![1, 0, 0, 1, 1, 0, 0]);
    assert_eq!(median_window(0, 5, 1), vec![0; 5]);
}

#[test]
fn test_median_window() {
    assert_eq!(median_window(0, 3, 5), vec![0, 0, 1]);
    assert_eq!(median_window(2, 3, 5), vec![1, 2, 3]);
    assert_eq!(median_window(4, 3, 5), vec![3, 4, 4]);
    assert_eq!(median_window(0, 4, 5), vec![1, 0, 0, 1]);
    assert_eq!(median_window(0, 1, 5), vec![0]);
}

#[test]
fn test_finite_median() {
    assert_eq!(finite_median(&mut vec![3.0, 1.0, 2.0]), 2.0);
    // Upper middle for even counts.
    assert_eq!(finite_median(&mut vec![4.0, 1.0, 3.0, 2.0]), 3.0);
    assert_eq!(finite_median(&mut vec![f32::NAN, 1.0, 5.0]), 5.0);
    assert!(finite_median(&mut vec![f32::NAN, f32::INFINITY]).is_nan());
}

#[test]
fn test_is_speckle() {
    assert!(!is_speckle(1.0, 1.0, 2.0));
    assert!(!is_speckle(3.0, 1.0, 2.0));
    assert!(is_speckle(3.1, 1.0, 2.0));
    assert!(is_speckle(-1.1, 1.0, 2.0));
    assert!(is_speckle(1e-9, 0.0, 2.0));
    assert!(!is_speckle(0.0, 0.0, 2.0));
    assert!(!is_speckle(f32::NAN, 1.0, 2.0));
    assert!(!is_speckle(5.0, f32::NAN, 2.0));
}

/// A spectrum of `spectrum` in every pixel of a 2x3 plane.
fn cube_of(spectrum: &[f32]) -> Array3<f32> {
    Array3::from_shape_fn((spectrum.len(), 2, 3), |(c, _, _)| spectrum[c])
}

#[test]
fn test_despeckle_replaces_outliers() {
    let cube = cube_of(&[1.0, 1.0, 10.0, 1.0, 1.0]);
    let stream = despeckle(cube, &DespeckleParams::default()).unwrap();
    let mut source = stream.into_source();
    let out = ChannelStream::new(&mut source).materialize().unwrap();
    assert!(out.iter().all(|&v| v == 1.0));
    assert_eq!(source.num_replaced(), 6);
}

#[test]
fn test_despeckle_edges_reflect() {
    // The window of channel 0 is [0, 0, 1], so a spike in channel 0 is the
    // median of its own window and survives.
    let cube = cube_of(&[10.0, 1.0, 1.0, 1.0]);
    let out = despeckle(cube, &DespeckleParams::default())
        .unwrap()
        .materialize()
        .unwrap();
    assert_eq!(out[(0, 0, 0)], 10.0);
    assert_eq!(out[(1, 1, 2)], 1.0);

    // A wider window outvotes it.
    let cube = cube_of(&[10.0, 1.0, 1.0, 1.0]);
    let params = DespeckleParams {
        median_npix: 5,
        ..Default::default()
    };
    let out = despeckle(cube, &params).unwrap().materialize().unwrap();
    assert_eq!(out[(0, 0, 0)], 1.0);
}

#[test]
fn test_despeckle_zero_median_and_nan() {
    let mut cube = cube_of(&[0.0, 0.0, 0.5, 0.0, 0.0]);
    cube[(2, 0, 0)] = f32::NAN;
    cube[(1, 1, 1)] = f32::NAN;
    let out = despeckle(cube, &DespeckleParams::default())
        .unwrap()
        .materialize()
        .unwrap();
    // Anything non-zero over a zero median is a speckle.
    assert_eq!(out[(2, 1, 2)], 0.0);
    // NaNs stay.
    assert!(out[(2, 0, 0)].is_nan());
    assert!(out[(1, 1, 1)].is_nan());
    // A NaN neighbour is left out of the median; the upper of (0, 0.5) is
    // the pixel itself.
    assert_eq!(out[(2, 1, 1)], 0.5);
}

#[test]
fn test_despeckle_within_threshold_is_untouched() {
    let spectrum = [1.0, 2.0, 2.5, 1.5, 1.0];
    let out = despeckle(cube_of(&spectrum), &DespeckleParams::default())
        .unwrap()
        .materialize()
        .unwrap();
    for (c, &v) in spectrum.iter().enumerate() {
        assert_abs_diff_eq!(out[(c, 0, 0)], v);
    }
}

#[test]
fn test_despeckle_bad_params() {
    let params = DespeckleParams {
        median_npix: 0,
        ..Default::default()
    };
    assert!(matches!(
        despeckle(cube_of(&[1.0]), &params),
        Err(DespeckleError::EmptyWindow)
    ));
    let params = DespeckleParams {
        threshold_factor: f64::NAN,
        ..Default::default()
    };
    assert!(matches!(
        despeckle(cube_of(&[1.0]), &params),
        Err(DespeckleError::BadThreshold { .. })
    ));
}

/// Counts reads, to check that sequential despeckling reads every plane once.
struct CountingSource {
    cube: Array3<f32>,
    reads: Vec<usize>,
}

impl PlaneSource for CountingSource {
    fn num_planes(&self) -> usize {
        self.cube.len_of(Axis(0))
    }

    fn plane_shape(&self) -> (usize, usize) {
        let (_, ny, nx) = self.cube.dim();
        (ny, nx)
    }

    fn read_plane(&mut self, index: usize) -> Result<Array2<f32>, CubeError> {
        self.reads.push(index);
        self.cube.read_plane(index)
    }

    fn read_rows(&mut self, index: usize, rows: Range<usize>) -> Result<Array2<f32>, CubeError> {
        self.reads.push(index);
        self.cube.read_rows(index, rows)
    }
}

#[test]
fn test_despeckle_caches_one_window() {
    let source = CountingSource {
        cube: cube_of(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        reads: vec![],
    };
    let mut stream = despeckle(source, &DespeckleParams::default()).unwrap();
    for plane in stream.by_ref() {
        plane.unwrap();
    }
    let despeckled = stream.into_source();
    assert_eq!(despeckled.cache.len(), 3);
    assert_eq!(despeckled.source.reads, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_commit_despeckled() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.model.fits");
    let mut cube = Array3::<f32>::zeros((5, 4, 4));
    cube.slice_mut(s![.., 1, 1]).fill(1.0);
    cube[(2, 1, 1)] = 20.0;
    cube[(3, 2, 2)] = 0.5;
    write_test_cube(&path, cube.view(), TestBeams::None, true);

    let summary = commit_despeckled(&path, &DespeckleParams::default()).unwrap();
    assert_eq!(summary.num_planes, 5);
    assert_eq!(summary.num_replaced, 2);
    assert!(!dir.path().join("run.model.fits.tmp").exists());

    let despeckled = FitsCube::open(&path).unwrap();
    // The header survives.
    assert_eq!(despeckled.stokes_axis(), Some(3));
    assert_eq!(despeckled.spectral_axis(), Some(4));
    let data = ChannelStream::new(despeckled.reader().unwrap())
        .materialize()
        .unwrap();
    assert_eq!(data[(2, 1, 1)], 1.0);
    assert_eq!(data[(3, 2, 2)], 0.0);
    assert_eq!(data[(0, 1, 1)], 1.0);
}
