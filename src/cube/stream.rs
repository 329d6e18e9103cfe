// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lazy access to the channel planes of a cube.
//!
//! Nothing here reads more than the requested plane. A [`ChannelStream`] walks
//! a [`PlaneSource`] from the start; it can be restarted, but it can't be
//! resumed from the middle. [`ChannelStream::materialize`] is the only way to
//! get a whole cube into memory.

use std::ops::Range;

use ndarray::prelude::*;

use super::CubeError;

/// A channel plane along with the (original) index of its channel.
pub type ChannelPlane = (usize, Array2<f32>);

/// Something that can produce 2D planes (rows = y, columns = x) on demand.
pub trait PlaneSource {
    fn num_planes(&self) -> usize;

    /// (ny, nx)
    fn plane_shape(&self) -> (usize, usize);

    fn read_plane(&mut self, index: usize) -> Result<Array2<f32>, CubeError>;

    /// Read only the rows `rows` of a plane. Sources that can do better than
    /// reading the whole plane should.
    fn read_rows(&mut self, index: usize, rows: Range<usize>) -> Result<Array2<f32>, CubeError> {
        let plane = self.read_plane(index)?;
        Ok(plane.slice(s![rows, ..]).to_owned())
    }
}

impl<S: PlaneSource + ?Sized> PlaneSource for &mut S {
    fn num_planes(&self) -> usize {
        (**self).num_planes()
    }

    fn plane_shape(&self) -> (usize, usize) {
        (**self).plane_shape()
    }

    fn read_plane(&mut self, index: usize) -> Result<Array2<f32>, CubeError> {
        (**self).read_plane(index)
    }

    fn read_rows(&mut self, index: usize, rows: Range<usize>) -> Result<Array2<f32>, CubeError> {
        (**self).read_rows(index, rows)
    }
}

/// In-memory cubes are indexed (channel, y, x).
impl PlaneSource for Array3<f32> {
    fn num_planes(&self) -> usize {
        self.len_of(Axis(0))
    }

    fn plane_shape(&self) -> (usize, usize) {
        (self.len_of(Axis(1)), self.len_of(Axis(2)))
    }

    fn read_plane(&mut self, index: usize) -> Result<Array2<f32>, CubeError> {
        if index >= self.num_planes() {
            return Err(CubeError::PlaneOutOfRange {
                index,
                num_planes: self.num_planes(),
            });
        }
        Ok(self.index_axis(Axis(0), index).to_owned())
    }
}

/// Which channels, rows and columns of a cube are wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubeSelection {
    /// Original channel indices, ascending.
    pub channels: Vec<usize>,
    pub y: Range<usize>,
    pub x: Range<usize>,
}

impl CubeSelection {
    /// Everything in a cube of shape (num_chans, ny, nx).
    pub fn full(num_chans: usize, ny: usize, nx: usize) -> CubeSelection {
        CubeSelection {
            channels: (0..num_chans).collect(),
            y: 0..ny,
            x: 0..nx,
        }
    }

    /// (ny, nx) of the selected planes.
    pub fn plane_shape(&self) -> (usize, usize) {
        (self.y.len(), self.x.len())
    }

    /// Are the selected channels a single contiguous run?
    pub fn is_contiguous(&self) -> bool {
        self.channels.windows(2).all(|w| w[1] == w[0] + 1)
    }
}

/// A [`PlaneSource`] restricted to a [`CubeSelection`]. Plane `i` of this
/// source is channel `selection.channels[i]` of the underlying source.
pub struct SelectedPlanes<S> {
    source: S,
    selection: CubeSelection,
}

impl<S: PlaneSource> SelectedPlanes<S> {
    pub fn new(source: S, selection: CubeSelection) -> SelectedPlanes<S> {
        SelectedPlanes { source, selection }
    }

    pub fn selection(&self) -> &CubeSelection {
        &self.selection
    }
}

impl<S: PlaneSource> PlaneSource for SelectedPlanes<S> {
    fn num_planes(&self) -> usize {
        self.selection.channels.len()
    }

    fn plane_shape(&self) -> (usize, usize) {
        self.selection.plane_shape()
    }

    fn read_plane(&mut self, index: usize) -> Result<Array2<f32>, CubeError> {
        let &chan = self
            .selection
            .channels
            .get(index)
            .ok_or(CubeError::PlaneOutOfRange {
                index,
                num_planes: self.selection.channels.len(),
            })?;
        let rows = self.source.read_rows(chan, self.selection.y.clone())?;
        Ok(rows.slice(s![.., self.selection.x.clone()]).to_owned())
    }
}

/// A lazy, finite sequence of channel planes.
pub struct ChannelStream<S> {
    source: S,
    labels: Vec<usize>,
    next: usize,
}

impl<S: PlaneSource> ChannelStream<S> {
    /// Stream every plane of `source`, labelled by plane index.
    pub fn new(source: S) -> ChannelStream<S> {
        let labels = (0..source.num_planes()).collect();
        ChannelStream {
            source,
            labels,
            next: 0,
        }
    }

    /// Stream every plane of `source`, labelling plane `i` with `labels[i]`.
    /// There must be exactly one label per plane.
    pub fn with_labels(source: S, labels: Vec<usize>) -> ChannelStream<S> {
        debug_assert_eq!(labels.len(), source.num_planes());
        ChannelStream {
            source,
            labels,
            next: 0,
        }
    }

    /// The total number of planes, regardless of how many have been read.
    pub fn num_planes(&self) -> usize {
        self.labels.len()
    }

    /// The channel indices of the planes, in stream order.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// (ny, nx)
    pub fn plane_shape(&self) -> (usize, usize) {
        self.source.plane_shape()
    }

    /// Go back to the first plane.
    pub fn restart(&mut self) {
        self.next = 0;
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Read every plane into a (channel, y, x) array. This is the only
    /// operation that holds a whole cube in memory.
    pub fn materialize(mut self) -> Result<Array3<f32>, CubeError> {
        self.restart();
        let (ny, nx) = self.plane_shape();
        let mut cube = Array3::zeros((self.num_planes(), ny, nx));
        for (mut out, plane) in cube.outer_iter_mut().zip(self) {
            let (_, plane) = plane?;
            if plane.dim() != (ny, nx) {
                return Err(CubeError::PlaneShape {
                    expected: (ny, nx),
                    got: plane.dim(),
                });
            }
            out.assign(&plane);
        }
        Ok(cube)
    }
}

impl<S: PlaneSource> ChannelStream<SelectedPlanes<S>> {
    /// Stream the selected part of `source`, labelled by original channel.
    pub fn selected(source: S, selection: CubeSelection) -> ChannelStream<SelectedPlanes<S>> {
        let labels = selection.channels.clone();
        ChannelStream {
            source: SelectedPlanes::new(source, selection),
            labels,
            next: 0,
        }
    }
}

impl<S: PlaneSource> Iterator for ChannelStream<S> {
    type Item = Result<ChannelPlane, CubeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next;
        let &label = self.labels.get(index)?;
        self.next += 1;
        Some(self.source.read_plane(index).map(|plane| (label, plane)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.labels.len() - self.next;
        (remaining, Some(remaining))
    }
}
