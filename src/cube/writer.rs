// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Writing cubes one plane at a time.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use fitsio::{hdu::FitsHdu, tables::ColumnDataType, FitsFile};
use log::trace;
use ndarray::prelude::*;

use super::CubeError;
use crate::io::{
    read::fits::fits_open_hdu,
    write::{fits::*, PendingFile},
};

/// The value of a key that cfitsio formats.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Float(f64),
    Int(i64),
    Str(String),
}

/// Everything written into an output header after the structural keys that
/// cfitsio writes itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputHeader {
    /// Keys written (in this order) before the verbatim cards.
    pub keys: Vec<(String, KeyValue)>,

    /// Verbatim 80-character cards copied from input headers.
    pub cards: Vec<String>,

    /// (key, value, comment) of string keys that may need CONTINUE cards.
    pub long_strings: Vec<(String, String, String)>,

    pub history: Vec<String>,
}

/// A 32-bit float cube that is written under a temporary name and only moved
/// to its destination by [`CubeWriter::finish`].
pub(crate) struct CubeWriter {
    pending: PendingFile,
    fptr: FitsFile,
    hdu: FitsHdu,
    plane_shape: (usize, usize),
    num_planes: usize,
}

impl CubeWriter {
    pub(crate) fn create(
        dest: &Path,
        num_planes: usize,
        plane_shape: (usize, usize),
        header: &OutputHeader,
    ) -> Result<CubeWriter, CubeError> {
        let pending = PendingFile::new(dest)?;
        let (ny, nx) = plane_shape;
        let mut fptr = fits_create_image_file(pending.path(), &[num_planes, ny, nx])?;
        let hdu = fits_open_hdu(&mut fptr, 0)?;

        for (key, value) in &header.keys {
            match value {
                KeyValue::Float(v) if v.is_finite() => fits_write_key(&mut fptr, &hdu, key, *v)?,
                // FITS has no representation of non-finite numbers; writing a
                // string is the common workaround.
                KeyValue::Float(v) => fits_write_key(&mut fptr, &hdu, key, v.to_string())?,
                KeyValue::Int(v) => fits_write_key(&mut fptr, &hdu, key, *v)?,
                KeyValue::Str(v) => fits_write_key(&mut fptr, &hdu, key, v.as_str())?,
            }
        }
        fits_write_cards(&mut fptr, &hdu, &header.cards)?;
        for (key, value, comment) in &header.long_strings {
            fits_write_long_string(&mut fptr, &hdu, key, value, comment)?;
        }
        for line in &header.history {
            fits_write_history(&mut fptr, &hdu, line)?;
        }
        trace!(
            "Created {} ({num_planes} x {ny} x {nx})",
            pending.path().display()
        );

        Ok(CubeWriter {
            pending,
            fptr,
            hdu,
            plane_shape,
            num_planes,
        })
    }

    pub(crate) fn write_plane(&mut self, index: usize, plane: ArrayView2<f32>) -> Result<(), CubeError> {
        if index >= self.num_planes {
            return Err(CubeError::PlaneOutOfRange {
                index,
                num_planes: self.num_planes,
            });
        }
        if plane.dim() != self.plane_shape {
            return Err(CubeError::PlaneShape {
                expected: self.plane_shape,
                got: plane.dim(),
            });
        }
        let plane_len = self.plane_shape.0 * self.plane_shape.1;
        let data: Vec<f32> = plane.iter().copied().collect();
        fits_write_section(&mut self.fptr, &self.hdu, index * plane_len, &data)?;
        Ok(())
    }

    /// Append a binary table of per-channel epsilon values, keyed by original
    /// channel index.
    pub(crate) fn add_epsilon_table(&mut self, epsilon: &BTreeMap<usize, f64>) -> Result<(), CubeError> {
        let hdu = fits_create_table(
            &mut self.fptr,
            "JVM_EPSILON",
            &[
                ("CHANNEL", ColumnDataType::Int),
                ("JvM_epsilon", ColumnDataType::Double),
            ],
        )?;
        let channels: Vec<i32> = epsilon.keys().map(|&c| c as i32).collect();
        let values: Vec<f64> = epsilon.values().copied().collect();
        fits_write_col(&mut self.fptr, &hdu, "CHANNEL", &channels)?;
        fits_write_col(&mut self.fptr, &hdu, "JvM_epsilon", &values)?;
        Ok(())
    }

    /// Append a 2D image extension.
    pub(crate) fn add_image_extension(
        &mut self,
        extname: &str,
        image: ArrayView2<f32>,
    ) -> Result<(), CubeError> {
        let (ny, nx) = image.dim();
        let hdu = fits_create_image_ext(&mut self.fptr, extname, &[ny, nx])?;
        let data: Vec<f32> = image.iter().copied().collect();
        fits_write_section(&mut self.fptr, &hdu, 0, &data)?;
        Ok(())
    }

    /// Close the file and move it into place.
    pub(crate) fn finish(self) -> Result<PathBuf, CubeError> {
        let CubeWriter { pending, fptr, .. } = self;
        // cfitsio flushes on close.
        drop(fptr);
        Ok(pending.commit()?)
    }
}
