// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Cropping cubes to the region where the image has data, and the compressed
//! copies of the cropped model and residual.

use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::prelude::*;
use strum::IntoEnumIterator;

use super::{metadata::cropped_header, with_suffix, CubeVariant, FinalizeError};
use crate::{
    cube::{ChannelStream, CubeError, CubeSelection, CubeWriter, FitsCube, PlaneSource},
    io::write::{compress_file, Codec},
};

/// The rows and columns of `plane` that hold finite pixels, if any.
fn finite_bounds(plane: ArrayView2<f32>) -> Option<((usize, usize), (usize, usize))> {
    let mut y_bounds: Option<(usize, usize)> = None;
    let mut x_bounds: Option<(usize, usize)> = None;
    for (y, row) in plane.outer_iter().enumerate() {
        let Some(first) = row.iter().position(|v| v.is_finite()) else {
            continue;
        };
        // There is at least one finite value in this row.
        let last = row.iter().rposition(|v| v.is_finite()).unwrap_or(first);
        y_bounds = Some(match y_bounds {
            Some((y0, _)) => (y0, y),
            None => (y, y),
        });
        x_bounds = Some(match x_bounds {
            Some((x0, x1)) => (x0.min(first), x1.max(last)),
            None => (first, last),
        });
    }
    y_bounds.zip(x_bounds)
}

/// The smallest selection holding every finite pixel of the streamed planes.
/// Channels before the first and after the last plane with a finite pixel
/// are dropped; channels in between are kept even if they are empty. `None`
/// if there are no finite pixels at all.
pub(crate) fn finite_extent<S: PlaneSource>(
    stream: ChannelStream<S>,
) -> Result<Option<CubeSelection>, CubeError> {
    let labels = stream.labels().to_vec();
    let mut chans: Option<(usize, usize)> = None;
    let mut y = (usize::MAX, 0);
    let mut x = (usize::MAX, 0);
    for (i, plane) in stream.enumerate() {
        let (_, plane) = plane?;
        if let Some(((y0, y1), (x0, x1))) = finite_bounds(plane.view()) {
            chans = Some(chans.map_or((i, i), |(first, _)| (first, i)));
            y = (y.0.min(y0), y.1.max(y1));
            x = (x.0.min(x0), x.1.max(x1));
        }
    }

    Ok(chans.map(|(first, last)| CubeSelection {
        channels: labels[first..=last].to_vec(),
        y: y.0..y.1 + 1,
        x: x.0..x.1 + 1,
    }))
}

/// What happened to the compressed minimized copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinimizedCopies {
    Written(Vec<PathBuf>),
    /// Every copy already existed, so nothing was done.
    AlreadyPresent(Vec<PathBuf>),
}

impl MinimizedCopies {
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            MinimizedCopies::Written(p) | MinimizedCopies::AlreadyPresent(p) => p,
        }
    }
}

/// The variants that get minimized copies.
const MINIMIZED_VARIANTS: [CubeVariant; 2] = [CubeVariant::Model, CubeVariant::Residual];

/// `<basename>.<variant>.minimized.fits`
fn minimized_fits_name(basename: &Path, variant: CubeVariant) -> PathBuf {
    with_suffix(basename, &format!(".{variant}.minimized.fits"))
}

/// Every compressed copy that [`write_minimized_copies`] produces, in the order
/// they are written.
pub fn minimized_copy_paths(basename: &Path) -> Vec<PathBuf> {
    MINIMIZED_VARIANTS
        .iter()
        .flat_map(|&v| {
            let fits = minimized_fits_name(basename, v);
            Codec::iter().map(move |c| c.compressed_path(&fits))
        })
        .collect()
}

/// Write gzip and bzip2 copies of the model and residual cubes, cropped to
/// `selection`, next to `basename`. If all of the copies already exist,
/// nothing is done. The uncompressed cropped cubes are only written into
/// `scratch_dir`.
pub fn write_minimized_copies(
    basename: &Path,
    model: &FitsCube,
    residual: &FitsCube,
    selection: &CubeSelection,
    scratch_dir: &Path,
) -> Result<MinimizedCopies, FinalizeError> {
    let paths = minimized_copy_paths(basename);
    if paths.iter().all(|p| p.exists()) {
        info!("Minimized copies of the model and residual already exist; not rewriting them");
        return Ok(MinimizedCopies::AlreadyPresent(paths));
    }

    let (ny, nx) = selection.plane_shape();
    let num_planes = selection.channels.len();
    for (variant, cube) in MINIMIZED_VARIANTS.into_iter().zip([model, residual]) {
        let dest = minimized_fits_name(basename, variant);
        let scratch_file = scratch_dir.join(dest.file_name().unwrap_or(dest.as_os_str()));
        debug!(
            "Writing a {num_planes} x {ny} x {nx} minimized {variant} cube to {}",
            scratch_file.display()
        );

        let mut writer = CubeWriter::create(
            &scratch_file,
            num_planes,
            (ny, nx),
            &cropped_header(cube, selection),
        )?;
        let planes = ChannelStream::selected(cube.reader()?, selection.clone());
        for (index, plane) in planes.enumerate() {
            let (_, plane) = plane?;
            writer.write_plane(index, plane.view())?;
        }
        let scratch_file = writer.finish()?;

        for codec in Codec::iter() {
            compress_file(&scratch_file, &codec.compressed_path(&dest), codec)?;
        }
    }

    info!("Wrote minimized copies of the model and residual");
    Ok(MinimizedCopies::Written(paths))
}
