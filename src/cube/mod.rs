// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Radio image cubes stored as FITS files.
//!
//! Only the primary HDU is used. The two celestial axes must be NAXIS1 (x)
//! and NAXIS2 (y); a spectral axis and/or a Stokes axis may follow. Only the
//! first Stokes plane is ever read.

mod error;
pub mod header;
mod stream;
mod writer;

pub use error::CubeError;
pub use header::Header;
pub use stream::{ChannelPlane, ChannelStream, CubeSelection, PlaneSource, SelectedPlanes};
pub(crate) use writer::CubeWriter;
pub use writer::{KeyValue, OutputHeader};

use std::{
    collections::HashMap,
    ops::Range,
    path::{Path, PathBuf},
};

use fitsio::{hdu::FitsHdu, FitsFile};
use log::{debug, trace};
use ndarray::prelude::*;

use crate::{
    beam::{BeamsTableColumns, PerChannelBeamTable},
    io::read::fits::*,
};

/// CTYPE prefixes of spectral axes.
const SPECTRAL_CTYPES: &[&str] = &["FREQ", "VRAD", "VOPT", "VELO", "WAVE", "FELO", "ZOPT", "BETA"];

/// A FITS image cube. Opening a cube only reads its header and beams; pixels
/// are read plane by plane through [`FitsCube::reader`].
#[derive(Debug, Clone)]
pub struct FitsCube {
    path: PathBuf,
    header: Header,
    wcsaxes: Option<i64>,
    /// Reference pixels keyed by 1-indexed FITS axis number.
    crpix: HashMap<usize, f64>,
    bunit: Option<String>,
    nx: usize,
    ny: usize,
    num_chans: usize,
    /// 1-indexed FITS axis number.
    spectral_axis: Option<usize>,
    /// 1-indexed FITS axis number.
    stokes_axis: Option<usize>,
    /// The number of planes between consecutive channels.
    chan_stride: usize,
    beams: Option<PerChannelBeamTable>,
    /// \[degrees\]
    pixel_scale: f64,
    /// \[degrees^2\]
    pixel_area: f64,
}

impl FitsCube {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FitsCube, CubeError> {
        let path = path.as_ref();
        debug!("Opening cube {}", path.display());
        let mut fptr = fits_open(path)?;
        let hdu = fits_open_hdu(&mut fptr, 0)?;
        let header = Header::new(fits_get_header_cards(&mut fptr, &hdu)?);

        let naxis: i64 = fits_get_required_key(&mut fptr, &hdu, "NAXIS")?;
        if !(2..=4).contains(&naxis) {
            return Err(CubeError::UnsupportedAxes {
                file: path.to_path_buf(),
                naxis,
            });
        }
        let naxis = naxis as usize;
        let mut sizes = Vec::with_capacity(naxis);
        let mut crpix = HashMap::new();
        for i in 1..=naxis {
            let n: usize = fits_get_required_key(&mut fptr, &hdu, &format!("NAXIS{i}"))?;
            sizes.push(n);
            if let Some(p) = fits_get_optional_key::<f64>(&mut fptr, &hdu, &format!("CRPIX{i}"))? {
                crpix.insert(i, p);
            }
        }
        let (nx, ny) = (sizes[0], sizes[1]);
        let wcsaxes: Option<i64> = fits_get_optional_key(&mut fptr, &hdu, "WCSAXES")?;

        let mut spectral_axis = None;
        let mut stokes_axis = None;
        for axis in 3..=naxis {
            let ctype = fits_get_optional_key::<String>(&mut fptr, &hdu, &format!("CTYPE{axis}"))?
                .unwrap_or_default()
                .to_uppercase();
            if ctype.starts_with("STOKES") {
                stokes_axis = Some(axis);
            } else if let Some(first) = spectral_axis {
                return Err(CubeError::MultipleSpectralAxes {
                    file: path.to_path_buf(),
                    first,
                    second: axis,
                });
            } else {
                if !SPECTRAL_CTYPES.iter().any(|s| ctype.starts_with(s)) {
                    debug!("Treating axis {axis} (CTYPE '{ctype}') as the spectral axis");
                }
                spectral_axis = Some(axis);
            }
        }
        let num_chans = spectral_axis.map(|a| sizes[a - 1]).unwrap_or(1);
        let chan_stride = spectral_axis
            .map(|a| sizes[2..a - 1].iter().product())
            .unwrap_or(1);

        let (pixel_scale, pixel_area) =
            pixel_scale(&mut fptr, &hdu)?.ok_or(CubeError::NoPixelScale {
                file: path.to_path_buf(),
            })?;
        let bunit: Option<String> = fits_get_optional_key(&mut fptr, &hdu, "BUNIT")?;

        let beams = match fits_open_optional_hdu(&mut fptr, "BEAMS")? {
            Some(beams_hdu) => {
                trace!("Reading the BEAMS table of {}", path.display());
                let columns = read_beams_table(&mut fptr, &beams_hdu)?;
                Some(
                    PerChannelBeamTable::from_beams_table(&columns, num_chans).map_err(|err| {
                        CubeError::Beams {
                            file: path.to_path_buf(),
                            err,
                        }
                    })?,
                )
            }
            None => PerChannelBeamTable::from_header_keys(
                fits_get_optional_key(&mut fptr, &hdu, "BMAJ")?,
                fits_get_optional_key(&mut fptr, &hdu, "BMIN")?,
                fits_get_optional_key(&mut fptr, &hdu, "BPA")?,
                num_chans,
            ),
        };

        debug!(
            "{}: {num_chans} channels of {ny} x {nx} pixels; spectral axis {spectral_axis:?}, Stokes axis {stokes_axis:?}",
            path.display()
        );
        Ok(FitsCube {
            path: path.to_path_buf(),
            header,
            wcsaxes,
            crpix,
            bunit,
            nx,
            ny,
            num_chans,
            spectral_axis,
            stokes_axis,
            chan_stride,
            beams,
            pixel_scale,
            pixel_area,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn bunit(&self) -> Option<&str> {
        self.bunit.as_deref()
    }

    pub fn num_chans(&self) -> usize {
        self.num_chans
    }

    /// (ny, nx)
    pub fn plane_shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }

    /// (num_chans, ny, nx)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.num_chans, self.ny, self.nx)
    }

    pub fn beams(&self) -> Option<&PerChannelBeamTable> {
        self.beams.as_ref()
    }

    /// The geometric mean of the pixel side lengths \[degrees\].
    pub fn pixel_scale(&self) -> f64 {
        self.pixel_scale
    }

    /// \[degrees^2\]
    pub fn pixel_area(&self) -> f64 {
        self.pixel_area
    }

    pub fn spectral_axis(&self) -> Option<usize> {
        self.spectral_axis
    }

    pub fn stokes_axis(&self) -> Option<usize> {
        self.stokes_axis
    }

    /// How the axes of this cube map onto the (RA, Dec, spectral) axes of an
    /// output cube. Keys and values are 1-indexed FITS axis numbers.
    pub(crate) fn output_axis_map(&self) -> HashMap<usize, usize> {
        let mut map = HashMap::from([(1, 1), (2, 2)]);
        if let Some(a) = self.spectral_axis {
            map.insert(a, 3);
        }
        map
    }

    /// The WCSAXES and CRPIXn keys of an output cube made from this one.
    /// `crpix_shift` (keyed by output axis) is subtracted from each reference
    /// pixel to account for cropping.
    pub(crate) fn output_wcs_keys(&self, crpix_shift: &HashMap<usize, f64>) -> Vec<(String, KeyValue)> {
        let axis_map = self.output_axis_map();
        let mut keys = vec![];
        if self.wcsaxes.is_some() {
            keys.push(("WCSAXES".to_string(), KeyValue::Int(axis_map.len() as i64)));
        }
        let mut axes: Vec<(usize, usize)> = axis_map.into_iter().collect();
        axes.sort_unstable_by_key(|&(_, out)| out);
        for (input, output) in axes {
            if let Some(&p) = self.crpix.get(&input) {
                let shift = crpix_shift.get(&output).copied().unwrap_or(0.0);
                keys.push((format!("CRPIX{output}"), KeyValue::Float(p - shift)));
            }
        }
        keys
    }

    /// The flat pixel offset of the first pixel of channel `chan`.
    pub(crate) fn plane_offset(&self, chan: usize) -> usize {
        chan * self.chan_stride * self.nx * self.ny
    }

    /// Open the cube for reading planes.
    pub fn reader(&self) -> Result<FitsPlaneReader, CubeError> {
        let mut fptr = fits_open(&self.path)?;
        let hdu = fits_open_hdu(&mut fptr, 0)?;
        Ok(FitsPlaneReader {
            fptr,
            hdu,
            nx: self.nx,
            ny: self.ny,
            num_chans: self.num_chans,
            chan_stride: self.chan_stride,
        })
    }
}

/// Reads single channel planes of a [`FitsCube`].
pub struct FitsPlaneReader {
    fptr: FitsFile,
    hdu: FitsHdu,
    nx: usize,
    ny: usize,
    num_chans: usize,
    chan_stride: usize,
}

impl PlaneSource for FitsPlaneReader {
    fn num_planes(&self) -> usize {
        self.num_chans
    }

    fn plane_shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }

    fn read_plane(&mut self, index: usize) -> Result<Array2<f32>, CubeError> {
        self.read_rows(index, 0..self.ny)
    }

    fn read_rows(&mut self, index: usize, rows: Range<usize>) -> Result<Array2<f32>, CubeError> {
        if index >= self.num_chans {
            return Err(CubeError::PlaneOutOfRange {
                index,
                num_planes: self.num_chans,
            });
        }
        let rows = rows.start.min(self.ny)..rows.end.min(self.ny);
        let plane_start = index * self.chan_stride * self.nx * self.ny;
        let data = fits_read_section(
            &mut self.fptr,
            &self.hdu,
            plane_start + rows.start * self.nx,
            rows.len() * self.nx,
        )?;
        Ok(Array2::from_shape_vec((rows.len(), self.nx), data)?)
    }
}

/// The pixel scale and pixel area of an image, from CDELT or CD keys.
fn pixel_scale(fptr: &mut FitsFile, hdu: &FitsHdu) -> Result<Option<(f64, f64)>, FitsError> {
    let cdelt1: Option<f64> = fits_get_optional_key(fptr, hdu, "CDELT1")?;
    let cdelt2: Option<f64> = fits_get_optional_key(fptr, hdu, "CDELT2")?;
    let area = match (cdelt1, cdelt2) {
        (Some(d1), Some(d2)) if d1 != 0.0 && d2 != 0.0 => (d1 * d2).abs(),
        _ => {
            let cd11: Option<f64> = fits_get_optional_key(fptr, hdu, "CD1_1")?;
            let cd22: Option<f64> = fits_get_optional_key(fptr, hdu, "CD2_2")?;
            let (Some(cd11), Some(cd22)) = (cd11, cd22) else {
                return Ok(None);
            };
            let cd12 = fits_get_optional_key::<f64>(fptr, hdu, "CD1_2")?.unwrap_or(0.0);
            let cd21 = fits_get_optional_key::<f64>(fptr, hdu, "CD2_1")?.unwrap_or(0.0);
            (cd11 * cd22 - cd12 * cd21).abs()
        }
    };
    Ok((area > 0.0 && area.is_finite()).then(|| (area.sqrt(), area)))
}

/// Read the columns of a CASA "BEAMS" table.
fn read_beams_table(fptr: &mut FitsFile, hdu: &FitsHdu) -> Result<BeamsTableColumns, CubeError> {
    // Find the unit of the BMAJ column.
    let num_cols: usize = fits_get_optional_key(fptr, hdu, "TFIELDS")?.unwrap_or(0);
    let mut axes_in_degrees = false;
    for i in 1..=num_cols {
        let ttype: Option<String> = fits_get_optional_key(fptr, hdu, &format!("TTYPE{i}"))?;
        if ttype.is_some_and(|t| t.trim().eq_ignore_ascii_case("BMAJ")) {
            let unit: Option<String> = fits_get_optional_key(fptr, hdu, &format!("TUNIT{i}"))?;
            axes_in_degrees = unit.is_some_and(|u| u.trim().eq_ignore_ascii_case("deg"));
            break;
        }
    }

    Ok(BeamsTableColumns {
        bmaj: fits_get_col(fptr, hdu, "BMAJ")?,
        bmin: fits_get_col(fptr, hdu, "BMIN")?,
        bpa: fits_get_col(fptr, hdu, "BPA")?,
        chan: fits_get_col(fptr, hdu, "CHAN")?,
        pol: fits_get_col(fptr, hdu, "POL")?,
        axes_in_degrees,
    })
}
