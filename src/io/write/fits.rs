// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions for writing FITS files.

use std::{ffi::CString, panic::Location, path::Path};

use fitsio::{
    hdu::{FitsHdu, HduInfo},
    images::{ImageDescription, ImageType},
    tables::{ColumnDataType, ColumnDescription},
    FitsFile,
};

use crate::io::read::fits::{fitsio_error, FitsError};

/// Create a new fits file (overwriting anything already at `file`) whose
/// primary HDU is a 32-bit float image. `dimensions` are in row-major order,
/// i.e. the slowest axis first (e.g. `[num_chans, ny, nx]`).
#[track_caller]
pub(crate) fn fits_create_image_file<P: AsRef<Path>>(
    file: P,
    dimensions: &[usize],
) -> Result<FitsFile, FitsError> {
    let caller = Location::caller();
    let image_description = ImageDescription {
        data_type: ImageType::Float,
        dimensions,
    };
    FitsFile::create(file.as_ref())
        .with_custom_primary(&image_description)
        .overwrite()
        .open()
        .map_err(|e| FitsError::Open {
            fits_error: Box::new(e),
            fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        })
}

/// Open a fits file for editing.
#[track_caller]
pub(crate) fn fits_edit<P: AsRef<Path>>(file: P) -> Result<FitsFile, FitsError> {
    let caller = Location::caller();
    FitsFile::edit(file.as_ref()).map_err(|e| FitsError::Open {
        fits_error: Box::new(e),
        fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    })
}

/// Given a FITS file pointer and a HDU, write `data` into the image starting
/// at the (zero-indexed) flat pixel `start`.
#[track_caller]
pub(crate) fn fits_write_section(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    start: usize,
    data: &[f32],
) -> Result<(), FitsError> {
    let caller = Location::caller();
    match &hdu.info {
        HduInfo::ImageInfo { .. } => hdu
            .write_section(fits_fptr, start, start + data.len(), data)
            .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller)),
        _ => Err(FitsError::NotImage {
            fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
            hdu_num: hdu.number + 1,
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }),
    }
}

/// Append verbatim 80-character header cards to the supplied HDU.
#[track_caller]
pub(crate) fn fits_write_cards(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    cards: &[String],
) -> Result<(), FitsError> {
    let caller = Location::caller();
    fits_make_current(fits_fptr, hdu, caller)?;
    for card in cards {
        let card_ffi = CString::new(card.as_str()).map_err(|_| FitsError::BadCard {
            card: card.clone().into_boxed_str(),
            fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        })?;
        let mut status = 0;
        unsafe {
            // ffprec = fits_write_record
            fitsio_sys::ffprec(fits_fptr.as_raw(), card_ffi.as_ptr(), &mut status);
        }
        fitsio::errors::check_status(status)
            .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller))?;
    }
    Ok(())
}

/// Write a keyword and its value to the supplied HDU. Keywords longer than 8
/// characters get the HIERARCH convention from cfitsio.
#[track_caller]
pub(crate) fn fits_write_key<T: fitsio::headers::WritesKey>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
    value: T,
) -> Result<(), FitsError> {
    let caller = Location::caller();
    hdu.write_key(fits_fptr, keyword, value)
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller))
}

/// Append a HISTORY card to the supplied HDU. cfitsio splits long text over
/// multiple cards.
#[track_caller]
pub(crate) fn fits_write_history(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    text: &str,
) -> Result<(), FitsError> {
    let caller = Location::caller();
    fits_make_current(fits_fptr, hdu, caller)?;
    let text_ffi = CString::new(text).map_err(|_| FitsError::BadCard {
        card: text.into(),
        fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    })?;
    let mut status = 0;
    unsafe {
        // ffphis = fits_write_history
        fitsio_sys::ffphis(fits_fptr.as_raw(), text_ffi.as_ptr(), &mut status);
    }
    fitsio::errors::check_status(status)
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller))
}

/// Write a string key that may be longer than a single card, using the
/// CONTINUE convention.
#[track_caller]
pub(crate) fn fits_write_long_string(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
    value: &str,
    comment: &str,
) -> Result<(), FitsError> {
    let caller = Location::caller();
    fits_make_current(fits_fptr, hdu, caller)?;
    let bad_card = |fits_fptr: &FitsFile| FitsError::BadCard {
        card: format!("{keyword} = {value}").into_boxed_str(),
        fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    };
    let key_name = CString::new(keyword).map_err(|_| bad_card(fits_fptr))?;
    let value = CString::new(value).map_err(|_| bad_card(fits_fptr))?;
    let comment = CString::new(comment).map_err(|_| bad_card(fits_fptr))?;
    let mut status = 0;
    unsafe {
        // ffpkls = fits_write_key_longstr
        fitsio_sys::ffpkls(
            fits_fptr.as_raw(), /* I - FITS file pointer        */
            key_name.as_ptr(),  /* I - name of keyword to write */
            value.as_ptr(),     /* I - keyword value            */
            comment.as_ptr(),   /* I - keyword comment          */
            &mut status,        /* IO - error status            */
        );
    }
    fitsio::errors::check_status(status)
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller))
}

/// Append a 32-bit float image extension.
#[track_caller]
pub(crate) fn fits_create_image_ext(
    fits_fptr: &mut FitsFile,
    extname: &str,
    dimensions: &[usize],
) -> Result<FitsHdu, FitsError> {
    let caller = Location::caller();
    let image_description = ImageDescription {
        data_type: ImageType::Float,
        dimensions,
    };
    fits_fptr
        .create_image(extname, &image_description)
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), extname, caller))
}

/// Append a binary table extension with scalar columns of the given names and
/// types.
#[track_caller]
pub(crate) fn fits_create_table(
    fits_fptr: &mut FitsFile,
    extname: &str,
    columns: &[(&str, ColumnDataType)],
) -> Result<FitsHdu, FitsError> {
    let caller = Location::caller();
    let columns = columns
        .iter()
        .map(|(name, data_type)| {
            ColumnDescription::new(*name)
                .with_type(data_type.clone())
                .create()
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), extname, caller))?;
    fits_fptr
        .create_table(extname, &columns)
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), extname, caller))
}

/// Write a column of a binary table.
#[track_caller]
pub(crate) fn fits_write_col<T: fitsio::tables::WritesCol>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    column: &str,
    data: &[T],
) -> Result<(), FitsError> {
    let caller = Location::caller();
    hdu.write_col(fits_fptr, column, data)
        .map(|_| ())
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller))
}

fn fits_make_current(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    caller: &'static Location<'static>,
) -> Result<(), FitsError> {
    fits_fptr
        .hdu(hdu.number)
        .map(|_| ())
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller))
}
