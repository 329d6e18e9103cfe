// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions for reading FITS files.

mod error;

pub use error::FitsError;

use std::{ffi::CStr, fmt::Display, panic::Location, path::Path};

use fitsio::{hdu::*, FitsFile};

/// The number of bytes in a FITS header card, including the NUL terminator
/// that cfitsio appends.
const FLEN_CARD: usize = 81;

/// cfitsio status for a HDU that doesn't exist.
const BAD_HDU_NUM: i32 = 301;

/// cfitsio statuses for a keyword that doesn't exist or has no value.
const KEY_NO_EXIST: i32 = 202;
const VALUE_UNDEFINED: i32 = 204;

/// Wrap a `fitsio` error with the filename, HDU and source location.
pub(crate) fn fitsio_error(
    fits_error: fitsio::errors::Error,
    fits_filename: &Path,
    hdu_description: impl Display,
    caller: &'static Location<'static>,
) -> FitsError {
    FitsError::Fitsio {
        fits_error: Box::new(fits_error),
        fits_filename: fits_filename.to_path_buf().into_boxed_path(),
        hdu_description: format!("{hdu_description}").into_boxed_str(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    }
}

/// Open a fits file.
#[track_caller]
pub(crate) fn fits_open<P: AsRef<Path>>(file: P) -> Result<FitsFile, FitsError> {
    let caller = Location::caller();
    FitsFile::open(file.as_ref()).map_err(|e| FitsError::Open {
        fits_error: Box::new(e),
        fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    })
}

/// Open a fits file's HDU.
#[track_caller]
pub(crate) fn fits_open_hdu<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
) -> Result<FitsHdu, FitsError> {
    let caller = Location::caller();
    fits_fptr
        .hdu(hdu_description)
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu_description, caller))
}

/// Open a fits file's HDU, returning `None` if it doesn't exist.
#[track_caller]
pub(crate) fn fits_open_optional_hdu<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
) -> Result<Option<FitsHdu>, FitsError> {
    let caller = Location::caller();
    match fits_fptr.hdu(hdu_description) {
        Ok(hdu) => Ok(Some(hdu)),
        Err(fitsio::errors::Error::Fits(fe)) if fe.status == BAD_HDU_NUM => Ok(None),
        Err(e) => Err(fitsio_error(
            e,
            fits_fptr.file_path(),
            hdu_description,
            caller,
        )),
    }
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword that may
/// or may not exist, pull out the value of the keyword, parsing it into the
/// desired type. cfitsio matches keywords case-insensitively, and finds
/// HIERARCH keywords too.
#[track_caller]
pub(crate) fn fits_get_optional_key<T: std::str::FromStr>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Option<T>, FitsError> {
    let unparsed_value: String = match hdu.read_key(fits_fptr, keyword) {
        Ok(key_value) => key_value,
        Err(fitsio::errors::Error::Fits(fe))
            if fe.status == KEY_NO_EXIST || fe.status == VALUE_UNDEFINED =>
        {
            return Ok(None)
        }
        Err(e) => {
            return Err(fitsio_error(
                e,
                fits_fptr.file_path(),
                hdu.number + 1,
                Location::caller(),
            ))
        }
    };

    // Fortran-style exponents are allowed in FITS floats.
    let trimmed = unparsed_value.trim();
    match trimmed
        .parse()
        .or_else(|_| trimmed.replace(['D', 'd'], "E").parse())
    {
        Ok(parsed_value) => Ok(Some(parsed_value)),
        Err(_) => {
            let caller = Location::caller();
            Err(FitsError::Parse {
                key: keyword.to_string().into_boxed_str(),
                fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
    }
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword, pull out
/// the value of the keyword, parsing it into the desired type.
#[track_caller]
pub(crate) fn fits_get_required_key<T: std::str::FromStr>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<T, FitsError> {
    match fits_get_optional_key(fits_fptr, hdu, keyword) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => {
            let caller = Location::caller();
            Err(FitsError::MissingKey {
                key: keyword.to_string().into_boxed_str(),
                fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
        Err(error) => Err(error),
    }
}

/// Get a column from a fits file's HDU.
#[track_caller]
pub(crate) fn fits_get_col<T: fitsio::tables::ReadsCol>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Vec<T>, FitsError> {
    let caller = Location::caller();
    hdu.read_col(fits_fptr, keyword)
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller))
}

/// Read every header card (80-character record) of the supplied HDU. The
/// cards are returned verbatim, without the trailing "END".
#[track_caller]
pub(crate) fn fits_get_header_cards(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
) -> Result<Vec<String>, FitsError> {
    let caller = Location::caller();
    // Make the HDU current before talking to cfitsio directly.
    fits_open_hdu(fits_fptr, hdu.number)?;

    let mut num_keys = 0;
    let mut status = 0;
    unsafe {
        // ffghsp = fits_get_hdrspace
        fitsio_sys::ffghsp(
            fits_fptr.as_raw(),
            &mut num_keys,
            std::ptr::null_mut(),
            &mut status,
        );
    }
    fitsio::errors::check_status(status)
        .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller))?;

    let mut cards = Vec::with_capacity(num_keys as usize);
    let mut buffer = [0 as std::os::raw::c_char; FLEN_CARD];
    for i_key in 1..=num_keys {
        let card = unsafe {
            // ffgrec = fits_read_record
            fitsio_sys::ffgrec(fits_fptr.as_raw(), i_key, buffer.as_mut_ptr(), &mut status);
            fitsio::errors::check_status(status)
                .map_err(|e| fitsio_error(e, fits_fptr.file_path(), hdu.number + 1, caller))?;
            CStr::from_ptr(buffer.as_ptr())
                .to_string_lossy()
                .into_owned()
        };
        cards.push(card);
    }

    Ok(cards)
}

/// Read `len` consecutive pixels of the image on the supplied HDU, starting at
/// the (zero-indexed) flat pixel `start`. Cube planes are contiguous, so this
/// is how a single channel is read without touching the rest of the cube.
#[track_caller]
pub(crate) fn fits_read_section(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    start: usize,
    len: usize,
) -> Result<Vec<f32>, FitsError> {
    let caller = Location::caller();
    match &hdu.info {
        HduInfo::ImageInfo { .. } => hdu
            .read_section(fits_fptr, start, start + len)
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
