// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to write out image cubes and their compressed copies.

pub(crate) mod fits;

use std::{
    ffi::OsString,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, trace};
use strum_macros::{Display, EnumIter};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileWriteError {
    #[error("Tried to write to '{file}', but this file isn't writable")]
    FileNotWritable { file: String },

    #[error("Couldn't move '{from}' to '{to}': {err}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        err: std::io::Error,
    },

    #[error("Couldn't compress '{file}' with {codec}: {err}")]
    Compress {
        file: PathBuf,
        codec: Codec,
        err: std::io::Error,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// A file that is written under a temporary name next to its final
/// destination, and only moved into place by [`PendingFile::commit`]. If the
/// `PendingFile` is dropped without being committed, the temporary file is
/// removed, so a failed run never leaves a partial output behind.
#[derive(Debug)]
pub(crate) struct PendingFile {
    tmp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl PendingFile {
    pub(crate) fn new(dest: &Path) -> Result<PendingFile, FileWriteError> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if dest.exists()
            && std::fs::metadata(dest)
                .map(|m| m.permissions().readonly())
                .unwrap_or(false)
        {
            return Err(FileWriteError::FileNotWritable {
                file: dest.display().to_string(),
            });
        }

        let mut tmp_name = dest
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("output"));
        tmp_name.push(".tmp");
        let tmp = dest.with_file_name(tmp_name);
        trace!("Writing {} via {}", dest.display(), tmp.display());
        Ok(PendingFile {
            tmp,
            dest: dest.to_path_buf(),
            committed: false,
        })
    }

    /// The path that should be written to.
    pub(crate) fn path(&self) -> &Path {
        &self.tmp
    }

    /// The path the file will have once committed.
    pub(crate) fn dest(&self) -> &Path {
        &self.dest
    }

    /// Move the temporary file into place.
    pub(crate) fn commit(mut self) -> Result<PathBuf, FileWriteError> {
        std::fs::rename(&self.tmp, &self.dest).map_err(|err| FileWriteError::Rename {
            from: self.tmp.clone(),
            to: self.dest.clone(),
            err,
        })?;
        self.committed = true;
        debug!("Wrote {}", self.dest.display());
        Ok(self.dest.clone())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed && self.tmp.exists() {
            trace!("Removing uncommitted {}", self.tmp.display());
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

/// Compression codecs for the minimized data-release copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum Codec {
    #[strum(serialize = "gzip")]
    Gzip,
    #[cfg(feature = "bzip2")]
    #[strum(serialize = "bzip2")]
    Bzip2,
}

impl Codec {
    pub(crate) fn extension(self) -> &'static str {
        match self {
            Codec::Gzip => "gz",
            #[cfg(feature = "bzip2")]
            Codec::Bzip2 => "bz2",
        }
    }

    /// The path of `file` once compressed with this codec.
    pub(crate) fn compressed_path(self, file: &Path) -> PathBuf {
        let mut name = file.as_os_str().to_os_string();
        name.push(".");
        name.push(self.extension());
        PathBuf::from(name)
    }
}

/// Compress `src` into `dest` with the requested codec. The output is written
/// atomically.
pub(crate) fn compress_file(src: &Path, dest: &Path, codec: Codec) -> Result<(), FileWriteError> {
    debug!(
        "Compressing {} into {} ({codec})",
        src.display(),
        dest.display()
    );
    let pending = PendingFile::new(dest)?;
    let compress_err = |err: std::io::Error| FileWriteError::Compress {
        file: src.to_path_buf(),
        codec,
        err,
    };

    let mut reader = BufReader::new(File::open(src)?);
    let writer = BufWriter::new(File::create(pending.path())?);
    match codec {
        Codec::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::default());
            std::io::copy(&mut reader, &mut encoder).map_err(compress_err)?;
            encoder.finish().map_err(compress_err)?.flush()?;
        }
        #[cfg(feature = "bzip2")]
        Codec::Bzip2 => {
            let mut encoder = bzip2::write::BzEncoder::new(writer, bzip2::Compression::default());
            std::io::copy(&mut reader, &mut encoder).map_err(compress_err)?;
            encoder.finish().map_err(compress_err)?.flush()?;
        }
    }

    pending.commit()?;
    Ok(())
}
