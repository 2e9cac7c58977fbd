//! Turning caller payloads into files on disk.
//!
//! Packing results may come from a file the caller owns or from raw bytes in
//! memory. Raw bytes are written to a temporary `.vox` file whose lifetime is
//! tied to the [`StagedFile`] guard: dropping the guard deletes the file, on
//! success, error or unwinding alike.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{Result, VixivError};

/// Suffix given to staged packing blobs.
pub const PACKING_SUFFIX: &str = ".vox";

/// A packing result handed to the client.
#[derive(Debug, Clone, Copy)]
pub enum PackingSource<'a> {
    /// File owned by the caller; never deleted
    Path(&'a Path),
    /// In-memory blob, staged through a temporary file
    Bytes(&'a [u8]),
}

impl<'a> From<&'a Path> for PackingSource<'a> {
    fn from(path: &'a Path) -> Self {
        PackingSource::Path(path)
    }
}

impl<'a> From<&'a [u8]> for PackingSource<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        PackingSource::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for PackingSource<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        PackingSource::Bytes(bytes.as_slice())
    }
}

/// A payload file that stays valid for the duration of one call.
#[derive(Debug)]
pub enum StagedFile {
    Borrowed(PathBuf),
    Temporary(NamedTempFile),
}

impl StagedFile {
    /// Stage `source`, writing bytes into `dir` (or the OS temp dir).
    pub fn stage(source: PackingSource<'_>, dir: Option<&Path>) -> Result<Self> {
        match source {
            PackingSource::Path(path) => {
                if !path.is_file() {
                    return Err(VixivError::FileNotFound(path.to_path_buf()));
                }
                Ok(StagedFile::Borrowed(path.to_path_buf()))
            }
            PackingSource::Bytes(bytes) => {
                let mut builder = tempfile::Builder::new();
                builder.prefix("vixiv-").suffix(PACKING_SUFFIX);
                let mut file = match dir {
                    Some(dir) => builder.tempfile_in(dir)?,
                    None => builder.tempfile()?,
                };
                file.write_all(bytes)?;
                file.flush()?;
                Ok(StagedFile::Temporary(file))
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            StagedFile::Borrowed(path) => path,
            StagedFile::Temporary(file) => file.path(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, StagedFile::Temporary(_))
    }
}
