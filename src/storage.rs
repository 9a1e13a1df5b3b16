//! Storage abstraction for index files.
//!
//! A [`Directory`] is a flat namespace of immutable files. Index data is
//! always written whole: outputs land in a temporary name first and are
//! renamed into place, and every file carries a crc32 footer that is
//! verified on read. Two implementations are provided, an in-memory one for
//! the rotating memory indexes and tests, and a file-system one for the
//! durable disk index.

pub mod fs;
pub mod ram;

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{PilumError, Result};

pub use fs::FsDirectory;
pub use ram::RamDirectory;

/// Number of trailing bytes reserved for the crc32 footer.
pub(crate) const CRC_FOOTER_LEN: usize = 4;

/// A flat, append-only namespace of index files.
pub trait Directory: Send + Sync + Debug {
    /// Read a whole file, verifying its checksum footer.
    fn read_file(&self, name: &str) -> Result<Arc<[u8]>>;

    /// Write a whole file atomically, appending a checksum footer. An
    /// existing file of the same name is replaced.
    fn write_file(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Check whether a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Atomically rename a file.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Size of a file in bytes, including the checksum footer.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Flush pending writes to the underlying medium.
    fn sync(&self) -> Result<()>;
}

/// Appends the crc32 footer to `data`.
pub(crate) fn seal(data: &[u8]) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    let crc = hasher.finalize();

    let mut sealed = Vec::with_capacity(data.len() + CRC_FOOTER_LEN);
    sealed.extend_from_slice(data);
    sealed.extend_from_slice(&crc.to_le_bytes());
    sealed
}

/// Verifies and strips the crc32 footer of a stored file.
pub(crate) fn unseal(name: &str, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < CRC_FOOTER_LEN {
        return Err(PilumError::corruption(format!(
            "file {name} is shorter than its checksum footer"
        )));
    }
    let (data, footer) = sealed.split_at(sealed.len() - CRC_FOOTER_LEN);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    let expected = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    if hasher.finalize() != expected {
        return Err(PilumError::corruption(format!(
            "checksum mismatch in file {name}"
        )));
    }
    Ok(data.to_vec())
}
