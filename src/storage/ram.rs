//! In-memory directory implementation.
//!
//! Backs the rotating memory indexes and is also convenient for tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{PilumError, Result};
use crate::storage::{Directory, seal, unseal};

/// An in-memory [`Directory`].
///
/// Files live in a map of sealed byte buffers. Writes replace the whole
/// entry, so readers holding an `Arc` to previously read data are never
/// affected by later writes.
#[derive(Debug, Default)]
pub struct RamDirectory {
    files: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl RamDirectory {
    /// Create a new, empty in-memory directory.
    pub fn new() -> Self {
        RamDirectory {
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Total size of all stored files in bytes.
    pub fn total_size(&self) -> u64 {
        self.files.read().values().map(|d| d.len() as u64).sum()
    }
}

impl Directory for RamDirectory {
    fn read_file(&self, name: &str) -> Result<Arc<[u8]>> {
        let files = self.files.read();
        let sealed = files
            .get(name)
            .ok_or_else(|| PilumError::storage(format!("file not found: {name}")))?;
        Ok(unseal(name, sealed)?.into())
    }

    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let sealed: Arc<[u8]> = seal(data).into();
        self.files.write().insert(name.to_string(), sealed);
        Ok(())
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files
            .write()
            .remove(name)
            .ok_or_else(|| PilumError::storage(format!("file not found: {name}")))?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.write();
        let data = files
            .remove(old_name)
            .ok_or_else(|| PilumError::storage(format!("file not found: {old_name}")))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let files = self.files.read();
        let sealed = files
            .get(name)
            .ok_or_else(|| PilumError::storage(format!("file not found: {name}")))?;
        Ok(sealed.len() as u64)
    }

    fn sync(&self) -> Result<()> {
        // Nothing to flush for memory storage
        Ok(())
    }
}
