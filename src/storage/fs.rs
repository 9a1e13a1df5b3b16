//! File-system directory implementation.
//!
//! Writes go to a `.tmp` sibling first and are renamed into place so a
//! crash never leaves a half-written file under its final name. Reads go
//! through a memory map.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{PilumError, Result};
use crate::storage::{Directory, seal, unseal};

/// Suffix used for in-flight writes. Files carrying it are ignored by
/// listings and garbage collection.
pub const TMP_SUFFIX: &str = ".tmp";

/// A file-system backed [`Directory`] rooted at a single path.
#[derive(Debug)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Open a directory at `root`, creating it if necessary.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(FsDirectory { root })
    }

    /// The root path of this directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(PilumError::invalid_argument(format!(
                "invalid file name: {name}"
            )));
        }
        Ok(self.root.join(name))
    }
}

impl Directory for FsDirectory {
    fn read_file(&self, name: &str) -> Result<Arc<[u8]>> {
        let path = self.path_of(name)?;
        let file = File::open(&path)
            .map_err(|e| PilumError::storage(format!("cannot open {}: {e}", path.display())))?;
        if file.metadata()?.len() == 0 {
            return unseal(name, &[]).map(Into::into);
        }
        // Safety: files are immutable once published under their final name
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(unseal(name, &mmap[..])?.into())
    }

    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let final_path = self.path_of(name)?;
        let tmp_path = self.root.join(format!("{name}{TMP_SUFFIX}"));

        let sealed = seal(data);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&sealed)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path_of(name).map(|p| p.exists()).unwrap_or(false)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        fs::remove_file(&path)
            .map_err(|e| PilumError::storage(format!("cannot delete {}: {e}", path.display())))?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(TMP_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_path = self.path_of(old_name)?;
        let new_path = self.path_of(new_name)?;
        fs::rename(&old_path, &new_path)?;
        Ok(())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let path = self.path_of(name)?;
        Ok(fs::metadata(&path)?.len())
    }

    fn sync(&self) -> Result<()> {
        // Persist directory entries created by renames
        let dir = File::open(&self.root)?;
        dir.sync_all()?;
        Ok(())
    }
}
