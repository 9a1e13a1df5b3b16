//! The index signature: a durable `<index_path>@<version>` pair.
//!
//! The signature makes the (directory, version) pair crash-safe: updates
//! are written to a sibling temp file and renamed into place, so readers
//! never observe a half-written record.

use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::error::Result;
use crate::Version;

/// Name of the signature file inside the index home directory.
pub const SIGNATURE_FILE: &str = "index.directory";

/// Name of the engine directory the default signature points at.
pub const INDEX_DIR_NAME: &str = "index";

/// Points at the live index directory and records its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSignature {
    /// Index directory path, relative to the index home.
    pub index_path: String,

    /// Version of the last durably applied event.
    pub version: Version,
}

impl IndexSignature {
    /// Create a signature.
    pub fn new<S: Into<String>>(index_path: S, version: Version) -> Self {
        IndexSignature {
            index_path: index_path.into(),
            version,
        }
    }

    /// Read a signature file. Returns `None` when the file does not exist,
    /// which means the index is starting empty.
    pub fn read(file: &Path) -> Result<Option<IndexSignature>> {
        if !file.exists() {
            info!("starting with empty search index: no signature file found");
            return Ok(None);
        }
        let line = fs::read_to_string(file)?;
        let line = line.trim();

        let Some((index_path, version)) = line.rsplit_once('@') else {
            warn!("malformed index signature {line:?}, treating version as 0");
            return Ok(Some(IndexSignature::new(line, 0)));
        };
        let version = version.parse().unwrap_or_else(|_| {
            warn!("malformed index signature version in {line:?}, treating as 0");
            0
        });
        Ok(Some(IndexSignature::new(index_path, version)))
    }

    /// Write the signature atomically: temp file first, then rename.
    pub fn save(&self, file: &Path) -> Result<()> {
        let content = format!("{}@{}", self.index_path, self.version);

        let mut tmp = file.as_os_str().to_owned();
        tmp.push(".new");
        let tmp = Path::new(&tmp);

        fs::write(tmp, content.as_bytes())?;
        fs::rename(tmp, file)?;
        Ok(())
    }
}
