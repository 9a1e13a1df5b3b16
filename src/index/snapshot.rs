//! Snapshot export and import for the disk index.
//!
//! A snapshot is the current commit's file set plus the signature version,
//! streamed over a byte channel with length-prefixed framing and a trailing
//! checksum. Import fully stages and verifies the stream before it touches
//! the destination, so an interrupted transfer leaves prior state intact.

use std::fs;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::info;
use uuid::Uuid;

use crate::engine::DeletionPolicy;
use crate::error::{PilumError, Result};
use crate::index::disk::DiskIndex;
use crate::index::signature::{IndexSignature, SIGNATURE_FILE};
use crate::storage::{Directory, FsDirectory};

/// Stream magic, "PLSN".
const SNAPSHOT_MAGIC: u32 = 0x504C_534E;

/// Stream format version.
const SNAPSHOT_FORMAT: u32 = 1;

/// Upper bound on a single streamed file, a structural sanity check.
const MAX_FILE_LEN: u64 = 1 << 40;

struct HashingWriter<'a> {
    inner: &'a mut dyn Write,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl Write for HashingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

struct HashingReader<'a> {
    inner: &'a mut dyn Read,
    hasher: crc32fast::Hasher,
}

impl Read for HashingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Stream the disk index's current commit into `writer`. Returns the
/// number of bytes written.
pub(crate) fn export_snapshot<D: Send + Sync + 'static>(
    index: &DiskIndex<D>,
    writer: &mut dyn Write,
) -> Result<u64> {
    let dir = index.engine().directory();
    // keep the exported commit's files alive for the whole stream
    let pin = DeletionPolicy::pin_latest(index.engine().policy(), dir.as_ref())?;

    let signature = IndexSignature::read(&index.home().join(SIGNATURE_FILE))?
        .unwrap_or_else(|| IndexSignature::new(index.index_path(), 0));
    let files = pin.as_ref().map(|p| p.files()).unwrap_or_default();

    let mut out = HashingWriter {
        inner: &mut *writer,
        hasher: crc32fast::Hasher::new(),
        written: 0,
    };

    out.write_u32::<LittleEndian>(SNAPSHOT_MAGIC)?;
    out.write_u32::<LittleEndian>(SNAPSHOT_FORMAT)?;
    out.write_u64::<LittleEndian>(signature.version)?;
    out.write_u32::<LittleEndian>(files.len() as u32)?;

    for name in &files {
        let data = dir.read_file(name)?;
        out.write_u16::<LittleEndian>(name.len() as u16)?;
        out.write_all(name.as_bytes())?;
        out.write_u64::<LittleEndian>(data.len() as u64)?;
        out.write_all(&data)?;
    }

    let crc = out.hasher.clone().finalize();
    let written = out.written + 4;
    drop(out);
    writer.write_u32::<LittleEndian>(crc)?;
    writer.flush()?;

    info!(
        "exported snapshot of generation {:?}: {} files, {written} bytes",
        pin.as_ref().map(|p| p.generation()),
        files.len()
    );
    Ok(written)
}

/// Install a previously exported snapshot into the disk index.
pub(crate) fn import_snapshot<D: Send + Sync + 'static>(
    index: &DiskIndex<D>,
    reader: &mut dyn Read,
) -> Result<()> {
    let staging_path = index
        .home()
        .join(format!("import-{}.staging", Uuid::new_v4().simple()));

    let result = stage_snapshot(reader, &staging_path);
    let (version, file_count) = match result {
        Ok(staged) => staged,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging_path);
            return Err(e);
        }
    };

    // the stream is fully verified; now swap it into place
    index.refresh();
    let index_dir = index.home().join(index.index_path());
    if index_dir.exists() {
        let aside = index.home().join(format!(
            "{}-replaced-{}",
            index.index_path(),
            Uuid::new_v4().simple()
        ));
        fs::rename(&index_dir, &aside)?;
        let _ = fs::remove_dir_all(&aside);
    }
    fs::rename(&staging_path, &index_dir)?;

    IndexSignature::new(index.index_path(), version)
        .save(&index.home().join(SIGNATURE_FILE))?;

    info!("imported snapshot: {file_count} files at version {version}");
    Ok(())
}

/// Read the whole stream into a staging directory, verifying framing and
/// checksum. Returns the streamed version and file count.
fn stage_snapshot(reader: &mut dyn Read, staging_path: &std::path::Path) -> Result<(u64, u32)> {
    let staging = FsDirectory::open(staging_path)?;

    let mut input = HashingReader {
        inner: &mut *reader,
        hasher: crc32fast::Hasher::new(),
    };

    if input.read_u32::<LittleEndian>()? != SNAPSHOT_MAGIC {
        return Err(PilumError::corruption("snapshot stream has a bad magic"));
    }
    let format = input.read_u32::<LittleEndian>()?;
    if format != SNAPSHOT_FORMAT {
        return Err(PilumError::corruption(format!(
            "unsupported snapshot format {format}"
        )));
    }
    let version = input.read_u64::<LittleEndian>()?;
    let file_count = input.read_u32::<LittleEndian>()?;

    for _ in 0..file_count {
        let name_len = input.read_u16::<LittleEndian>()? as usize;
        let mut name = vec![0u8; name_len];
        input.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| PilumError::corruption("snapshot file name is not UTF-8"))?;

        let data_len = input.read_u64::<LittleEndian>()?;
        if data_len > MAX_FILE_LEN {
            return Err(PilumError::corruption(format!(
                "snapshot file {name} claims {data_len} bytes"
            )));
        }
        let mut data = vec![0u8; data_len as usize];
        input.read_exact(&mut data)?;
        staging.write_file(&name, &data)?;
    }

    let computed = input.hasher.clone().finalize();
    drop(input);
    let streamed = reader.read_u32::<LittleEndian>()?;
    if computed != streamed {
        return Err(PilumError::corruption("snapshot stream checksum mismatch"));
    }

    Ok((version, file_count))
}
