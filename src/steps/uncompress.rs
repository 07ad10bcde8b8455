//! Uncompress: extracts the zip archives songs are delivered in, next to the archive.

use std::{
    io::Read,
    path::{Component, Path},
};

use tracing::info;

use crate::{
    error::{DatasetError, Result},
    steps::StageContext,
    storage::{self, Storage},
};

fn archive_error(e: impl std::fmt::Debug) -> DatasetError {
    DatasetError::Archive(format!("{:?}", e))
}

/// Extracts one archive into its directory. Returns the number of files written.
pub fn extract_archive(storage: &dyn Storage, key: &str) -> Result<usize> {
    let buf = storage.read(key)?;
    let archive = rawzip::ZipArchive::from_slice(&buf).map_err(archive_error)?;
    let dir = storage::parent(key);
    let mut written = 0;

    for entry in archive.entries() {
        let entry = entry.map_err(archive_error)?;
        if entry.is_dir() {
            continue;
        }
        let filename = entry
            .file_path()
            .try_normalize()
            .map_err(archive_error)?
            .as_ref()
            .to_string();
        let path = Path::new(&filename);
        if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(DatasetError::Archive(format!("unsafe path in {}: {}", key, filename)));
        }

        let data = archive
            .get_entry(entry.wayfinder())
            .map_err(archive_error)?
            .data();
        let mut bytes = Vec::new();
        match entry.compression_method() {
            rawzip::CompressionMethod::Store => bytes.extend_from_slice(data),
            rawzip::CompressionMethod::Deflate => {
                flate2::read::DeflateDecoder::new(data).read_to_end(&mut bytes)?;
            }
            method => {
                return Err(DatasetError::Archive(format!(
                    "unsupported compression method in {}: {:?}",
                    key, method
                )));
            }
        }
        storage.write(&storage::join(dir, &filename), &bytes)?;
        written += 1;
    }
    Ok(written)
}

/// Extracts every archive under `source` and deletes it. Archives that fail are kept and logged.
pub fn uncompress_files(ctx: &StageContext, source: &str) -> anyhow::Result<String> {
    let archives = ctx.storage.glob(&storage::join(source, "**/*.zip"))?;
    info!("Uncompressing {} files", archives.len());
    ctx.pool.run_with_retries("uncompress", archives, 0, |key| {
        let written = extract_archive(ctx.storage, key)?;
        ctx.storage.remove(key)?;
        info!("{}: {} files", key, written);
        Ok(())
    });
    Ok(source.to_string())
}
