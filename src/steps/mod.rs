//! The pipeline stages. Each one reads a source directory and writes an output directory in the
//! same storage, keyed by relative path.

pub mod augment;
pub mod distort;
pub mod encode;
pub mod merge;
pub mod split;
pub mod uncompress;
pub mod upload;

use std::collections::BTreeSet;

use crate::{
    config::PipelineConfig,
    dispatch::WorkerPool,
    error::Result,
    storage::{self, Storage},
};

/// What every stage needs: where the data is, who does the work, and how.
pub struct StageContext<'a> {
    pub storage: &'a dyn Storage,
    pub pool: &'a WorkerPool,
    pub config: &'a PipelineConfig,
}

impl<'a> StageContext<'a> {
    pub fn new(storage: &'a dyn Storage, pool: &'a WorkerPool, config: &'a PipelineConfig) -> Self {
        Self {
            storage,
            pool,
            config,
        }
    }
}

/// `key` moved from under `source` to the same place under `output`.
pub fn mirror_key(key: &str, source: &str, output: &str) -> String {
    storage::join(output, &storage::relative_to(key, source))
}

/// Every `(all, stem)` pair under `source`, as found by the full tracks.
pub fn track_pairs(storage: &dyn Storage, config: &PipelineConfig, source: &str) -> Result<Vec<(String, String)>> {
    let full_tracks = storage.glob(&storage::join(source, &format!("**/{}", config.full_track_file())))?;
    Ok(full_tracks
        .into_iter()
        .map(|full_track| {
            let stem = storage::join(storage::parent(&full_track), &config.stem_track_file());
            (full_track, stem)
        })
        .collect())
}

/// Directories directly holding at least one file with one of `extensions`.
pub fn directories_containing(
    storage: &dyn Storage,
    source: &str,
    extensions: &[&str],
) -> Result<Vec<String>> {
    let mut directories = BTreeSet::new();
    for extension in extensions {
        for key in storage.glob(&storage::join(source, &format!("**/*.{}", extension)))? {
            directories.insert(storage::parent(&key).to_string());
        }
    }
    Ok(directories.into_iter().collect())
}
