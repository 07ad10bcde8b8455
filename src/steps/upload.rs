//! Upload: publishes each split to the dataset registry.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tempfile::TempDir;
use tracing::{error, info};

use crate::{
    config::{DATASET_NAME, DATASET_PROJECT_NAME, DATASET_VERSION, DOWNLOAD_ATTEMPTS},
    dispatch::BatchReport,
    registry::{DatasetDescriptor, DatasetRegistry},
    steps::StageContext,
    storage::{self, retry},
};

/// Registry tags of a split: `{split}-set`, the run's tags, then `final`.
pub fn split_tags(split: &str, tags: &[String]) -> Vec<String> {
    std::iter::once(format!("{}-set", split))
        .chain(tags.iter().cloned())
        .chain(std::iter::once("final".to_string()))
        .collect()
}

/// Fetches every `.pkl` under `split_root` into `local_dir`. Files that keep failing are dropped.
pub fn download_split(ctx: &StageContext, split_root: &str, local_dir: &Path) -> anyhow::Result<BatchReport> {
    let files = ctx.storage.glob(&storage::join(split_root, "**/*.pkl"))?;
    // The retry happens inside the task, the pool must not repeat it.
    Ok(ctx.pool.run_with_retries("download", files, 0, |key| {
        let local_path = local_dir.join(storage::relative_to(key, split_root));
        if local_path.exists() {
            return Ok(());
        }
        retry(DOWNLOAD_ATTEMPTS, &format!("getting {}", key), || {
            ctx.storage.get(key, &local_path)
        })
        .map_err(|e| {
            error!("Error getting {}, abandoning", key);
            anyhow::Error::from(e)
        })
    }))
}

/// Publishes `split_roots` (e.g. `{stem}/split/train`) one by one. Returns the published locations.
pub fn upload(
    ctx: &StageContext,
    registry: &dyn DatasetRegistry,
    split_roots: &[String],
    tags: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    let mut published = Vec::with_capacity(split_roots.len());
    for split_root in split_roots {
        let split = storage::file_name(split_root);
        let local = TempDir::new()?;
        info!(
            "Downloading {} dataset (folder {}) into {}",
            split,
            split_root,
            local.path().display()
        );
        let report = download_split(ctx, split_root, local.path())?;
        if !report.failed.is_empty() {
            error!(
                "{}: {} of {} files could not be downloaded",
                split,
                report.failed.len(),
                report.total()
            );
        }

        info!("Uploading {} dataset", split);
        let descriptor = DatasetDescriptor {
            project: DATASET_PROJECT_NAME.to_string(),
            name: DATASET_NAME.to_string(),
            version: DATASET_VERSION.to_string(),
            tags: split_tags(split, tags),
        };
        let mut draft = registry.create(descriptor, split)?;
        draft.add_files(local.path())?;
        draft.upload()?;
        let location = draft
            .finalize()
            .with_context(|| format!("finalizing the {} dataset", split))?;
        published.push(location);
    }
    Ok(published)
}
