//! Dataset registry: where finished splits get published.
//!
//! Publishing goes through four steps: `create` a draft with its identity and tags, `add_files`
//! from a local directory, `upload` the content, `finalize` to seal the version.
//! `LocalRegistry` bakes the files of a draft into parquet shards under a directory, one row per
//! file with its relative `path` and raw `bytes`.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{Array, ArrayRef, LargeBinaryArray, LargeBinaryBuilder, LargeStringArray, LargeStringBuilder, RecordBatch},
    datatypes::{DataType, Field, Schema, SchemaRef},
};
use parquet::arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    config::PARQUET_CHUNK_SIZE,
    error::{DatasetError, Result},
    storage::escaped_pattern,
};

pub const MANIFEST_FILE: &str = "dataset.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub project: String,
    pub name: String,
    pub version: String,
    pub tags: Vec<String>,
}

/// A dataset version being assembled.
pub trait DatasetDraft: Send {
    /// Adds every file under `dir`. Returns how many were added.
    fn add_files(&mut self, dir: &Path) -> Result<usize>;

    fn upload(&mut self) -> Result<()>;

    /// Seals the version. Returns where it can be found.
    fn finalize(self: Box<Self>) -> Result<PathBuf>;
}

pub trait DatasetRegistry: Send + Sync {
    fn create(&self, descriptor: DatasetDescriptor, split: &str) -> Result<Box<dyn DatasetDraft>>;
}

/// Written next to the shards once a draft is finalized.
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(flatten)]
    pub descriptor: DatasetDescriptor,
    pub split: String,
    pub num_files: usize,
    pub shards: Vec<String>,
}

pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DatasetRegistry for LocalRegistry {
    fn create(&self, descriptor: DatasetDescriptor, split: &str) -> Result<Box<dyn DatasetDraft>> {
        info!("Creating dataset (set: {}, tags: {:?})", split, descriptor.tags);
        let dir = self
            .root
            .join(&descriptor.project)
            .join(&descriptor.name)
            .join(&descriptor.version)
            .join(split);
        if dir.join(MANIFEST_FILE).exists() {
            return Err(DatasetError::Config(format!(
                "dataset {} {} ({}) is already finalized",
                descriptor.name, descriptor.version, split
            )));
        }
        Ok(Box::new(LocalDraft {
            descriptor,
            split: split.to_string(),
            dir,
            files: Vec::new(),
            shards: Vec::new(),
            uploaded: false,
        }))
    }
}

struct LocalDraft {
    descriptor: DatasetDescriptor,
    split: String,
    dir: PathBuf,
    /// `(relative path, local file)`
    files: Vec<(String, PathBuf)>,
    shards: Vec<String>,
    uploaded: bool,
}

fn shard_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("path", DataType::LargeUtf8, false),
        Field::new("bytes", DataType::LargeBinary, false),
    ]))
}

impl DatasetDraft for LocalDraft {
    fn add_files(&mut self, dir: &Path) -> Result<usize> {
        info!("Adding files from {}", dir.display());
        let mut added = 0;
        for entry in glob::glob(&escaped_pattern(dir, "**/*"))? {
            let path = entry.map_err(|e| DatasetError::storage(dir.to_string_lossy(), e))?;
            if !path.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            self.files.push((relative, path));
            added += 1;
        }
        self.files.sort();
        Ok(added)
    }

    fn upload(&mut self) -> Result<()> {
        info!("Uploading {} files", self.files.len());
        fs::create_dir_all(&self.dir)?;
        let num_shards = self.files.len().div_ceil(PARQUET_CHUNK_SIZE);
        let schema = shard_schema();
        self.shards.clear();

        for (i, files) in self.files.chunks(PARQUET_CHUNK_SIZE).enumerate() {
            let mut path_builder = LargeStringBuilder::new();
            let mut bytes_builder = LargeBinaryBuilder::new();
            for (relative, local) in files {
                path_builder.append_value(relative);
                bytes_builder.append_value(fs::read(local)?);
            }
            let batch = RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(path_builder.finish()) as ArrayRef,
                    Arc::new(bytes_builder.finish()) as ArrayRef,
                ],
            )?;

            let name = format!("{}-{:05}-of-{:05}.parquet", self.split, i, num_shards);
            write_shard(&batch, &schema, &self.dir, &name)?;
            self.shards.push(name);
        }
        self.uploaded = true;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<PathBuf> {
        if !self.uploaded {
            return Err(DatasetError::Config(format!(
                "dataset {} ({}) was finalized before uploading",
                self.descriptor.name, self.split
            )));
        }
        info!("Finalizing");
        let manifest = Manifest {
            descriptor: self.descriptor,
            split: self.split,
            num_files: self.files.len(),
            shards: self.shards,
        };
        fs::write(self.dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;
        Ok(self.dir)
    }
}

/// Writes one shard under a temporary name, then moves it into place.
fn write_shard(batch: &RecordBatch, schema: &SchemaRef, dir: &Path, name: &str) -> Result<()> {
    let temp_path = dir.join(format!("{}.tmp", name));
    let file = File::create(&temp_path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;
    writer.write(batch)?;
    writer.close()?;
    fs::rename(temp_path, dir.join(name))?;
    Ok(())
}

/// Reads back the `(path, bytes)` rows of a shard.
pub fn read_shard(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let paths: &LargeStringArray = batch
            .column_by_name("path")
            .and_then(|c| c.as_any().downcast_ref())
            .ok_or_else(|| DatasetError::Config("shard is missing a 'path' string column".into()))?;
        let bytes: &LargeBinaryArray = batch
            .column_by_name("bytes")
            .and_then(|c| c.as_any().downcast_ref())
            .ok_or_else(|| DatasetError::Config("shard is missing a 'bytes' binary column".into()))?;
        for i in 0..batch.num_rows() {
            rows.push((paths.value(i).to_string(), bytes.value(i).to_vec()));
        }
    }
    Ok(rows)
}

pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    Ok(serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn descriptor() -> DatasetDescriptor {
        DatasetDescriptor {
            project: "project".into(),
            name: "dataset".into(),
            version: "1.0.0".into(),
            tags: vec!["train-set".into(), "final".into()],
        }
    }

    #[test]
    fn files_are_baked_into_shards() {
        let input = tempdir().unwrap();
        let registry_root = tempdir().unwrap();
        for i in 0..(PARQUET_CHUNK_SIZE + 3) {
            let path = input.path().join(format!("artist/song{:03}/all-c0.pkl", i));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, vec![i as u8; 4]).unwrap();
        }

        let registry = LocalRegistry::new(registry_root.path());
        let mut draft = registry.create(descriptor(), "train").unwrap();
        assert_eq!(draft.add_files(input.path()).unwrap(), PARQUET_CHUNK_SIZE + 3);
        draft.upload().unwrap();
        let dir = draft.finalize().unwrap();

        let manifest = read_manifest(&dir).unwrap();
        assert_eq!(manifest.num_files, PARQUET_CHUNK_SIZE + 3);
        assert_eq!(
            manifest.shards,
            vec!["train-00000-of-00002.parquet", "train-00001-of-00002.parquet"]
        );

        let first = read_shard(&dir.join(&manifest.shards[0])).unwrap();
        assert_eq!(first.len(), PARQUET_CHUNK_SIZE);
        assert_eq!(first[0], ("artist/song000/all-c0.pkl".to_string(), vec![0u8; 4]));
        let last = read_shard(&dir.join(&manifest.shards[1])).unwrap();
        assert_eq!(last.len(), 3);
    }

    #[test]
    fn files_under_a_bracketed_directory_are_found() {
        let input = tempdir().unwrap();
        let dir = input.path().join("split[1]");
        fs::create_dir_all(dir.join("artist")).unwrap();
        fs::write(dir.join("artist/all.pkl"), b"x").unwrap();

        let registry_root = tempdir().unwrap();
        let registry = LocalRegistry::new(registry_root.path());
        let mut draft = registry.create(descriptor(), "validation").unwrap();
        assert_eq!(draft.add_files(&dir).unwrap(), 1);
    }

    #[test]
    fn finalizing_needs_an_upload_and_seals_the_version() {
        let registry_root = tempdir().unwrap();
        let registry = LocalRegistry::new(registry_root.path());
        let draft = registry.create(descriptor(), "test").unwrap();
        assert!(draft.finalize().is_err());

        let mut draft = registry.create(descriptor(), "test").unwrap();
        draft.upload().unwrap();
        draft.finalize().unwrap();
        assert!(registry.create(descriptor(), "test").is_err());
    }
}
