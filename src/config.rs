//! Configuration for how to build the dataset.
//!
//! The dataset is built in stages, each one reading the output directory of the previous one.
//! Everything that shapes the sampling of assortments (aliases, quotas, caps) is fixed at compile
//! time here, in the same way the baking recipe is. Everything that differs between runs (where the
//! data lives, which stem is the target, the seed) lives in `PipelineConfig`, which is read from an
//! optional TOML file and can be overridden on the command line.

use std::path::{Path, PathBuf};

use phf::phf_map;
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};

pub const RANDOM_SEED: u64 = 42;

pub const DEFAULT_STEM_NAME: &str = "drum";

// Stage output directories, relative to the storage root.
pub const ORIGINAL_DIR: &str = "original";
pub const MERGED_DIR: &str = "merged";
pub const AUGMENTED_DIR: &str = "augmented";
pub const DISTORTED_DIR: &str = "distorted";
pub const ENCODED_DIR: &str = "encoded";
pub const SPLIT_DIR: &str = "split";

// Names of the two files making up one training pair.
pub const FULL_TRACK_NAME: &str = "all";
pub const STEM_TRACK_NAME: &str = "stem";

/// Extensions the stem discovery accepts as source audio.
pub const SOURCE_AUDIO_EXTENSIONS: &[&str] = &["ogg", "wav", "flac", "mp3"];

// --- Assortments ---

/// Every stem whose name contains one of these is a candidate for the "basic" pool.
pub const BASIC_STEM_NAMES: &[&str] = &["guitar", "drum", "bass", "perc", "gtr", "drm", "piano"];

/// Extra names a stem category goes by, on top of the category name itself.
pub const ADDITIONAL_STEM_NAMES: phf::Map<&'static str, &'static [&'static str]> = phf_map! {
    "guitar" => &["guitars", "gtr"],
    "drum" => &["drum", "drm"],
    "piano" => &["keys"],
    "vocals" => &["vocal", "vox"],
};

pub const MAX_BASIC_STEM_RANDOM_ASSORTMENTS_PER_SONG: usize = 4;
pub const MAX_RANDOM_FULL_ASSORTMENTS_PER_SONG: usize = 4;
pub const MAX_STEMS_IN_ASSORTMENT: usize = 3;

// Threshold for source stems. `list_stems` takes it as an argument.
pub const MIN_NON_SILENT_FRACTION: f64 = 0.5;

// librosa-style split: anything 60dB under the loudest frame is silence.
pub const SILENCE_TOP_DB: f32 = 60.0;
pub const SILENCE_FRAME_LENGTH: usize = 2048;
pub const SILENCE_HOP_LENGTH: usize = 512;

// --- Augmentation ---

pub const AUGMENTATIONS_COUNT: usize = 4;
pub const AUGMENT_PITCH: bool = false;

// --- Codec ---

// Large values need a lot of memory during codec inference.
pub const ENCODED_TOKENS_PER_CHUNK: usize = 512;
pub const CODEC_BANDWIDTH: f32 = 2.2;

pub const VOCAB_SIZE: i64 = 2048;
pub const PAD_TOKEN_ID: i64 = VOCAB_SIZE - 3;
pub const SOS_TOKEN_ID: i64 = VOCAB_SIZE - 2;
pub const EOS_TOKEN_ID: i64 = VOCAB_SIZE - 1;

// --- Split & upload ---

pub const SPLIT_NAMES: [&str; 3] = ["train", "validation", "test"];
pub const VALIDATION_SIZE: f64 = 0.08;
pub const TEST_SIZE: f64 = 0.06;

pub const DOWNLOAD_ATTEMPTS: usize = 3;

// How many rows per parquet shard when publishing a split.
pub const PARQUET_CHUNK_SIZE: usize = 64;

pub const DATASET_PROJECT_NAME: &str = "stem_continuation_dataset_generator";
pub const DATASET_NAME: &str = "stem_continuation_dataset";
pub const DATASET_VERSION: &str = "1.0.0";
pub const DATASET_TAGS: &[&str] = &["medium"];

/// Per-run settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the storage all stage directories live under.
    pub storage_root: PathBuf,
    /// Target stem category, e.g. "drum".
    pub stem_name: String,
    pub seed: u64,
    /// Extension (and container) of the audio files the stages write.
    pub audio_extension: String,
    pub include_all_stems_assortment: bool,
    pub tokens_per_chunk: usize,
    pub add_boundary_tokens: bool,
    /// Write one `-c{i}` file per chunk instead of one file per track.
    pub chunked_output: bool,
    pub device: String,
    pub codec_model_dir: PathBuf,
    /// Retries granted to each task of a batch.
    pub retries: usize,
    /// Size of the worker pool. 0 lets rayon decide.
    pub num_threads: usize,
    pub registry_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("data"),
            stem_name: DEFAULT_STEM_NAME.into(),
            seed: RANDOM_SEED,
            audio_extension: "wav".into(),
            include_all_stems_assortment: false,
            tokens_per_chunk: ENCODED_TOKENS_PER_CHUNK,
            add_boundary_tokens: false,
            chunked_output: true,
            device: "cpu".into(),
            codec_model_dir: PathBuf::from("models/encodec_32khz"),
            retries: 2,
            num_threads: 0,
            registry_root: PathBuf::from("registry"),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| DatasetError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn original_dir(&self) -> String {
        ORIGINAL_DIR.to_string()
    }

    pub fn merged_dir(&self) -> String {
        format!("{}/{}", self.stem_name, MERGED_DIR)
    }

    pub fn augmented_dir(&self) -> String {
        format!("{}/{}", self.stem_name, AUGMENTED_DIR)
    }

    pub fn distorted_dir(&self) -> String {
        format!("{}/{}", self.stem_name, DISTORTED_DIR)
    }

    pub fn encoded_dir(&self) -> String {
        format!("{}/{}", self.stem_name, ENCODED_DIR)
    }

    pub fn split_dir(&self) -> String {
        format!("{}/{}", self.stem_name, SPLIT_DIR)
    }

    pub fn full_track_file(&self) -> String {
        format!("{}.{}", FULL_TRACK_NAME, self.audio_extension)
    }

    pub fn stem_track_file(&self) -> String {
        format!("{}.{}", STEM_TRACK_NAME, self.audio_extension)
    }

    pub fn dataset_tags(&self) -> Vec<String> {
        DATASET_TAGS
            .iter()
            .map(|t| t.to_string())
            .chain(std::iter::once(format!("stem-{}", self.stem_name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: PipelineConfig = toml::from_str("stem_name = \"guitar\"\nseed = 7\n").unwrap();
        assert_eq!(cfg.stem_name, "guitar");
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.tokens_per_chunk, ENCODED_TOKENS_PER_CHUNK);
        assert_eq!(cfg.merged_dir(), "guitar/merged");
        assert_eq!(cfg.full_track_file(), "all.wav");
    }

    #[test]
    fn special_tokens_sit_at_the_top_of_the_vocabulary() {
        assert_eq!(PAD_TOKEN_ID, 2045);
        assert_eq!(SOS_TOKEN_ID, 2046);
        assert_eq!(EOS_TOKEN_ID, 2047);
    }

    #[test]
    fn tags_carry_the_stem_name() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.dataset_tags(), vec!["medium".to_string(), "stem-drum".to_string()]);
    }
}
