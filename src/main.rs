//! The dataset generator. See "config.rs" for how the stages are configured.
//!
//! Every stage reads the output directory of the previous one, so stages can be run one at a time
//! (and re-run: existing outputs are skipped) or all at once with `run`.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stem_dataset::{
    audio::encode_to_wav_bytes,
    codec::{self, AudioCodec, grid_from_pickle},
    config::{PipelineConfig, SPLIT_NAMES},
    dispatch::WorkerPool,
    pipeline,
    registry::LocalRegistry,
    steps::{StageContext, augment, distort, encode, merge, split, upload},
    storage::{self, LocalStorage},
};

#[derive(Parser, Debug)]
#[command(name = "stem-dataset")]
#[command(about = "Builds the stem continuation dataset")]
#[command(version)]
struct Cli {
    /// TOML file with pipeline settings. Flags below take precedence over it.
    #[arg(short, long, env = "STEM_DATASET_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory of the dataset storage.
    #[arg(long, env = "STEM_DATASET_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Target stem category, e.g. "drum".
    #[arg(long, env = "STEM_DATASET_STEM_NAME")]
    stem_name: Option<String>,

    #[arg(long, env = "STEM_DATASET_SEED")]
    seed: Option<u64>,

    /// Codec device: cpu, cuda[:N] or mps.
    #[arg(long, env = "STEM_DATASET_DEVICE")]
    device: Option<String>,

    #[arg(long, env = "STEM_DATASET_CODEC_MODEL_DIR")]
    codec_model_dir: Option<PathBuf>,

    #[arg(long, env = "STEM_DATASET_REGISTRY_ROOT")]
    registry_root: Option<PathBuf>,

    #[arg(long, env = "STEM_DATASET_NUM_THREADS")]
    num_threads: Option<usize>,

    /// Prepend/append start and end tokens when encoding.
    #[arg(long)]
    add_boundary_tokens: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the zip archives of the original songs.
    Uncompress,
    /// Assort and merge stems into (all, stem) pairs.
    Merge,
    Augment,
    Distort,
    Encode,
    Split,
    Upload,
    /// Every creation stage, from merge to upload.
    Run,
    /// Decode a pickled token grid back into a WAV file.
    Decode { input: PathBuf, output: PathBuf },
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(root) = &self.storage_root {
            config.storage_root = root.clone();
        }
        if let Some(stem_name) = &self.stem_name {
            config.stem_name = stem_name.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(dir) = &self.codec_model_dir {
            config.codec_model_dir = dir.clone();
        }
        if let Some(root) = &self.registry_root {
            config.registry_root = root.clone();
        }
        if let Some(threads) = self.num_threads {
            config.num_threads = threads;
        }
        if self.add_boundary_tokens {
            config.add_boundary_tokens = true;
        }
        Ok(config)
    }
}

#[cfg(feature = "onnx")]
fn load_codec(config: &PipelineConfig) -> Result<Arc<dyn AudioCodec>> {
    use stem_dataset::codec::{Device, onnx::OnnxEncodec};

    let device: Device = config.device.parse()?;
    Ok(OnnxEncodec::shared(&config.codec_model_dir, &device)?)
}

#[cfg(not(feature = "onnx"))]
fn load_codec(_config: &PipelineConfig) -> Result<Arc<dyn AudioCodec>> {
    anyhow::bail!("this build has no codec, rebuild with `--features onnx` to encode or decode")
}

fn decode_file(config: &PipelineConfig, input: &Path, output: &Path) -> Result<()> {
    let model = load_codec(config)?;
    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let grid = grid_from_pickle(&bytes)?;
    let audio = codec::decode(model.as_ref(), &grid)?;
    info!(
        "Decoded {} tokens into {:.2}s of audio",
        grid.ncols(),
        audio.duration_secs()
    );
    std::fs::write(output, encode_to_wav_bytes(&audio)?)?;
    Ok(())
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let start_time = Instant::now();
    let cli = Cli::parse();
    let config = cli.pipeline_config()?;
    info!("Storage root: {}", config.storage_root.display());

    let storage = LocalStorage::new(&config.storage_root);
    let pool = WorkerPool::new(config.num_threads, config.retries)?;
    let ctx = StageContext::new(&storage, &pool, &config);
    let split_roots: Vec<String> = SPLIT_NAMES
        .iter()
        .map(|name| storage::join(&config.split_dir(), name))
        .collect();

    match &cli.command {
        Command::Uncompress => {
            pipeline::dataset_preparation_pipeline(&ctx)?;
        }
        Command::Merge => {
            merge::assort_and_merge_all(&ctx, &config.original_dir(), &config.merged_dir())?;
        }
        Command::Augment => {
            augment::augment_all(&ctx, &config.merged_dir(), &config.augmented_dir())?;
        }
        Command::Distort => {
            distort::distort_all(&ctx, &config.augmented_dir(), &config.distorted_dir())?;
        }
        Command::Encode => {
            let codec = load_codec(&config)?;
            encode::encode_all(&ctx, codec.as_ref(), &config.distorted_dir(), &config.encoded_dir())?;
        }
        Command::Split => {
            split::split_all(&ctx, &config.encoded_dir(), &config.split_dir())?;
        }
        Command::Upload => {
            let registry = LocalRegistry::new(&config.registry_root);
            upload::upload(&ctx, &registry, &split_roots, &config.dataset_tags())?;
        }
        Command::Run => {
            let codec = load_codec(&config)?;
            let registry = LocalRegistry::new(&config.registry_root);
            pipeline::dataset_creation_pipeline(&ctx, codec.as_ref(), &registry)?;
        }
        Command::Decode { input, output } => decode_file(&config, input, output)?,
    }

    info!("Done in {:?}", start_time.elapsed());
    Ok(())
}
