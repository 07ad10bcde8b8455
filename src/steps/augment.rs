//! Augment: every pair is kept as is (`-original`) and re-rendered a few times with random
//! pitch, tempo and gain (`-augmented{k}`).

use anyhow::Context;
use tracing::{debug, info};

use crate::{
    audio::{AudioBuffer, read_audio, write_audio},
    config::{AUGMENT_PITCH, AUGMENTATIONS_COUNT},
    dispatch::task_rng,
    error::Result,
    steps::{StageContext, track_pairs},
    storage::{self, Storage},
    transforms::{AugmentParams, apply_chain},
};

// Augmented audio is cut to a whole number of these blocks (f32 item size times the rate).
const BLOCK_SECONDS: usize = std::mem::size_of::<f32>();

/// Drops the trailing partial block.
pub fn trim_to_whole_blocks(audio: &mut AudioBuffer) {
    let block = BLOCK_SECONDS * audio.sample_rate as usize;
    if block == 0 {
        return;
    }
    let length = audio.num_frames();
    audio.truncate(length - length % block);
}

/// Renders each `(input, output)` file with the same parameters.
pub fn augment_files(storage: &dyn Storage, files: &[(String, String)], params: &AugmentParams) -> Result<()> {
    let chain = params.transforms();
    for (input, output) in files {
        let audio = read_audio(storage, input)?;
        let mut augmented = apply_chain(&chain, &audio)?;
        trim_to_whole_blocks(&mut augmented);
        // Clamped on write.
        write_audio(storage, output, &augmented)?;
    }
    Ok(())
}

fn copy_if_missing(storage: &dyn Storage, from: &str, to: &str) -> Result<()> {
    if storage.exists(to) {
        return Ok(());
    }
    if !storage.exists(from) {
        debug!("{} is missing, not copying", from);
        return Ok(());
    }
    storage.copy(from, to)
}

pub fn augment_pair(
    ctx: &StageContext,
    source: &str,
    output: &str,
    (full_track, stem): &(String, String),
) -> anyhow::Result<()> {
    let storage = ctx.storage;
    let relative = storage::relative_to(storage::parent(full_track), source);
    let full_track_name = storage::file_name(full_track);
    let stem_name = storage::file_name(stem);

    let original_dir = storage::join(output, &format!("{}-original", relative));
    storage.make_dirs(&original_dir)?;
    copy_if_missing(storage, full_track, &storage::join(&original_dir, full_track_name))?;
    copy_if_missing(storage, stem, &storage::join(&original_dir, stem_name))?;

    for k in 0..AUGMENTATIONS_COUNT {
        let variant = format!("{}-augmented{}", relative, k);
        let variant_dir = storage::join(output, &variant);
        let outputs = (
            storage::join(&variant_dir, full_track_name),
            storage::join(&variant_dir, stem_name),
        );
        if storage.exists(&outputs.0) && storage.exists(&outputs.1) {
            continue;
        }

        let mut rng = task_rng(ctx.config.seed, &variant);
        let params = AugmentParams::sample(&mut rng, AUGMENT_PITCH);
        debug!("{}: {:?}", variant, params);
        storage.make_dirs(&variant_dir)?;
        augment_files(
            storage,
            &[(full_track.clone(), outputs.0), (stem.clone(), outputs.1)],
            &params,
        )
        .with_context(|| format!("augmenting {}", variant))?;
    }
    Ok(())
}

pub fn augment_all(ctx: &StageContext, source: &str, output: &str) -> anyhow::Result<String> {
    let pairs = track_pairs(ctx.storage, ctx.config, source)?;
    info!("Augmenting {} audio tracks", pairs.len());
    ctx.pool.run("augment", pairs, |pair| augment_pair(ctx, source, output, pair));
    Ok(output.to_string())
}
