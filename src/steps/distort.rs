//! Distort: degrades the full mix of each pair. The target stem is left clean.

use anyhow::Context;
use tracing::{debug, info};

use crate::{
    audio::{read_audio, write_audio},
    dispatch::task_rng,
    steps::{StageContext, mirror_key, track_pairs},
    storage,
    transforms::{apply_chain, sample_distortions},
};

pub fn distort_pair(
    ctx: &StageContext,
    source: &str,
    output: &str,
    (full_track, stem): &(String, String),
) -> anyhow::Result<()> {
    let storage = ctx.storage;
    let full_track_output = mirror_key(full_track, source, output);
    storage.make_dirs(storage::parent(&full_track_output))?;

    if !storage.exists(&full_track_output) {
        let mut rng = task_rng(ctx.config.seed, &storage::relative_to(full_track, source));
        let chain = sample_distortions(&mut rng);
        debug!(
            "{}: {:?}",
            full_track,
            chain.iter().map(|t| t.name()).collect::<Vec<_>>()
        );
        let audio = read_audio(storage, full_track)?;
        let distorted = apply_chain(&chain, &audio)?;
        write_audio(storage, &full_track_output, &distorted)
            .with_context(|| format!("writing {}", full_track_output))?;
    }

    let stem_output = mirror_key(stem, source, output);
    if !storage.exists(&stem_output) {
        storage.copy(stem, &stem_output)?;
    }
    Ok(())
}

pub fn distort_all(ctx: &StageContext, source: &str, output: &str) -> anyhow::Result<String> {
    let pairs = track_pairs(ctx.storage, ctx.config, source)?;
    info!("Distorting {} audio tracks", pairs.len());
    ctx.pool.run("distort", pairs, |pair| distort_pair(ctx, source, output, pair));
    Ok(output.to_string())
}
