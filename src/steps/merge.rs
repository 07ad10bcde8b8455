//! Assort & merge: turns each song's stems into `(all, stem)` training pairs.

use anyhow::Context;
use tracing::{debug, info};

use crate::{
    assort::{Assortment, StemFile, assort},
    audio::{read_audio, write_audio},
    config::{MIN_NON_SILENT_FRACTION, SOURCE_AUDIO_EXTENSIONS},
    dispatch::task_rng,
    error::{DatasetError, Result},
    silence::is_file_mostly_silent,
    steps::{StageContext, directories_containing},
    storage::{self, Storage},
};

/// Audio files directly inside `dir`, classified for silence.
pub fn list_stems(storage: &dyn Storage, dir: &str, min_non_silent_fraction: f64) -> Result<Vec<StemFile>> {
    let mut paths = Vec::new();
    for extension in SOURCE_AUDIO_EXTENSIONS {
        paths.extend(storage.glob(&storage::join(dir, &format!("*.{}", extension)))?);
    }
    paths.sort();
    paths
        .into_iter()
        .map(|path| {
            let silent = is_file_mostly_silent(storage, &path, min_non_silent_fraction)?;
            Ok(StemFile::new(path, silent))
        })
        .collect()
}

/// Mixes `inputs` into one file. The first input sets the length and format of the mix.
pub fn merge_stems(storage: &dyn Storage, inputs: &[String], output: &str) -> Result<()> {
    let (first, rest) = inputs
        .split_first()
        .ok_or_else(|| DatasetError::storage(output, "nothing to merge"))?;
    let mut mix = read_audio(storage, first)?;
    for input in rest {
        mix.overlay(&read_audio(storage, input)?)?;
    }
    write_audio(storage, output, &mix)
}

/// Puts the target stem next to its mix, re-encoding it when the source container differs.
fn export_stem(storage: &dyn Storage, stem: &str, output: &str, extension: &str) -> Result<()> {
    let same_format = storage::file_name(stem)
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension));
    if same_format {
        storage.copy(stem, output)
    } else {
        write_audio(storage, output, &read_audio(storage, stem)?)
    }
}

fn render_assortment(
    ctx: &StageContext,
    assortment: &Assortment,
    song_directory: &str,
) -> anyhow::Result<()> {
    let storage = ctx.storage;
    storage.make_dirs(song_directory)?;

    let full_track = storage::join(song_directory, &ctx.config.full_track_file());
    if storage.exists(&full_track) {
        debug!("{} already exists", full_track);
    } else {
        let inputs: Vec<String> = assortment
            .accompaniment_stems
            .iter()
            .cloned()
            .chain(std::iter::once(assortment.target_stem.clone()))
            .collect();
        merge_stems(storage, &inputs, &full_track)
            .with_context(|| format!("merging {:?} into {}", inputs, full_track))?;
    }

    let stem = storage::join(song_directory, &ctx.config.stem_track_file());
    if !storage.exists(&stem) {
        export_stem(storage, &assortment.target_stem, &stem, &ctx.config.audio_extension)
            .with_context(|| format!("exporting {}", assortment.target_stem))?;
    }
    Ok(())
}

/// Assorts and renders one song directory.
pub fn assort_directory(
    ctx: &StageContext,
    source: &str,
    output: &str,
    directory: &str,
) -> anyhow::Result<()> {
    let relative = storage::relative_to(directory, source);
    let stems = list_stems(ctx.storage, directory, MIN_NON_SILENT_FRACTION)
        .with_context(|| format!("listing stems of {}", directory))?;
    let mut rng = task_rng(ctx.config.seed, &relative);
    let assortments = assort(
        &stems,
        &ctx.config.stem_name,
        ctx.config.include_all_stems_assortment,
        &mut rng,
    );
    debug!(
        "{}: {} stems, {} targets",
        relative,
        stems.len(),
        assortments.len()
    );

    // A song may hold several stems of the category ("vocals", "vocals_2").
    for (i, target_assortments) in assortments.iter().enumerate() {
        for (j, assortment) in target_assortments.iter().enumerate() {
            let song_directory = storage::join(output, &format!("{}-inst{}-assort{}", relative, i, j));
            render_assortment(ctx, assortment, &song_directory)?;
        }
    }
    Ok(())
}

/// Runs the stage over every song under `source`. Returns the output directory.
pub fn assort_and_merge_all(ctx: &StageContext, source: &str, output: &str) -> anyhow::Result<String> {
    let directories = directories_containing(ctx.storage, source, SOURCE_AUDIO_EXTENSIONS)?;
    info!("Assorting and merging audio tracks of {} songs", directories.len());
    ctx.pool.run("merge", directories, |directory| {
        assort_directory(ctx, source, output, directory)
    });
    Ok(output.to_string())
}
