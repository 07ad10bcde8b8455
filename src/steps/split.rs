//! Split: partitions the encoded songs by artist, so no artist is in two splits.

use std::collections::BTreeSet;

use anyhow::Context;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::{info, warn};

use crate::{
    config::{SPLIT_NAMES, TEST_SIZE, VALIDATION_SIZE},
    error::Result,
    steps::StageContext,
    storage::{self, Storage},
};

/// Shuffles `items` with `seed` and moves the first `ceil(test_size * n)` of them to the test side.
pub fn train_test_split(items: &[String], test_size: f64, seed: u64) -> (Vec<String>, Vec<String>) {
    let mut shuffled = items.to_vec();
    shuffled.sort();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
    let test_len = ((test_size * shuffled.len() as f64).ceil() as usize).min(shuffled.len());
    let train = shuffled.split_off(test_len);
    (train, shuffled)
}

/// `(train, validation, test)` artists. Deterministic for a given seed and artist set.
pub fn split_by_artist(
    artists: &[String],
    validation_size: f64,
    test_size: f64,
    seed: u64,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let (train, rest) = train_test_split(artists, validation_size + test_size, seed);
    let (validation, test) = train_test_split(&rest, 0.5, seed);
    (train, validation, test)
}

/// Artist directories (relative to `source`) of every directory holding `.pkl` files.
pub fn encoded_artists(storage: &dyn Storage, source: &str) -> Result<Vec<String>> {
    let mut artists = BTreeSet::new();
    for file in storage.glob(&storage::join(source, "**/*.pkl"))? {
        let song_dir = storage::parent(&file);
        let artist = storage::relative_to(storage::parent(song_dir), source);
        if artist == "." || artist == storage::parent(song_dir) {
            warn!("{} is not inside an artist directory, skipping", file);
            continue;
        }
        artists.insert(artist);
    }
    Ok(artists.into_iter().collect())
}

/// Copies every artist into its split. Returns the split roots, in `SPLIT_NAMES` order.
pub fn split_all(ctx: &StageContext, source: &str, output: &str) -> anyhow::Result<Vec<String>> {
    let artists = encoded_artists(ctx.storage, source).context("listing artists")?;
    let (train, validation, test) =
        split_by_artist(&artists, VALIDATION_SIZE, TEST_SIZE, ctx.config.seed);

    let mut roots = Vec::with_capacity(SPLIT_NAMES.len());
    for (name, split) in SPLIT_NAMES.iter().zip([train, validation, test]) {
        info!("Creating split {} with {} artists", name, split.len());
        let split_root = storage::join(output, name);
        ctx.pool.run(&format!("split {}", name), split, |artist| {
            ctx.storage
                .copy_dir(&storage::join(source, artist), &storage::join(&split_root, artist))?;
            Ok(())
        });
        roots.push(split_root);
    }
    Ok(roots)
}
