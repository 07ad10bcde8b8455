//! Sampling of stem assortments.
//!
//! For every usable stem of the target category, a song yields a handful of accompaniment sets
//! drawn from the song's other stems:
//!
//! 1. optionally, every other stem at once;
//! 2. up to `MAX_BASIC_STEM_RANDOM_ASSORTMENTS_PER_SONG` sets holding a single "basic" stem
//!    (guitar, drums, bass, percussion, piano), never the same one twice;
//! 3. up to `MAX_RANDOM_FULL_ASSORTMENTS_PER_SONG` random mixes of basic and non-basic stems,
//!    capped at `MAX_STEMS_IN_ASSORTMENT` stems.
//!
//! Sets are collected by value, so the same set reached by two phases is kept once. Silent stems
//! never enter the basic pool but stay eligible as non-basic accompaniment.

use std::collections::BTreeSet;

use rand::{Rng, seq::IndexedRandom};

use crate::{
    config::{
        ADDITIONAL_STEM_NAMES, BASIC_STEM_NAMES, MAX_BASIC_STEM_RANDOM_ASSORTMENTS_PER_SONG,
        MAX_RANDOM_FULL_ASSORTMENTS_PER_SONG, MAX_STEMS_IN_ASSORTMENT,
    },
    storage,
};

/// One audio track of a song, classified once when the song is listed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StemFile {
    pub path: String,
    pub is_mostly_silent: bool,
}

impl StemFile {
    pub fn new(path: impl Into<String>, is_mostly_silent: bool) -> Self {
        Self {
            path: path.into(),
            is_mostly_silent,
        }
    }

    /// True when any of `names` appears in the file name, ignoring case.
    pub fn matches_any(&self, names: &[&str]) -> bool {
        name_matches(&self.path, names)
    }
}

/// A target stem and the stems it gets mixed with. The target is never part of its accompaniment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assortment {
    pub target_stem: String,
    pub accompaniment_stems: BTreeSet<String>,
}

fn name_matches(path: &str, names: &[&str]) -> bool {
    let file_name = storage::file_name(path).to_lowercase();
    names.iter().any(|name| file_name.contains(&name.to_lowercase()))
}

/// The category name followed by the other names it goes by.
pub fn category_aliases(category: &str) -> Vec<&str> {
    let mut aliases = vec![category];
    if let Some(additional) = ADDITIONAL_STEM_NAMES.get(category) {
        aliases.extend(additional.iter().copied());
    }
    aliases
}

/// Non-silent stems belonging to `category`, in listing order.
pub fn target_stem_candidates<'a>(stems: &'a [StemFile], category: &str) -> Vec<&'a StemFile> {
    let aliases = category_aliases(category);
    stems
        .iter()
        .filter(|stem| !stem.is_mostly_silent && stem.matches_any(&aliases))
        .collect()
}

/// Accompaniment sets for `target` drawn from `other_stems`.
pub fn create_stem_assortments<R: Rng>(
    other_stems: &[StemFile],
    target: &str,
    include_all_stems: bool,
    rng: &mut R,
) -> Vec<Assortment> {
    let other_paths: BTreeSet<&str> = other_stems
        .iter()
        .filter(|s| s.path != target)
        .map(|s| s.path.as_str())
        .collect();
    let basic: BTreeSet<&str> = other_stems
        .iter()
        .filter(|s| s.path != target && !s.is_mostly_silent && s.matches_any(BASIC_STEM_NAMES))
        .map(|s| s.path.as_str())
        .collect();
    let non_basic: Vec<&str> = other_paths.difference(&basic).copied().collect();
    let basic: Vec<&str> = basic.into_iter().collect();

    let mut assortments: BTreeSet<BTreeSet<&str>> = BTreeSet::new();

    if include_all_stems && !other_paths.is_empty() {
        assortments.insert(other_paths.clone());
    }

    if !basic.is_empty() {
        // Basic stems already used as a single-stem assortment.
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for _ in 0..MAX_BASIC_STEM_RANDOM_ASSORTMENTS_PER_SONG {
            let unseen: Vec<&str> = basic.iter().copied().filter(|s| !seen.contains(s)).collect();
            let Some(&stem) = unseen.choose(rng) else {
                break;
            };
            seen.insert(stem);
            assortments.insert(BTreeSet::from([stem]));
        }

        if !non_basic.is_empty() {
            for _ in 0..MAX_RANDOM_FULL_ASSORTMENTS_PER_SONG {
                let basic_draws = rng.random_range(1..=basic.len());
                let non_basic_draws = rng.random_range(1..=non_basic.len());

                let mut assortment = BTreeSet::new();
                let draws = (0..basic_draws)
                    .map(|_| &basic)
                    .chain((0..non_basic_draws).map(|_| &non_basic));
                for pool in draws {
                    if let Some(&stem) = pool.choose(rng) {
                        if assortment.len() < MAX_STEMS_IN_ASSORTMENT {
                            assortment.insert(stem);
                        }
                    }
                }
                assortments.insert(assortment);
            }
        }
    }

    assortments
        .into_iter()
        .map(|set| Assortment {
            target_stem: target.to_string(),
            accompaniment_stems: set.into_iter().map(str::to_string).collect(),
        })
        .collect()
}

/// All assortments of a song, one list per usable target stem of `category`.
pub fn assort<R: Rng>(
    stems: &[StemFile],
    category: &str,
    include_all_stems: bool,
    rng: &mut R,
) -> Vec<Vec<Assortment>> {
    target_stem_candidates(stems, category)
        .into_iter()
        .map(|target| {
            let others: Vec<StemFile> = stems
                .iter()
                .filter(|s| s.path != target.path)
                .cloned()
                .collect();
            create_stem_assortments(&others, &target.path, include_all_stems, rng)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    const TARGET: &str = "current";

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn sets(assortments: &[Assortment]) -> Vec<BTreeSet<String>> {
        assortments.iter().map(|a| a.accompaniment_stems.clone()).collect()
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn basic_stems_get_single_assortments() {
        let others = vec![
            StemFile::new("first_gtr", false),
            StemFile::new("second_bass", false),
            StemFile::new("second_bass", false),
            StemFile::new("third_silent", true),
            StemFile::new("forth_silent", true),
            StemFile::new("fifth", false),
        ];
        let assortments = create_stem_assortments(&others, TARGET, false, &mut rng());
        let found = sets(&assortments);

        assert!(found.contains(&set(&["second_bass"])));
        assert!(found.contains(&set(&["first_gtr"])));
        assert!(!found.contains(&set(&[
            "first_gtr",
            "second_bass",
            "third_silent",
            "forth_silent",
            "fifth"
        ])));
        assert!(assortments.len() > 1);
        for a in &assortments {
            assert_eq!(a.target_stem, TARGET);
            assert!(!a.accompaniment_stems.is_empty());
            assert!(a.accompaniment_stems.len() <= MAX_STEMS_IN_ASSORTMENT);
        }
    }

    #[test]
    fn no_basic_stems_means_no_assortments() {
        let others = vec![
            StemFile::new("first", false),
            StemFile::new("second", false),
            StemFile::new("third_silent", true),
            StemFile::new("fifth", false),
        ];
        assert!(create_stem_assortments(&others, TARGET, false, &mut rng()).is_empty());
    }

    #[test]
    fn all_silent_means_no_assortments() {
        let others = vec![
            StemFile::new("first_gtr", true),
            StemFile::new("second_bass", true),
            StemFile::new("third_silent", true),
            StemFile::new("fifth", true),
        ];
        assert!(create_stem_assortments(&others, TARGET, false, &mut rng()).is_empty());
    }

    #[test]
    fn all_stems_assortment_when_enabled() {
        let others = vec![
            StemFile::new("a_gtr", false),
            StemFile::new("b_synth", false),
            StemFile::new("c_vox", true),
        ];
        let assortments = create_stem_assortments(&others, TARGET, true, &mut rng());
        assert!(sets(&assortments).contains(&set(&["a_gtr", "b_synth", "c_vox"])));
    }

    #[test]
    fn identical_sets_from_different_phases_collapse() {
        // A single basic stem and no non-basic ones: every phase can only produce {bass}.
        let others = vec![StemFile::new("bass", false)];
        let assortments = create_stem_assortments(&others, TARGET, true, &mut rng());
        assert_eq!(sets(&assortments), vec![set(&["bass"])]);
    }

    #[test]
    fn single_basic_phase_never_repeats_a_stem() {
        let others: Vec<StemFile> = ["drm1", "drm2", "gtr1", "gtr2", "piano", "perc"]
            .iter()
            .map(|p| StemFile::new(*p, false))
            .collect();
        for seed in 0..20 {
            let assortments =
                create_stem_assortments(&others, TARGET, false, &mut StdRng::seed_from_u64(seed));
            let singles = assortments
                .iter()
                .filter(|a| a.accompaniment_stems.len() == 1)
                .count();
            assert_eq!(singles, MAX_BASIC_STEM_RANDOM_ASSORTMENTS_PER_SONG);
        }
    }

    #[test]
    fn target_category_resolution() {
        let stems = vec![
            StemFile::new("song/Drums.ogg", false),
            StemFile::new("song/drm_2.ogg", true),
            StemFile::new("song/Bass.ogg", false),
        ];
        let candidates = target_stem_candidates(&stems, "drum");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].path, "song/Drums.ogg");

        assert!(target_stem_candidates(&stems, "piano").is_empty());
        assert_eq!(category_aliases("piano"), vec!["piano", "keys"]);
        assert_eq!(category_aliases("fx"), vec!["fx"]);
    }

    #[test]
    fn drum_target_with_bass_and_silent_fx() {
        let stems = vec![
            StemFile::new("song/drum.ogg", false),
            StemFile::new("song/bass.ogg", false),
            StemFile::new("song/fx_silent.ogg", true),
        ];
        let per_target = assort(&stems, "drum", false, &mut rng());
        assert_eq!(per_target.len(), 1);
        let assortments = &per_target[0];

        assert!(assortments.iter().any(|a| {
            a.target_stem == "song/drum.ogg"
                && a.accompaniment_stems.is_subset(&set(&["song/bass.ogg"]))
        }));
        for a in assortments {
            assert!(!a.accompaniment_stems.contains("song/drum.ogg"));
            assert!(a.accompaniment_stems.contains("song/bass.ogg"));
        }
    }

    #[test]
    fn song_without_usable_target_yields_nothing() {
        let stems = vec![
            StemFile::new("song/drum.ogg", true),
            StemFile::new("song/bass.ogg", false),
        ];
        assert!(assort(&stems, "drum", false, &mut rng()).is_empty());
    }

    #[test]
    fn same_seed_same_assortments() {
        let others: Vec<StemFile> = ["gtr", "bass", "perc", "synth", "strings"]
            .iter()
            .map(|p| StemFile::new(*p, false))
            .collect();
        let a = create_stem_assortments(&others, TARGET, false, &mut StdRng::seed_from_u64(3));
        let b = create_stem_assortments(&others, TARGET, false, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }
}
