mod common;

use std::collections::BTreeSet;

use common::{CountingCodec, SR, write_song};
use stem_dataset::{
    audio::read_audio,
    codec::grid_from_pickle,
    config::PipelineConfig,
    dispatch::WorkerPool,
    registry::{LocalRegistry, read_manifest},
    steps::{StageContext, augment, distort, encode, merge, split, upload},
    storage::{LocalStorage, Storage},
};
use tempfile::tempdir;

fn config(root: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        storage_root: root.to_path_buf(),
        tokens_per_chunk: 64,
        ..PipelineConfig::default()
    }
}

fn song_dirs(storage: &LocalStorage, root: &str) -> BTreeSet<String> {
    storage
        .glob(&format!("{}/**/*.wav", root))
        .unwrap()
        .into_iter()
        .map(|key| stem_dataset::storage::parent(&key).to_string())
        .collect()
}

#[test]
fn merge_renders_pairs_for_every_assortment() {
    let tmp = tempdir().unwrap();
    let storage = LocalStorage::new(tmp.path());
    let config = config(tmp.path());
    let pool = WorkerPool::new(2, 0).unwrap();
    let ctx = StageContext::new(&storage, &pool, &config);
    write_song(&storage, "artist", 1.0);

    let merged = merge::assort_and_merge_all(&ctx, "original", "drum/merged").unwrap();
    assert_eq!(merged, "drum/merged");

    let dirs = song_dirs(&storage, "drum/merged");
    // bass and guitar alone, plus at least one random mix.
    assert!(dirs.len() >= 3, "{:?}", dirs);
    let drums = storage.read("original/artist/song/drums.wav").unwrap();
    for dir in &dirs {
        assert!(dir.starts_with("drum/merged/artist/song-inst0-assort"), "{}", dir);
        assert_eq!(storage.read(&format!("{}/stem.wav", dir)).unwrap(), drums);
        let mix = read_audio(&storage, &format!("{}/all.wav", dir)).unwrap();
        assert_eq!(mix.sample_rate, SR);
        assert_eq!(mix.num_frames(), SR as usize);
        assert!(mix.peak() > 0.3);
    }
}

#[test]
fn merge_is_reproducible_and_skips_existing_outputs() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    let pool = WorkerPool::new(2, 0).unwrap();

    let mut listings = Vec::new();
    for tmp in [&first, &second] {
        let storage = LocalStorage::new(tmp.path());
        let config = config(tmp.path());
        let ctx = StageContext::new(&storage, &pool, &config);
        write_song(&storage, "artist", 0.5);
        merge::assort_and_merge_all(&ctx, "original", "drum/merged").unwrap();
        listings.push(song_dirs(&storage, "drum/merged"));
    }
    assert_eq!(listings[0], listings[1]);

    let storage = LocalStorage::new(first.path());
    let config = config(first.path());
    let ctx = StageContext::new(&storage, &pool, &config);
    storage.write("drum/merged/artist/song-inst0-assort0/all.wav", b"kept").unwrap();
    merge::assort_and_merge_all(&ctx, "original", "drum/merged").unwrap();
    assert_eq!(storage.read("drum/merged/artist/song-inst0-assort0/all.wav").unwrap(), b"kept");
}

#[test]
fn song_without_the_target_stem_yields_nothing() {
    let tmp = tempdir().unwrap();
    let storage = LocalStorage::new(tmp.path());
    let config = PipelineConfig {
        stem_name: "vocals".into(),
        ..config(tmp.path())
    };
    let pool = WorkerPool::new(1, 0).unwrap();
    let ctx = StageContext::new(&storage, &pool, &config);
    write_song(&storage, "artist", 0.5);

    merge::assort_and_merge_all(&ctx, "original", "vocals/merged").unwrap();
    assert!(song_dirs(&storage, "vocals/merged").is_empty());
}

#[test]
fn augment_keeps_originals_and_trims_variants() {
    let tmp = tempdir().unwrap();
    let storage = LocalStorage::new(tmp.path());
    let config = config(tmp.path());
    let pool = WorkerPool::new(2, 0).unwrap();
    let ctx = StageContext::new(&storage, &pool, &config);
    common::write_wav(&storage, "merged/artist/song-inst0-assort0/all.wav", &common::tone(220.0, 6.0));
    common::write_wav(&storage, "merged/artist/song-inst0-assort0/stem.wav", &common::tone(110.0, 6.0));

    augment::augment_all(&ctx, "merged", "augmented").unwrap();

    for name in ["all.wav", "stem.wav"] {
        assert_eq!(
            storage.read(&format!("augmented/artist/song-inst0-assort0-original/{}", name)).unwrap(),
            storage.read(&format!("merged/artist/song-inst0-assort0/{}", name)).unwrap()
        );
    }
    for k in 0..4 {
        let dir = format!("augmented/artist/song-inst0-assort0-augmented{}", k);
        let full = read_audio(&storage, &format!("{}/all.wav", dir)).unwrap();
        let stem = read_audio(&storage, &format!("{}/stem.wav", dir)).unwrap();
        // Both files share one draw, so they were stretched alike.
        assert_eq!(full.num_frames(), stem.num_frames());
        assert_eq!(full.num_frames() % (4 * SR as usize), 0);
        assert!(!full.is_empty());
    }
}

#[test]
fn distort_leaves_the_stem_untouched() {
    let tmp = tempdir().unwrap();
    let storage = LocalStorage::new(tmp.path());
    let config = config(tmp.path());
    let pool = WorkerPool::new(2, 0).unwrap();
    let ctx = StageContext::new(&storage, &pool, &config);
    for i in 0..4 {
        let dir = format!("augmented/artist/song-augmented{}", i);
        common::write_wav(&storage, &format!("{}/all.wav", dir), &common::tone(220.0, 0.5));
        common::write_wav(&storage, &format!("{}/stem.wav", dir), &common::tone(110.0, 0.5));
    }

    distort::distort_all(&ctx, "augmented", "distorted").unwrap();

    for i in 0..4 {
        let dir = format!("artist/song-augmented{}", i);
        assert_eq!(
            storage.read(&format!("distorted/{}/stem.wav", dir)).unwrap(),
            storage.read(&format!("augmented/{}/stem.wav", dir)).unwrap()
        );
        let full = read_audio(&storage, &format!("distorted/{}/all.wav", dir)).unwrap();
        assert_eq!(full.num_frames(), SR as usize / 2);
    }
}

#[test]
fn augment_leaves_existing_outputs_alone() {
    let tmp = tempdir().unwrap();
    let storage = LocalStorage::new(tmp.path());
    let config = config(tmp.path());
    let pool = WorkerPool::new(2, 0).unwrap();
    let ctx = StageContext::new(&storage, &pool, &config);
    common::write_wav(&storage, "merged/artist/song/all.wav", &common::tone(220.0, 6.0));
    common::write_wav(&storage, "merged/artist/song/stem.wav", &common::tone(110.0, 6.0));
    let seeded = [
        "augmented/artist/song-original/all.wav",
        "augmented/artist/song-augmented0/all.wav",
        "augmented/artist/song-augmented0/stem.wav",
    ];
    for key in seeded {
        storage.write(key, b"kept").unwrap();
    }

    augment::augment_all(&ctx, "merged", "augmented").unwrap();

    for key in seeded {
        assert_eq!(storage.read(key).unwrap(), b"kept", "{}", key);
    }
    assert_eq!(
        storage.read("augmented/artist/song-original/stem.wav").unwrap(),
        storage.read("merged/artist/song/stem.wav").unwrap()
    );
    let fresh = read_audio(&storage, "augmented/artist/song-augmented1/all.wav").unwrap();
    assert!(!fresh.is_empty());
}

#[test]
fn distort_leaves_existing_outputs_alone() {
    let tmp = tempdir().unwrap();
    let storage = LocalStorage::new(tmp.path());
    let config = config(tmp.path());
    let pool = WorkerPool::new(1, 0).unwrap();
    let ctx = StageContext::new(&storage, &pool, &config);
    common::write_wav(&storage, "augmented/artist/song/all.wav", &common::tone(220.0, 0.5));
    common::write_wav(&storage, "augmented/artist/song/stem.wav", &common::tone(110.0, 0.5));
    storage.write("distorted/artist/song/all.wav", b"kept all").unwrap();
    storage.write("distorted/artist/song/stem.wav", b"kept stem").unwrap();

    distort::distort_all(&ctx, "augmented", "distorted").unwrap();

    assert_eq!(storage.read("distorted/artist/song/all.wav").unwrap(), b"kept all");
    assert_eq!(storage.read("distorted/artist/song/stem.wav").unwrap(), b"kept stem");
}

#[test]
fn encode_split_and_upload() {
    let tmp = tempdir().unwrap();
    let registry_root = tempdir().unwrap();
    let storage = LocalStorage::new(tmp.path());
    let config = config(tmp.path());
    let pool = WorkerPool::new(2, 0).unwrap();
    let ctx = StageContext::new(&storage, &pool, &config);

    let artists = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
    for artist in artists {
        let dir = format!("distorted/{}/song-inst0-assort0-original", artist);
        common::write_wav(&storage, &format!("{}/all.wav", dir), &common::tone(220.0, 3.0));
        common::write_wav(&storage, &format!("{}/stem.wav", dir), &common::tone(110.0, 3.0));
    }

    encode::encode_all(&ctx, &CountingCodec, "distorted", "encoded").unwrap();
    // 3s at 160 samples per token is 150 tokens: chunks of 64, 64 and 22.
    let chunks = storage.glob("encoded/a/song-inst0-assort0-original/all-c*.pkl").unwrap();
    assert_eq!(chunks.len(), 3);
    let last = grid_from_pickle(&storage.read(&chunks[2]).unwrap()).unwrap();
    assert_eq!(last.ncols(), 22);

    let roots = split::split_all(&ctx, "encoded", "split").unwrap();
    assert_eq!(roots, vec!["split/train", "split/validation", "split/test"]);
    let mut seen = BTreeSet::new();
    let mut sizes = Vec::new();
    for root in &roots {
        let members: BTreeSet<String> = storage
            .glob(&format!("{}/*/*/all-c0.pkl", root))
            .unwrap()
            .into_iter()
            .map(|key| key.split('/').nth(2).unwrap().to_string())
            .collect();
        for artist in &members {
            assert!(seen.insert(artist.clone()), "{} is in two splits", artist);
        }
        sizes.push(members.len());
    }
    assert_eq!(sizes, vec![8, 1, 1]);
    assert_eq!(seen.len(), artists.len());

    let registry = LocalRegistry::new(registry_root.path());
    let tags = config.dataset_tags();
    let published = upload::upload(&ctx, &registry, &roots, &tags).unwrap();
    assert_eq!(published.len(), 3);

    let train = read_manifest(&published[0]).unwrap();
    assert_eq!(train.split, "train");
    assert_eq!(train.num_files, 8 * 6);
    assert_eq!(train.descriptor.tags, vec!["train-set", "medium", "stem-drum", "final"]);
    assert_eq!(read_manifest(&published[2]).unwrap().num_files, 6);
}

#[test]
fn single_file_mode_concatenates_chunks() {
    let tmp = tempdir().unwrap();
    let storage = LocalStorage::new(tmp.path());
    let config = PipelineConfig {
        chunked_output: false,
        add_boundary_tokens: true,
        ..config(tmp.path())
    };
    let pool = WorkerPool::new(1, 0).unwrap();
    let ctx = StageContext::new(&storage, &pool, &config);
    common::write_wav(&storage, "distorted/a/song/all.wav", &common::tone(220.0, 3.0));

    encode::encode_all(&ctx, &CountingCodec, "distorted", "encoded").unwrap();
    let grid = grid_from_pickle(&storage.read("encoded/a/song/all.pkl").unwrap()).unwrap();
    assert_eq!(grid.ncols(), 150 + 2);
    assert!(!storage.exists("encoded/a/song/all-c0.pkl"));
}
