mod support;

use covermatch::cache::{
    EmbeddingCache, FsEmbeddingCache, MemoryEmbeddingCache, SqliteEmbeddingCache,
};
use covermatch::chunker::{Chunk, Chunker};
use covermatch::distance::{DistanceMatrix, DistanceMatrixBuilder};
use covermatch::driver::{DriverOptions, EmbeddedCorpus, EmbeddingDriver};
use covermatch::features::MemoryFeatureStore;
use covermatch::manifest::{Record, Recording};
use ndarray::Array2;
use support::model::CountingModel;

fn recording(key: &str, song: &str, duration_s: f64) -> Recording {
    let line = serde_json::json!({"rec": key, "song_id": song, "dur_s": duration_s}).to_string();
    Recording::from_record(Record::parse(&line).expect("parse")).expect("recording")
}

fn corpus() -> (Vec<Chunk>, MemoryFeatureStore) {
    let recordings = vec![
        recording("x1", "x", 6.0),
        recording("x2", "x", 2.5),
        recording("y1", "y", 4.0),
    ];
    let chunks = Chunker::new(2.0, 2.0)
        .expect("chunker")
        .chunk_all(&recordings)
        .expect("chunks");
    let mut store = MemoryFeatureStore::new();
    store.insert(
        "x1",
        Array2::from_shape_fn((150, 3), |(t, b)| ((t / 50) + b) as f32 + 1.0),
    );
    store.insert("x2", Array2::from_shape_fn((63, 3), |(_, b)| b as f32 + 1.0));
    store.insert(
        "y1",
        Array2::from_shape_fn((100, 3), |(t, b)| {
            if b == 2 { 5.0 } else { t as f32 * 0.01 }
        }),
    );
    (chunks, store)
}

fn options() -> DriverOptions {
    DriverOptions {
        batch_size: 3,
        infer_frames: 50,
        mean_size: 2,
        mirror_dir: None,
    }
}

/// Embed everything twice through `cache` and build the self-retrieval matrix.
fn run_twice(cache: &dyn EmbeddingCache) -> DistanceMatrix {
    let (chunks, store) = corpus();
    let mut model = CountingModel::new(4);

    let mut driver = EmbeddingDriver::new(&mut model, &store, cache, options());
    let pending = driver.pending(&chunks);
    assert_eq!(pending.len(), chunks.len());
    driver.run(&pending).expect("first run");
    // 7 chunks in batches of 3
    let calls = model.calls;
    assert_eq!(calls, 3);

    let mut driver = EmbeddingDriver::new(&mut model, &store, cache, options());
    let pending = driver.pending(&chunks);
    assert!(pending.is_empty());
    driver.run(&pending).expect("second run");
    assert_eq!(model.calls, calls);

    let corpus = EmbeddedCorpus::from_cache(&chunks, &cache).expect("load corpus");
    assert_eq!(corpus.chunk_count(), chunks.len());
    DistanceMatrixBuilder::with_workers(3)
        .build(&corpus, None, None)
        .expect("matrix")
}

#[test]
fn every_backend_yields_the_same_matrix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fs = FsEmbeddingCache::new(dir.path().join("embed"));
    let sqlite = SqliteEmbeddingCache::open(&dir.path().join("cache.sqlite")).expect("sqlite");
    let memory = MemoryEmbeddingCache::new();

    let from_fs = run_twice(&fs);
    let from_sqlite = run_twice(&sqlite);
    let from_memory = run_twice(&memory);
    assert_eq!(from_fs, from_sqlite);
    assert_eq!(from_fs, from_memory);
    assert_eq!(from_fs.shape(), (3, 3));
    assert_eq!(from_fs.excluded_count(), 3);
}
