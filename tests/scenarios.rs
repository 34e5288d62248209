//! End-to-end build and query scenarios against a temporary docs tree.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use retrieval_core::embeddings::{HashingEncoder, VectorEncoder};
use retrieval_core::error::{EncodeError, ErrorKind};
use retrieval_core::index::store::{CHUNKS_FILE, EMBEDDINGS_FILE, METADATA_FILE};
use retrieval_core::index::HnswParams;
use retrieval_core::{
    create_encoder, BuildPipeline, Document, GuardedEncoder, IndexHandle, IndexStore,
    RetrievalConfig, Retriever, RetryPolicy,
};
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

fn config_for(dir: &Path) -> RetrievalConfig {
    let mut config = RetrievalConfig::default();
    config.sources.roots = vec![dir.join("docs")];
    config.index.dir = dir.join("index");
    config
}

fn write_doc(dir: &Path, name: &str, body: &str) {
    let path = dir.join("docs").join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

/// 91 distinct tokens: two windows at W=50, O=10%
fn two_span_body(prefix: &str) -> String {
    (0..91).map(|i| format!("{prefix}{i}")).collect::<Vec<_>>().join(" ")
}

fn npy_shape(path: &Path) -> String {
    let bytes = fs::read(path).unwrap();
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
    let start = header.find("'shape': (").unwrap() + "'shape': (".len();
    let end = start + header[start..].find(')').unwrap();
    header[start..end].to_string()
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path).unwrap().lines().count()
}

/// Fails every call whose text contains `marker`
struct Poisoned {
    inner: HashingEncoder,
    marker: &'static str,
    calls: AtomicUsize,
}

impl VectorEncoder for Poisoned {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(self.marker) {
            return Err(EncodeError::Failed("model rejected input".to_string()));
        }
        self.inner.encode(text)
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_three_docs_six_rows_then_delete_one() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_for(tmp.path());
    config.chunking.window_tokens = 50;
    config.chunking.overlap_percent = 10;

    for (name, prefix) in [("a.md", "alpha"), ("b.md", "bravo"), ("c.md", "charlie")] {
        write_doc(tmp.path(), name, &two_span_body(prefix));
    }

    let encoder = create_encoder(&config.embedding).unwrap();
    let dim = encoder.dimensions();
    let pipeline = BuildPipeline::new(config.clone(), encoder.clone()).unwrap();
    let first = pipeline.run().unwrap();

    assert_eq!(first.documents, 3);
    assert_eq!(first.indexed, 6);
    let store = IndexStore::new(&config.index.dir);
    let gen_dir = store.generation_dir(&first.generation);
    assert_eq!(npy_shape(&gen_dir.join(EMBEDDINGS_FILE)), format!("6, {dim}"));
    assert_eq!(line_count(&gen_dir.join(CHUNKS_FILE)), 6);
    assert_eq!(line_count(&gen_dir.join(METADATA_FILE)), 6);

    let before: Vec<(String, String)> = pipeline
        .handle()
        .current()
        .unwrap()
        .chunks()
        .iter()
        .map(|c| (c.doc_id.clone(), c.chunk_id.clone()))
        .collect();

    fs::remove_file(tmp.path().join("docs/b.md")).unwrap();
    let second = pipeline.run().unwrap();

    assert_eq!(second.indexed, 4);
    let gen_dir = store.generation_dir(&second.generation);
    assert_eq!(npy_shape(&gen_dir.join(EMBEDDINGS_FILE)), format!("4, {dim}"));

    let after: Vec<(String, String)> = pipeline
        .handle()
        .current()
        .unwrap()
        .chunks()
        .iter()
        .map(|c| (c.doc_id.clone(), c.chunk_id.clone()))
        .collect();
    let expected: Vec<(String, String)> = before.into_iter().filter(|(doc, _)| doc != "b.md").collect();
    assert_eq!(after, expected);
    assert_eq!(second.cache_hits, 4);
}

#[test]
fn test_dropped_frames_ranks_top_three() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());

    write_doc(
        tmp.path(),
        "perf/jank.md",
        "# Jank report\n\n## Scrolling\n\nDuring the scroll benchmark 15 dropped frames were detected \
         on the compositor thread.\n\n## Memory\n\nHeap usage stayed flat across the session.\n",
    );
    write_doc(
        tmp.path(),
        "perf/network.md",
        "# Network\n\nRequests to the API were throttled by the service worker cache.\n",
    );
    write_doc(
        tmp.path(),
        "perf/gc.md",
        "# Garbage collection\n\nMajor GC pauses blocked the main thread for 120 ms.\n",
    );
    write_doc(
        tmp.path(),
        "guide/profiling.md",
        "# Profiling guide\n\nRecord a profile, then inspect the call tree for long tasks.\n\n\
         ```\nperf record -g ./app\n```\n",
    );

    let encoder = create_encoder(&config.embedding).unwrap();
    let pipeline = BuildPipeline::new(config.clone(), encoder.clone()).unwrap();
    pipeline.run().unwrap();

    let retriever = Retriever::new(encoder, Arc::clone(pipeline.handle()), config.retrieval.clone());
    let results = retriever.retrieve("dropped frames", config.retrieval.top_n, 8).unwrap();

    assert!(!results.is_empty() && results.len() <= 8);
    let position = results
        .iter()
        .position(|r| r.text_snippet.contains("15 dropped frames were detected"))
        .expect("target chunk retrieved");
    assert!(position < 3, "target ranked {}", position + 1);
    assert_eq!(results[position].section_path, vec!["Jank report", "Scrolling"]);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn test_one_failing_chunk_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());

    write_doc(tmp.path(), "a.md", "# A\n\nHealthy text about layout.\n");
    write_doc(tmp.path(), "b.md", "# B\n\nThis chunk carries POISON and cannot be encoded.\n");
    write_doc(tmp.path(), "c.md", "# C\n\nHealthy text about painting.\n");

    let poisoned = Arc::new(Poisoned {
        inner: HashingEncoder::new(64),
        marker: "POISON",
        calls: AtomicUsize::new(0),
    });
    let policy = RetryPolicy {
        timeout: Some(Duration::from_secs(5)),
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
    };
    let guarded = Arc::new(GuardedEncoder::new(poisoned.clone(), policy));

    let pipeline = BuildPipeline::new(config, guarded).unwrap();
    let report = pipeline.run().unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.indexed, 2);
    assert_eq!(report.skipped_chunks.len(), 1);
    // two healthy calls plus three attempts on the poisoned chunk
    assert_eq!(poisoned.calls.load(Ordering::SeqCst), 5);

    let index = pipeline.handle().current().unwrap();
    let docs: Vec<&str> = index.chunks().iter().map(|c| c.doc_id.as_str()).collect();
    assert_eq!(docs, vec!["a.md", "c.md"]);
}

#[test]
fn test_unbuilt_and_empty_index_return_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());
    let encoder = create_encoder(&config.embedding).unwrap();

    // nothing published yet
    let store = IndexStore::new(&config.index.dir);
    assert!(store.load_current(HnswParams::default()).unwrap().is_none());
    let retriever = Retriever::new(
        encoder.clone(),
        Arc::new(IndexHandle::new()),
        config.retrieval.clone(),
    );
    assert!(retriever.search("dropped frames").unwrap().is_empty());

    // published, but with zero rows
    let pipeline = BuildPipeline::new(config.clone(), encoder.clone()).unwrap();
    let report = pipeline.build(Vec::new()).unwrap();
    assert_eq!(report.indexed, 0);
    let retriever = Retriever::new(encoder, Arc::clone(pipeline.handle()), config.retrieval);
    assert!(retriever.search("dropped frames").unwrap().is_empty());
}

#[test]
fn test_rebuild_is_idempotent_for_both_backends() {
    for backend in ["exact", "hnsw"] {
        let tmp = TempDir::new().unwrap();
        let mut config = config_for(tmp.path());
        config.index.backend = backend.to_string();
        config.chunking.window_tokens = 40;

        for i in 0..12 {
            let body = format!(
                "# Topic {i}\n\n{}\n\n## Details\n\n{}\n",
                two_span_body(&format!("t{i}w")),
                two_span_body(&format!("d{i}w"))
            );
            write_doc(tmp.path(), &format!("doc{i:02}.md"), &body);
        }

        let encoder = create_encoder(&config.embedding).unwrap();
        let queries = ["t3w10 t3w11", "d7w50", "t11w90 d0w0"];

        let mut runs = Vec::new();
        for _ in 0..2 {
            let pipeline = BuildPipeline::new(config.clone(), encoder.clone()).unwrap();
            pipeline.run().unwrap();
            let retriever = Retriever::new(
                encoder.clone(),
                Arc::clone(pipeline.handle()),
                config.retrieval.clone(),
            );
            let results: Vec<_> = queries.iter().map(|q| retriever.search(q).unwrap()).collect();
            runs.push(results);
        }
        assert_eq!(runs[0], runs[1], "backend {backend}");
    }
}

#[test]
fn test_reload_from_disk_matches_live_index() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_for(tmp.path());
    config.index.backend = "hnsw".to_string();
    for i in 0..5 {
        write_doc(tmp.path(), &format!("n{i}.md"), &format!("# Note {i}\n\n{}", two_span_body("x")));
    }

    let encoder = create_encoder(&config.embedding).unwrap();
    let pipeline = BuildPipeline::new(config.clone(), encoder.clone()).unwrap();
    let report = pipeline.run().unwrap();
    // the five bodies only differ in their heading
    assert_eq!(report.duplicate_chunks, 0);

    let live = pipeline.handle().current().unwrap();
    let loaded = IndexStore::new(&config.index.dir)
        .load_current(HnswParams::from(&config.index))
        .unwrap()
        .unwrap();

    let query = encoder.encode("note x3").unwrap();
    assert_eq!(live.search(&query, 10).unwrap(), loaded.search(&query, 10).unwrap());
    assert_eq!(live.manifest(), loaded.manifest());
}

#[test]
fn test_queries_run_during_rebuild() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());
    for i in 0..8 {
        write_doc(tmp.path(), &format!("d{i}.md"), &format!("# Doc {i}\n\nframes {i} {}", two_span_body("z")));
    }

    let encoder = create_encoder(&config.embedding).unwrap();
    let handle = Arc::new(IndexHandle::new());
    let pipeline = BuildPipeline::new(config.clone(), encoder.clone())
        .unwrap()
        .with_handle(Arc::clone(&handle));
    pipeline.run().unwrap();

    let retriever = Arc::new(Retriever::new(encoder, Arc::clone(&handle), config.retrieval.clone()));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let retriever = Arc::clone(&retriever);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let results = retriever.search("frames").unwrap();
                    assert!(!results.is_empty());
                }
            })
        })
        .collect();

    for _ in 0..3 {
        pipeline.run().unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_documents_from_memory_skip_loader() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());
    let encoder = create_encoder(&config.embedding).unwrap();
    let pipeline = BuildPipeline::new(config, encoder).unwrap();

    let docs = vec![
        Document::new("x.md", "# X\n\nShared paragraph.", "mem/x.md"),
        Document::new("y.md", "# X\n\nShared paragraph.", "mem/y.md"),
    ];
    let report = pipeline.build(docs).unwrap();
    assert_eq!(report.duplicate_chunks, 1);
    assert_eq!(report.indexed, 1);

    let index = pipeline.handle().current().unwrap();
    assert_eq!(index.chunks()[0].doc_id, "x.md");
    assert_eq!(index.chunks()[0].aliases, vec!["mem/y.md"]);
    let set: HashSet<&str> = index.chunks().iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(set.len(), 1);
}

#[test]
fn test_missing_root_keeps_live_index() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());
    write_doc(tmp.path(), "a.md", "# A\n\nThe compositor dropped frames while scrolling.\n");

    let encoder = create_encoder(&config.embedding).unwrap();
    let pipeline = BuildPipeline::new(config.clone(), encoder.clone()).unwrap();
    let first = pipeline.run().unwrap();
    assert_eq!(first.indexed, 1);

    let mut typo = config.clone();
    typo.sources.roots = vec![tmp.path().join("dcos")];
    let broken = BuildPipeline::new(typo, encoder.clone())
        .unwrap()
        .with_handle(Arc::clone(pipeline.handle()));
    let err = broken.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    // an existing root with nothing matching is refused too
    fs::create_dir_all(tmp.path().join("empty")).unwrap();
    let mut empty = config.clone();
    empty.sources.roots = vec![tmp.path().join("empty")];
    let err = BuildPipeline::new(empty, encoder)
        .unwrap()
        .with_handle(Arc::clone(pipeline.handle()))
        .run()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let store = IndexStore::new(&config.index.dir);
    assert_eq!(store.current().unwrap().as_deref(), Some(first.generation.as_str()));
    assert_eq!(store.generations().unwrap().len(), 1);
    assert_eq!(pipeline.handle().current().unwrap().len(), 1);
}

/// Blocks on every call whose text contains `marker`
struct Stalling {
    inner: HashingEncoder,
    marker: &'static str,
    hold: Duration,
}

impl VectorEncoder for Stalling {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        if text.contains(self.marker) {
            std::thread::sleep(self.hold);
        }
        self.inner.encode(text)
    }
}

#[test]
fn test_configured_timeout_applies_to_bare_encoder() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_for(tmp.path());
    config.embedding.timeout_ms = 50;
    config.embedding.max_attempts = 1;
    // one build worker so the healthy chunk is encoded before the stall
    config.pipeline.workers = 1;

    write_doc(tmp.path(), "a.md", "# A\n\nHealthy text about layout.\n");
    write_doc(tmp.path(), "b.md", "# B\n\nThis chunk is STALLED inside the model.\n");

    let stalling = Arc::new(Stalling {
        inner: HashingEncoder::new(64),
        marker: "STALLED",
        hold: Duration::from_secs(2),
    });
    let pipeline = BuildPipeline::new(config, stalling).unwrap();

    let started = std::time::Instant::now();
    let report = pipeline.run().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped, 1);
    let index = pipeline.handle().current().unwrap();
    assert_eq!(index.chunks()[0].doc_id, "a.md");
}

#[test]
fn test_corrupt_vectors_file_is_consistency_error() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());
    write_doc(tmp.path(), "a.md", &two_span_body("alpha"));

    let encoder = create_encoder(&config.embedding).unwrap();
    let report = BuildPipeline::new(config.clone(), encoder).unwrap().run().unwrap();

    let store = IndexStore::new(&config.index.dir);
    let npy = store.generation_dir(&report.generation).join(EMBEDDINGS_FILE);
    let params = HnswParams::from(&config.index);

    // truncated data
    let bytes = fs::read(&npy).unwrap();
    fs::write(&npy, &bytes[..bytes.len() - 3]).unwrap();
    let err = store.load_generation(&report.generation, params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);

    // header claiming far more rows than the file holds
    let header = b"{'descr': '<f4', 'fortran_order': False, 'shape': (4294967296, 4294967296), }\n";
    let mut forged = b"\x93NUMPY\x01\x00".to_vec();
    forged.extend_from_slice(&(header.len() as u16).to_le_bytes());
    forged.extend_from_slice(header);
    forged.extend_from_slice(&[0u8; 64]);
    fs::write(&npy, forged).unwrap();
    let err = store.load_current(params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);
}
