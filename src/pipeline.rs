//! Build Pipeline Orchestrator
//!
//! Coordinates loading, chunking, embedding and publishing one index
//! generation.
//!
//! # Flow
//! ```text
//! documents (sorted by doc_id)
//!   → Chunker            parallel per document
//!   → dedup_chunks       first occurrence wins
//!   → EmbeddingCache     parallel per chunk; encoder failures skip the chunk
//!   → Index::build       row-aligned vectors + metadata
//!   → IndexStore         staging dir → generation → CURRENT
//!   → IndexHandle::swap  queries see the new index
//! ```
//!
//! Consistency errors (dimension drift, row mismatch) and cancellation abort
//! before anything is published, so the previous generation stays live.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;

use crate::chunker::{dedup_chunks, Chunk, Chunker};
use crate::config::RetrievalConfig;
use crate::embeddings::{guard_encoder, CacheKey, EmbeddingCache, VectorEncoder};
use crate::error::{Result, RetrievalError};
use crate::index::{
    HnswParams, Index, IndexBackend, IndexHandle, IndexSpec, IndexStore, VectorMatrix,
};
use crate::source::{Document, SourceLoader};

/// Cooperative cancellation flag, checked between documents and chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }
        Ok(())
    }
}

/// Outcome of one published build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub generation: String,
    pub documents: usize,
    /// Chunks left after dropping duplicates
    pub chunks: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub skipped_chunks: Vec<String>,
    pub duplicate_chunks: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub dim: usize,
    pub model_id: String,
    pub backend: IndexBackend,
    pub elapsed: Duration,
}

pub struct BuildPipeline {
    config: RetrievalConfig,
    encoder: Arc<dyn VectorEncoder>,
    cache: Arc<EmbeddingCache>,
    handle: Arc<IndexHandle>,
    store: IndexStore,
    cancel: CancelToken,
}

impl BuildPipeline {
    /// Validate `config` and load the persistent cache when one is configured.
    /// Encoder calls run under `config.embedding`'s timeout and retry policy
    /// unless `encoder` is already guarded.
    pub fn new(config: RetrievalConfig, encoder: Arc<dyn VectorEncoder>) -> Result<Self> {
        config.validate()?;
        let encoder = guard_encoder(encoder, &config.embedding);
        let cache = match &config.embedding.cache_path {
            Some(path) => EmbeddingCache::load(path)?,
            None => EmbeddingCache::new(),
        };
        let store = IndexStore::new(config.index.dir.clone());
        Ok(Self {
            config,
            encoder,
            cache: Arc::new(cache),
            handle: Arc::new(IndexHandle::new()),
            store,
            cancel: CancelToken::new(),
        })
    }

    /// Publish into an existing handle, e.g. one a retriever already reads.
    pub fn with_handle(mut self, handle: Arc<IndexHandle>) -> Self {
        self.handle = handle;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn handle(&self) -> &Arc<IndexHandle> {
        &self.handle
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Load documents from the configured sources and build. Sources that
    /// yield no documents are refused so a live index is never replaced by an
    /// empty one.
    pub fn run(&self) -> Result<BuildReport> {
        let documents = SourceLoader::new(&self.config.sources).load_all()?;
        if documents.is_empty() {
            let roots: Vec<String> = self
                .config
                .sources
                .roots
                .iter()
                .map(|r| r.display().to_string())
                .collect();
            return Err(RetrievalError::config(format!(
                "no documents found under {}",
                roots.join(", ")
            )));
        }
        self.build(documents)
    }

    pub fn build(&self, mut documents: Vec<Document>) -> Result<BuildReport> {
        let started = Instant::now();
        let backend = IndexBackend::parse(&self.config.index.backend)?;
        let model_id = self.encoder.model_id().to_string();
        let dim = self.encoder.dimensions();

        documents.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        let before = documents.len();
        documents.dedup_by(|later, first| later.doc_id == first.doc_id);
        if documents.len() != before {
            tracing::warn!(dropped = before - documents.len(), "duplicate document ids dropped");
        }

        tracing::info!(
            documents = documents.len(),
            model_id = %model_id,
            backend = %backend,
            "build started"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.pipeline.workers)
            .thread_name(|i| format!("retrieval-worker-{i}"))
            .build()
            .map_err(|e| RetrievalError::config(format!("cannot start worker pool: {e}")))?;

        let result = pool.install(|| self.chunk_and_embed(&documents, dim));
        let (chunks, vectors, stats) = match result {
            Ok(done) => done,
            Err(e) => {
                if matches!(e, RetrievalError::Cancelled) {
                    tracing::warn!("build cancelled, previous index stays published");
                } else {
                    tracing::error!(error = %e, "build aborted, previous index stays published");
                }
                return Err(e);
            }
        };
        self.cancel.check()?;

        let live: HashSet<CacheKey> = chunks
            .iter()
            .map(|c| CacheKey::for_text(&model_id, &c.text))
            .collect();

        let spec = IndexSpec {
            model_id: model_id.clone(),
            backend,
            hnsw: HnswParams::from(&self.config.index),
            window_tokens: self.config.chunking.window_tokens,
            overlap_percent: self.config.chunking.overlap_percent,
        };
        let index = Index::build(&spec, chunks, vectors)?;
        let indexed = index.len();
        let generation = self.store.publish(&index, self.config.index.keep_generations)?;
        self.handle.swap(Arc::new(index));

        self.persist_cache(&live);

        let report = BuildReport {
            generation,
            documents: documents.len(),
            chunks: stats.chunks,
            indexed,
            skipped: stats.skipped_chunks.len(),
            skipped_chunks: stats.skipped_chunks,
            duplicate_chunks: stats.duplicates,
            cache_hits: stats.hits,
            cache_misses: stats.misses,
            dim,
            model_id,
            backend,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            generation = %report.generation,
            indexed = report.indexed,
            skipped = report.skipped,
            duplicates = report.duplicate_chunks,
            cache_hits = report.cache_hits,
            cache_misses = report.cache_misses,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "build published"
        );
        Ok(report)
    }

    /// Runs inside the worker pool.
    fn chunk_and_embed(
        &self,
        documents: &[Document],
        dim: usize,
    ) -> Result<(Vec<Chunk>, VectorMatrix, EmbedStats)> {
        let chunker = Chunker::new(&self.config.chunking);

        let per_doc: Vec<Vec<Chunk>> = documents
            .par_iter()
            .map(|doc| {
                self.cancel.check()?;
                Ok(chunker.chunk(doc))
            })
            .collect::<Result<_>>()?;

        let mut chunks: Vec<Chunk> = per_doc.into_iter().flatten().collect();
        let duplicates = dedup_chunks(&mut chunks);
        tracing::info!(chunks = chunks.len(), duplicates, "chunking complete");

        let before = self.cache.stats();
        let embedded: Vec<Result<Arc<[f32]>>> = chunks
            .par_iter()
            .map(|chunk| {
                self.cancel.check()?;
                self.cache.embed(&chunk.text, self.encoder.as_ref())
            })
            .collect();
        let after = self.cache.stats();

        let total = chunks.len();
        let mut kept = Vec::with_capacity(total);
        let mut vectors = VectorMatrix::with_capacity(dim, total);
        let mut skipped_chunks = Vec::new();
        for (chunk, result) in chunks.into_iter().zip(embedded) {
            match result {
                Ok(vector) => {
                    vectors.push_row(&vector)?;
                    kept.push(chunk);
                }
                Err(RetrievalError::Encoding { source, .. }) => {
                    tracing::warn!(
                        chunk_id = %chunk.chunk_id,
                        doc_id = %chunk.doc_id,
                        error = %source,
                        "chunk skipped after encoder failure"
                    );
                    skipped_chunks.push(chunk.chunk_id);
                }
                Err(e) => return Err(e),
            }
        }

        let stats = EmbedStats {
            chunks: total,
            duplicates,
            skipped_chunks,
            hits: after.hits - before.hits,
            misses: after.misses - before.misses,
        };
        Ok((kept, vectors, stats))
    }

    fn persist_cache(&self, live: &HashSet<CacheKey>) {
        let Some(path) = &self.config.embedding.cache_path else {
            return;
        };
        if self.config.embedding.prune_cache {
            let removed = self.cache.prune(live);
            tracing::debug!(removed, "embedding cache pruned");
        }
        if let Err(e) = self.cache.save(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save embedding cache");
        }
    }
}

struct EmbedStats {
    chunks: usize,
    duplicates: usize,
    skipped_chunks: Vec<String>,
    hits: u64,
    misses: u64,
}
