//! Pipeline configuration
//!
//! Loaded from a TOML file (default `config/rag.toml`). Every field has a
//! default so a partial file is valid; [`RetrievalConfig::validate`] runs
//! before any work starts.

use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use serde::{Deserialize, Serialize};

use crate::embeddings::EncoderKind;
use crate::error::{Result, RetrievalError};
use crate::index::IndexBackend;

pub const DEFAULT_CONFIG_PATH: &str = "config/rag.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub sources: SourcesConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrieverConfig,
    pub pipeline: PipelineConfig,
}

/// Where documents come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub roots: Vec<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("docs")],
            include: vec!["**/*.md".to_string()],
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in tokens
    pub window_tokens: usize,
    /// Overlap between consecutive windows, percent of the window
    pub overlap_percent: u32,
    /// Trailing windows with fewer new tokens than this fraction of the
    /// window are merged into their predecessor
    pub min_tail_fraction: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_tokens: 700,
            overlap_percent: 15,
            min_tail_fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Encoder identifier, e.g. `hashing-v1`, `dummy`, `bge-small-en-v1.5`
    pub model: String,
    /// Output dimension for encoders that accept one (hashing)
    pub dim: usize,
    /// Directory holding `model.onnx` and `tokenizer.json` for ONNX models
    pub model_dir: Option<PathBuf>,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Persistent cache file; in-memory only when unset
    pub cache_path: Option<PathBuf>,
    pub prune_cache: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "hashing-v1".to_string(),
            dim: 256,
            model_dir: None,
            timeout_ms: 10_000,
            max_attempts: 3,
            backoff_ms: 200,
            cache_path: None,
            prune_cache: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: String,
    pub dir: PathBuf,
    pub keep_generations: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: "exact".to_string(),
            dir: PathBuf::from(".rag_index"),
            keep_generations: 2,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub top_n: usize,
    pub top_k: usize,
    pub min_score: Option<f32>,
    /// Maximum characters of chunk text returned per result
    pub snippet_chars: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_n: 50,
            top_k: 8,
            min_score: None,
            snippet_chars: 2048,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads for chunking and embedding; 0 means one per core
    pub workers: usize,
}

impl RetrievalConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: RetrievalConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let sources = &self.sources;
        if sources.roots.is_empty() {
            return Err(RetrievalError::config("sources.roots must not be empty"));
        }
        if sources.include.is_empty() {
            return Err(RetrievalError::config("sources.include must not be empty"));
        }
        for glob in sources.include.iter().chain(sources.exclude.iter()) {
            OverrideBuilder::new(".")
                .add(glob)
                .map_err(|e| RetrievalError::config(format!("invalid pattern {glob:?}: {e}")))?;
        }

        let chunking = &self.chunking;
        if chunking.window_tokens == 0 {
            return Err(RetrievalError::config("chunking.window_tokens must be positive"));
        }
        if chunking.overlap_percent >= 50 {
            return Err(RetrievalError::config("chunking.overlap_percent must be below 50"));
        }
        if !(0.0..1.0).contains(&chunking.min_tail_fraction) {
            return Err(RetrievalError::config(
                "chunking.min_tail_fraction must be in [0, 1)",
            ));
        }

        EncoderKind::parse(&self.embedding.model)?;
        if self.embedding.dim == 0 {
            return Err(RetrievalError::config("embedding.dim must be positive"));
        }
        if self.embedding.max_attempts == 0 {
            return Err(RetrievalError::config("embedding.max_attempts must be at least 1"));
        }
        if self.embedding.timeout_ms == 0 {
            return Err(RetrievalError::config("embedding.timeout_ms must be positive"));
        }

        IndexBackend::parse(&self.index.backend)?;
        if self.index.keep_generations == 0 {
            return Err(RetrievalError::config("index.keep_generations must be at least 1"));
        }
        if self.index.hnsw_m < 2 {
            return Err(RetrievalError::config("index.hnsw_m must be at least 2"));
        }

        let retrieval = &self.retrieval;
        if retrieval.top_k == 0 || retrieval.top_k > retrieval.top_n {
            return Err(RetrievalError::config(format!(
                "retrieval.top_k ({}) must be in 1..=top_n ({})",
                retrieval.top_k, retrieval.top_n
            )));
        }
        Ok(())
    }
}
