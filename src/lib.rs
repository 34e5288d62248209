//! RetrievalCore: Markdown → chunks → embeddings → vector index → ranked spans
//!
//! Turns a folder of Markdown documents into a searchable set of text spans
//! so an answering agent can fetch grounded context for a query.
//!
//! # Architecture
//!
//! ## Build side
//! - `source.rs` - SourceLoader: glob discovery, front matter, canonical text
//! - `chunker/` - Chunker: section-aware token windows with stable chunk ids
//! - `embeddings/` - VectorEncoder trait, encoders, timeout/retry guard and the
//!   content-addressed EmbeddingCache
//! - `index/` - Index (exact or HNSW), NPY/JSONL generations, IndexHandle
//! - `pipeline.rs` - BuildPipeline: parallel chunk + embed, atomic publish
//!
//! ## Query side
//! - `retriever.rs` - Retriever: normalize, encode, search, filter, truncate
//!
//! ## Ambient
//! - `config.rs` - TOML configuration with validation
//! - `error.rs` - RetrievalError and its error kinds
//! - `logging.rs` - tracing subscriber setup
//!
//! # Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use retrieval_core::{create_encoder, BuildPipeline, RetrievalConfig, Retriever};
//!
//! let config = RetrievalConfig::load("config/rag.toml")?;
//! let encoder = create_encoder(&config.embedding)?;
//!
//! let pipeline = BuildPipeline::new(config.clone(), encoder.clone())?;
//! let report = pipeline.run()?;
//! println!("{} chunks indexed, {} skipped", report.indexed, report.skipped);
//!
//! let retriever = Retriever::new(encoder, Arc::clone(pipeline.handle()), config.retrieval);
//! for hit in retriever.search("dropped frames")? {
//!     println!("{:.3} {} {:?}", hit.score, hit.doc_id, hit.section_path);
//! }
//! ```

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod retriever;
pub mod source;

// Public exports - Build side
pub use chunker::{Chunk, Chunker};
pub use embeddings::{
    create_encoder, guard_encoder, EmbeddingCache, GuardedEncoder, RetryPolicy, VectorEncoder,
};
pub use index::{Index, IndexBackend, IndexHandle, IndexStore, SearchResult};
pub use pipeline::{BuildPipeline, BuildReport, CancelToken};
pub use source::{Document, SourceLoader};

// Public exports - Query side
pub use retriever::Retriever;

// Public exports - Ambient
pub use config::RetrievalConfig;
pub use error::{ErrorKind, Result, RetrievalError};
