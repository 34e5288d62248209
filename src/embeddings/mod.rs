//! Embeddings - text to vector encoders and the content-addressed cache
//!
//! # Architecture
//! ```text
//! chunk text → EmbeddingCache ─hit──────────────────────→ vector
//!                   │miss
//!                   └→ GuardedEncoder (timeout, retry) → VectorEncoder
//! ```
//!
//! Encoders are chosen by name through [`create_encoder`]:
//! - `hashing-v1` - feature hashing, deterministic, no model files
//! - `dummy` - seeded pseudo-random vectors for plumbing tests
//! - ONNX sentence-transformer models (requires the `onnx` feature)

pub mod cache;
pub mod config;
pub mod guard;
pub mod hashing;
#[cfg(feature = "onnx")]
pub mod onnx;

use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{EncodeError, Result, RetrievalError};

pub use cache::{CacheKey, CacheStats, EmbeddingCache};
pub use config::{EncoderKind, OnnxModel, PoolingStrategy, DUMMY_MODEL, HASHING_MODEL};
pub use guard::{GuardedEncoder, RetryPolicy};
pub use hashing::{DummyEncoder, HashingEncoder};

/// Text to fixed-dimension vector capability.
///
/// Implementations must be deterministic for a fixed `model_id` and always
/// return `dimensions()` floats.
pub trait VectorEncoder: Send + Sync {
    /// Stable identifier; vectors from different ids are never mixed.
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn encode(&self, text: &str) -> std::result::Result<Vec<f32>, EncodeError>;

    /// Whether calls already run under a timeout and retry policy.
    fn is_guarded(&self) -> bool {
        false
    }
}

impl<T: VectorEncoder + ?Sized> VectorEncoder for Arc<T> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn encode(&self, text: &str) -> std::result::Result<Vec<f32>, EncodeError> {
        (**self).encode(text)
    }

    fn is_guarded(&self) -> bool {
        (**self).is_guarded()
    }
}

/// Put `encoder` under the timeout and retry policy from `config`, unless it
/// already carries one.
pub fn guard_encoder(
    encoder: Arc<dyn VectorEncoder>,
    config: &EmbeddingConfig,
) -> Arc<dyn VectorEncoder> {
    if encoder.is_guarded() {
        return encoder;
    }
    Arc::new(GuardedEncoder::new(encoder, RetryPolicy::from(config)))
}

/// Build the configured encoder, guarded by the configured timeout and retries.
pub fn create_encoder(config: &EmbeddingConfig) -> Result<Arc<dyn VectorEncoder>> {
    let encoder: Arc<dyn VectorEncoder> = match EncoderKind::parse(&config.model)? {
        EncoderKind::Hashing => Arc::new(HashingEncoder::new(config.dim)),
        EncoderKind::Dummy => Arc::new(DummyEncoder::default()),
        EncoderKind::Onnx(model) => onnx_encoder(model, config)?,
    };
    tracing::info!(
        model_id = encoder.model_id(),
        dim = encoder.dimensions(),
        timeout_ms = config.timeout_ms,
        max_attempts = config.max_attempts,
        "encoder ready"
    );
    Ok(guard_encoder(encoder, config))
}

#[cfg(feature = "onnx")]
fn onnx_encoder(model: OnnxModel, config: &EmbeddingConfig) -> Result<Arc<dyn VectorEncoder>> {
    let dir = config.model_dir.as_ref().ok_or_else(|| {
        RetrievalError::config(format!("embedding.model_dir is required for {model}"))
    })?;
    Ok(Arc::new(onnx::OnnxEncoder::from_dir(model, dir)?))
}

#[cfg(not(feature = "onnx"))]
fn onnx_encoder(model: OnnxModel, _config: &EmbeddingConfig) -> Result<Arc<dyn VectorEncoder>> {
    Err(RetrievalError::config(format!(
        "model {model} needs the `onnx` feature, which this build does not include"
    )))
}
