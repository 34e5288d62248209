use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{IndexBackend, IndexSpec, VectorMatrix};
use crate::chunker::TOKENIZER_ID;
use crate::error::{Result, RetrievalError};

pub const SCHEMA_VERSION: u32 = 1;
pub const DISTANCE: &str = "cosine";

/// Description of one published generation, stored as `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub model_id: String,
    pub dim: usize,
    pub normalized: bool,
    pub distance: String,
    pub backend: IndexBackend,
    pub tokenizer: String,
    pub window_tokens: usize,
    pub overlap_percent: u32,
    pub num_vectors: usize,
    pub vectors_sha256: String,
}

impl Manifest {
    pub fn describe(spec: &IndexSpec, vectors: &VectorMatrix) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
            model_id: spec.model_id.clone(),
            dim: vectors.dim(),
            normalized: true,
            distance: DISTANCE.to_string(),
            backend: spec.backend,
            tokenizer: TOKENIZER_ID.to_string(),
            window_tokens: spec.window_tokens,
            overlap_percent: spec.overlap_percent,
            num_vectors: vectors.len(),
            vectors_sha256: vectors_sha256(vectors),
        }
    }

    /// Check persisted vectors against what this manifest promises.
    pub fn verify(&self, vectors: &VectorMatrix) -> std::result::Result<(), String> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(format!("schema version {} is not supported", self.schema_version));
        }
        if self.distance != DISTANCE {
            return Err(format!("distance {} is not supported", self.distance));
        }
        if vectors.dim() != self.dim {
            return Err(format!("vectors have dim {}, manifest says {}", vectors.dim(), self.dim));
        }
        if vectors.len() != self.num_vectors {
            return Err(format!(
                "vectors have {} rows, manifest says {}",
                vectors.len(),
                self.num_vectors
            ));
        }
        let actual = vectors_sha256(vectors);
        if actual != self.vectors_sha256 {
            return Err(format!("vectors checksum {actual} does not match manifest"));
        }
        Ok(())
    }

    /// Reject a query encoder that would mix vector spaces with this index.
    pub fn check_encoder(&self, model_id: &str, dim: usize) -> Result<()> {
        if self.model_id != model_id || self.dim != dim {
            return Err(RetrievalError::ModelMismatch {
                index_model: self.model_id.clone(),
                index_dim: self.dim,
                query_model: model_id.to_string(),
                query_dim: dim,
            });
        }
        Ok(())
    }
}

/// Hex SHA-256 over the little-endian bytes of every float, row-major
pub fn vectors_sha256(vectors: &VectorMatrix) -> String {
    let mut hasher = Sha256::new();
    for value in vectors.as_flat() {
        hasher.update(value.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}
