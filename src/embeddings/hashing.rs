// retrieval-core/src/embeddings/hashing.rs
//
// Deterministic encoders that need no model files

use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};

use super::config::{DUMMY_DIM, DUMMY_MODEL, HASHING_MODEL};
use super::VectorEncoder;
use crate::index::distance::normalized;
use crate::chunker::tokenize;
use crate::error::EncodeError;

/// Feature-hashing bag of words.
///
/// Each lowercased token is hashed with SHA-256; the first 8 bytes pick a
/// bucket and the ninth byte picks a sign. The vector is L2-normalized, so
/// texts sharing vocabulary score high under cosine similarity.
pub struct HashingEncoder {
    dim: usize,
    model_id: String,
}

impl HashingEncoder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            model_id: format!("{HASHING_MODEL}:{dim}"),
        }
    }
}

impl VectorEncoder for HashingEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dim
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        let mut vector = vec![0.0f32; self.dim];
        for word in tokenize::words(text) {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = (LittleEndian::read_u64(&digest[..8]) % self.dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        Ok(normalized(&vector))
    }
}

/// Pseudo-random unit vectors seeded from the text hash. Deterministic but
/// carries no semantic signal.
pub struct DummyEncoder {
    seed: u64,
}

impl Default for DummyEncoder {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

impl VectorEncoder for DummyEncoder {
    fn model_id(&self) -> &str {
        DUMMY_MODEL
    }

    fn dimensions(&self) -> usize {
        DUMMY_DIM
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        let digest = Sha256::digest(text.as_bytes());
        let mut state = LittleEndian::read_u64(&digest[..8]) ^ self.seed;
        let mut vector = Vec::with_capacity(DUMMY_DIM);
        for _ in 0..DUMMY_DIM {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
            vector.push(unit * 2.0 - 1.0);
        }
        Ok(normalized(&vector))
    }
}
