// retrieval-core/src/embeddings/config.rs
//
// Encoder identifiers and ONNX model parameters

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RetrievalError;

/// Identifier of the deterministic feature-hashing encoder
pub const HASHING_MODEL: &str = "hashing-v1";

/// Identifier of the pseudo-random plumbing encoder
pub const DUMMY_MODEL: &str = "dummy";

/// Output dimension of the dummy encoder
pub const DUMMY_DIM: usize = 64;

/// Supported ONNX models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnnxModel {
    /// BAAI/bge-small-en-v1.5 - 384 dimensions, fast
    #[serde(rename = "bge-small-en-v1.5")]
    BGESmallENV15,

    /// nomic-ai/modernbert-embed-base - 768 dimensions, high quality
    #[serde(rename = "modernbert-embed-base")]
    ModernBERTBase,

    /// all-MiniLM-L6-v2 - 384 dimensions, lightweight
    #[serde(rename = "all-minilm-l6-v2")]
    AllMiniLML6V2,
}

impl fmt::Display for OnnxModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BGESmallENV15 => write!(f, "bge-small-en-v1.5"),
            Self::ModernBERTBase => write!(f, "modernbert-embed-base"),
            Self::AllMiniLML6V2 => write!(f, "all-minilm-l6-v2"),
        }
    }
}

impl FromStr for OnnxModel {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bge-small-en-v1.5" => Ok(Self::BGESmallENV15),
            "modernbert-embed-base" => Ok(Self::ModernBERTBase),
            "all-minilm-l6-v2" => Ok(Self::AllMiniLML6V2),
            other => Err(RetrievalError::UnknownModel(other.to_string())),
        }
    }
}

impl OnnxModel {
    /// Get the expected embedding dimensions for this model
    pub fn dimensions(&self) -> usize {
        match self {
            Self::BGESmallENV15 => 384,
            Self::ModernBERTBase => 768,
            Self::AllMiniLML6V2 => 384,
        }
    }

    /// Get the maximum sequence length for this model
    pub fn max_length(&self) -> usize {
        match self {
            Self::BGESmallENV15 => 512,
            Self::ModernBERTBase => 8192,
            Self::AllMiniLML6V2 => 512,
        }
    }

    /// Get HuggingFace model ID
    pub fn hf_model_id(&self) -> &'static str {
        match self {
            Self::BGESmallENV15 => "BAAI/bge-small-en-v1.5",
            Self::ModernBERTBase => "nomic-ai/modernbert-embed-base",
            Self::AllMiniLML6V2 => "sentence-transformers/all-MiniLM-L6-v2",
        }
    }

    /// Pooling the model was trained with
    pub fn pooling(&self) -> PoolingStrategy {
        match self {
            Self::BGESmallENV15 => PoolingStrategy::Cls,
            Self::ModernBERTBase | Self::AllMiniLML6V2 => PoolingStrategy::Mean,
        }
    }
}

/// Pooling strategy for converting token embeddings to sentence embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PoolingStrategy {
    /// Mean pooling over all tokens (most common)
    #[default]
    Mean,

    /// Use [CLS] token embedding
    Cls,

    /// Max pooling over tokens
    Max,
}

/// Encoder selected by the `embedding.model` configuration key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    Hashing,
    Dummy,
    Onnx(OnnxModel),
}

impl EncoderKind {
    pub fn parse(model: &str) -> Result<Self, RetrievalError> {
        match model.trim() {
            HASHING_MODEL => Ok(Self::Hashing),
            DUMMY_MODEL => Ok(Self::Dummy),
            other => other.parse().map(Self::Onnx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dimensions() {
        assert_eq!(OnnxModel::BGESmallENV15.dimensions(), 384);
        assert_eq!(OnnxModel::ModernBERTBase.dimensions(), 768);
        assert_eq!(OnnxModel::AllMiniLML6V2.dimensions(), 384);
    }

    #[test]
    fn test_model_name_round_trip() {
        for model in [OnnxModel::BGESmallENV15, OnnxModel::ModernBERTBase, OnnxModel::AllMiniLML6V2] {
            assert_eq!(model.to_string().parse::<OnnxModel>().unwrap(), model);
        }
    }

    #[test]
    fn test_encoder_kind_parse() {
        assert_eq!(EncoderKind::parse("hashing-v1").unwrap(), EncoderKind::Hashing);
        assert_eq!(EncoderKind::parse(" dummy ").unwrap(), EncoderKind::Dummy);
        assert_eq!(
            EncoderKind::parse("all-minilm-l6-v2").unwrap(),
            EncoderKind::Onnx(OnnxModel::AllMiniLML6V2)
        );
        assert!(matches!(
            EncoderKind::parse("gpt-embed"),
            Err(RetrievalError::UnknownModel(_))
        ));
    }
}
