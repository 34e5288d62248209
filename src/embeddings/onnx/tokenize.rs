// retrieval-core/src/embeddings/onnx/tokenize.rs
//
// Tokenization wrapper for BERT-style models

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokenizers::Tokenizer;

/// Tokenizer wrapper for embedding models
pub struct EmbedTokenizer {
    tokenizer: Arc<Tokenizer>,
    max_length: usize,
}

/// Tokenized input ready for model inference
#[derive(Debug, Clone)]
pub struct TokenizedInput {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("failed to load tokenizer: {0}")]
    LoadFailed(String),
    #[error("failed to encode text: {0}")]
    EncodeFailed(String),
}

impl EmbedTokenizer {
    pub fn from_file(path: &Path, max_length: usize) -> Result<Self, TokenizerError> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| TokenizerError::LoadFailed(format!("{}: {e}", path.display())))?;

        Ok(Self {
            tokenizer: Arc::new(tokenizer),
            max_length,
        })
    }

    /// Tokenize a single text, truncating to the model's maximum length
    pub fn encode(&self, text: &str) -> Result<TokenizedInput, TokenizerError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| TokenizerError::EncodeFailed(e.to_string()))?;

        let take = encoding.get_ids().len().min(self.max_length);
        let widen = |values: &[u32]| values[..take].iter().map(|&v| v as i64).collect::<Vec<i64>>();

        Ok(TokenizedInput {
            input_ids: widen(encoding.get_ids()),
            attention_mask: widen(encoding.get_attention_mask()),
            token_type_ids: widen(encoding.get_type_ids()),
        })
    }
}
