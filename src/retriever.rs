//! Retriever - query text in, ranked chunks out.
//!
//! ```text
//! query → normalize → encode (same model as the index) → Index::search(top_n)
//!       → min_score filter → truncate(top_k) → snippets
//! ```

use std::sync::Arc;

use crate::chunker::tokenize::normalize_query;
use crate::config::RetrieverConfig;
use crate::config::EmbeddingConfig;
use crate::embeddings::{guard_encoder, VectorEncoder};
use crate::error::{Result, RetrievalError};
use crate::index::{IndexHandle, SearchResult};

pub struct Retriever {
    encoder: Arc<dyn VectorEncoder>,
    handle: Arc<IndexHandle>,
    config: RetrieverConfig,
}

impl Retriever {
    /// An encoder from [`create_encoder`](crate::create_encoder) keeps its
    /// configured guard; a bare encoder gets the default timeout and retries.
    pub fn new(
        encoder: Arc<dyn VectorEncoder>,
        handle: Arc<IndexHandle>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            encoder: guard_encoder(encoder, &EmbeddingConfig::default()),
            handle,
            config,
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Retrieve with the configured `top_n`/`top_k`.
    pub fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.retrieve(query, self.config.top_n, self.config.top_k)
    }

    /// Fetch `top_n` candidates and keep the best `top_k` (clamped to
    /// `top_n`). An absent or empty index, a blank query, or no candidate at
    /// or above `min_score` all give an empty list.
    pub fn retrieve(&self, query: &str, top_n: usize, top_k: usize) -> Result<Vec<SearchResult>> {
        let top_k = top_k.min(top_n);
        let query = normalize_query(query);
        if query.is_empty() || top_k == 0 {
            tracing::info!(reason = "empty query", "no retrieval results");
            return Ok(Vec::new());
        }

        let Some(index) = self.handle.current() else {
            tracing::info!(reason = "no index loaded", "no retrieval results");
            return Ok(Vec::new());
        };
        index
            .manifest()
            .check_encoder(self.encoder.model_id(), self.encoder.dimensions())?;
        if index.is_empty() {
            tracing::info!(reason = "index is empty", "no retrieval results");
            return Ok(Vec::new());
        }

        let vector = self.encoder.encode(&query).map_err(|source| RetrievalError::Encoding {
            key: "query".to_string(),
            source,
        })?;

        let candidates = index.search(&vector, top_n)?;
        let fetched = candidates.len();
        let mut results: Vec<SearchResult> = match self.config.min_score {
            Some(min) => candidates.into_iter().filter(|r| r.score >= min).collect(),
            None => candidates,
        };
        results.truncate(top_k);

        if results.is_empty() {
            tracing::info!(
                reason = "below min_score",
                candidates = fetched,
                min_score = ?self.config.min_score,
                "no retrieval results"
            );
            return Ok(results);
        }

        for result in &mut results {
            truncate_chars(&mut result.text_snippet, self.config.snippet_chars);
        }
        tracing::debug!(
            query = %query,
            candidates = fetched,
            returned = results.len(),
            best = results[0].score,
            "retrieval complete"
        );
        Ok(results)
    }
}

fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((byte, _)) = text.char_indices().nth(max_chars) {
        text.truncate(byte);
    }
}
