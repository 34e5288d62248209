//! Vector Index - row-aligned vectors + chunk metadata behind one search call
//!
//! An [`Index`] pairs a [`VectorMatrix`] with the chunks it was built from:
//! vector row `i` always belongs to chunk `i`. The nearest-neighbor engine is
//! chosen by [`IndexBackend`] and hidden behind [`VectorIndex`], so callers
//! never know whether they hit the exact scan or the HNSW graph.

pub mod distance;
pub mod exact;
pub mod handle;
pub mod hnsw;
pub mod manifest;
pub mod npy;
pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;
use crate::error::{Result, RetrievalError};

pub use exact::ExactIndex;
pub use handle::IndexHandle;
pub use hnsw::{Hnsw, HnswParams};
pub use manifest::Manifest;
pub use store::IndexStore;

/// Nearest-neighbor engine capability.
///
/// `search` returns `(row, score)` pairs, best first, at most `top_n` long.
/// Equal scores come back in ascending row order.
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> IndexBackend;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn search(&self, query: &[f32], top_n: usize) -> Vec<(usize, f32)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Brute-force cosine scan over every row
    Exact,
    /// Approximate search over an HNSW graph
    Hnsw,
}

impl IndexBackend {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "exact" | "flat" => Ok(IndexBackend::Exact),
            "hnsw" => Ok(IndexBackend::Hnsw),
            _ => Err(RetrievalError::UnknownBackend(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexBackend::Exact => "exact",
            IndexBackend::Hnsw => "hnsw",
        }
    }
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dense row-major `[rows, dim]` float32 matrix
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatrix {
    dim: usize,
    data: Vec<f32>,
}

impl VectorMatrix {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    pub fn with_capacity(dim: usize, rows: usize) -> Self {
        Self {
            dim,
            data: Vec::with_capacity(dim * rows),
        }
    }

    /// Wrap a flat buffer; its length must be a multiple of `dim`.
    pub fn from_flat(dim: usize, data: Vec<f32>) -> Result<Self> {
        let aligned = if dim == 0 { data.is_empty() } else { data.len() % dim == 0 };
        if !aligned {
            return Err(RetrievalError::DimensionMismatch {
                model_id: String::new(),
                expected: dim,
                got: data.len() % dim.max(1),
            });
        }
        Ok(Self { dim, data })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.dim {
            return Err(RetrievalError::DimensionMismatch {
                model_id: String::new(),
                expected: self.dim,
                got: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim.max(1))
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// Copy with every row scaled to unit length.
    pub fn normalized(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.rows() {
            data.extend(distance::normalized(row));
        }
        Self { dim: self.dim, data }
    }
}

/// One line of the metadata store; row `i` describes vector row `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub doc_id: String,
    pub section_path: Vec<String>,
    pub text: String,
}

impl From<&Chunk> for IndexEntry {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            section_path: chunk.section_path.clone(),
            text: chunk.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub score: f32,
    pub doc_id: String,
    pub section_path: Vec<String>,
    pub text_snippet: String,
}

/// What an index is built with, recorded in its manifest
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub model_id: String,
    pub backend: IndexBackend,
    pub hnsw: HnswParams,
    pub window_tokens: usize,
    pub overlap_percent: u32,
}

/// Searchable, immutable index of one build
pub struct Index {
    manifest: Manifest,
    chunks: Vec<Chunk>,
    vectors: Arc<VectorMatrix>,
    engine: Box<dyn VectorIndex>,
    by_id: HashMap<String, usize>,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("model_id", &self.manifest.model_id)
            .field("dim", &self.manifest.dim)
            .field("backend", &self.manifest.backend)
            .field("rows", &self.chunks.len())
            .finish()
    }
}

impl Index {
    /// Assemble an index from aligned chunks and vectors. Rows are stored
    /// unit-length.
    pub fn build(spec: &IndexSpec, chunks: Vec<Chunk>, vectors: VectorMatrix) -> Result<Self> {
        let vectors = vectors.normalized();
        let manifest = Manifest::describe(spec, &vectors);
        Self::assemble(manifest, chunks, vectors, spec.hnsw)
    }

    /// Pair stored rows with their chunks. `vectors` must already be
    /// unit-length; the manifest is taken as written.
    pub(crate) fn assemble(
        manifest: Manifest,
        chunks: Vec<Chunk>,
        vectors: VectorMatrix,
        hnsw: HnswParams,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(RetrievalError::RowMismatch {
                vectors: vectors.len(),
                metadata: chunks.len(),
            });
        }

        let vectors = Arc::new(vectors);
        let engine: Box<dyn VectorIndex> = match manifest.backend {
            IndexBackend::Exact => Box::new(ExactIndex::from_shared(Arc::clone(&vectors))),
            IndexBackend::Hnsw => Box::new(
                Hnsw::from_rows(hnsw, vectors.rows())
                    .map_err(|e| RetrievalError::config(format!("hnsw build failed: {e}")))?,
            ),
        };

        let mut by_id = HashMap::with_capacity(chunks.len());
        for (row, chunk) in chunks.iter().enumerate() {
            if by_id.insert(chunk.chunk_id.clone(), row).is_some() {
                return Err(RetrievalError::corrupt(
                    "chunks",
                    format!("duplicate chunk id {}", chunk.chunk_id),
                ));
            }
        }

        Ok(Self {
            manifest,
            chunks,
            vectors,
            engine,
            by_id,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn model_id(&self) -> &str {
        &self.manifest.model_id
    }

    pub fn dim(&self) -> usize {
        self.manifest.dim
    }

    pub fn backend(&self) -> IndexBackend {
        self.engine.backend()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn vectors(&self) -> &VectorMatrix {
        &self.vectors
    }

    pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        self.chunks.iter().map(IndexEntry::from)
    }

    /// Ranked results for a query vector, best first.
    pub fn search(&self, query: &[f32], top_n: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.manifest.dim {
            return Err(RetrievalError::DimensionMismatch {
                model_id: self.manifest.model_id.clone(),
                expected: self.manifest.dim,
                got: query.len(),
            });
        }
        if top_n == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .engine
            .search(query, top_n)
            .into_iter()
            .filter_map(|(row, score)| {
                let chunk = self.chunks.get(row)?;
                Some(SearchResult {
                    chunk_id: chunk.chunk_id.clone(),
                    score,
                    doc_id: chunk.doc_id.clone(),
                    section_path: chunk.section_path.clone(),
                    text_snippet: chunk.text.clone(),
                })
            })
            .collect())
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.by_id.get(chunk_id).map(|&row| &self.chunks[row])
    }

    /// Chunks for the known ids, in request order.
    pub fn chunks_by_id<S: AsRef<str>>(&self, ids: &[S]) -> Vec<&Chunk> {
        ids.iter().filter_map(|id| self.chunk(id.as_ref())).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn chunk(doc_id: &str, text: &str) -> Chunk {
        Chunk {
            doc_id: doc_id.to_string(),
            chunk_id: crate::chunker::chunk_id(text),
            text: text.to_string(),
            section_path: vec!["root".to_string()],
            token_count: crate::chunker::count_tokens(text),
            source_path: format!("docs/{doc_id}"),
            ordinal: 0,
            aliases: Vec::new(),
        }
    }

    pub(crate) fn spec(backend: IndexBackend) -> IndexSpec {
        IndexSpec {
            model_id: "test".to_string(),
            backend,
            hnsw: HnswParams::default(),
            window_tokens: 50,
            overlap_percent: 10,
        }
    }

    fn matrix(rows: &[[f32; 2]]) -> VectorMatrix {
        let mut m = VectorMatrix::new(2);
        for row in rows {
            m.push_row(row).unwrap();
        }
        m
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(IndexBackend::parse("exact").unwrap(), IndexBackend::Exact);
        assert_eq!(IndexBackend::parse(" HNSW ").unwrap(), IndexBackend::Hnsw);
        assert!(matches!(
            IndexBackend::parse("faiss"),
            Err(RetrievalError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_matrix_rows() {
        let m = matrix(&[[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(m.len(), 2);
        assert_eq!(m.row(1), Some(&[3.0, 4.0][..]));
        assert_eq!(m.row(2), None);
        assert!(VectorMatrix::from_flat(2, vec![1.0, 2.0, 3.0]).is_err());
        assert!(VectorMatrix::new(2).push_row(&[1.0]).is_err());
    }

    #[test]
    fn test_row_mismatch_is_fatal() {
        let chunks = vec![chunk("a.md", "alpha"), chunk("b.md", "beta")];
        let result = Index::build(&spec(IndexBackend::Exact), chunks, matrix(&[[1.0, 0.0]]));
        assert!(matches!(
            result,
            Err(RetrievalError::RowMismatch { vectors: 1, metadata: 2 })
        ));
    }

    #[test]
    fn test_search_returns_aligned_metadata() {
        for backend in [IndexBackend::Exact, IndexBackend::Hnsw] {
            let chunks = vec![chunk("a.md", "alpha"), chunk("b.md", "beta"), chunk("c.md", "gamma")];
            let vectors = matrix(&[[1.0, 0.0], [0.0, 1.0], [0.6, 0.8]]);
            let index = Index::build(&spec(backend), chunks, vectors).unwrap();

            let results = index.search(&[0.0, 1.0], 2).unwrap();
            assert_eq!(results.len(), 2);
            assert_eq!(results[0].doc_id, "b.md");
            assert_eq!(results[0].text_snippet, "beta");
            assert_eq!(results[1].doc_id, "c.md");
            assert!(results[0].score >= results[1].score);
            assert_eq!(index.backend(), backend);
        }
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = Index::build(
            &spec(IndexBackend::Exact),
            vec![chunk("a.md", "alpha")],
            matrix(&[[1.0, 0.0]]),
        )
        .unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 5),
            Err(RetrievalError::DimensionMismatch { expected: 2, got: 3, .. })
        ));
    }

    #[test]
    fn test_chunks_by_id_keeps_request_order() {
        let a = chunk("a.md", "alpha");
        let b = chunk("b.md", "beta");
        let ids = vec![b.chunk_id.clone(), "missing".to_string(), a.chunk_id.clone()];
        let index = Index::build(
            &spec(IndexBackend::Exact),
            vec![a, b],
            matrix(&[[1.0, 0.0], [0.0, 1.0]]),
        )
        .unwrap();

        let found: Vec<&str> = index.chunks_by_id(&ids).iter().map(|c| c.doc_id.as_str()).collect();
        assert_eq!(found, vec!["b.md", "a.md"]);
    }

    #[test]
    fn test_empty_index_searches_to_nothing() {
        let index = Index::build(&spec(IndexBackend::Hnsw), Vec::new(), VectorMatrix::new(2)).unwrap();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 10).unwrap().is_empty());
    }
}
