//! HNSW (Hierarchical Navigable Small World) Index
//!
//! Approximate nearest neighbor backend for cosine similarity. Vectors are
//! stored unit-length so similarity is a plain dot product.
//!
//! # Algorithm Overview
//! HNSW builds a multi-layer graph where:
//! - Higher layers have fewer nodes (exponential decay)
//! - Search starts from top layer, greedily descending
//! - Each layer is a navigable small-world graph
//!
//! Node ids are insertion positions, so they double as index row ids. Level
//! selection uses a fixed-seed LCG: the same vectors inserted in the same
//! order always produce the same graph, which lets a persisted index rebuild
//! its graph from the vector store alone.
//!
//! # Performance Characteristics
//! - Insert: O(log N) average
//! - Search: O(log N) average, widened by `ef_search`
//! - Memory: O(N * M) where M = max neighbors per node

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use thiserror::Error;

use super::node::HnswNode;
use super::pqueue::ScoredItem;
use crate::config::IndexConfig;
use crate::index::distance::{dot, normalized};
use crate::index::{IndexBackend, VectorIndex};

const LEVEL_CAP: u8 = 16;
const SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HnswError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("empty vector")]
    EmptyVector,
}

/// Graph construction and search parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    /// Max neighbors per node per layer (level 0 allows twice this)
    pub m: usize,
    /// Beam width while inserting
    pub ef_construction: usize,
    /// Beam width while searching; larger is slower and more exact
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

impl From<&IndexConfig> for HnswParams {
    fn from(config: &IndexConfig) -> Self {
        Self {
            m: config.hnsw_m.max(2),
            ef_construction: config.hnsw_ef_construction.max(1),
            ef_search: config.hnsw_ef_search.max(1),
        }
    }
}

/// HNSW Index
///
/// # Example
/// ```ignore
/// let mut hnsw = Hnsw::new(HnswParams::default());
/// let id = hnsw.add_point(&[0.1, 0.2, 0.3])?;
/// let results = hnsw.search_knn(&[0.1, 0.2, 0.3], 10);
/// ```
pub struct Hnsw {
    // Configuration
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    level_mult: f32,

    // State
    nodes: Vec<HnswNode>,
    entry_point: Option<u32>,
    level_max: u8,
    dimension: Option<usize>,
    rng_state: u64,
}

impl Default for Hnsw {
    fn default() -> Self {
        Self::new(HnswParams::default())
    }
}

impl Hnsw {
    pub fn new(params: HnswParams) -> Self {
        let m = params.m.max(2);
        Hnsw {
            m,
            m_max0: m * 2,
            ef_construction: params.ef_construction.max(1),
            ef_search: params.ef_search.max(1),
            level_mult: 1.0 / (m as f32).ln(),
            nodes: Vec::new(),
            entry_point: None,
            level_max: 0,
            dimension: None,
            rng_state: SEED,
        }
    }

    /// Build from rows in order; row `i` becomes node `i`.
    pub fn from_rows<'a>(
        params: HnswParams,
        rows: impl IntoIterator<Item = &'a [f32]>,
    ) -> Result<Self, HnswError> {
        let mut hnsw = Self::new(params);
        for row in rows {
            hnsw.add_point(row)?;
        }
        Ok(hnsw)
    }

    pub fn ef_search(&self) -> usize {
        self.ef_search
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Insert a vector; its id is the number of points inserted before it.
    pub fn add_point(&mut self, vector: &[f32]) -> Result<u32, HnswError> {
        if vector.is_empty() {
            return Err(HnswError::EmptyVector);
        }
        match self.dimension {
            Some(dim) if vector.len() != dim => {
                return Err(HnswError::DimensionMismatch {
                    expected: dim,
                    got: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }

        let id = self.nodes.len() as u32;
        let level = self.select_level();
        let unit = normalized(vector);
        self.nodes.push(HnswNode::new(id, level, unit.clone()));

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(id);
            self.level_max = level;
            return Ok(id);
        };

        // Phase 1: greedy descent through layers above the node's level
        let mut current = self.level_max;
        while current > level {
            ep = self.greedy_closest(ep, &unit, current);
            current -= 1;
        }

        // Phase 2: link on every layer the node and the graph share
        for lc in (0..=level.min(self.level_max)).rev() {
            let candidates = self.search_layer(ep, &unit, self.ef_construction, lc);
            let limit = if lc == 0 { self.m_max0 } else { self.m };

            let selected: Vec<u32> = candidates
                .iter()
                .map(|&(nid, _)| nid)
                .filter(|&nid| nid != id)
                .take(limit)
                .collect();

            for &neighbor in &selected {
                self.nodes[neighbor as usize].link(lc, id);
                self.nodes[id as usize].link(lc, neighbor);
            }
            for &neighbor in &selected {
                self.prune_neighbors(neighbor, lc, limit);
            }

            if let Some(&(best, _)) = candidates.first() {
                ep = best;
            }
        }

        if level > self.level_max {
            self.entry_point = Some(id);
            self.level_max = level;
        }

        Ok(id)
    }

    /// k nearest neighbors with the configured `ef_search`
    pub fn search_knn(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        self.search_knn_ef(query, k, self.ef_search)
    }

    /// k nearest neighbors with an explicit beam width (at least `k`)
    pub fn search_knn_ef(&self, query: &[f32], k: usize, ef: usize) -> Vec<(u32, f32)> {
        let Some(mut ep) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 || self.dimension != Some(query.len()) {
            return Vec::new();
        }

        let query = normalized(query);
        let mut current = self.level_max;
        while current > 0 {
            ep = self.greedy_closest(ep, &query, current);
            current -= 1;
        }

        let mut results = self.search_layer(ep, &query, ef.max(k), 0);
        results.truncate(k);
        results
    }

    // ========================================================================
    // Internal Methods
    // ========================================================================

    /// Select a level for a new node using an exponential distribution
    fn select_level(&mut self) -> u8 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        let r = ((self.rng_state >> 33) as f32 / (u32::MAX >> 1) as f32).clamp(1e-7, 1.0);

        let level = (-r.ln() * self.level_mult).floor() as u8;
        level.min(LEVEL_CAP)
    }

    fn similarity(&self, id: u32, query: &[f32]) -> f32 {
        dot(&self.nodes[id as usize].vector, query)
    }

    /// Greedy walk on one layer towards the single closest node
    fn greedy_closest(&self, entry: u32, query: &[f32], level: u8) -> u32 {
        let mut current = entry;
        let mut best = self.similarity(current, query);

        loop {
            let mut changed = false;
            for &nid in self.nodes[current as usize].neighbors_at(level) {
                let sim = self.similarity(nid, query);
                if sim > best || (sim == best && nid < current) {
                    current = nid;
                    best = sim;
                    changed = true;
                }
            }
            if !changed {
                return current;
            }
        }
    }

    /// Beam search on one layer; returns up to `ef` hits, best first
    fn search_layer(&self, entry: u32, query: &[f32], ef: usize, level: u8) -> Vec<(u32, f32)> {
        let mut visited: HashSet<u32> = HashSet::new();

        // Candidates: max-heap by similarity (explore the most similar first)
        let mut candidates: BinaryHeap<ScoredItem<u32>> = BinaryHeap::new();

        // Results: min-heap by similarity (keep the top `ef`)
        let mut results: BinaryHeap<Reverse<ScoredItem<u32>>> = BinaryHeap::new();

        let entry_sim = self.similarity(entry, query);
        visited.insert(entry);
        candidates.push(ScoredItem { score: entry_sim, item: entry });
        results.push(Reverse(ScoredItem { score: entry_sim, item: entry }));

        while let Some(ScoredItem { score: c_sim, item: c_id }) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
            if c_sim < worst && results.len() >= ef {
                break;
            }

            for &nid in self.nodes[c_id as usize].neighbors_at(level) {
                if !visited.insert(nid) {
                    continue;
                }

                let n_sim = self.similarity(nid, query);
                let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
                if n_sim > worst || results.len() < ef {
                    candidates.push(ScoredItem { score: n_sim, item: nid });
                    results.push(Reverse(ScoredItem { score: n_sim, item: nid }));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut hits: Vec<(u32, f32)> = results
            .into_iter()
            .map(|r| (r.0.item, r.0.score))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits
    }

    /// Keep only the `max_neighbors` most similar links of a node
    fn prune_neighbors(&mut self, node_id: u32, level: u8, max_neighbors: usize) {
        let node = &self.nodes[node_id as usize];
        let links = node.neighbors_at(level);
        if links.len() <= max_neighbors {
            return;
        }

        let mut scored: Vec<(u32, f32)> = links
            .iter()
            .map(|&nid| (nid, self.similarity(nid, &node.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(max_neighbors);

        self.nodes[node_id as usize].neighbors[level as usize] =
            scored.into_iter().map(|(nid, _)| nid).collect();
    }
}

impl VectorIndex for Hnsw {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Hnsw
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn search(&self, query: &[f32], top_n: usize) -> Vec<(usize, f32)> {
        self.search_knn(query, top_n)
            .into_iter()
            .map(|(id, score)| (id as usize, score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_distribution() {
        let mut hnsw = Hnsw::default();
        let mut levels = [0u32; LEVEL_CAP as usize + 1];

        for _ in 0..10000 {
            let level = hnsw.select_level();
            levels[level as usize] += 1;
        }

        // Most should be level 0
        assert!(levels[0] > 5000, "Level 0 should be most common");
        assert!(levels[0] > levels[1]);
        assert!(levels[1] > levels[2] || levels[2] == 0);
    }
}
