// retrieval-core/src/embeddings/cache.rs
//
// Content-addressed embedding cache keyed by (model_id, content_hash)

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::VectorEncoder;
use crate::chunker::tokenize::content_hash;
use crate::error::{Result, RetrievalError};

const SHARDS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub model_id: String,
    pub content_hash: String,
}

impl CacheKey {
    pub fn new(model_id: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            content_hash: content_hash.into(),
        }
    }

    pub fn for_text(model_id: &str, text: &str) -> Self {
        Self::new(model_id, content_hash(text))
    }
}

/// Counters reported per build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// One cache line: empty until the first successful encode
type Slot = Arc<Mutex<Option<Arc<[f32]>>>>;

/// On-disk record (one JSON object per line)
#[derive(Serialize, Deserialize)]
struct CacheRecord {
    model_id: String,
    content_hash: String,
    dim: usize,
    vector: String,
}

/// Thread-safe embedding cache.
///
/// The key map is split into shards behind short-lived locks; each key owns
/// its own slot lock, held across the encoder call, so concurrent misses on
/// one key run the encoder once and the others observe the stored vector.
pub struct EmbeddingCache {
    shards: Vec<Mutex<HashMap<CacheKey, Slot>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<HashMap<CacheKey, Slot>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mut shard = self.shard(key).lock();
        Arc::clone(shard.entry(key.clone()).or_default())
    }

    /// Return the vector for `text` under `encoder`'s model, encoding on miss.
    pub fn embed(&self, text: &str, encoder: &dyn VectorEncoder) -> Result<Arc<[f32]>> {
        let key = CacheKey::for_text(encoder.model_id(), text);
        let expected = encoder.dimensions();
        let slot = self.slot(&key);
        let mut entry = slot.lock();

        if let Some(vector) = entry.as_ref() {
            check_dim(&key, expected, vector.len())?;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(vector));
        }

        let vector = encoder.encode(text).map_err(|source| RetrievalError::Encoding {
            key: key.content_hash[..16].to_string(),
            source,
        })?;
        check_dim(&key, expected, vector.len())?;

        let vector: Arc<[f32]> = vector.into();
        *entry = Some(Arc::clone(&vector));
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(vector)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<[f32]>> {
        let slot = self.shard(key).lock().get(key).cloned()?;
        let entry = slot.lock();
        entry.clone()
    }

    /// Insert a precomputed vector. Existing entries are kept as they are.
    pub fn insert(&self, key: CacheKey, vector: Vec<f32>) {
        let slot = self.slot(&key);
        let mut entry = slot.lock();
        if entry.is_none() {
            *entry = Some(vector.into());
        }
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Remove every entry whose key is not in `live`; returns the count removed.
    pub fn prune(&self, live: &HashSet<CacheKey>) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.lock();
            let before = map.len();
            map.retain(|key, _| live.contains(key));
            removed += before - map.len();
        }
        tracing::debug!(removed, "embedding cache pruned");
        removed
    }

    /// Snapshot of filled entries, sorted by key
    fn entries(&self) -> Vec<(CacheKey, Arc<[f32]>)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let slots: Vec<(CacheKey, Slot)> = shard
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect();
            for (key, slot) in slots {
                if let Some(vector) = slot.lock().clone() {
                    out.push((key, vector));
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Load a cache file written by [`save`](Self::save). A missing file gives
    /// an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        let cache = Self::new();
        if !path.exists() {
            return Ok(cache);
        }

        let reader = BufReader::new(File::open(path)?);
        let mut dims: HashMap<String, usize> = HashMap::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: CacheRecord = serde_json::from_str(&line)?;
            let bytes = BASE64
                .decode(record.vector.as_bytes())
                .map_err(|e| RetrievalError::corrupt(path, format!("line {}: {e}", line_no + 1)))?;
            if bytes.len() != record.dim * 4 {
                return Err(RetrievalError::corrupt(
                    path,
                    format!("line {}: vector length does not match dim", line_no + 1),
                ));
            }
            let expected = *dims.entry(record.model_id.clone()).or_insert(record.dim);
            if expected != record.dim {
                return Err(RetrievalError::DimensionMismatch {
                    model_id: record.model_id,
                    expected,
                    got: record.dim,
                });
            }

            let mut vector = vec![0.0f32; record.dim];
            LittleEndian::read_f32_into(&bytes, &mut vector);
            cache.insert(CacheKey::new(record.model_id, record.content_hash), vector);
        }

        tracing::info!(path = %path.display(), entries = cache.len(), "embedding cache loaded");
        Ok(cache)
    }

    /// Write all entries as JSON lines, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        let entries = self.entries();
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            for (key, vector) in &entries {
                let mut bytes = vec![0u8; vector.len() * 4];
                LittleEndian::write_f32_into(vector, &mut bytes);
                let record = CacheRecord {
                    model_id: key.model_id.clone(),
                    content_hash: key.content_hash.clone(),
                    dim: vector.len(),
                    vector: BASE64.encode(&bytes),
                };
                serde_json::to_writer(&mut writer, &record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "embedding cache saved");
        Ok(())
    }
}

fn check_dim(key: &CacheKey, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(RetrievalError::DimensionMismatch {
            model_id: key.model_id.clone(),
            expected,
            got,
        });
    }
    Ok(())
}
