//! On-disk generations of the index.
//!
//! ```text
//! <dir>/
//!   CURRENT                      id of the published generation
//!   generations/<id>/
//!     chunks.jsonl               full chunk records
//!     embeddings.npy             [rows, dim] float32
//!     metadata.jsonl             row-aligned chunk_id, doc_id, section_path, text
//!     manifest.json
//! ```
//!
//! A generation is written under `generations/.staging-<uuid>`, fsynced and
//! renamed into place; only then is `CURRENT` replaced (temp file + rename).
//! Readers therefore see either the old generation or the new one, never a
//! mix.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::npy::{read_npy, write_npy};
use super::{HnswParams, Index, IndexEntry, Manifest};
use crate::chunker::Chunk;
use crate::error::{Result, RetrievalError};

pub const CURRENT_FILE: &str = "CURRENT";
pub const GENERATIONS_DIR: &str = "generations";
pub const CHUNKS_FILE: &str = "chunks.jsonl";
pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
pub const METADATA_FILE: &str = "metadata.jsonl";
pub const MANIFEST_FILE: &str = "manifest.json";

const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generation_dir(&self, id: &str) -> PathBuf {
        self.dir.join(GENERATIONS_DIR).join(id)
    }

    /// Write `index` as a new generation, point `CURRENT` at it and drop
    /// generations beyond the newest `keep`. Returns the generation id.
    pub fn publish(&self, index: &Index, keep: usize) -> Result<String> {
        let root = self.dir.join(GENERATIONS_DIR);
        fs::create_dir_all(&root)?;

        let staging = root.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4().simple()));
        fs::create_dir(&staging)?;
        if let Err(e) = write_generation(&staging, index) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let id = new_generation_id();
        let target = root.join(&id);
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        sync_dir(&root);

        self.set_current(&id)?;
        tracing::info!(
            generation = %id,
            rows = index.len(),
            dim = index.dim(),
            backend = %index.backend(),
            "index generation published"
        );

        self.prune(keep, &id)?;
        Ok(id)
    }

    /// Id of the published generation, if any.
    pub fn current(&self) -> Result<Option<String>> {
        let path = self.dir.join(CURRENT_FILE);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let id = raw.trim();
                if id.is_empty() {
                    return Err(RetrievalError::corrupt(path, "empty generation pointer"));
                }
                Ok(Some(id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Published generation ids, oldest first.
    pub fn generations(&self) -> Result<Vec<String>> {
        let root = self.dir.join(GENERATIONS_DIR);
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() && !name.starts_with('.') {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn load_manifest(&self, id: &str) -> Result<Manifest> {
        let path = self.generation_dir(id).join(MANIFEST_FILE);
        let file = File::open(&path).map_err(|e| {
            RetrievalError::corrupt(&path, format!("cannot open manifest: {e}"))
        })?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| RetrievalError::corrupt(&path, e.to_string()))
    }

    /// Load the published generation; `None` when nothing was published yet.
    pub fn load_current(&self, hnsw: HnswParams) -> Result<Option<Index>> {
        match self.current()? {
            Some(id) => self.load_generation(&id, hnsw).map(Some),
            None => Ok(None),
        }
    }

    /// Load one generation, verifying row alignment and the vectors checksum.
    pub fn load_generation(&self, id: &str, hnsw: HnswParams) -> Result<Index> {
        let dir = self.generation_dir(id);
        let manifest = self.load_manifest(id)?;

        let npy_path = dir.join(EMBEDDINGS_FILE);
        let vectors = read_npy(BufReader::new(File::open(&npy_path)?))
            .map_err(|e| RetrievalError::corrupt(&npy_path, e.to_string()))?;
        manifest
            .verify(&vectors)
            .map_err(|reason| RetrievalError::corrupt(&npy_path, reason))?;

        let chunks: Vec<Chunk> = read_jsonl(&dir.join(CHUNKS_FILE))?;
        let entries: Vec<IndexEntry> = read_jsonl(&dir.join(METADATA_FILE))?;
        for rows in [chunks.len(), entries.len()] {
            if rows != vectors.len() {
                return Err(RetrievalError::RowMismatch {
                    vectors: vectors.len(),
                    metadata: rows,
                });
            }
        }
        if let Some(row) = chunks
            .iter()
            .zip(&entries)
            .position(|(chunk, entry)| chunk.chunk_id != entry.chunk_id)
        {
            return Err(RetrievalError::corrupt(
                dir.join(METADATA_FILE),
                format!("row {row} does not match {CHUNKS_FILE}"),
            ));
        }

        tracing::debug!(generation = %id, rows = chunks.len(), "index generation loaded");
        Index::assemble(manifest, chunks, vectors, hnsw)
    }

    fn set_current(&self, id: &str) -> Result<()> {
        let path = self.dir.join(CURRENT_FILE);
        let tmp = self.dir.join(format!("{CURRENT_FILE}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            writeln!(file, "{id}")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        sync_dir(&self.dir);
        Ok(())
    }

    fn prune(&self, keep: usize, current: &str) -> Result<()> {
        let ids = self.generations()?;
        let excess = ids.len().saturating_sub(keep.max(1));
        for id in ids.iter().take(excess).filter(|id| id.as_str() != current) {
            match fs::remove_dir_all(self.generation_dir(id)) {
                Ok(()) => tracing::debug!(generation = %id, "old generation removed"),
                Err(e) => tracing::warn!(generation = %id, error = %e, "failed to remove old generation"),
            }
        }
        Ok(())
    }
}

fn new_generation_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &suffix[..8])
}

fn write_generation(dir: &Path, index: &Index) -> Result<()> {
    write_jsonl(&dir.join(CHUNKS_FILE), index.chunks())?;
    write_jsonl(&dir.join(METADATA_FILE), index.entries())?;

    let file = File::create(dir.join(EMBEDDINGS_FILE))?;
    let mut writer = BufWriter::new(file);
    write_npy(&mut writer, index.vectors())?;
    writer.get_ref().sync_all()?;

    let file = File::create(dir.join(MANIFEST_FILE))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, index.manifest())?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn write_jsonl<T, I>(path: &Path, rows: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, &row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line)
            .map_err(|e| RetrievalError::corrupt(path, format!("line {}: {e}", line_no + 1)))?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
