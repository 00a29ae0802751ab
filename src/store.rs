//! JSON-backed vector store with brute-force cosine search.
//!
//! The store owns the whole [`IndexDocument`] in memory and is the only
//! component that touches the index file. Persistence is a single JSON
//! document written via a sibling temp file and an atomic rename, so a
//! partial write never corrupts the previous good copy. Loading is
//! best-effort: a missing, unreadable, or schema-mismatched file starts
//! an empty index.
//!
//! Search is exact cosine similarity over every record; there is no ANN
//! structure. With paragraph-granular chunks over a personal vault the
//! linear scan is well inside interactive latency.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::models::{ChunkRecord, IndexDocument, StoreStats, SCHEMA_VERSION};

/// Compute cosine similarity between two equal-length vectors.
///
/// Returns 0.0 when either vector has zero norm. Calling this with
/// vectors of different lengths is a programming error; the store only
/// ever compares vectors of the index dimension.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// In-memory chunk index with JSON persistence.
pub struct VectorStore {
    doc: IndexDocument,
    index_path: PathBuf,
}

impl VectorStore {
    /// Create an empty store bound to the given index path. Call
    /// [`load`](Self::load) to pick up a previously saved index.
    pub fn new(index_path: PathBuf) -> Self {
        Self {
            doc: IndexDocument::empty(),
            index_path,
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn dimension(&self) -> usize {
        self.doc.dimension
    }

    pub fn len(&self) -> usize {
        self.doc.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.chunks.is_empty()
    }

    /// All records, in stored order.
    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.doc.chunks
    }

    /// Best-effort load of the index file. Missing, unreadable, or
    /// schema-mismatched files leave the store empty; nothing is raised.
    pub fn load(&mut self) {
        let raw = match fs::read_to_string(&self.index_path) {
            Ok(raw) => raw,
            Err(e) => {
                info!(path = %self.index_path.display(), error = %e, "no index file, starting empty");
                self.doc = IndexDocument::empty();
                return;
            }
        };
        match serde_json::from_str::<IndexDocument>(&raw) {
            Ok(doc) if doc.schema_version == SCHEMA_VERSION => {
                info!(chunks = doc.chunks.len(), dimension = doc.dimension, "index loaded");
                self.doc = doc;
            }
            Ok(doc) => {
                info!(
                    found = doc.schema_version,
                    expected = SCHEMA_VERSION,
                    "index schema version mismatch, starting empty"
                );
                self.doc = IndexDocument::empty();
            }
            Err(e) => {
                warn!(path = %self.index_path.display(), error = %e, "index file unreadable, starting empty");
                self.doc = IndexDocument::empty();
            }
        }
    }

    /// Serialize the whole document and atomically replace the index
    /// file, creating missing parent directories.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::StoreIo(e.to_string()))?;
        }
        let json =
            serde_json::to_string(&self.doc).map_err(|e| EngineError::StoreIo(e.to_string()))?;
        let tmp = self.index_path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| EngineError::StoreIo(e.to_string()))?;
        fs::rename(&tmp, &self.index_path).map_err(|e| EngineError::StoreIo(e.to_string()))?;
        debug!(chunks = self.doc.chunks.len(), path = %self.index_path.display(), "index saved");
        Ok(())
    }

    /// Drop every record. The established dimension survives so that a
    /// rebuild against the same model needs no special casing.
    pub fn clear(&mut self) {
        self.doc.chunks.clear();
        self.touch();
    }

    /// Atomically replace all records of `source_path` with `chunks`.
    ///
    /// The first vector ever inserted fixes the index dimension; any
    /// vector of a different length fails the whole upsert with
    /// [`EngineError::DimensionMismatch`] and leaves the store unchanged.
    pub fn upsert_source(&mut self, source_path: &str, chunks: Vec<ChunkRecord>) -> Result<()> {
        let dimension = match self.doc.dimension {
            0 => match chunks.first() {
                Some(first) => first.vector.len(),
                None => {
                    // Empty replacement set: plain removal.
                    self.remove_source(source_path);
                    return Ok(());
                }
            },
            d => d,
        };
        for chunk in &chunks {
            if chunk.vector.len() != dimension {
                return Err(EngineError::DimensionMismatch {
                    expected: dimension,
                    actual: chunk.vector.len(),
                });
            }
        }
        self.doc.dimension = dimension;
        self.doc.chunks.retain(|c| c.source_path != source_path);
        self.doc.chunks.extend(chunks);
        self.touch();
        Ok(())
    }

    /// Delete all records of `source_path`; returns how many went away.
    pub fn remove_source(&mut self, source_path: &str) -> usize {
        let before = self.doc.chunks.len();
        self.doc.chunks.retain(|c| c.source_path != source_path);
        let removed = before - self.doc.chunks.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Delete every record whose source is not in `keep`; returns the
    /// number of removed records.
    pub fn remove_sources_not_in(&mut self, keep: &HashSet<String>) -> usize {
        let before = self.doc.chunks.len();
        self.doc.chunks.retain(|c| keep.contains(&c.source_path));
        let removed = before - self.doc.chunks.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// True when `source_path` is absent from the index or its stored
    /// checksum differs.
    pub fn source_needs_update(&self, source_path: &str, checksum: &str) -> bool {
        match self.source_checksum(source_path) {
            Some(stored) => stored != checksum,
            None => true,
        }
    }

    pub fn source_checksum(&self, source_path: &str) -> Option<&str> {
        self.doc
            .chunks
            .iter()
            .find(|c| c.source_path == source_path)
            .map(|c| c.source_checksum.as_str())
    }

    /// Stored mtime of a source, ms since epoch.
    pub fn source_last_modified(&self, source_path: &str) -> Option<i64> {
        self.doc
            .chunks
            .iter()
            .find(|c| c.source_path == source_path)
            .map(|c| c.last_modified)
    }

    /// Distinct source paths currently in the index.
    pub fn source_paths(&self) -> HashSet<String> {
        self.doc
            .chunks
            .iter()
            .map(|c| c.source_path.clone())
            .collect()
    }

    /// Cosine-score every record, keep those at or above `threshold`,
    /// sorted by similarity descending, truncated to `limit`.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Vec<(&ChunkRecord, f32)> {
        let mut hits: Vec<(&ChunkRecord, f32)> = self
            .doc
            .chunks
            .iter()
            .map(|c| (c, cosine_similarity(query, &c.vector)))
            .filter(|(_, sim)| *sim >= threshold)
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }

    /// Grouped search: over-fetch with headroom, bucket hits by source,
    /// cap each bucket at `max_per_source`, keep the `max_sources` best
    /// buckets ordered by their best hit.
    pub fn search_grouped(
        &self,
        query: &[f32],
        max_sources: usize,
        max_per_source: usize,
        threshold: f32,
    ) -> Vec<(String, Vec<(&ChunkRecord, f32)>)> {
        let headroom = 2 * max_sources * max_per_source;
        let hits = self.search(query, headroom, threshold);

        // Hits arrive in descending similarity, so buckets appear in
        // best-hit order and the first entry of each bucket is its best.
        let mut buckets: Vec<(String, Vec<(&ChunkRecord, f32)>)> = Vec::new();
        for (record, sim) in hits {
            match buckets
                .iter_mut()
                .find(|(path, _)| path == &record.source_path)
            {
                Some((_, entries)) => {
                    if entries.len() < max_per_source {
                        entries.push((record, sim));
                    }
                }
                None => {
                    buckets.push((record.source_path.clone(), vec![(record, sim)]));
                }
            }
        }
        buckets.truncate(max_sources);
        buckets
    }

    pub fn stats(&self) -> StoreStats {
        let bytes = fs::metadata(&self.index_path).map(|m| m.len()).unwrap_or(0);
        StoreStats {
            chunks: self.doc.chunks.len(),
            sources: self.source_paths().len(),
            last_updated: self.doc.last_updated,
            bytes,
        }
    }

    fn touch(&mut self) {
        self.doc.last_updated = chrono::Utc::now().timestamp_millis();
    }
}
