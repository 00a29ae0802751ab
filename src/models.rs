//! Core data types for the vault index.
//!
//! The only first-class persisted entity is the [`ChunkRecord`]: one
//! embedded paragraph-sized span of a source note or image transcription.
//! Records live inside an [`IndexDocument`], the single JSON document the
//! [`crate::store::VectorStore`] reads and writes. The data lifecycle is:
//!
//! ```text
//! source bytes → checksum → chunk() → embed() → ChunkRecord → IndexDocument
//!                                                     ↓
//!                                                search() → Hit
//! ```

use serde::{Deserialize, Serialize};

/// Current on-disk schema version. Loading an older version discards the
/// file and starts from an empty index.
pub const SCHEMA_VERSION: u32 = 2;

/// Kind of source a chunk was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Markdown,
    Image,
}

/// One embedded chunk of a source.
///
/// | Field | Description |
/// |-------|-------------|
/// | `id` | Stable identifier `"<source_path>#c<paragraph_index>"` |
/// | `vector` | Embedding; length equals the index dimension |
/// | `source_path` | Vault-relative path of the note or image |
/// | `source_name` | Display basename |
/// | `title` | Frontmatter title, else first heading, else basename |
/// | `paragraph_index` | 0-based, contiguous within the source |
/// | `paragraph_text` | The exact text that was embedded |
/// | `source_checksum` | CRC32 hex of the source bytes (markdown) or the extracted text (images) |
/// | `last_modified` | Source mtime in ms |
/// | `source_size` | Source size in bytes |
/// | `source_kind` | `markdown` or `image` |
/// | `extracted_text` | True only for image-derived chunks |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub source_path: String,
    pub source_name: String,
    pub title: String,
    pub paragraph_index: usize,
    pub paragraph_text: String,
    pub source_checksum: String,
    pub last_modified: i64,
    pub source_size: u64,
    pub source_kind: SourceKind,
    #[serde(default)]
    pub extracted_text: bool,
}

/// Builds the stable chunk id for a source path and paragraph index.
pub fn chunk_id(source_path: &str, paragraph_index: usize) -> String {
    format!("{}#c{}", source_path, paragraph_index)
}

/// The persisted index: header metadata plus the flat chunk list.
///
/// `dimension` is 0 until the first record is inserted and immutable
/// afterwards. Chunk order carries no meaning but is preserved across
/// save/load for stability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub schema_version: u32,
    pub dimension: usize,
    pub last_updated: i64,
    pub chunks: Vec<ChunkRecord>,
}

impl IndexDocument {
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            dimension: 0,
            last_updated: 0,
            chunks: Vec::new(),
        }
    }
}

impl Default for IndexDocument {
    fn default() -> Self {
        Self::empty()
    }
}

/// A single search hit returned by the query engine.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    /// Live handle of the source, when it still exists in the corpus.
    pub source: Option<crate::host::SourceHandle>,
    /// Vault-relative path of the source the chunk came from.
    pub path: String,
    /// Display basename of the source.
    pub source_name: String,
    /// Derived title of the source.
    pub title: String,
    /// Position of the chunk within its source.
    pub paragraph_index: usize,
    /// The chunk text that matched.
    pub matched_text: String,
    /// Cosine similarity against the query vector.
    pub similarity: f32,
}

impl Hit {
    pub(crate) fn from_record(record: &ChunkRecord, similarity: f32) -> Self {
        Self {
            source: None,
            path: record.source_path.clone(),
            source_name: record.source_name.clone(),
            title: record.title.clone(),
            paragraph_index: record.paragraph_index,
            matched_text: record.paragraph_text.clone(),
            similarity,
        }
    }
}

/// Index-level statistics for status displays.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreStats {
    /// Total chunk records in the index.
    pub chunks: usize,
    /// Distinct source paths.
    pub sources: usize,
    /// Last index mutation, ms since epoch (0 if never).
    pub last_updated: i64,
    /// On-disk size of the index file in bytes (0 if not yet saved).
    pub bytes: u64,
}

/// Counters reported by a finished batch run and handed to the
/// completion callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateSummary {
    pub sources_indexed: usize,
    pub sources_removed: usize,
    pub sources_skipped: usize,
    pub sources_failed: usize,
    pub chunks_embedded: usize,
}
