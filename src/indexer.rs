//! Per-source indexing pipeline.
//!
//! The indexer reconciles the vector store with the corpus: read →
//! checksum → chunk → embed → upsert, one source at a time. Two batch
//! modes exist: [`Indexer::smart_update`] skips sources whose checksum
//! is unchanged, [`Indexer::full_rebuild`] clears the store first so
//! everything is reprocessed. The scheduler drives single-source
//! reindexes through [`Indexer::reindex_single`].
//!
//! # Batch flow
//!
//! 1. **Scan** — checksum every markdown source (progress unit:
//!    sources), collect the changed set, drop index entries for sources
//!    no longer in the corpus.
//! 2. **Connect** — probe the embedding endpoint, retrying up to 10
//!    times 2 s apart; without a connection the batch aborts.
//! 3. **Embed notes** — chunk and embed each changed note (progress
//!    unit: chunks), upserting per source and checkpoint-saving the
//!    index every few sources.
//! 4. **Embed images** — gated on the vision capability probe; extract
//!    text, checksum the *extracted text* (an image whose transcription
//!    is unchanged counts as unchanged even if its bytes drift), then
//!    chunk/embed/upsert like a note.
//!
//! One source failing is logged and skipped; the embedding endpoint
//! failing aborts the batch. Cancellation is observed at every source
//! boundary and before each embedding call, leaving the store at its
//! last checkpoint.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunker;
use crate::config::EngineConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::host::{CorpusHost, SourceHandle};
use crate::models::{chunk_id, ChunkRecord, SourceKind, UpdateSummary};
use crate::progress::ProgressSink;
use crate::store::VectorStore;
use crate::vision::VisionTextExtractor;

/// Hex-encoded CRC32 of a byte string; the checksum the index keys
/// change detection on.
pub fn crc32_hex(bytes: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(bytes))
}

/// Outcome of a single-source reindex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleOutcome {
    /// Source was re-chunked and re-embedded; holds the chunk count.
    Indexed(usize),
    /// Source checksum matched the stored one; nothing to do.
    Unchanged,
    /// Source no longer exists; its chunks were dropped.
    Removed,
}

/// A source that passed change detection and is ready to embed.
struct PendingSource {
    handle: SourceHandle,
    title: String,
    checksum: String,
    kind: SourceKind,
    extracted_text: bool,
    texts: Vec<String>,
}

pub struct Indexer {
    config: Arc<EngineConfig>,
    host: Arc<dyn CorpusHost>,
    embedder: Arc<dyn EmbeddingProvider>,
    vision: Arc<dyn VisionTextExtractor>,
    store: Arc<Mutex<VectorStore>>,
}

impl Indexer {
    pub fn new(
        config: Arc<EngineConfig>,
        host: Arc<dyn CorpusHost>,
        embedder: Arc<dyn EmbeddingProvider>,
        vision: Arc<dyn VisionTextExtractor>,
        store: Arc<Mutex<VectorStore>>,
    ) -> Self {
        Self {
            config,
            host,
            embedder,
            vision,
            store,
        }
    }

    /// Reconcile the index with the corpus, reprocessing only sources
    /// whose checksum changed.
    pub async fn smart_update(
        &self,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<UpdateSummary> {
        let result = self.run_batch(progress, cancel).await;
        progress.completed();
        result
    }

    /// Clear the store, then reprocess every source.
    pub async fn full_rebuild(
        &self,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<UpdateSummary> {
        self.store.lock().await.clear();
        let result = self.run_batch(progress, cancel).await;
        progress.completed();
        result
    }

    /// Probe the embedding endpoint until it answers, bounded by the
    /// configured attempt count and spacing.
    pub async fn ensure_connection(&self) -> Result<usize> {
        let attempts = self.config.embedding.ensure_attempts.max(1);
        let spacing = Duration::from_millis(self.config.embedding.ensure_spacing_ms);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let probe = self.embedder.probe().await;
            if probe.ok {
                let dimension = probe.dimension.unwrap_or(0);
                debug!(attempt, dimension, "embedding endpoint reachable");
                return Ok(dimension);
            }
            last_error = probe.error.unwrap_or_else(|| "unknown error".to_string());
            debug!(attempt, error = %last_error, "embedding endpoint not ready");
            if attempt < attempts {
                tokio::time::sleep(spacing).await;
            }
        }
        Err(EngineError::EmbeddingTransient(format!(
            "embedding service unreachable after {} attempts: {}",
            attempts, last_error
        )))
    }

    async fn run_batch(
        &self,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<UpdateSummary> {
        let mut summary = UpdateSummary::default();
        let sources = self.host.list_sources().await?;
        let notes: Vec<&SourceHandle> = sources
            .iter()
            .filter(|s| self.config.is_note_extension(&s.extension))
            .collect();
        let images: Vec<&SourceHandle> = sources
            .iter()
            .filter(|s| self.config.is_image_extension(&s.extension))
            .collect();

        // Scan phase: checksum every note, collect changed ones.
        let mut pending: Vec<PendingSource> = Vec::new();
        let mut total_chunks = 0usize;
        for (i, handle) in notes.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            progress.report(i + 1, notes.len(), &format!("Scanning {}", handle.name));
            match self.prepare_note(handle).await {
                Ok(Some(p)) => {
                    total_chunks += p.texts.len();
                    pending.push(p);
                }
                Ok(None) => summary.sources_skipped += 1,
                Err(e) => {
                    warn!(path = %handle.path, error = %e, "skipping unreadable source");
                    summary.sources_failed += 1;
                }
            }
            if (i + 1) % self.config.scheduler.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }

        // Drop sources that left the corpus.
        let current: HashSet<String> = sources.iter().map(|s| s.path.clone()).collect();
        {
            let mut store = self.store.lock().await;
            let stale = store
                .source_paths()
                .into_iter()
                .filter(|p| !current.contains(p))
                .count();
            let removed_chunks = store.remove_sources_not_in(&current);
            if removed_chunks > 0 {
                summary.sources_removed = stale;
                info!(sources = stale, chunks = removed_chunks, "dropped deleted sources");
            }
        }

        let has_image_work = !images.is_empty();
        if pending.is_empty() && !has_image_work {
            self.store.lock().await.save()?;
            return Ok(summary);
        }

        self.ensure_connection().await?;

        // Embed phase: progress counts chunks, not sources.
        let mut done_chunks = 0usize;
        for (i, source) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            progress.report(
                done_chunks,
                total_chunks,
                &format!("Embedding {}", source.handle.name),
            );
            match self.embed_and_upsert(source).await {
                Ok(count) => {
                    done_chunks += count;
                    summary.sources_indexed += 1;
                    summary.chunks_embedded += count;
                }
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) => {
                    warn!(path = %source.handle.path, error = %e, "source failed, continuing");
                    summary.sources_failed += 1;
                }
            }
            if (i + 1) % self.config.scheduler.checkpoint_every == 0 {
                self.checkpoint().await;
            }
            if (i + 1) % self.config.scheduler.yield_every == 0 {
                tokio::task::yield_now().await;
            }
            progress.report(done_chunks, total_chunks, "Embedding notes");
        }

        // Image phase, gated on the capability probe.
        if has_image_work && self.vision.supports_vision().await {
            self.run_image_phase(&images, progress, cancel, &mut summary, &mut done_chunks)
                .await?;
        } else if has_image_work {
            debug!("vision model unavailable, skipping image sources");
        }

        self.store.lock().await.save()?;
        info!(
            indexed = summary.sources_indexed,
            skipped = summary.sources_skipped,
            failed = summary.sources_failed,
            chunks = summary.chunks_embedded,
            "batch finished"
        );
        Ok(summary)
    }

    async fn run_image_phase(
        &self,
        images: &[&SourceHandle],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
        summary: &mut UpdateSummary,
        done_chunks: &mut usize,
    ) -> Result<()> {
        for (i, handle) in images.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            progress.report(
                i + 1,
                images.len(),
                &format!("Extracting {}", handle.name),
            );
            match self.prepare_image(handle).await {
                Ok(Some(source)) => match self.embed_and_upsert(&source).await {
                    Ok(count) => {
                        *done_chunks += count;
                        summary.sources_indexed += 1;
                        summary.chunks_embedded += count;
                    }
                    Err(e) if e.is_batch_fatal() => return Err(e),
                    Err(e) => {
                        warn!(path = %handle.path, error = %e, "image failed, continuing");
                        summary.sources_failed += 1;
                    }
                },
                Ok(None) => summary.sources_skipped += 1,
                Err(e) => {
                    warn!(path = %handle.path, error = %e, "image skipped");
                    summary.sources_failed += 1;
                }
            }
            if (i + 1) % self.config.scheduler.checkpoint_every == 0 {
                self.checkpoint().await;
            }
            if (i + 1) % self.config.scheduler.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    /// Reindex one source outside a batch. With `skip_if_unchanged` the
    /// source is re-read and its fresh checksum compared against the
    /// stored one first, so spurious modify events cost no embedding
    /// round-trips.
    pub async fn reindex_single(
        &self,
        path: &str,
        skip_if_unchanged: bool,
    ) -> Result<SingleOutcome> {
        let Some(handle) = self.host.source(path).await? else {
            let mut store = self.store.lock().await;
            store.remove_source(path);
            store.save()?;
            return Ok(SingleOutcome::Removed);
        };

        let pending = if self.config.is_image_extension(&handle.extension) {
            self.prepare_image(&handle).await?
        } else if skip_if_unchanged {
            self.prepare_note(&handle).await?
        } else {
            self.prepare_note_forced(&handle).await?
        };

        let Some(pending) = pending else {
            return Ok(SingleOutcome::Unchanged);
        };

        self.ensure_connection().await?;
        let count = self.embed_and_upsert(&pending).await?;
        self.store.lock().await.save()?;
        info!(path = %path, chunks = count, "source reindexed");
        Ok(SingleOutcome::Indexed(count))
    }

    /// Read and chunk a note; `None` when its checksum matches the index.
    async fn prepare_note(&self, handle: &SourceHandle) -> Result<Option<PendingSource>> {
        let bytes = self.host.read_bytes(&handle.path).await?;
        let checksum = crc32_hex(&bytes);
        if !self
            .store
            .lock()
            .await
            .source_needs_update(&handle.path, &checksum)
        {
            return Ok(None);
        }
        Ok(Some(self.chunk_note(handle, &bytes, checksum)?))
    }

    async fn prepare_note_forced(&self, handle: &SourceHandle) -> Result<Option<PendingSource>> {
        let bytes = self.host.read_bytes(&handle.path).await?;
        let checksum = crc32_hex(&bytes);
        Ok(Some(self.chunk_note(handle, &bytes, checksum)?))
    }

    fn chunk_note(
        &self,
        handle: &SourceHandle,
        bytes: &[u8],
        checksum: String,
    ) -> Result<PendingSource> {
        let body = String::from_utf8(bytes.to_vec()).map_err(|e| EngineError::SourceRead {
            path: handle.path.clone(),
            reason: format!("not valid UTF-8: {}", e),
        })?;
        let title = derive_title(&body, &handle.name);
        let texts = chunker::chunk_text(&body, &self.config.chunking);
        Ok(PendingSource {
            handle: handle.clone(),
            title,
            checksum,
            kind: SourceKind::Markdown,
            extracted_text: false,
            texts,
        })
    }

    /// Extract an image's text and chunk it; `None` when the stored
    /// transcription checksum still matches or the extraction found
    /// nothing.
    async fn prepare_image(&self, handle: &SourceHandle) -> Result<Option<PendingSource>> {
        // Cheap gate first: an untouched file cannot have a new
        // transcription, so skip the vision round-trip entirely.
        if self.store.lock().await.source_last_modified(&handle.path) == Some(handle.mtime_ms) {
            return Ok(None);
        }

        let bytes = self.host.read_bytes(&handle.path).await?;
        let extraction = self.vision.extract(&bytes, &handle.extension).await;
        if !extraction.ok {
            debug!(
                path = %handle.path,
                reason = extraction.reason.as_deref().unwrap_or("unknown"),
                "image yielded no text"
            );
            return Ok(None);
        }

        let checksum = crc32_hex(extraction.text.as_bytes());
        if !self
            .store
            .lock()
            .await
            .source_needs_update(&handle.path, &checksum)
        {
            return Ok(None);
        }
        let texts = chunker::chunk_text(&extraction.text, &self.config.chunking);
        Ok(Some(PendingSource {
            handle: handle.clone(),
            title: format!("Image: {}", handle.name),
            checksum,
            kind: SourceKind::Image,
            extracted_text: true,
            texts,
        }))
    }

    async fn embed_and_upsert(&self, source: &PendingSource) -> Result<usize> {
        if source.texts.is_empty() {
            // Nothing embeddable survived chunking; drop stale records.
            let mut store = self.store.lock().await;
            store.remove_source(&source.handle.path);
            return Ok(0);
        }
        let vectors = self.embedder.embed_many(&source.texts).await?;
        if vectors.len() != source.texts.len() {
            return Err(EngineError::EmbeddingProtocol(format!(
                "expected {} vectors, got {}",
                source.texts.len(),
                vectors.len()
            )));
        }
        let records = build_records(source, vectors);
        let count = records.len();
        self.store
            .lock()
            .await
            .upsert_source(&source.handle.path, records)?;
        Ok(count)
    }

    /// Best-effort checkpoint; a failed write keeps the in-memory state
    /// and will be retried at the next checkpoint or final save.
    async fn checkpoint(&self) {
        if let Err(e) = self.store.lock().await.save() {
            warn!(error = %e, "checkpoint save failed, keeping in-memory state");
        }
        tokio::task::yield_now().await;
    }
}

fn build_records(source: &PendingSource, vectors: Vec<Vec<f32>>) -> Vec<ChunkRecord> {
    source
        .texts
        .iter()
        .zip(vectors)
        .enumerate()
        .map(|(index, (text, vector))| ChunkRecord {
            id: chunk_id(&source.handle.path, index),
            vector,
            source_path: source.handle.path.clone(),
            source_name: source.handle.name.clone(),
            title: source.title.clone(),
            paragraph_index: index,
            paragraph_text: text.clone(),
            source_checksum: source.checksum.clone(),
            last_modified: source.handle.mtime_ms,
            source_size: source.handle.size,
            source_kind: source.kind,
            extracted_text: source.extracted_text,
        })
        .collect()
}

/// Title precedence: frontmatter `title:` field, first markdown heading,
/// basename without extension.
fn derive_title(body: &str, basename: &str) -> String {
    if let Some(block) = chunker::frontmatter_block(body) {
        for line in block.lines() {
            if let Some(value) = line.strip_prefix("title:") {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if !value.is_empty() {
                    return value.to_string();
                }
            }
        }
    }
    for line in chunker::strip_frontmatter(body).lines() {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
            let rest = trimmed[hashes..].trim();
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    basename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(basename)
        .to_string()
}
