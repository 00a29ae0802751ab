use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Engine configuration, supplied by the host and passed by reference
/// into each component. No environment variables are read.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Path of the persisted index document (`embeddings.json`).
    pub index_path: PathBuf,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// File extensions treated as markdown notes.
    #[serde(default = "default_note_extensions")]
    pub note_extensions: Vec<String>,
    /// File extensions treated as images eligible for text extraction.
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

/// Builds the conventional index path
/// `<host_config_dir>/<plugin_id>/vector-index/embeddings.json`.
pub fn index_path_in(host_config_dir: &Path, plugin_id: &str) -> PathBuf {
    host_config_dir
        .join(plugin_id)
        .join("vector-index")
        .join("embeddings.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Embedding endpoint URL (OpenAI-compatible `/embeddings` route).
    #[serde(default = "default_embed_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    /// Bearer token, when the endpoint requires one.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Soft deadline for single-text requests, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Deadline for batched requests, seconds.
    #[serde(default = "default_long_timeout_secs")]
    pub long_timeout_secs: u64,
    /// Connectivity probes attempted before a batch gives up.
    #[serde(default = "default_ensure_attempts")]
    pub ensure_attempts: u32,
    /// Spacing between connectivity probes, ms.
    #[serde(default = "default_ensure_spacing_ms")]
    pub ensure_spacing_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embed_endpoint(),
            model: default_embed_model(),
            api_key: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            long_timeout_secs: default_long_timeout_secs(),
            ensure_attempts: default_ensure_attempts(),
            ensure_spacing_ms: default_ensure_spacing_ms(),
        }
    }
}

fn default_embed_endpoint() -> String {
    "http://localhost:11434/v1/embeddings".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_long_timeout_secs() -> u64 {
    60
}
fn default_ensure_attempts() -> u32 {
    10
}
fn default_ensure_spacing_ms() -> u64 {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    /// Chat-completions endpoint of a vision-capable model.
    #[serde(default = "default_vision_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Master switch for the image-processing phase.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_vision_endpoint(),
            model: default_vision_model(),
            api_key: None,
            enabled: true,
        }
    }
}

fn default_vision_endpoint() -> String {
    "http://localhost:11434/v1/chat/completions".to_string()
}
fn default_vision_model() -> String {
    "llava".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ChunkingConfig {
    /// Preferred chunk size in words; chunks close when a natural break
    /// arrives past this point.
    #[serde(default = "default_target_words")]
    pub target_words: usize,
    /// Hard upper bound in words.
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    /// Chunks below this word count are dropped.
    #[serde(default = "default_min_words")]
    pub min_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_words: default_target_words(),
            max_words: default_max_words(),
            min_words: default_min_words(),
        }
    }
}

fn default_target_words() -> usize {
    200
}
fn default_max_words() -> usize {
    250
}
fn default_min_words() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SchedulerConfig {
    /// Debounce window for modify events, ms.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Delay before reindexing a source that just stopped being the
    /// active document, ms.
    #[serde(default = "default_active_release_delay_ms")]
    pub active_release_delay_ms: u64,
    /// Interval of the sweep that drains stale active-editing entries,
    /// seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Re-queue delay when a reindex request arrives while another is
    /// running, ms.
    #[serde(default = "default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,
    /// Checkpoint-save the index every N processed sources.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    /// Yield to the host loop every N processed sources.
    #[serde(default = "default_yield_every")]
    pub yield_every: usize,
    /// Run boot-time batches on a background task.
    #[serde(default = "default_true")]
    pub background: bool,
    /// Fresh-install threshold: indexed sources below this fraction of
    /// current markdown sources triggers a full rebuild at boot.
    #[serde(default = "default_fresh_ratio")]
    pub fresh_ratio: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            active_release_delay_ms: default_active_release_delay_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            requeue_delay_ms: default_requeue_delay_ms(),
            checkpoint_every: default_checkpoint_every(),
            yield_every: default_yield_every(),
            background: default_true(),
            fresh_ratio: default_fresh_ratio(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_active_release_delay_ms() -> u64 {
    100
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_requeue_delay_ms() -> u64 {
    250
}
fn default_checkpoint_every() -> usize {
    10
}
fn default_yield_every() -> usize {
    3
}
fn default_fresh_ratio() -> f64 {
    0.1
}

fn default_note_extensions() -> Vec<String> {
    vec!["md".to_string()]
}

fn default_image_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tif", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl EngineConfig {
    /// Config rooted at the given index path, everything else defaulted.
    pub fn with_index_path(index_path: PathBuf) -> Self {
        Self {
            index_path,
            embedding: EmbeddingConfig::default(),
            vision: VisionConfig::default(),
            chunking: ChunkingConfig::default(),
            scheduler: SchedulerConfig::default(),
            note_extensions: default_note_extensions(),
            image_extensions: default_image_extensions(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_words == 0 || self.chunking.target_words == 0 {
            return Err(EngineError::Config(
                "chunking.target_words and chunking.max_words must be > 0".into(),
            ));
        }
        if self.chunking.target_words > self.chunking.max_words {
            return Err(EngineError::Config(
                "chunking.target_words must not exceed chunking.max_words".into(),
            ));
        }
        if self.chunking.min_words > self.chunking.target_words {
            return Err(EngineError::Config(
                "chunking.min_words must not exceed chunking.target_words".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(EngineError::Config("embedding.batch_size must be > 0".into()));
        }
        if self.embedding.endpoint.trim().is_empty() {
            return Err(EngineError::Config("embedding.endpoint must be set".into()));
        }
        if !(0.0..=1.0).contains(&self.scheduler.fresh_ratio) {
            return Err(EngineError::Config(
                "scheduler.fresh_ratio must be in [0.0, 1.0]".into(),
            ));
        }
        if self.scheduler.checkpoint_every == 0 || self.scheduler.yield_every == 0 {
            return Err(EngineError::Config(
                "scheduler.checkpoint_every and scheduler.yield_every must be > 0".into(),
            ));
        }
        if self.note_extensions.is_empty() {
            return Err(EngineError::Config("note_extensions must not be empty".into()));
        }
        Ok(())
    }

    pub fn is_note_extension(&self, extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.note_extensions.iter().any(|e| e == &ext)
    }

    pub fn is_image_extension(&self, extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.image_extensions.iter().any(|e| e == &ext)
    }
}
