//! Shared test fixtures: deterministic stub providers and a wired-up
//! pipeline over a temporary filesystem vault.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use vault_recall::config::EngineConfig;
use vault_recall::embedding::EmbeddingProvider;
use vault_recall::error::{EngineError, Result};
use vault_recall::host::FsVault;
use vault_recall::indexer::Indexer;
use vault_recall::scheduler::Scheduler;
use vault_recall::store::VectorStore;
use vault_recall::vision::{Extraction, VisionTextExtractor};
use vault_recall::watcher::Watcher;

/// Deterministic 3-dimensional unit vector derived from the text.
pub fn stub_vector(text: &str) -> Vec<f32> {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in text.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let a = ((h & 0xffff) + 1) as f32;
    let b = (((h >> 16) & 0xffff) + 1) as f32;
    let c = (((h >> 32) & 0xffff) + 1) as f32;
    let norm = (a * a + b * b + c * c).sqrt();
    vec![a / norm, b / norm, c / norm]
}

/// Embedding stub: no network, deterministic vectors, call counters.
pub struct StubEmbedder {
    pub single_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl StubEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            single_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    pub fn batches(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::EmbeddingTransient("stub offline".into()));
        }
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(stub_vector(text))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::EmbeddingTransient("stub offline".into()));
        }
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| stub_vector(t)).collect())
    }
}

/// Vision stub: fixed capability and canned transcription.
pub struct StubVision {
    pub supported: bool,
    pub transcription: Option<String>,
}

impl StubVision {
    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self {
            supported: false,
            transcription: None,
        })
    }

    pub fn with_text(text: &str) -> Arc<Self> {
        Arc::new(Self {
            supported: true,
            transcription: Some(text.to_string()),
        })
    }
}

#[async_trait]
impl VisionTextExtractor for StubVision {
    async fn supports_vision(&self) -> bool {
        self.supported
    }

    async fn extract(&self, _image: &[u8], _extension: &str) -> Extraction {
        match &self.transcription {
            Some(text) => Extraction {
                ok: true,
                text: text.clone(),
                reason: None,
            },
            None => Extraction {
                ok: false,
                text: String::new(),
                reason: Some("stub found nothing".to_string()),
            },
        }
    }
}

/// A fully wired pipeline over a temp-dir vault, with the store exposed
/// for assertions.
pub struct TestRig {
    pub dir: TempDir,
    pub config: Arc<EngineConfig>,
    pub host: Arc<FsVault>,
    pub embedder: Arc<StubEmbedder>,
    pub vision: Arc<StubVision>,
    pub store: Arc<Mutex<VectorStore>>,
    pub indexer: Arc<Indexer>,
    pub scheduler: Arc<Scheduler>,
    pub watcher: Watcher,
}

impl TestRig {
    pub async fn new() -> Self {
        Self::with_vision(StubVision::unsupported()).await
    }

    pub async fn with_vision(vision: Arc<StubVision>) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_index_path(dir.path().join("index/embeddings.json"));
        // Tight timings so event tests settle quickly.
        config.scheduler.debounce_ms = 80;
        config.scheduler.active_release_delay_ms = 20;
        config.scheduler.requeue_delay_ms = 25;
        config.scheduler.sweep_interval_secs = 1;
        config.scheduler.background = false;
        config.embedding.ensure_spacing_ms = 10;
        config.validate().unwrap();
        let config = Arc::new(config);

        let vault_root = dir.path().join("vault");
        std::fs::create_dir_all(&vault_root).unwrap();
        let host = Arc::new(FsVault::new(vault_root).unwrap());
        let embedder = StubEmbedder::new();

        let mut store = VectorStore::new(config.index_path.clone());
        store.load();
        let store = Arc::new(Mutex::new(store));

        let indexer = Arc::new(Indexer::new(
            config.clone(),
            host.clone(),
            embedder.clone(),
            vision.clone(),
            store.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.clone(),
            indexer.clone(),
            store.clone(),
            host.clone(),
        ));
        let watcher = Watcher::new(config.clone(), scheduler.clone());

        Self {
            dir,
            config,
            host,
            embedder,
            vision,
            store,
            indexer,
            scheduler,
            watcher,
        }
    }

    pub fn write_note(&self, rel: &str, content: &str) {
        let path = self.host.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn remove_note(&self, rel: &str) {
        std::fs::remove_file(self.host.root().join(rel)).unwrap();
    }

    pub fn rename_note(&self, from: &str, to: &str) {
        std::fs::rename(self.host.root().join(from), self.host.root().join(to)).unwrap();
    }

    pub async fn chunk_count(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Poll until `predicate` holds or the timeout elapses.
    pub async fn wait_until<F, Fut>(&self, timeout_ms: u64, mut predicate: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        loop {
            if predicate().await {
                return true;
            }
            if std::time::Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

/// A paragraph of exactly `words` words, tagged so vectors differ.
pub fn paragraph(words: usize, tag: &str) -> String {
    let mut out: Vec<String> = (0..words.saturating_sub(1))
        .map(|i| format!("{}{}", tag, i))
        .collect();
    out.push(format!("{}end.", tag));
    out.join(" ")
}

pub fn crc32_of(path: &Path) -> String {
    let bytes = std::fs::read(path).unwrap();
    vault_recall::indexer::crc32_hex(&bytes)
}
