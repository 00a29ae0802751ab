//! Engine facade: construction, wiring, and the public query API.
//!
//! [`VaultEngine`] owns the store, indexer, scheduler, watcher, and
//! query engine, and is the single type a host application talks to:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use vault_recall::config::EngineConfig;
//! # use vault_recall::embedding::HttpEmbeddingClient;
//! # use vault_recall::engine::VaultEngine;
//! # use vault_recall::host::FsVault;
//! # use vault_recall::vision::HttpVisionClient;
//! # async fn example() -> vault_recall::error::Result<()> {
//! let config = EngineConfig::with_index_path("/data/embeddings.json".into());
//! let host = Arc::new(FsVault::new("/vault".into())?);
//! let embedder = Arc::new(HttpEmbeddingClient::new(config.embedding.clone()));
//! let vision = Arc::new(HttpVisionClient::new(config.vision.clone()));
//! let engine = VaultEngine::new(config, host, embedder, vision)?;
//! engine.start().await?;
//! let hits = engine.search("deployment checklist", 5, 0.3).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::host::{CorpusEvent, CorpusHost};
use crate::indexer::Indexer;
use crate::models::{Hit, StoreStats, UpdateSummary};
use crate::progress::ProgressSink;
use crate::query::QueryEngine;
use crate::scheduler::{BatchMode, CompletionCallback, Scheduler};
use crate::store::VectorStore;
use crate::vision::VisionTextExtractor;
use crate::watcher::Watcher;

pub struct VaultEngine {
    store: Arc<Mutex<VectorStore>>,
    scheduler: Arc<Scheduler>,
    watcher: Watcher,
    query: QueryEngine,
}

impl VaultEngine {
    /// Wire up an engine. Loads any previously saved index immediately;
    /// call [`start`](Self::start) to reconcile it with the corpus.
    pub fn new(
        config: EngineConfig,
        host: Arc<dyn CorpusHost>,
        embedder: Arc<dyn EmbeddingProvider>,
        vision: Arc<dyn VisionTextExtractor>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let mut store = VectorStore::new(config.index_path.clone());
        store.load();
        let store = Arc::new(Mutex::new(store));

        let indexer = Arc::new(Indexer::new(
            config.clone(),
            host.clone(),
            embedder.clone(),
            vision,
            store.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.clone(),
            indexer,
            store.clone(),
            host.clone(),
        ));
        let watcher = Watcher::new(config.clone(), scheduler.clone());
        let query = QueryEngine::new(store.clone(), embedder, host);

        Ok(Self {
            store,
            scheduler,
            watcher,
            query,
        })
    }

    /// Boot-time reconcile: full rebuild on a fresh install, smart
    /// update otherwise; backgrounded per configuration. Also starts the
    /// periodic active-editing sweep.
    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await
    }

    /// Register the observer fired when a batch run completes (UI status
    /// refresh, notifications).
    pub fn set_on_index_complete(&self, callback: CompletionCallback) {
        self.scheduler.set_on_complete(callback);
    }

    /// Feed one host event (modify/rename/delete/active-change) into the
    /// pipeline.
    pub async fn handle_event(&self, event: CorpusEvent) {
        self.watcher.handle_event(event).await;
    }

    pub async fn search(&self, query: &str, limit: usize, threshold: f32) -> Result<Vec<Hit>> {
        self.query.search(query, limit, threshold).await
    }

    pub async fn search_grouped(
        &self,
        query: &str,
        max_sources: usize,
        max_per_source: usize,
        threshold: f32,
    ) -> Result<Vec<(String, Vec<Hit>)>> {
        self.query
            .search_grouped(query, max_sources, max_per_source, threshold)
            .await
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.lock().await.stats()
    }

    /// Clear and reprocess the whole corpus in the caller's task.
    pub async fn rebuild(&self, progress: &dyn ProgressSink) -> Result<UpdateSummary> {
        self.scheduler
            .run_batch(BatchMode::FullRebuild, progress)
            .await
    }

    /// Reprocess only changed sources in the caller's task.
    pub async fn update(&self, progress: &dyn ProgressSink) -> Result<UpdateSummary> {
        self.scheduler
            .run_batch(BatchMode::SmartUpdate, progress)
            .await
    }

    /// Trip the running batch's abort token.
    pub fn cancel(&self) {
        self.scheduler.cancel_indexing();
    }

    pub fn is_indexing(&self) -> bool {
        self.scheduler.is_indexing()
    }

    /// Stop timers and background tasks.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

/// Format a byte count for status displays.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
