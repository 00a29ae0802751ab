//! Cooperative background scheduler.
//!
//! Serializes all index mutations: at most one batch (`smart_update` or
//! `full_rebuild`) and at most one single-source reindex run at a time,
//! with single-source work yielding to batches by re-queuing itself.
//! Modify events are debounced per path, and a source the user is
//! actively editing is never reindexed mid-edit — it is parked in the
//! `active_editing` set and picked up when the foreground document
//! changes (or by the periodic sweep).
//!
//! All work runs as tasks on the host's tokio runtime; there are no
//! dedicated threads. Cancellation of the running batch is cooperative
//! via a [`CancellationToken`] observed at source boundaries.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::host::CorpusHost;
use crate::indexer::Indexer;
use crate::models::UpdateSummary;
use crate::progress::{NoProgress, ProgressSink};
use crate::store::VectorStore;

/// Which batch mode a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    SmartUpdate,
    FullRebuild,
}

/// Callback fired when a batch finishes.
pub type CompletionCallback = Arc<dyn Fn(UpdateSummary) + Send + Sync>;

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: Arc<EngineConfig>,
    indexer: Arc<Indexer>,
    store: Arc<Mutex<VectorStore>>,
    host: Arc<dyn CorpusHost>,
    /// Global mutex flag guarding batch entry.
    indexing: AtomicBool,
    /// Gate for the one allowed single-source reindex.
    reindexing: AtomicBool,
    debounce: StdMutex<HashMap<String, JoinHandle<()>>>,
    active_editing: StdMutex<HashSet<String>>,
    last_active: StdMutex<Option<String>>,
    cancel: StdMutex<CancellationToken>,
    sweep: StdMutex<Option<JoinHandle<()>>>,
    on_complete: StdMutex<Option<CompletionCallback>>,
}

impl Scheduler {
    pub fn new(
        config: Arc<EngineConfig>,
        indexer: Arc<Indexer>,
        store: Arc<Mutex<VectorStore>>,
        host: Arc<dyn CorpusHost>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                indexer,
                store,
                host,
                indexing: AtomicBool::new(false),
                reindexing: AtomicBool::new(false),
                debounce: StdMutex::new(HashMap::new()),
                active_editing: StdMutex::new(HashSet::new()),
                last_active: StdMutex::new(None),
                cancel: StdMutex::new(CancellationToken::new()),
                sweep: StdMutex::new(None),
                on_complete: StdMutex::new(None),
            }),
        }
    }

    /// Register the observer fired when a batch run completes.
    pub fn set_on_complete(&self, callback: CompletionCallback) {
        *self.inner.on_complete.lock().unwrap() = Some(callback);
    }

    pub fn is_indexing(&self) -> bool {
        self.inner.indexing.load(Ordering::SeqCst)
    }

    /// Trip the running batch's abort token. The batch exits at its next
    /// source boundary, leaving the store at the last checkpoint.
    pub fn cancel_indexing(&self) {
        self.inner.cancel.lock().unwrap().cancel();
    }

    /// Boot-time entry: decide between a full rebuild (fresh install) and
    /// a smart update, then run it — in the background when configured.
    /// Also starts the periodic active-editing sweep.
    pub async fn start(&self) -> Result<()> {
        self.spawn_sweep();

        let mode = self.boot_mode().await?;
        info!(?mode, "starting boot-time index pass");
        if self.inner.config.scheduler.background {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if let Err(e) = inner.run_batch(mode, &NoProgress).await {
                    warn!(error = %e, "boot-time indexing failed");
                }
            });
            Ok(())
        } else {
            self.inner.run_batch(mode, &NoProgress).await.map(|_| ())
        }
    }

    /// Fresh install means an empty index, or fewer indexed sources than
    /// the configured fraction of current markdown sources.
    async fn boot_mode(&self) -> Result<BatchMode> {
        let note_count = self
            .inner
            .host
            .list_sources()
            .await?
            .iter()
            .filter(|s| self.inner.config.is_note_extension(&s.extension))
            .count();
        let store = self.inner.store.lock().await;
        let indexed = store.source_paths().len();
        let fresh = store.is_empty()
            || (indexed as f64) < self.inner.config.scheduler.fresh_ratio * note_count as f64;
        Ok(if fresh {
            BatchMode::FullRebuild
        } else {
            BatchMode::SmartUpdate
        })
    }

    /// Run a batch in the caller's task and return its summary.
    pub async fn run_batch(
        &self,
        mode: BatchMode,
        progress: &dyn ProgressSink,
    ) -> Result<UpdateSummary> {
        self.inner.run_batch(mode, progress).await
    }

    /// A markdown source changed on disk.
    pub fn on_modify(&self, path: String) {
        if self.inner.is_active(&path) {
            debug!(path = %path, "modified while active, parking");
            self.inner.active_editing.lock().unwrap().insert(path);
            return;
        }
        self.inner.clone().arm_debounce(path);
    }

    /// A markdown source was renamed. Never debounced against
    /// active-editing: the old chunks drop at once and the new path is
    /// queued for reindex.
    pub async fn on_rename(&self, old_path: String, new_path: String) {
        self.inner.forget(&old_path);
        {
            let mut store = self.inner.store.lock().await;
            let removed = store.remove_source(&old_path);
            if removed > 0 {
                if let Err(e) = store.save() {
                    warn!(error = %e, "save after rename failed");
                }
            }
        }
        self.inner
            .clone()
            .spawn_reindex(new_path, Duration::from_millis(0));
    }

    /// A markdown source was deleted: drop its chunks and every trace of
    /// it in the pending-work maps.
    pub async fn on_delete(&self, path: String) {
        self.inner.forget(&path);
        let mut store = self.inner.store.lock().await;
        let removed = store.remove_source(&path);
        if removed > 0 {
            info!(path = %path, removed, "dropped chunks of deleted source");
            if let Err(e) = store.save() {
                warn!(error = %e, "save after delete failed");
            }
        }
    }

    /// The foreground document changed. A previously active source that
    /// collected edits is released for reindexing after a short delay so
    /// the editor finishes committing its buffer.
    pub fn on_active_change(&self, path: Option<String>) {
        let previous = {
            let mut last = self.inner.last_active.lock().unwrap();
            std::mem::replace(&mut *last, path)
        };
        if let Some(prev) = previous {
            let was_parked = self.inner.active_editing.lock().unwrap().remove(&prev);
            if was_parked {
                debug!(path = %prev, "releasing parked source");
                let delay = Duration::from_millis(self.inner.config.scheduler.active_release_delay_ms);
                self.inner.clone().spawn_reindex(prev, delay);
            }
        }
    }

    /// Abort timers and background tasks. The engine calls this on drop.
    pub fn shutdown(&self) {
        self.cancel_indexing();
        if let Some(handle) = self.inner.sweep.lock().unwrap().take() {
            handle.abort();
        }
        for (_, handle) in self.inner.debounce.lock().unwrap().drain() {
            handle.abort();
        }
    }

    fn spawn_sweep(&self) {
        let inner = self.inner.clone();
        let interval = Duration::from_secs(inner.config.scheduler.sweep_interval_secs);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                inner.clone().sweep_active_editing();
            }
        });
        let mut slot = self.inner.sweep.lock().unwrap();
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.sweep.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl SchedulerInner {
    fn is_active(&self, path: &str) -> bool {
        self.last_active.lock().unwrap().as_deref() == Some(path)
    }

    /// Remove a path from the debounce map and the active-editing set.
    fn forget(&self, path: &str) {
        if let Some(handle) = self.debounce.lock().unwrap().remove(path) {
            handle.abort();
        }
        self.active_editing.lock().unwrap().remove(path);
    }

    /// (Re-)arm the debounce timer for a path; a burst of modify events
    /// collapses into one reindex once the corpus settles.
    fn arm_debounce(self: Arc<Self>, path: String) {
        let delay = Duration::from_millis(self.config.scheduler.debounce_ms);
        let inner = self.clone();
        let key = path.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.debounce.lock().unwrap().remove(&path);
            // The document may have become active while the timer ran.
            if inner.is_active(&path) {
                inner.active_editing.lock().unwrap().insert(path);
                return;
            }
            inner.clone().spawn_reindex(path, Duration::from_millis(0));
        });
        if let Some(previous) = self.debounce.lock().unwrap().insert(key, task) {
            previous.abort();
        }
    }

    /// Queue a single-source reindex. Yields to a batch in progress and
    /// to another single-source run by re-queuing itself with a small
    /// delay.
    fn spawn_reindex(self: Arc<Self>, path: String, delay: Duration) {
        tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            let requeue = Duration::from_millis(self.config.scheduler.requeue_delay_ms);
            if self.indexing.load(Ordering::SeqCst) {
                debug!(path = %path, "batch in progress, re-queuing reindex");
                self.clone().spawn_reindex(path, requeue);
                return;
            }
            if self
                .reindexing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!(path = %path, "another reindex running, re-queuing");
                self.clone().spawn_reindex(path, requeue);
                return;
            }
            let result = self.indexer.reindex_single(&path, true).await;
            self.reindexing.store(false, Ordering::SeqCst);
            match result {
                Ok(outcome) => debug!(path = %path, ?outcome, "reindex finished"),
                Err(e) => warn!(path = %path, error = %e, "reindex failed"),
            }
        });
    }

    /// Release parked sources that are no longer the active document.
    fn sweep_active_editing(self: Arc<Self>) {
        let stale: Vec<String> = {
            let last = self.last_active.lock().unwrap().clone();
            let mut parked = self.active_editing.lock().unwrap();
            let stale: Vec<String> = parked
                .iter()
                .filter(|p| last.as_deref() != Some(p.as_str()))
                .cloned()
                .collect();
            for p in &stale {
                parked.remove(p);
            }
            stale
        };
        for path in stale {
            debug!(path = %path, "sweep releasing parked source");
            self.clone().spawn_reindex(path, Duration::from_millis(0));
        }
    }

    async fn run_batch(
        &self,
        mode: BatchMode,
        progress: &dyn ProgressSink,
    ) -> Result<UpdateSummary> {
        if self.indexing.swap(true, Ordering::SeqCst) {
            warn!("batch requested while another is running, ignoring");
            return Err(EngineError::Cancelled);
        }
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = token.clone();

        let result = match mode {
            BatchMode::SmartUpdate => self.indexer.smart_update(progress, &token).await,
            BatchMode::FullRebuild => self.indexer.full_rebuild(progress, &token).await,
        };
        self.indexing.store(false, Ordering::SeqCst);

        match &result {
            Ok(summary) => {
                let callback = self.on_complete.lock().unwrap().clone();
                if let Some(callback) = callback {
                    callback(*summary);
                }
            }
            Err(EngineError::Cancelled) => info!("batch cancelled"),
            Err(e) => warn!(error = %e, "batch failed"),
        }
        result
    }
}
