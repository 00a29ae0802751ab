//! Corpus event adapter.
//!
//! The host pushes raw [`CorpusEvent`]s here; the watcher validates that
//! file events concern markdown sources, drops file events while a batch
//! is indexing (the batch itself writes nothing back to the corpus, but
//! hosts commonly emit spurious events during heavy reads), and forwards
//! the rest to the [`Scheduler`]. Active-document changes always pass
//! through so foreground tracking never goes stale.

use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::host::CorpusEvent;
use crate::scheduler::Scheduler;

pub struct Watcher {
    config: Arc<EngineConfig>,
    scheduler: Arc<Scheduler>,
}

impl Watcher {
    pub fn new(config: Arc<EngineConfig>, scheduler: Arc<Scheduler>) -> Self {
        Self { config, scheduler }
    }

    pub async fn handle_event(&self, event: CorpusEvent) {
        match event {
            CorpusEvent::ActiveChanged { path } => {
                self.scheduler.on_active_change(path);
            }
            CorpusEvent::Modified { path } => {
                if !self.accepts(&path) {
                    return;
                }
                self.scheduler.on_modify(path);
            }
            CorpusEvent::Renamed { old_path, new_path } => {
                if !self.is_note(&new_path) && !self.is_note(&old_path) {
                    return;
                }
                if self.scheduler.is_indexing() {
                    debug!(path = %new_path, "batch running, dropping rename");
                    return;
                }
                self.scheduler.on_rename(old_path, new_path).await;
            }
            CorpusEvent::Deleted { path } => {
                if !self.accepts(&path) {
                    return;
                }
                self.scheduler.on_delete(path).await;
            }
        }
    }

    fn accepts(&self, path: &str) -> bool {
        if !self.is_note(path) {
            return false;
        }
        if self.scheduler.is_indexing() {
            debug!(path = %path, "batch running, dropping file event");
            return false;
        }
        true
    }

    fn is_note(&self, path: &str) -> bool {
        extension_of(path)
            .map(|ext| self.config.is_note_extension(ext))
            .unwrap_or(false)
    }
}

fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => Some(ext),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_extraction() {
        assert_eq!(extension_of("notes/a.md"), Some("md"));
        assert_eq!(extension_of("a.tar.gz"), Some("gz"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("dir.d/noext"), None);
        assert_eq!(extension_of(".hidden"), None);
    }
}
