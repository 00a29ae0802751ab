//! Indexing progress reporting.
//!
//! Batch runs report `(current, total, message)` through a
//! [`ProgressSink`] so the host can render a progress bar without
//! polling. During embedding phases the units are chunks (visible
//! progress tracks real work); during the up-front scan phase they are
//! sources, with a distinct message prefix.

/// Receives progress from a running batch.
pub trait ProgressSink: Send + Sync {
    /// `current` of `total` units done; `message` is human-readable.
    fn report(&self, current: usize, total: usize, message: &str);

    /// The batch finished (successfully or not).
    fn completed(&self);
}

/// Sink that drops everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _current: usize, _total: usize, _message: &str) {}
    fn completed(&self) {}
}

/// Sink that forwards to the tracing subscriber at info level.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, current: usize, total: usize, message: &str) {
        tracing::info!(current, total, "{}", message);
    }

    fn completed(&self) {
        tracing::info!("indexing complete");
    }
}
