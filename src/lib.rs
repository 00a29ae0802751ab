//! # Vault Recall
//!
//! **A local retrieval-augmented search engine over a personal markdown
//! vault.**
//!
//! Vault Recall keeps an on-disk index of dense vector embeddings at
//! paragraph-chunk granularity and answers nearest-neighbor queries, so
//! a host application can hand relevant note excerpts to a chat model.
//! Markdown notes are chunked directly; images are transcribed through a
//! vision model first. The index follows the corpus incrementally,
//! driven by the host's file-system and workspace events.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌───────────┐   ┌─────────────┐
//! │ CorpusHost │──▶│  Watcher  │──▶│ Scheduler │──▶│   Indexer   │
//! │  (events)  │   │ (validate)│   │ (debounce)│   │ chunk+embed │
//! └────────────┘   └───────────┘   └───────────┘   └──────┬──────┘
//!                                                         ▼
//!                  ┌─────────────┐   ┌──────────────────────────┐
//!       query ────▶│ QueryEngine │──▶│       VectorStore        │
//!                  └─────────────┘   │ cosine / embeddings.json │
//!                                    └──────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **host** supplies sources and events through [`host::CorpusHost`].
//! 2. The **watcher** ([`watcher`]) validates events and forwards them.
//! 3. The **scheduler** ([`scheduler`]) debounces bursts, skips the
//!    actively edited document, and serializes index mutations.
//! 4. The **indexer** ([`indexer`]) runs the per-source pipeline:
//!    read → CRC32 → chunk ([`chunker`]) → embed ([`embedding`]) →
//!    upsert ([`store`]); images go through [`vision`] first.
//! 5. The **query engine** ([`query`]) embeds a query, runs cosine
//!    search, and formats excerpts for chat context.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Configuration tree with defaults and validation |
//! | [`models`] | Persisted chunk records, index document, hits, stats |
//! | [`error`] | Tagged error kinds and the crate `Result` alias |
//! | [`chunker`] | Deterministic ~200-word markdown chunking |
//! | [`store`] | JSON-backed vector store with cosine search |
//! | [`embedding`] | Embedding provider trait + HTTP client |
//! | [`vision`] | Vision-model adapter with capability probe |
//! | [`host`] | Corpus host trait, events, filesystem vault |
//! | [`indexer`] | Smart-update / full-rebuild pipeline |
//! | [`scheduler`] | Debounce, active-editing rule, cancellation |
//! | [`watcher`] | Event validation and feedback filtering |
//! | [`query`] | Search and context formatting |
//! | [`progress`] | Progress sink for batch runs |
//! | [`engine`] | The facade hosts embed |

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod host;
pub mod indexer;
pub mod models;
pub mod progress;
pub mod query;
pub mod scheduler;
pub mod store;
pub mod vision;
pub mod watcher;

pub use engine::VaultEngine;
pub use error::{EngineError, Result};
pub use models::{ChunkRecord, Hit, SourceKind, StoreStats, UpdateSummary};
