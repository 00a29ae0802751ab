//! Query engine: text in, ranked excerpts out.
//!
//! Embeds the query through the same provider the indexer uses, runs
//! cosine search against the store, and resolves each hit's source path
//! back to a live corpus handle. [`format_for_context`] renders results
//! as the plain-text block handed to a downstream chat model.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::host::{CorpusHost, SourceHandle};
use crate::models::Hit;
use crate::store::VectorStore;

/// Banner that opens every formatted context block.
pub const CONTEXT_BANNER: &str = "--- RELEVANT NOTES ---";

/// Read-only search facade over the store.
pub struct QueryEngine {
    store: Arc<Mutex<VectorStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    host: Arc<dyn CorpusHost>,
}

impl QueryEngine {
    pub fn new(
        store: Arc<Mutex<VectorStore>>,
        embedder: Arc<dyn EmbeddingProvider>,
        host: Arc<dyn CorpusHost>,
    ) -> Self {
        Self {
            store,
            embedder,
            host,
        }
    }

    /// Flat search: the `limit` most similar chunks scoring at least
    /// `threshold`, best first.
    pub async fn search(&self, query: &str, limit: usize, threshold: f32) -> Result<Vec<Hit>> {
        let vector = self.embedder.embed_one(query).await?;
        let mut hits: Vec<Hit> = {
            let store = self.store.lock().await;
            store
                .search(&vector, limit, threshold)
                .into_iter()
                .map(|(record, sim)| Hit::from_record(record, sim))
                .collect()
        };
        self.resolve_sources(&mut hits).await?;
        Ok(hits)
    }

    /// Grouped search: up to `max_sources` sources ordered by their best
    /// hit, each with up to `max_per_source` hits sorted by paragraph
    /// index for readability.
    pub async fn search_grouped(
        &self,
        query: &str,
        max_sources: usize,
        max_per_source: usize,
        threshold: f32,
    ) -> Result<Vec<(String, Vec<Hit>)>> {
        let vector = self.embedder.embed_one(query).await?;
        let mut grouped: Vec<(String, Vec<Hit>)> = {
            let store = self.store.lock().await;
            store
                .search_grouped(&vector, max_sources, max_per_source, threshold)
                .into_iter()
                .map(|(path, entries)| {
                    let hits = entries
                        .into_iter()
                        .map(|(record, sim)| Hit::from_record(record, sim))
                        .collect();
                    (path, hits)
                })
                .collect()
        };
        if !grouped.is_empty() {
            let handles = self.handles_by_path().await?;
            for (_, hits) in &mut grouped {
                hits.sort_by_key(|h| h.paragraph_index);
                for hit in hits {
                    hit.source = handles.get(&hit.path).cloned();
                }
            }
        }
        Ok(grouped)
    }

    async fn handles_by_path(&self) -> Result<HashMap<String, SourceHandle>> {
        Ok(self
            .host
            .list_sources()
            .await?
            .into_iter()
            .map(|h| (h.path.clone(), h))
            .collect())
    }

    async fn resolve_sources(&self, hits: &mut [Hit]) -> Result<()> {
        if hits.is_empty() {
            return Ok(());
        }
        let handles = self.handles_by_path().await?;
        for hit in hits {
            hit.source = handles.get(&hit.path).cloned();
        }
        Ok(())
    }
}

/// Render flat results as a context block for the chat model.
pub fn format_for_context(hits: &[Hit]) -> String {
    let mut out = String::from(CONTEXT_BANNER);
    out.push('\n');
    for hit in hits {
        out.push_str(&format!(
            "\n## {} ({}) — {:.0}% match\n{}\n",
            hit.title,
            hit.path,
            hit.similarity * 100.0,
            hit.matched_text.trim()
        ));
    }
    out
}

/// Render grouped results: one header per source, its matching
/// paragraphs beneath, paragraph indices listed in the header.
pub fn format_grouped_for_context(grouped: &[(String, Vec<Hit>)]) -> String {
    let mut out = String::from(CONTEXT_BANNER);
    out.push('\n');
    for (path, hits) in grouped {
        let Some(first) = hits.first() else { continue };
        let best = hits
            .iter()
            .map(|h| h.similarity)
            .fold(f32::NEG_INFINITY, f32::max);
        let paragraphs: Vec<String> = hits.iter().map(|h| h.paragraph_index.to_string()).collect();
        out.push_str(&format!(
            "\n## {} ({}) — {:.0}% match, paragraphs {}\n",
            first.title,
            path,
            best * 100.0,
            paragraphs.join(", ")
        ));
        for hit in hits {
            out.push_str(hit.matched_text.trim());
            out.push_str("\n\n");
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, index: usize, sim: f32, text: &str) -> Hit {
        Hit {
            source: None,
            path: path.to_string(),
            source_name: path.to_string(),
            title: path.trim_end_matches(".md").to_string(),
            paragraph_index: index,
            matched_text: text.to_string(),
            similarity: sim,
        }
    }

    #[test]
    fn flat_formatting_includes_banner_and_percent() {
        let hits = vec![hit("a.md", 0, 0.9123, "alpha text")];
        let block = format_for_context(&hits);
        assert!(block.starts_with(CONTEXT_BANNER));
        assert!(block.contains("## a (a.md) — 91% match"));
        assert!(block.contains("alpha text"));
    }

    #[test]
    fn grouped_formatting_lists_paragraph_indices() {
        let grouped = vec![(
            "a.md".to_string(),
            vec![hit("a.md", 0, 0.8, "first"), hit("a.md", 2, 0.6, "third")],
        )];
        let block = format_grouped_for_context(&grouped);
        assert!(block.contains("paragraphs 0, 2"));
        assert!(block.contains("80% match"));
        assert!(block.contains("first"));
        assert!(block.contains("third"));
    }

    #[test]
    fn empty_results_still_emit_banner() {
        assert!(format_for_context(&[]).starts_with(CONTEXT_BANNER));
        assert_eq!(format_grouped_for_context(&[]), CONTEXT_BANNER);
    }
}
