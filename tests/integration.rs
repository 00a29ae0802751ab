//! End-to-end pipeline tests over a temporary filesystem vault with
//! stub embedding and vision providers.

mod common;

use std::sync::atomic::Ordering;

use common::{paragraph, StubVision, TestRig};
use tokio_util::sync::CancellationToken;

use vault_recall::host::CorpusEvent;
use vault_recall::models::SourceKind;
use vault_recall::progress::NoProgress;
use vault_recall::query::QueryEngine;
use vault_recall::scheduler::BatchMode;
use vault_recall::store::VectorStore;

const NOTE_BODY: &str =
    "Hello world. This is a test paragraph with more than ten words overall.";

#[tokio::test]
async fn indexes_a_single_note() {
    let rig = TestRig::new().await;
    rig.write_note("note.md", NOTE_BODY);

    let summary = rig
        .indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.sources_indexed, 1);
    assert_eq!(summary.chunks_embedded, 1);

    let store = rig.store.lock().await;
    assert_eq!(store.len(), 1);
    assert_eq!(store.dimension(), 3);
    let record = &store.chunks()[0];
    assert_eq!(record.id, "note.md#c0");
    assert_eq!(record.title, "note");
    assert_eq!(record.paragraph_index, 0);
    assert_eq!(record.paragraph_text, NOTE_BODY);
    assert_eq!(record.source_kind, SourceKind::Markdown);
    assert!(!record.extracted_text);
    assert_eq!(
        record.source_checksum,
        common::crc32_of(&rig.host.root().join("note.md"))
    );
}

#[tokio::test]
async fn query_returns_the_indexed_chunk() {
    let rig = TestRig::new().await;
    rig.write_note("note.md", NOTE_BODY);
    rig.indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();

    let query = QueryEngine::new(
        rig.store.clone(),
        rig.embedder.clone(),
        rig.host.clone(),
    );
    let hits = query.search("test paragraph", 5, 0.0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "note.md");
    assert_eq!(hits[0].paragraph_index, 0);
    assert_eq!(hits[0].matched_text, NOTE_BODY);
    assert!(hits[0].similarity >= 0.0);
    assert!(hits[0].source.is_some());
}

#[tokio::test]
async fn rename_moves_chunks_to_the_new_path() {
    let rig = TestRig::new().await;
    rig.write_note("note.md", NOTE_BODY);
    rig.indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();

    rig.rename_note("note.md", "renamed.md");
    rig.watcher
        .handle_event(CorpusEvent::Renamed {
            old_path: "note.md".to_string(),
            new_path: "renamed.md".to_string(),
        })
        .await;

    let settled = rig
        .wait_until(2_000, || {
            let store = rig.store.clone();
            async move {
                let store = store.lock().await;
                store.len() == 1 && store.source_paths().contains("renamed.md")
            }
        })
        .await;
    assert!(settled, "rename did not settle in time");

    let store = rig.store.lock().await;
    assert!(!store.source_paths().contains("note.md"));
    let record = &store.chunks()[0];
    assert_eq!(record.source_path, "renamed.md");
    assert_eq!(record.paragraph_index, 0);
    assert_eq!(record.paragraph_text, NOTE_BODY);
}

#[tokio::test]
async fn delete_drops_chunks_but_keeps_dimension() {
    let rig = TestRig::new().await;
    rig.write_note("note.md", NOTE_BODY);
    rig.indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();

    rig.remove_note("note.md");
    rig.watcher
        .handle_event(CorpusEvent::Deleted {
            path: "note.md".to_string(),
        })
        .await;

    let store = rig.store.lock().await;
    assert_eq!(store.len(), 0);
    assert_eq!(store.stats().chunks, 0);
    assert_eq!(store.dimension(), 3);
}

#[tokio::test]
async fn corrupt_index_recovers_via_smart_update() {
    let rig = TestRig::new().await;
    let three_paragraphs = |tag: &str| {
        format!(
            "{}\n\n{}\n\n{}",
            paragraph(210, &format!("{}a", tag)),
            paragraph(210, &format!("{}b", tag)),
            paragraph(210, &format!("{}c", tag))
        )
    };
    rig.write_note("a.md", &three_paragraphs("alpha"));
    rig.write_note("b.md", &three_paragraphs("beta"));

    std::fs::create_dir_all(rig.config.index_path.parent().unwrap()).unwrap();
    std::fs::write(&rig.config.index_path, "{ definitely not json").unwrap();

    let mut store = VectorStore::new(rig.config.index_path.clone());
    store.load();
    assert_eq!(store.stats().chunks, 0);

    let summary = rig
        .indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.chunks_embedded, 6);
    assert_eq!(rig.chunk_count().await, 6);

    let store = rig.store.lock().await;
    for path in ["a.md", "b.md"] {
        let mut indices: Vec<usize> = store
            .chunks()
            .iter()
            .filter(|c| c.source_path == path)
            .map(|c| c.paragraph_index)
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}

#[tokio::test]
async fn modify_burst_debounces_to_one_reindex() {
    let rig = TestRig::new().await;
    rig.write_note("note.md", NOTE_BODY);
    rig.indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    let baseline = rig.embedder.batches();

    for i in 0..10 {
        rig.write_note("note.md", &format!("{} revision {}", NOTE_BODY, i));
        rig.watcher
            .handle_event(CorpusEvent::Modified {
                path: "note.md".to_string(),
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let settled = rig
        .wait_until(2_000, || {
            let embedder = rig.embedder.clone();
            async move { embedder.batches() == baseline + 1 }
        })
        .await;
    assert!(settled, "debounced reindex did not run");

    // Give any stray timers a chance to fire, then confirm only one ran.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(rig.embedder.batches(), baseline + 1);

    let store = rig.store.lock().await;
    assert!(store.chunks()[0].paragraph_text.contains("revision 9"));
}

#[tokio::test]
async fn active_document_is_skipped_until_switched_away() {
    let rig = TestRig::new().await;
    rig.write_note("foo.md", NOTE_BODY);
    rig.indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    let baseline = rig.embedder.batches();

    rig.watcher
        .handle_event(CorpusEvent::ActiveChanged {
            path: Some("foo.md".to_string()),
        })
        .await;

    let final_body = format!("{} final active revision", NOTE_BODY);
    for i in 0..15 {
        let body = if i == 14 {
            final_body.clone()
        } else {
            format!("{} active revision {}", NOTE_BODY, i)
        };
        rig.write_note("foo.md", &body);
        rig.watcher
            .handle_event(CorpusEvent::Modified {
                path: "foo.md".to_string(),
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    // Long enough for any (incorrect) debounce timer to have fired.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(rig.embedder.batches(), baseline, "reindexed while active");

    rig.watcher
        .handle_event(CorpusEvent::ActiveChanged { path: None })
        .await;

    let settled = rig
        .wait_until(300, || {
            let embedder = rig.embedder.clone();
            async move { embedder.batches() == baseline + 1 }
        })
        .await;
    assert!(settled, "parked source was not reindexed after switch");

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(rig.embedder.batches(), baseline + 1, "reindexed more than once");

    let store = rig.store.lock().await;
    assert_eq!(store.chunks()[0].paragraph_text, final_body);
}

#[tokio::test]
async fn unchanged_sources_are_skipped_on_smart_update() {
    let rig = TestRig::new().await;
    rig.write_note("note.md", NOTE_BODY);
    rig.indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    let baseline = rig.embedder.batches();

    let summary = rig
        .indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.sources_indexed, 0);
    assert_eq!(summary.sources_skipped, 1);
    assert_eq!(rig.embedder.batches(), baseline);
}

#[tokio::test]
async fn full_rebuild_and_smart_update_agree_from_empty() {
    let rig = TestRig::new().await;
    rig.write_note("a.md", &paragraph(50, "alpha"));
    rig.write_note("b.md", &format!("{}\n\n{}", paragraph(210, "beta"), paragraph(80, "gamma")));

    rig.indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    let smart: Vec<(String, usize, String, Vec<f32>)> = {
        let store = rig.store.lock().await;
        let mut rows: Vec<_> = store
            .chunks()
            .iter()
            .map(|c| {
                (
                    c.source_path.clone(),
                    c.paragraph_index,
                    c.paragraph_text.clone(),
                    c.vector.clone(),
                )
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        rows
    };

    rig.indexer
        .full_rebuild(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    let rebuilt: Vec<(String, usize, String, Vec<f32>)> = {
        let store = rig.store.lock().await;
        let mut rows: Vec<_> = store
            .chunks()
            .iter()
            .map(|c| {
                (
                    c.source_path.clone(),
                    c.paragraph_index,
                    c.paragraph_text.clone(),
                    c.vector.clone(),
                )
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        rows
    };

    assert_eq!(smart, rebuilt);
}

#[tokio::test]
async fn cancellation_returns_quietly() {
    let rig = TestRig::new().await;
    rig.write_note("a.md", &paragraph(50, "alpha"));
    let token = CancellationToken::new();
    token.cancel();
    let err = rig
        .indexer
        .smart_update(&NoProgress, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, vault_recall::EngineError::Cancelled));
}

#[tokio::test]
async fn embedding_outage_surfaces_transient_error() {
    let rig = TestRig::new().await;
    rig.write_note("a.md", &paragraph(50, "alpha"));
    rig.embedder.fail.store(true, Ordering::SeqCst);

    let err = rig
        .indexer
        .reindex_single("a.md", false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        vault_recall::EngineError::EmbeddingTransient(_)
    ));
    assert_eq!(rig.chunk_count().await, 0);
}

#[tokio::test]
async fn images_are_indexed_when_vision_is_supported() {
    let transcription = paragraph(30, "imagetext");
    let rig = TestRig::with_vision(StubVision::with_text(&transcription)).await;
    rig.write_note("diagram.png", "not really a png");
    rig.write_note("note.md", NOTE_BODY);

    let summary = rig
        .indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.sources_indexed, 2);

    let store = rig.store.lock().await;
    let image_chunk = store
        .chunks()
        .iter()
        .find(|c| c.source_path == "diagram.png")
        .expect("image chunk missing");
    assert_eq!(image_chunk.source_kind, SourceKind::Image);
    assert!(image_chunk.extracted_text);
    assert_eq!(image_chunk.title, "Image: diagram.png");
    assert_eq!(image_chunk.paragraph_text, transcription);
    assert_eq!(
        image_chunk.source_checksum,
        vault_recall::indexer::crc32_hex(transcription.as_bytes())
    );
}

#[tokio::test]
async fn images_are_skipped_without_vision() {
    let rig = TestRig::new().await;
    rig.write_note("diagram.png", "bytes");
    rig.write_note("note.md", NOTE_BODY);

    let summary = rig
        .indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.sources_indexed, 1);
    let store = rig.store.lock().await;
    assert!(!store.source_paths().contains("diagram.png"));
}

#[tokio::test]
async fn batch_runs_are_mutually_exclusive() {
    let rig = TestRig::new().await;
    rig.write_note("a.md", &paragraph(50, "alpha"));

    // Hold the indexing flag by running a batch, then ask for another.
    let first = rig
        .scheduler
        .run_batch(BatchMode::SmartUpdate, &NoProgress)
        .await;
    assert!(first.is_ok());

    // Sequential runs are fine; only overlap is rejected, which the
    // scheduler reports as a quiet cancellation.
    let second = rig
        .scheduler
        .run_batch(BatchMode::SmartUpdate, &NoProgress)
        .await;
    assert!(second.is_ok());
}

#[tokio::test]
async fn boot_runs_a_full_rebuild_on_fresh_install() {
    let rig = TestRig::new().await;
    rig.write_note("note.md", NOTE_BODY);
    // background = false in the test config, so start() indexes inline.
    rig.scheduler.start().await.unwrap();
    assert_eq!(rig.chunk_count().await, 1);
    rig.scheduler.shutdown();
}

#[tokio::test]
async fn index_survives_restart() {
    let rig = TestRig::new().await;
    rig.write_note("note.md", NOTE_BODY);
    rig.indexer
        .smart_update(&NoProgress, &CancellationToken::new())
        .await
        .unwrap();

    let mut reloaded = VectorStore::new(rig.config.index_path.clone());
    reloaded.load();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.dimension(), 3);
    assert_eq!(reloaded.chunks()[0].paragraph_text, NOTE_BODY);
}
