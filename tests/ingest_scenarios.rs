//! Ingest Orchestrator end-to-end scenarios, run against an in-memory store
//! and a stub gateway — no network, no credentials.

mod support;

use std::path::PathBuf;
use std::sync::Arc;

use ragweave::config::{
    ChunkerFamilyConfig, ChunkersConfig, Config, EmbeddingConfig, GenerationConfig, IngestConfig,
    RetrievalConfig,
};
use ragweave::error::CoreError;
use ragweave::gateway::LlmGateway;
use ragweave::ingest::{ingest_source, IngestOutcome};

use support::{memory_repository, word_paragraphs, StubGateway};

use std::sync::atomic::Ordering;

fn test_config(allowed_roots: Vec<PathBuf>) -> Config {
    let mut by_family = std::collections::HashMap::new();
    by_family.insert(
        "text".to_string(),
        ChunkerFamilyConfig {
            chunk_size: 20,
            overlap: 0,
            strategy: None,
        },
    );
    Config {
        db: Default::default(),
        project: Default::default(),
        embedding: EmbeddingConfig {
            model: "openai/text-embedding-3-small".to_string(),
            context_model: Some("openai/gpt-4o-mini".to_string()),
        },
        generation: GenerationConfig {
            model: "openai/gpt-4o-mini".to_string(),
            max_source_summaries: 5,
        },
        retrieval: RetrievalConfig::default(),
        chunkers: ChunkersConfig { by_family },
        ingest: IngestConfig {
            summary_model: "openai/gpt-4o-mini".to_string(),
            summary_max_tokens: 100,
            transcription_model: "openai/whisper-1".to_string(),
            allowed_roots,
            confirm_expensive: false,
        },
    }
}

/// Every paragraph is exactly `chunk_size` words, so `fixed_window_chunk`
/// flushes after each one: `count` paragraphs in, `count` chunks out.
fn fixed_chunk_text(count: usize) -> String {
    word_paragraphs(count, 20, "para")
}

#[tokio::test]
async fn s1_reingesting_identical_bytes_is_a_pure_skip() {
    let repository = memory_repository().await;
    let stub = Arc::new(StubGateway::default());
    let gateway: Arc<dyn LlmGateway> = stub.clone();
    let config = test_config(vec![]);
    let bytes = fixed_chunk_text(12).into_bytes();

    let first = ingest_source(&repository, gateway.clone(), &config, "notes.txt", Some(&bytes))
        .await
        .unwrap();
    let IngestOutcome::Committed { source_id, chunk_count } = first else {
        panic!("expected a fresh commit");
    };
    assert_eq!(chunk_count, 12);

    let calls_before = stub.complete_calls.load(std::sync::atomic::Ordering::SeqCst);

    let second = ingest_source(&repository, gateway.clone(), &config, "notes.txt", Some(&bytes))
        .await
        .unwrap();
    assert_eq!(second, IngestOutcome::Skipped { source_id: source_id.clone() });

    let calls_after = stub.complete_calls.load(std::sync::atomic::Ordering::SeqCst);
    assert_eq!(calls_before, calls_after, "a skipped ingest must issue no LLM calls");

    let stats = ragweave::stats::collect(&repository).await.unwrap();
    assert_eq!(stats.source_count, 1);
    assert_eq!(stats.chunk_count, 12);
}

#[tokio::test]
async fn s2_revised_path_purges_the_old_revision() {
    let repository = memory_repository().await;
    let gateway: Arc<dyn LlmGateway> = Arc::new(StubGateway::default());
    let config = test_config(vec![]);

    let v1 = fixed_chunk_text(12).into_bytes();
    let v2 = fixed_chunk_text(8).into_bytes();
    assert_ne!(v1, v2);

    let first = ingest_source(&repository, gateway.clone(), &config, "notes.txt", Some(&v1))
        .await
        .unwrap();
    let IngestOutcome::Committed { source_id: first_id, .. } = first else {
        panic!("expected a fresh commit");
    };

    let second = ingest_source(&repository, gateway.clone(), &config, "notes.txt", Some(&v2))
        .await
        .unwrap();
    let IngestOutcome::Committed { source_id: second_id, chunk_count } = second else {
        panic!("expected a revised commit");
    };
    assert_ne!(first_id, second_id, "a revision gets a new source id");
    assert_eq!(chunk_count, 8);

    let stats = ragweave::stats::collect(&repository).await.unwrap();
    assert_eq!(stats.source_count, 1, "only the latest revision's source row remains");
    assert_eq!(stats.chunk_count, 8, "stale chunks from v1 must be purged");

    assert!(repository.fetch_source(&first_id).await.unwrap().is_none());
    assert!(repository.fetch_source(&second_id).await.unwrap().is_some());
}

#[tokio::test]
async fn s8_path_traversal_is_refused_before_any_store_mutation() {
    let repository = memory_repository().await;
    let gateway: Arc<dyn LlmGateway> = Arc::new(StubGateway::default());
    let config = test_config(vec![]);
    let bytes = b"irrelevant content".to_vec();

    let result = ingest_source(&repository, gateway, &config, "../../etc/passwd", Some(&bytes)).await;
    assert!(matches!(result, Err(CoreError::PathTraversal { .. })));

    let stats = ragweave::stats::collect(&repository).await.unwrap();
    assert_eq!(stats.source_count, 0);
    assert_eq!(stats.chunk_count, 0);
}

/// An `.mp3` path must route through `AudioChunker`, which means the
/// orchestrator has to call the Gateway's `transcribe` before chunking
/// rather than feeding raw audio bytes straight to a text chunker.
#[tokio::test]
async fn audio_extension_routes_through_transcription_before_chunking() {
    let repository = memory_repository().await;
    let stub = Arc::new(StubGateway::default());
    stub.set_transcript_response("a transcribed meeting about widget torque specs");
    let gateway: Arc<dyn LlmGateway> = stub.clone();
    let config = test_config(vec![]);

    let fake_audio_bytes = vec![0u8, 1, 2, 3, 4, 5, 255, 254];

    let outcome = ingest_source(
        &repository,
        gateway,
        &config,
        "meeting.mp3",
        Some(&fake_audio_bytes),
    )
    .await
    .unwrap();

    assert!(matches!(outcome, IngestOutcome::Committed { .. }));
    assert_eq!(stub.transcribe_calls.load(Ordering::SeqCst), 1);
}
