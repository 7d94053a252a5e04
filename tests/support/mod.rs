//! Shared test fixtures: an in-memory store and a deterministic stub
//! gateway that never makes a network call. The stub dispatches on the
//! system-message content of each completion request so a single struct can
//! stand in for context-prefixing, summarisation, HyDE, relevance scoring,
//! and conflict detection without per-scenario wiring.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use ragweave::config::{
    ChunkerFamilyConfig, ChunkersConfig, Config, EmbeddingConfig, GenerationConfig, IngestConfig,
    RetrievalConfig,
};
use ragweave::error::{CoreError, CoreResult};
use ragweave::gateway::{ChatMessage, CompletionOptions, CredentialStatus, LlmGateway};
use ragweave::store::{migrate, Repository};

/// A `Config` with every required field filled in and a generous "text"
/// chunk size (so short single-paragraph fixtures become exactly one
/// chunk). Callers override individual sections with struct-update syntax.
pub fn base_config() -> Config {
    let mut by_family = HashMap::new();
    by_family.insert(
        "text".to_string(),
        ChunkerFamilyConfig {
            chunk_size: 1000,
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
            allowed_roots: Vec::new(),
            confirm_expensive: false,
        },
    }
}

pub async fn memory_repository() -> Repository {
    let pool: SqlitePool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate::run(&pool).await.unwrap();
    Repository::new(pool)
}

/// Deterministic, network-free stand-in for a real provider.
///
/// - `complete` dispatches on a substring of the system message so the same
///   stub serves context-prefix, summary, HyDE, relevance, and conflict
///   calls with distinct canned behaviour.
/// - `embed` is a bag-of-words hash over a small fixed vocabulary, so
///   lexically related text lands close in cosine space without needing a
///   real embedding model.
pub struct StubGateway {
    pub fail_on: Mutex<Vec<&'static str>>,
    pub relevance_response: Mutex<Option<String>>,
    pub conflict_response: Mutex<Option<String>>,
    pub transcript_response: Mutex<Option<String>>,
    pub complete_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
    pub transcribe_calls: AtomicUsize,
}

impl Default for StubGateway {
    fn default() -> Self {
        Self {
            fail_on: Mutex::new(Vec::new()),
            relevance_response: Mutex::new(None),
            conflict_response: Mutex::new(None),
            transcript_response: Mutex::new(None),
            complete_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            transcribe_calls: AtomicUsize::new(0),
        }
    }
}

impl StubGateway {
    pub fn fail_completions_matching(&self, marker: &'static str) {
        self.fail_on.lock().unwrap().push(marker);
    }

    pub fn set_relevance_response(&self, response: &str) {
        *self.relevance_response.lock().unwrap() = Some(response.to_string());
    }

    pub fn set_conflict_response(&self, response: &str) {
        *self.conflict_response.lock().unwrap() = Some(response.to_string());
    }

    pub fn set_transcript_response(&self, response: &str) {
        *self.transcript_response.lock().unwrap() = Some(response.to_string());
    }

    fn vocabulary() -> &'static [&'static str] {
        &[
            "widget", "torque", "specification", "nm", "newton", "meter",
            "python", "machine", "learning", "deployment", "kubernetes", "docker",
        ]
    }

    fn bag_of_words_vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        Self::vocabulary()
            .iter()
            .map(|term| lower.matches(term).count() as f32)
            .collect()
    }
}

#[async_trait]
impl LlmGateway for StubGateway {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> CoreResult<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");

        for marker in self.fail_on.lock().unwrap().iter() {
            if system.contains(marker) {
                return Err(CoreError::FatalProviderFailure(format!("stubbed failure for {marker}")));
            }
        }

        if system.contains("situating") {
            return Ok("A short situating sentence.".to_string());
        }
        if system.contains("Summarise") {
            return Ok("A short document summary.".to_string());
        }
        if system.contains("hypothetical answer") {
            return Ok("A hypothetical answer to the query.".to_string());
        }
        if system.contains("Score how relevant") {
            if let Some(response) = self.relevance_response.lock().unwrap().clone() {
                return Ok(response);
            }
            return Ok(String::new());
        }
        if system.contains("contradict") {
            if let Some(response) = self.conflict_response.lock().unwrap().clone() {
                return Ok(response);
            }
            return Ok(String::new());
        }

        Ok("A generated document body.".to_string())
    }

    async fn embed(&self, _model: &str, text: &str) -> CoreResult<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::bag_of_words_vector(text))
    }

    async fn transcribe(&self, _model: &str, _audio: &[u8]) -> CoreResult<String> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .transcript_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "A transcribed sentence.".to_string()))
    }

    fn count_tokens(&self, _model: &str, text: &str) -> CoreResult<usize> {
        Ok(text.split_whitespace().count())
    }

    fn context_window(&self, _model: &str) -> usize {
        128_000
    }

    fn validate_credentials(&self, _model: &str) -> CredentialStatus {
        CredentialStatus::Ok
    }
}

pub fn word_paragraphs(count: usize, words_per_paragraph: usize, topic: &str) -> String {
    (0..count)
        .map(|i| {
            (0..words_per_paragraph)
                .map(|w| format!("{topic}{i}word{w}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
