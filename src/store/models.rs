//! Row types returned by the [`crate::store::repository::Repository`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: String,
    pub path: String,
    pub content_hash: String,
    pub embedding_model: String,
    pub ingested_at: DateTime<Utc>,
}

/// A chunk not yet assigned an identifier, ready for batch insert.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub ordinal: i64,
    pub text: String,
    pub context_prefix: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub source_id: String,
    pub source_path: String,
    pub ordinal: i64,
    pub text: String,
    pub context_prefix: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// `context_prefix + "\n\n" + text`, the representation stored in the
    /// full-text index and embedded for the vector index.
    pub fn embedded_text(&self) -> String {
        if self.context_prefix.is_empty() {
            self.text.clone()
        } else {
            format!("{}\n\n{}", self.context_prefix, self.text)
        }
    }

    pub fn metadata_map(&self) -> HashMap<String, Value> {
        self.metadata
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub source_id: String,
    pub summary_text: String,
    pub generated_at: DateTime<Utc>,
}

/// The result of [`crate::store::repository::Repository::upsert_source`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// `(path, digest)` already present; no work performed.
    AlreadyPresent { source_id: String },
    /// `path` existed with a different digest; old dependents were purged
    /// and a fresh Source row inserted under a new id.
    Replaced { source_id: String },
    /// `path` was not previously known.
    Created { source_id: String },
}

impl UpsertOutcome {
    pub fn source_id(&self) -> &str {
        match self {
            UpsertOutcome::AlreadyPresent { source_id }
            | UpsertOutcome::Replaced { source_id }
            | UpsertOutcome::Created { source_id } => source_id,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, UpsertOutcome::AlreadyPresent { .. })
    }
}

/// The outcome of a read-only dedup check, prior to any write.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupDecision {
    /// `(path, digest)` already present; the caller should do no further
    /// work and issue no LLM calls.
    AlreadyPresent { source_id: String },
    /// `path` is known under a different digest; the named id is the prior
    /// revision to purge as part of the atomic commit.
    Replacing { old_source_id: String },
    /// `path` has never been ingested.
    New,
}

/// A ranked result from either retrieval channel, before fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: i64,
    pub score: f32,
}

/// Derive a stable, deterministic vector-table slug from a `provider/model`
/// string: lowercase, every non-alphanumeric byte becomes `_`.
pub fn model_slug(model: &str) -> String {
    model
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
