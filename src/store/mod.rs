//! The Knowledge Store: an embedded SQLite database with FTS5 for lexical
//! search and per-embedding-model tables for dense vectors. Owns schema,
//! migrations, and vector-index lifecycle. The [`repository::Repository`]
//! is the only component permitted to touch it directly.

pub mod db;
pub mod migrate;
pub mod models;
pub mod repository;
mod schema;

pub use models::{
    model_slug, Chunk, DedupDecision, NewChunk, ScoredChunk, Source, SourceSummary, UpsertOutcome,
};
pub use repository::{IngestCommit, PreparedChunk, Repository};
