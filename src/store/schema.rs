//! The append-only migration list. Each entry is `(version, statement)`;
//! versions must increase monotonically and existing entries are never
//! edited or removed — only appended to. Per-model vector tables are *not*
//! part of this list; they are created on demand by
//! [`crate::store::repository::Repository::ensure_vector_index`].

pub const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id              TEXT PRIMARY KEY,
            path            TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            embedding_model TEXT NOT NULL,
            ingested_at     TEXT NOT NULL,
            UNIQUE(path, content_hash)
        )
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id       TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            ordinal         INTEGER NOT NULL,
            text            TEXT NOT NULL,
            context_prefix  TEXT NOT NULL DEFAULT '',
            metadata_json   TEXT NOT NULL DEFAULT '{}',
            created_at      TEXT NOT NULL,
            UNIQUE(source_id, ordinal)
        )
        "#,
    ),
    (
        3,
        r#"
        CREATE TABLE IF NOT EXISTS source_summaries (
            source_id     TEXT PRIMARY KEY REFERENCES sources(id) ON DELETE CASCADE,
            summary_text  TEXT NOT NULL,
            generated_at  TEXT NOT NULL
        )
        "#,
    ),
    (
        4,
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
            chunk_id UNINDEXED,
            content
        )
        "#,
    ),
    (5, "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id)"),
    (6, "CREATE INDEX IF NOT EXISTS idx_sources_path ON sources(path)"),
];
