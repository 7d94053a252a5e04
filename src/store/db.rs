//! SQLite connection pool, WAL mode, one file per project.

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let url = format!("sqlite:{}", config.db.path.display());
    let options = SqliteConnectOptions::from_str(&url)
        .with_context(|| format!("invalid database path: {}", config.db.path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("connecting to knowledge store")?;

    Ok(pool)
}
