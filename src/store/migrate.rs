//! Migration runner. Executes every statement in
//! [`crate::store::schema::MIGRATIONS`] whose version exceeds the highest
//! recorded version, each wrapped in its own transaction, and records the
//! application. Running the runner twice is a no-op (Testable Property 8).

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::schema::MIGRATIONS;

async fn ensure_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating schema_version table")?;
    Ok(())
}

async fn highest_applied_version(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS v FROM schema_version")
        .fetch_one(pool)
        .await
        .context("reading schema_version")?;
    Ok(row.get::<i64, _>("v"))
}

/// Apply all unapplied migrations. Idempotent: a second call with no new
/// entries in `MIGRATIONS` does nothing.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    ensure_version_table(pool).await?;
    let current = highest_applied_version(pool).await?;

    for &(version, statement) in MIGRATIONS {
        if version <= current {
            continue;
        }
        let mut tx = pool
            .begin()
            .await
            .with_context(|| format!("opening transaction for migration {version}"))?;

        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("applying migration {version}"))?;

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("recording migration {version}"))?;

        tx.commit()
            .await
            .with_context(|| format!("committing migration {version}"))?;

        tracing::debug!(version, "applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn running_twice_is_a_noop() {
        let pool = memory_pool().await;
        run(&pool).await.unwrap();
        let after_first = highest_applied_version(&pool).await.unwrap();

        run(&pool).await.unwrap();
        let after_second = highest_applied_version(&pool).await.unwrap();

        assert_eq!(after_first, after_second);

        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("c");
        assert_eq!(count as usize, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn creates_expected_tables() {
        let pool = memory_pool().await;
        run(&pool).await.unwrap();

        for table in ["sources", "chunks", "source_summaries", "chunks_fts"] {
            let row = sqlx::query("SELECT name FROM sqlite_master WHERE name = ?")
                .bind(table)
                .fetch_optional(&pool)
                .await
                .unwrap();
            assert!(row.is_some(), "expected table {table} to exist");
        }
    }
}
