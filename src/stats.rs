//! Read-only counts over the Knowledge Store: documents, chunks, and
//! per-model vector index sizes. No spec conflict — purely observational.

use crate::error::CoreResult;
use crate::store::Repository;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub source_count: i64,
    pub chunk_count: i64,
    /// `(table_name, row_count)` for every `vec_chunks_<slug>` table.
    pub vector_index_sizes: Vec<(String, i64)>,
}

pub async fn collect(repository: &Repository) -> CoreResult<StoreStats> {
    repository.stats().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::migrate;

    #[tokio::test]
    async fn empty_store_reports_zero_counts() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run(&pool).await.unwrap();
        let repo = Repository::new(pool);
        let stats = collect(&repo).await.unwrap();
        assert_eq!(stats.source_count, 0);
        assert_eq!(stats.chunk_count, 0);
        assert!(stats.vector_index_sizes.is_empty());
    }
}
