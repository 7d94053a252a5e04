//! The Retriever: hybrid BM25 + dense search with optional HyDE expansion,
//! fused by true Reciprocal Rank Fusion (spec §4.5). Ties break by ascending
//! chunk id so identical inputs always yield identical order.

use std::collections::HashMap;

use crate::config::{Config, RetrievalMode};
use crate::error::CoreResult;
use crate::gateway::{ChatMessage, CompletionOptions, LlmGateway};
use crate::store::{Chunk, Repository, ScoredChunk};

/// A chunk ranked by the retriever, with its final fusion (or channel) score.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Non-fatal diagnostics emitted during a retrieval run, surfaced to the
/// caller rather than logged-and-discarded.
#[derive(Debug, Clone, Default)]
pub struct RetrievalWarnings {
    pub hyde_fallback: bool,
}

pub struct RetrievalOutcome {
    pub chunks: Vec<RetrievedChunk>,
    pub warnings: RetrievalWarnings,
}

async fn generate_hyde_text(gateway: &dyn LlmGateway, model: &str, query: &str) -> CoreResult<String> {
    let messages = [
        ChatMessage {
            role: "system".to_string(),
            content: "Write a brief hypothetical answer (a few sentences) to the user's question. \
                      This is for retrieval purposes only; it does not need to be factually correct."
                .to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: query.to_string(),
        },
    ];
    gateway
        .complete(model, &messages, &CompletionOptions { max_tokens: Some(100), temperature: Some(0.3) })
        .await
}

/// Reciprocal Rank Fusion: `score(c) = Σ_channel 1/(k + rank_channel(c))`,
/// summed only over channels that returned the chunk. `rank` is 1-based.
fn reciprocal_rank_fusion(channels: &[Vec<ScoredChunk>], k: u32) -> Vec<(i64, f32)> {
    let mut totals: HashMap<i64, f32> = HashMap::new();
    for channel in channels {
        for (idx, scored) in channel.iter().enumerate() {
            let rank = (idx + 1) as u32;
            *totals.entry(scored.chunk_id).or_insert(0.0) += 1.0 / (k + rank) as f32;
        }
    }
    let mut fused: Vec<(i64, f32)> = totals.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// Runs a full retrieval per spec §4.5. `query` is the raw user query.
pub async fn retrieve(
    repository: &Repository,
    gateway: &dyn LlmGateway,
    config: &Config,
    query: &str,
) -> CoreResult<RetrievalOutcome> {
    let retrieval = &config.retrieval;
    let mut warnings = RetrievalWarnings::default();

    let dense_query_text = if retrieval.hyde && retrieval.mode != RetrievalMode::Bm25 {
        let hyde_model = retrieval
            .hyde_model
            .clone()
            .unwrap_or_else(|| config.generation.model.clone());
        match generate_hyde_text(gateway, &hyde_model, query).await {
            Ok(text) => text,
            Err(_) => {
                warnings.hyde_fallback = true;
                query.to_string()
            }
        }
    } else {
        query.to_string()
    };

    let mut channels: Vec<Vec<ScoredChunk>> = Vec::new();

    if retrieval.mode != RetrievalMode::Dense {
        let bm25 = repository.search_bm25(query, retrieval.top_k).await?;
        channels.push(bm25);
    }

    if retrieval.mode != RetrievalMode::Bm25 {
        let query_vector = gateway.embed(&config.embedding.model, &dense_query_text).await?;
        let dense = repository
            .search_vector(&config.embedding.model, &query_vector, retrieval.top_k)
            .await?;
        channels.push(dense);
    }

    let ranked: Vec<(i64, f32)> = match retrieval.mode {
        RetrievalMode::Hybrid => reciprocal_rank_fusion(&channels, retrieval.rrf_k),
        RetrievalMode::Dense | RetrievalMode::Bm25 => {
            let mut single = channels.into_iter().next().unwrap_or_default();
            single.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.chunk_id.cmp(&b.chunk_id))
            });
            single.into_iter().map(|s| (s.chunk_id, s.score)).collect()
        }
    };

    let top: Vec<(i64, f32)> = ranked.into_iter().take(retrieval.top_k).collect();
    let ids: Vec<i64> = top.iter().map(|(id, _)| *id).collect();
    let hydrated = repository.hydrate(&ids).await?;

    let scores: HashMap<i64, f32> = top.into_iter().collect();
    let mut chunks: Vec<RetrievedChunk> = hydrated
        .into_iter()
        .map(|chunk| {
            let score = *scores.get(&chunk.id).unwrap_or(&0.0);
            RetrievedChunk { chunk, score }
        })
        .collect();
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });

    Ok(RetrievalOutcome { chunks, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_sums_across_channels_and_breaks_ties_by_id() {
        let bm25 = vec![
            ScoredChunk { chunk_id: 1, score: 5.0 },
            ScoredChunk { chunk_id: 2, score: 4.0 },
        ];
        let dense = vec![
            ScoredChunk { chunk_id: 2, score: 0.9 },
            ScoredChunk { chunk_id: 1, score: 0.8 },
        ];
        let fused = reciprocal_rank_fusion(&[bm25, dense], 60);
        // chunk 1 is rank 1 in bm25 and rank 2 in dense; chunk 2 is rank 2
        // and rank 1. Symmetric ranks, so scores tie and id breaks it.
        assert_eq!(fused[0].0, 1);
        assert_eq!(fused[1].0, 2);
        assert!((fused[0].1 - fused[1].1).abs() < f32::EPSILON);
    }

    #[test]
    fn rrf_handles_a_channel_missing_a_chunk() {
        let bm25 = vec![ScoredChunk { chunk_id: 1, score: 5.0 }];
        let dense = vec![ScoredChunk { chunk_id: 2, score: 0.9 }];
        let fused = reciprocal_rank_fusion(&[bm25, dense], 60);
        assert_eq!(fused.len(), 2);
        // Both ranked first in their only channel, tie broken by id.
        assert_eq!(fused[0].0, 1);
    }

    #[test]
    fn rrf_empty_channel_does_not_panic() {
        let fused = reciprocal_rank_fusion(&[Vec::new(), Vec::new()], 60);
        assert!(fused.is_empty());
    }
}
