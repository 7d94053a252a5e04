//! JSON chunker: object-level granularity. A top-level array yields one
//! chunk per element; a top-level object yields a single chunk. No overlap
//! — object boundaries are the unit of retrieval.

use serde_json::{json, Value};

use crate::error::{CoreError, CoreResult};

use super::{require_non_empty, ChunkSizing, ChunkedPiece, Chunker, TokenCounter};

pub struct JsonChunker;

impl Chunker for JsonChunker {
    fn chunk(
        &self,
        raw_content: &[u8],
        _sizing: ChunkSizing,
        _counter: &dyn TokenCounter,
    ) -> CoreResult<Vec<ChunkedPiece>> {
        let value: Value = serde_json::from_slice(raw_content)
            .map_err(|e| CoreError::UnsupportedSourceType { kind: format!("json ({e})") })?;

        let pieces = match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| ChunkedPiece {
                    ordinal: i as i64,
                    text: render(&item),
                    metadata: json!({ "array_index": i }),
                })
                .collect(),
            other => vec![ChunkedPiece {
                ordinal: 0,
                text: render(&other),
                metadata: json!({}),
            }],
        };

        require_non_empty(pieces, "json")
    }
}

fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCounter;
    impl TokenCounter for NoopCounter {
        fn count(&self, text: &str) -> usize {
            text.len()
        }
    }

    fn sizing() -> ChunkSizing {
        ChunkSizing { max_tokens: 300, overlap_tokens: 0 }
    }

    #[test]
    fn array_yields_one_chunk_per_element() {
        let input = br#"[{"a": 1}, {"a": 2}, {"a": 3}]"#;
        let pieces = JsonChunker.chunk(input, sizing(), &NoopCounter).unwrap();
        assert_eq!(pieces.len(), 3);
        for (i, p) in pieces.iter().enumerate() {
            assert_eq!(p.ordinal, i as i64);
        }
    }

    #[test]
    fn top_level_object_yields_single_chunk() {
        let input = br#"{"a": 1, "b": 2}"#;
        let pieces = JsonChunker.chunk(input, sizing(), &NoopCounter).unwrap();
        assert_eq!(pieces.len(), 1);
    }

    #[test]
    fn rejects_invalid_json() {
        let result = JsonChunker.chunk(b"not json", sizing(), &NoopCounter);
        assert!(result.is_err());
    }
}
