//! PDF chunker: page-based accumulation then window split. Pages are
//! delimited by the form-feed character `pdf-extract` emits between pages.

use serde_json::json;

use crate::error::{CoreError, CoreResult};

use super::text::fixed_window_chunk;
use super::{require_non_empty, ChunkSizing, ChunkedPiece, Chunker, TokenCounter};

pub struct PdfChunker;

impl Chunker for PdfChunker {
    fn chunk(
        &self,
        raw_content: &[u8],
        sizing: ChunkSizing,
        counter: &dyn TokenCounter,
    ) -> CoreResult<Vec<ChunkedPiece>> {
        let text = pdf_extract::extract_text_from_mem(raw_content)
            .map_err(|e| CoreError::UnsupportedSourceType {
                kind: format!("pdf ({e})"),
            })?;

        let pages: Vec<&str> = text.split('\x0C').collect();
        let mut pieces = Vec::new();

        for (page_index, page_text) in pages.iter().enumerate() {
            if page_text.trim().is_empty() {
                continue;
            }
            let windows = fixed_window_chunk(page_text, sizing, counter);
            for window in windows {
                pieces.push(ChunkedPiece {
                    ordinal: 0, // reassigned below
                    text: window.text,
                    metadata: json!({ "page": page_index + 1 }),
                });
            }
        }

        if pieces.is_empty() {
            return Err(CoreError::UnsupportedSourceType {
                kind: "pdf (no extractable text)".to_string(),
            });
        }

        for (i, piece) in pieces.iter_mut().enumerate() {
            piece.ordinal = i as i64;
        }

        require_non_empty(pieces, "pdf")
    }
}
