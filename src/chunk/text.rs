//! Fixed-window plain-text chunker: the fallback every other chunker in the
//! set reduces to once normalization is done. Splits on paragraph
//! boundaries, accumulates until the token ceiling would be exceeded, then
//! flushes, carrying the configured token overlap into the next window.

use serde_json::json;

use crate::error::CoreResult;

use super::{require_non_empty, ChunkSizing, ChunkedPiece, Chunker, TokenCounter};

pub struct TextChunker;

impl Chunker for TextChunker {
    fn chunk(
        &self,
        raw_content: &[u8],
        sizing: ChunkSizing,
        counter: &dyn TokenCounter,
    ) -> CoreResult<Vec<ChunkedPiece>> {
        let text = String::from_utf8_lossy(raw_content).to_string();
        let pieces = fixed_window_chunk(&text, sizing, counter);
        require_non_empty(pieces, "text")
    }
}

/// Shared by the text, markdown (headingless fallback), web, and audio
/// chunkers. Splits on `"\n\n"`, packs paragraphs into windows up to
/// `sizing.max_tokens`, hard-splits any paragraph that alone exceeds the
/// ceiling at a word boundary, and carries `sizing.overlap_tokens` worth of
/// trailing words into the next window.
pub fn fixed_window_chunk(
    text: &str,
    sizing: ChunkSizing,
    counter: &dyn TokenCounter,
) -> Vec<ChunkedPiece> {
    let max_tokens = sizing.max_tokens.max(1) as usize;
    let overlap_tokens = sizing.overlap_tokens as usize;

    let paragraphs: Vec<&str> = text.split("\n\n").filter(|p| !p.trim().is_empty()).collect();
    if paragraphs.is_empty() {
        return vec![ChunkedPiece {
            ordinal: 0,
            text: if text.trim().is_empty() {
                "(empty)".to_string()
            } else {
                text.trim().to_string()
            },
            metadata: json!({}),
        }];
    }

    let mut windows: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        let paragraph = paragraph.trim();
        if counter.count(paragraph) > max_tokens {
            if !current.is_empty() {
                windows.push(std::mem::take(&mut current));
            }
            windows.extend(hard_split(paragraph, max_tokens, counter));
            continue;
        }

        let candidate = if current.is_empty() {
            paragraph.to_string()
        } else {
            format!("{current}\n\n{paragraph}")
        };

        if counter.count(&candidate) > max_tokens && !current.is_empty() {
            windows.push(std::mem::take(&mut current));
            current = paragraph.to_string();
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        windows.push(current);
    }

    apply_overlap(windows, overlap_tokens)
        .into_iter()
        .enumerate()
        .map(|(i, text)| ChunkedPiece {
            ordinal: i as i64,
            text,
            metadata: json!({}),
        })
        .collect()
}

fn hard_split(paragraph: &str, max_tokens: usize, counter: &dyn TokenCounter) -> Vec<String> {
    let words: Vec<&str> = paragraph.split_whitespace().collect();
    let mut out = Vec::new();
    let mut buf: Vec<&str> = Vec::new();

    for word in words {
        buf.push(word);
        let joined = buf.join(" ");
        if counter.count(&joined) > max_tokens {
            buf.pop();
            if !buf.is_empty() {
                out.push(buf.join(" "));
            }
            buf = vec![word];
        }
    }
    if !buf.is_empty() {
        out.push(buf.join(" "));
    }
    out
}

/// Carries the trailing `overlap_tokens` worth of words from each window
/// into the start of the next, approximated at word granularity.
fn apply_overlap(windows: Vec<String>, overlap_tokens: usize) -> Vec<String> {
    if overlap_tokens == 0 || windows.len() < 2 {
        return windows;
    }

    let mut result = Vec::with_capacity(windows.len());
    let mut previous_tail: Option<String> = None;

    for window in windows {
        let text = match &previous_tail {
            Some(tail) if !tail.is_empty() => format!("{tail} {window}"),
            _ => window.clone(),
        };

        let words: Vec<&str> = window.split_whitespace().collect();
        let take = overlap_tokens.min(words.len());
        previous_tail = Some(words[words.len() - take..].join(" "));

        result.push(text);
    }
    result
}
