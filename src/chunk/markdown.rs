//! Markdown chunker: splits at H1/H2/H3 heading boundaries, carrying the
//! heading trail in chunk metadata; falls back to the fixed-window text
//! chunker on headingless input.

use serde_json::json;

use crate::error::CoreResult;

use super::text::fixed_window_chunk;
use super::{require_non_empty, ChunkSizing, ChunkedPiece, Chunker, TokenCounter};

pub struct MarkdownChunker;

impl Chunker for MarkdownChunker {
    fn chunk(
        &self,
        raw_content: &[u8],
        sizing: ChunkSizing,
        counter: &dyn TokenCounter,
    ) -> CoreResult<Vec<ChunkedPiece>> {
        let text = String::from_utf8_lossy(raw_content).to_string();
        let sections = split_at_headings(&text);

        let pieces = if sections.len() <= 1 {
            fixed_window_chunk(&text, sizing, counter)
        } else {
            sections
                .into_iter()
                .flat_map(|section| expand_section(section, sizing, counter))
                .enumerate()
                .map(|(i, (text, trail))| ChunkedPiece {
                    ordinal: i as i64,
                    text,
                    metadata: json!({ "heading_trail": trail }),
                })
                .collect()
        };

        require_non_empty(pieces, "markdown")
    }
}

struct Section {
    heading_trail: Vec<String>,
    body: String,
}

/// Splits on lines starting with `#`, `##`, or `###`, tracking the heading
/// trail (e.g. `["Intro", "Setup"]`) for each resulting section.
fn split_at_headings(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut trail: Vec<(usize, String)> = Vec::new();
    let mut current_body = String::new();
    let mut current_trail: Vec<String> = Vec::new();
    let mut has_heading = false;

    for line in text.lines() {
        if let Some(level) = heading_level(line) {
            if has_heading || !current_body.trim().is_empty() {
                sections.push(Section {
                    heading_trail: current_trail.clone(),
                    body: current_body.trim().to_string(),
                });
            }
            current_body.clear();

            let title = line.trim_start_matches('#').trim().to_string();
            trail.retain(|(l, _)| *l < level);
            trail.push((level, title));
            current_trail = trail.iter().map(|(_, t)| t.clone()).collect();
            has_heading = true;
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if has_heading || !current_body.trim().is_empty() {
        sections.push(Section {
            heading_trail: current_trail,
            body: current_body.trim().to_string(),
        });
    }

    sections.into_iter().filter(|s| !s.body.is_empty()).collect()
}

fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if (1..=3).contains(&hashes) && trimmed.as_bytes().get(hashes) == Some(&b' ') {
        Some(hashes)
    } else {
        None
    }
}

/// Further windows a section's body if it alone exceeds the token ceiling.
fn expand_section(
    section: Section,
    sizing: ChunkSizing,
    counter: &dyn TokenCounter,
) -> Vec<(String, Vec<String>)> {
    if counter.count(&section.body) <= sizing.max_tokens as usize {
        return vec![(section.body, section.heading_trail)];
    }
    fixed_window_chunk(&section.body, sizing, counter)
        .into_iter()
        .map(|piece| (piece.text, section.heading_trail.clone()))
        .collect()
}
