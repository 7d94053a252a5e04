//! EPUB chunker: one chunk per chapter (one spine-ordered XHTML/HTML zip
//! entry), then window split. Reads are bounded to guard against zip-bomb
//! entries.

use std::io::Read;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::json;
use zip::ZipArchive;

use crate::error::{CoreError, CoreResult};

use super::text::fixed_window_chunk;
use super::{require_non_empty, ChunkSizing, ChunkedPiece, Chunker, TokenCounter};

const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub struct EpubChunker;

impl Chunker for EpubChunker {
    fn chunk(
        &self,
        raw_content: &[u8],
        sizing: ChunkSizing,
        counter: &dyn TokenCounter,
    ) -> CoreResult<Vec<ChunkedPiece>> {
        let cursor = std::io::Cursor::new(raw_content);
        let mut archive = ZipArchive::new(cursor)
            .map_err(|e| CoreError::UnsupportedSourceType { kind: format!("epub ({e})") })?;

        let mut chapter_names: Vec<String> = (0..archive.len())
            .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
            .filter(|name| {
                let lower = name.to_ascii_lowercase();
                (lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm"))
                    && !lower.contains("nav")
                    && !lower.contains("toc")
            })
            .collect();
        chapter_names.sort();

        if chapter_names.is_empty() {
            return Err(CoreError::UnsupportedSourceType {
                kind: "epub (no chapter content found)".to_string(),
            });
        }

        let mut pieces = Vec::new();
        for (chapter_index, name) in chapter_names.iter().enumerate() {
            let mut entry = archive
                .by_name(name)
                .map_err(|e| CoreError::UnsupportedSourceType { kind: format!("epub ({e})") })?;
            if entry.size() > MAX_ENTRY_BYTES {
                return Err(CoreError::UnsupportedSourceType {
                    kind: format!("epub (entry {name} exceeds size limit)"),
                });
            }
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry
                .by_ref()
                .take(MAX_ENTRY_BYTES)
                .read_to_end(&mut buf)
                .map_err(|e| CoreError::UnsupportedSourceType { kind: format!("epub ({e})") })?;

            let chapter_text = strip_markup(&buf);
            if chapter_text.trim().is_empty() {
                continue;
            }

            let windows = fixed_window_chunk(&chapter_text, sizing, counter);
            for window in windows {
                pieces.push(ChunkedPiece {
                    ordinal: 0,
                    text: window.text,
                    metadata: json!({ "chapter": chapter_index + 1, "chapter_file": name }),
                });
            }
        }

        if pieces.is_empty() {
            return Err(CoreError::UnsupportedSourceType {
                kind: "epub (no extractable text)".to_string(),
            });
        }
        for (i, piece) in pieces.iter_mut().enumerate() {
            piece.ordinal = i as i64;
        }

        require_non_empty(pieces, "epub")
    }
}

/// Strips XML/HTML tags, keeping only text node content, via a streaming
/// reader so malformed markup degrades gracefully instead of panicking.
pub(crate) fn strip_markup(bytes: &[u8]) -> String {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut out = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                if let Ok(text) = e.unescape() {
                    out.push_str(&text);
                    out.push(' ');
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    out
}
