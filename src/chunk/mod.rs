//! The Chunker Set: one implementation per source family, behind a single
//! contract. The dispatch table is a pure function of file extension / URL
//! scheme / MIME (per the design notes' "polymorphism of chunkers").

pub mod audio;
pub mod epub;
pub mod json_chunker;
pub mod markdown;
pub mod pdf;
pub mod text;
pub mod vcs;
pub mod web;

use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// One emitted chunk, prior to context-prefixing and embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedPiece {
    pub ordinal: i64,
    pub text: String,
    pub metadata: Value,
}

/// A hint about the source's type, derived by the caller (Ingest
/// Orchestrator) from extension / URL scheme / MIME — the dispatch key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFamily {
    Markdown,
    Pdf,
    Epub,
    Text,
    Json,
    Vcs,
    Web,
    Audio,
}

impl SourceFamily {
    /// Pure dispatch on file extension. Returns `None` for unrecognised
    /// extensions, surfaced by the caller as `UnsupportedSourceType`. This is
    /// the leaf of the dispatch chain: the Ingest Orchestrator checks URL
    /// scheme and local `.git` directories first (neither family is
    /// extension-addressable) and falls back to this for everything else.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(SourceFamily::Markdown),
            "pdf" => Some(SourceFamily::Pdf),
            "epub" => Some(SourceFamily::Epub),
            "txt" => Some(SourceFamily::Text),
            "json" => Some(SourceFamily::Json),
            "mp3" | "wav" | "m4a" | "flac" | "ogg" | "aac" => Some(SourceFamily::Audio),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            SourceFamily::Markdown => "markdown",
            SourceFamily::Pdf => "pdf",
            SourceFamily::Epub => "epub",
            SourceFamily::Text => "text",
            SourceFamily::Json => "json",
            SourceFamily::Vcs => "vcs",
            SourceFamily::Web => "web",
            SourceFamily::Audio => "audio",
        }
    }
}

/// Per-family sizing, read from `chunkers.<family>` configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSizing {
    pub max_tokens: u32,
    pub overlap_tokens: u32,
}

/// Counts tokens the way the target embedding model would; implemented by
/// the Gateway so chunkers never talk to a provider directly.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// One operation, shared by every family: `(source_id, bytes, hint) ->
/// sequence<chunk>`.
pub trait Chunker: Send + Sync {
    fn chunk(
        &self,
        raw_content: &[u8],
        sizing: ChunkSizing,
        counter: &dyn TokenCounter,
    ) -> CoreResult<Vec<ChunkedPiece>>;
}

/// Resolves a family to its chunker implementation.
pub fn chunker_for(family: &SourceFamily) -> Box<dyn Chunker> {
    match family {
        SourceFamily::Markdown => Box::new(markdown::MarkdownChunker),
        SourceFamily::Pdf => Box::new(pdf::PdfChunker),
        SourceFamily::Epub => Box::new(epub::EpubChunker),
        SourceFamily::Text => Box::new(text::TextChunker),
        SourceFamily::Json => Box::new(json_chunker::JsonChunker),
        SourceFamily::Vcs => Box::new(vcs::VcsChunker),
        SourceFamily::Web => Box::new(web::WebChunker),
        SourceFamily::Audio => Box::new(audio::AudioChunker),
    }
}

pub(crate) fn require_non_empty(pieces: Vec<ChunkedPiece>, family: &str) -> CoreResult<Vec<ChunkedPiece>> {
    if pieces.iter().any(|p| p.text.trim().is_empty()) {
        return Err(CoreError::StoreIntegrity(format!(
            "{family} chunker produced an empty chunk"
        )));
    }
    for (i, piece) in pieces.iter().enumerate() {
        if piece.ordinal != i as i64 {
            return Err(CoreError::StoreIntegrity(format!(
                "{family} chunker produced non-contiguous ordinals"
            )));
        }
    }
    Ok(pieces)
}
