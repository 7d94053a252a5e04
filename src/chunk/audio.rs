//! Audio chunker: the orchestrator transcribes audio via the Gateway
//! first (enforcing [`MAX_AUDIO_BYTES`] before the transcription call); this
//! chunker only ever sees the resulting transcript text and delegates to
//! the fixed-window text chunker.

use crate::error::{CoreError, CoreResult};

use super::text::fixed_window_chunk;
use super::{require_non_empty, ChunkSizing, ChunkedPiece, Chunker, TokenCounter};

/// Files larger than this are rejected before a transcription call is made.
pub const MAX_AUDIO_BYTES: u64 = 100 * 1024 * 1024;

pub fn validate_audio_size(byte_len: u64) -> CoreResult<()> {
    if byte_len > MAX_AUDIO_BYTES {
        return Err(CoreError::UnsupportedSourceType {
            kind: format!("audio (file exceeds {MAX_AUDIO_BYTES} byte ceiling)"),
        });
    }
    Ok(())
}

pub struct AudioChunker;

impl Chunker for AudioChunker {
    fn chunk(
        &self,
        raw_content: &[u8],
        sizing: ChunkSizing,
        counter: &dyn TokenCounter,
    ) -> CoreResult<Vec<ChunkedPiece>> {
        let transcript = String::from_utf8_lossy(raw_content).to_string();
        let pieces = fixed_window_chunk(&transcript, sizing, counter);
        require_non_empty(pieces, "audio")
    }
}
