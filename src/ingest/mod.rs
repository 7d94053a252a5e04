//! The Ingest Orchestrator: drives a single source through path
//! validation, deduplication, chunking, context-prefix generation,
//! embedding, summarisation, and a single atomic commit (spec §4.4).
//! Recovery is by fresh restart of the source — there is no checkpointing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use url::Url;

use crate::chunk::audio::validate_audio_size;
use crate::chunk::vcs::{clone_private, fetch_commit_log};
use crate::chunk::web::fetch_url;
use crate::chunk::{chunker_for, ChunkSizing, SourceFamily, TokenCounter};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::gateway::{ChatMessage, CompletionOptions, LlmGateway};
use crate::store::{DedupDecision, IngestCommit, NewChunk, PreparedChunk, Repository};

/// Commits examined per remote or local source-control ingest.
const VCS_MAX_COMMITS: usize = 200;

/// Outcome of a single [`ingest_source`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// `(path, digest)` already present; no chunking, no LLM calls.
    Skipped { source_id: String },
    /// A fresh or revised ingest completed and was committed.
    Committed {
        source_id: String,
        chunk_count: usize,
    },
}

/// A rough, pre-chunking estimate used for the cost-preview step.
#[derive(Debug, Clone)]
pub struct CostPreview {
    pub estimated_chunk_count: usize,
    pub estimated_llm_calls: usize,
    pub expensive_model_warning: Option<String>,
}

struct GatewayTokenCounter<'a> {
    gateway: &'a dyn LlmGateway,
    model: &'a str,
}

impl TokenCounter for GatewayTokenCounter<'_> {
    fn count(&self, text: &str) -> usize {
        self.gateway.count_tokens(self.model, text).unwrap_or_else(|_| {
            crate::gateway::fallback_token_estimate(text)
        })
    }
}

/// Normalises `raw_path` and confines it to `allowed_roots`. An empty
/// `allowed_roots` confines to the current working directory. Rejects any
/// path that resolves outside every allowed root.
pub fn validate_path(raw_path: &str, allowed_roots: &[PathBuf]) -> CoreResult<PathBuf> {
    let candidate = Path::new(raw_path);
    if candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(CoreError::PathTraversal {
            path: raw_path.to_string(),
        });
    }

    let roots: Vec<PathBuf> = if allowed_roots.is_empty() {
        vec![std::env::current_dir().map_err(|e| CoreError::Configuration(e.to_string()))?]
    } else {
        allowed_roots.to_vec()
    };

    for root in &roots {
        let joined = root.join(candidate);
        let normalized = normalize(&joined);
        let normalized_root = normalize(root);
        if normalized.starts_with(&normalized_root) {
            return Ok(normalized);
        }
    }

    Err(CoreError::PathTraversal {
        path: raw_path.to_string(),
    })
}

/// Lexical normalisation (no filesystem access, so it works for paths that
/// don't exist yet): resolves `.`/`..` components syntactically.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn compute_digest(raw_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A cheap-tier heuristic: models with `-mini`, `-nano`, `-haiku`, or
/// `-flash` in their name are treated as cheap; anything else triggers a
/// cost-preview warning.
fn is_cheap_tier(model: &str) -> bool {
    ["mini", "nano", "haiku", "flash"]
        .iter()
        .any(|marker| model.contains(marker))
}

pub fn preview_cost(estimated_chunk_count: usize, context_model: &str) -> CostPreview {
    let warning = if is_cheap_tier(context_model) {
        None
    } else {
        Some(format!(
            "context-prefix model '{context_model}' is not a designated cheap-tier model; \
             {estimated_chunk_count} chunks will each incur a completion call"
        ))
    };
    CostPreview {
        estimated_chunk_count,
        estimated_llm_calls: estimated_chunk_count * 2, // context prefix + embedding
        expensive_model_warning: warning,
    }
}

/// True when `raw_path` names a remote resource (an HTTP(S) page or a
/// cloneable VCS URL) rather than something already present on the local
/// filesystem. Remote sources skip local path confinement and supply their
/// own bytes instead of the caller's.
pub fn is_remote_source(raw_path: &str) -> bool {
    matches!(
        Url::parse(raw_path).ok().as_ref().map(Url::scheme),
        Some("http") | Some("https") | Some("git") | Some("ssh")
    )
}

/// Dispatches on URL scheme, local `.git` presence, and file extension (in
/// that order) — the three addressing schemes §4.3's eight chunker families
/// actually use. Extension dispatch is the fallback, not the whole story.
fn detect_family(raw_path: &str) -> CoreResult<SourceFamily> {
    if let Ok(parsed) = Url::parse(raw_path) {
        match parsed.scheme() {
            "git" | "ssh" => return Ok(SourceFamily::Vcs),
            "http" | "https" if raw_path.ends_with(".git") => return Ok(SourceFamily::Vcs),
            "http" | "https" => return Ok(SourceFamily::Web),
            _ => {}
        }
    }

    let path = Path::new(raw_path);
    if raw_path.ends_with(".git") || path.join(".git").is_dir() {
        return Ok(SourceFamily::Vcs);
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    SourceFamily::from_extension(ext).ok_or_else(|| CoreError::UnsupportedSourceType {
        kind: ext.to_string(),
    })
}

/// Acquires the raw bytes a chunker family actually consumes. Local families
/// (markdown/pdf/epub/text/json/audio) use the caller-supplied bytes
/// unchanged; Web and Vcs fetch their own content, since the ingest digest
/// must cover what was actually retrieved, not a caller-side placeholder.
async fn acquire_content(
    family: &SourceFamily,
    raw_path: &str,
    raw_bytes: Option<&[u8]>,
) -> CoreResult<Vec<u8>> {
    match family {
        SourceFamily::Web => fetch_url(raw_path).await,
        SourceFamily::Vcs => acquire_vcs_content(raw_path).await,
        _ => raw_bytes.map(<[u8]>::to_vec).ok_or_else(|| {
            CoreError::Configuration(format!(
                "{raw_path}: local sources require caller-supplied bytes"
            ))
        }),
    }
}

/// Produces the record/field-separated commit-log byte stream [`VcsChunker`]
/// parses: `git log` directly against a local `.git` directory, or a clone
/// into a fresh owner-only temporary directory for a remote URL, cleaned up
/// on every exit path via [`tempfile::TempDir`]'s drop.
///
/// [`VcsChunker`]: crate::chunk::vcs::VcsChunker
async fn acquire_vcs_content(raw_path: &str) -> CoreResult<Vec<u8>> {
    let local_dir = Path::new(raw_path);
    if local_dir.join(".git").is_dir() {
        let local_dir = local_dir.to_path_buf();
        return tokio::task::spawn_blocking(move || fetch_commit_log(&local_dir, VCS_MAX_COMMITS))
            .await
            .map_err(|e| CoreError::FatalProviderFailure(format!("git log task failed: {e}")))?;
    }

    if raw_path.starts_with("https://") || raw_path.starts_with("ssh://") {
        let url = raw_path.to_string();
        return tokio::task::spawn_blocking(move || {
            let temp = tempfile::tempdir()
                .map_err(|e| CoreError::FatalProviderFailure(format!("creating clone dir: {e}")))?;
            clone_private(&url, temp.path())?;
            fetch_commit_log(temp.path(), VCS_MAX_COMMITS)
        })
        .await
        .map_err(|e| CoreError::FatalProviderFailure(format!("git clone task failed: {e}")))?;
    }

    Err(CoreError::Ssrf {
        url: raw_path.to_string(),
    })
}

/// Generates a short situating prefix for one chunk via the Gateway's cheap
/// completion model.
async fn generate_context_prefix(
    gateway: &dyn LlmGateway,
    model: &str,
    document_excerpt: &str,
    chunk_text: &str,
) -> CoreResult<String> {
    let messages = [
        ChatMessage {
            role: "system".to_string(),
            content: "Write one short sentence situating the given chunk within its document. \
                      No preamble, no quotes, just the sentence."
                .to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: format!(
                "Document excerpt:\n{document_excerpt}\n\nChunk:\n{chunk_text}"
            ),
        },
    ];
    gateway
        .complete(model, &messages, &CompletionOptions { max_tokens: Some(60), temperature: Some(0.0) })
        .await
        .map(|s| s.trim().to_string())
}

async fn generate_summary(
    gateway: &dyn LlmGateway,
    model: &str,
    full_text: &str,
    max_tokens: u32,
) -> CoreResult<String> {
    let messages = [
        ChatMessage {
            role: "system".to_string(),
            content: format!(
                "Summarise the following document in no more than {max_tokens} tokens."
            ),
        },
        ChatMessage {
            role: "user".to_string(),
            content: full_text.to_string(),
        },
    ];
    gateway
        .complete(
            model,
            &messages,
            &CompletionOptions { max_tokens: Some(max_tokens), temperature: Some(0.2) },
        )
        .await
        .map(|s| s.trim().to_string())
}

/// Runs the full 9-step contract for a single source. `raw_path` is the
/// caller-supplied path or URL (not yet validated); `raw_bytes` is its
/// locally-available content, `None` for a source the orchestrator fetches
/// itself (a Web URL or a remote Vcs clone).
pub async fn ingest_source(
    repository: &Repository,
    gateway: Arc<dyn LlmGateway>,
    config: &Config,
    raw_path: &str,
    raw_bytes: Option<&[u8]>,
) -> CoreResult<IngestOutcome> {
    let family = detect_family(raw_path)?;

    // Step 1: path validation. Remote sources (web fetch, vcs clone) have no
    // local path to confine; their identity is the URL itself.
    let path_key = if is_remote_source(raw_path) {
        raw_path.to_string()
    } else {
        validate_path(raw_path, &config.ingest.allowed_roots)?
            .to_string_lossy()
            .to_string()
    };

    // Step 2: acquire content and digest. For Web/Vcs the digest must cover
    // what was actually retrieved, not a caller-side placeholder, so
    // acquisition happens before the digest is computed.
    let acquired = acquire_content(&family, raw_path, raw_bytes).await?;
    let digest = compute_digest(&acquired);

    // Step 3: dedup decision.
    let decision = repository.peek_dedup(&path_key, &digest).await?;
    let replacing = match decision {
        DedupDecision::AlreadyPresent { source_id } => {
            tracing::info!(path = %path_key, "ingest skipped: digest unchanged");
            return Ok(IngestOutcome::Skipped { source_id });
        }
        DedupDecision::Replacing { old_source_id } => Some(old_source_id),
        DedupDecision::New => None,
    };

    // Audio must be transcribed before it reaches a text-oriented chunker;
    // every other family's acquired bytes are already what its chunker
    // expects (raw markup for Web, the commit log for Vcs, the file itself
    // for everything else).
    let chunk_input = if family == SourceFamily::Audio {
        validate_audio_size(acquired.len() as u64)?;
        let transcript = gateway
            .transcribe(&config.ingest.transcription_model, &acquired)
            .await?;
        transcript.into_bytes()
    } else {
        acquired
    };

    // Step 5: chunking.
    let chunker = chunker_for(&family);
    let sizing_cfg = config.chunkers.get(family.key());
    let sizing = ChunkSizing {
        max_tokens: sizing_cfg.chunk_size,
        overlap_tokens: sizing_cfg.overlap,
    };
    let counter = GatewayTokenCounter {
        gateway: gateway.as_ref(),
        model: &config.embedding.model,
    };
    let pieces = chunker.chunk(&chunk_input, sizing, &counter)?;

    // Step 4: cost preview (informational; callers decide whether to abort
    // before calling this function when `config.ingest.confirm_expensive`
    // is set and the model isn't cheap-tier).
    let context_model = config
        .embedding
        .context_model
        .clone()
        .unwrap_or_else(|| config.generation.model.clone());
    let preview = preview_cost(pieces.len(), &context_model);
    if let Some(warning) = &preview.expensive_model_warning {
        tracing::warn!(%warning, "cost preview");
    }

    let full_text = String::from_utf8_lossy(&chunk_input).to_string();
    let document_excerpt: String = full_text.chars().take(500).collect();

    // Step 6: context prefixing, bounded fan-out.
    let semaphore = Arc::new(tokio::sync::Semaphore::new(4));
    let mut prefix_tasks = tokio::task::JoinSet::new();
    for piece in &pieces {
        let gateway = gateway.clone();
        let context_model = context_model.clone();
        let document_excerpt = document_excerpt.clone();
        let chunk_text = piece.text.clone();
        let ordinal = piece.ordinal;
        let permit = semaphore.clone();
        prefix_tasks.spawn(async move {
            let _permit = permit.acquire_owned().await;
            let prefix = generate_context_prefix(gateway.as_ref(), &context_model, &document_excerpt, &chunk_text).await;
            (ordinal, prefix)
        });
    }
    let mut prefixes = std::collections::HashMap::new();
    while let Some(result) = prefix_tasks.join_next().await {
        let (ordinal, prefix) = result
            .map_err(|e| CoreError::FatalProviderFailure(format!("context-prefix task failed: {e}")))?;
        prefixes.insert(ordinal, prefix?);
    }

    // Step 7: embedding (context_prefix + "\n\n" + chunk_text); raw chunk
    // text is stored unchanged.
    let mut prepared = Vec::with_capacity(pieces.len());
    for piece in &pieces {
        let prefix = prefixes.remove(&piece.ordinal).unwrap_or_default();
        let embedded_text = if prefix.is_empty() {
            piece.text.clone()
        } else {
            format!("{prefix}\n\n{}", piece.text)
        };
        let vector = gateway.embed(&config.embedding.model, &embedded_text).await?;
        prepared.push(PreparedChunk {
            new_chunk: NewChunk {
                ordinal: piece.ordinal,
                text: piece.text.clone(),
                context_prefix: prefix,
                metadata: piece.metadata.clone(),
            },
            vector,
            fts_text: embedded_text,
        });
    }

    let dimension = prepared.first().map(|c| c.vector.len()).unwrap_or(0);
    repository.ensure_vector_index(&config.embedding.model, dimension).await?;

    // Step 8: summary.
    let summary = generate_summary(
        gateway.as_ref(),
        &config.ingest.summary_model,
        &full_text,
        config.ingest.summary_max_tokens,
    )
    .await?;

    // Step 9: single atomic commit.
    let source_id = repository
        .commit_ingest(IngestCommit {
            path: &path_key,
            digest: &digest,
            embedding_model: &config.embedding.model,
            replacing: replacing.as_deref(),
            chunks: &prepared,
            summary: Some(&summary),
        })
        .await?;

    Ok(IngestOutcome::Committed {
        source_id,
        chunk_count: prepared.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_traversal() {
        let result = validate_path("../../etc/passwd", &[]);
        assert!(matches!(result, Err(CoreError::PathTraversal { .. })));
    }

    #[test]
    fn accepts_plain_relative_path() {
        let result = validate_path("notes.txt", &[PathBuf::from("/project")]);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), PathBuf::from("/project/notes.txt"));
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(compute_digest(b"hello"), compute_digest(b"hello"));
        assert_ne!(compute_digest(b"hello"), compute_digest(b"world"));
    }

    #[test]
    fn detect_family_dispatches_local_extensions() {
        assert_eq!(detect_family("notes.md").unwrap(), SourceFamily::Markdown);
        assert_eq!(detect_family("notes.txt").unwrap(), SourceFamily::Text);
        assert_eq!(detect_family("episode.mp3").unwrap(), SourceFamily::Audio);
        assert!(detect_family("notes.xyz").is_err());
    }

    #[test]
    fn detect_family_dispatches_http_urls_to_web() {
        assert_eq!(
            detect_family("https://example.com/page").unwrap(),
            SourceFamily::Web
        );
    }

    #[test]
    fn detect_family_dispatches_git_urls_to_vcs() {
        assert_eq!(
            detect_family("ssh://git@example.com/repo.git").unwrap(),
            SourceFamily::Vcs
        );
        assert_eq!(
            detect_family("https://example.com/repo.git").unwrap(),
            SourceFamily::Vcs
        );
        assert_eq!(
            detect_family("git://example.com/repo").unwrap(),
            SourceFamily::Vcs
        );
    }

    #[test]
    fn is_remote_source_distinguishes_urls_from_local_paths() {
        assert!(is_remote_source("https://example.com/page"));
        assert!(is_remote_source("ssh://git@example.com/repo.git"));
        assert!(!is_remote_source("notes.md"));
        assert!(!is_remote_source("/var/repos/local-clone"));
    }

    #[test]
    fn cost_preview_warns_for_non_cheap_model() {
        let preview = preview_cost(10, "openai/gpt-4o");
        assert!(preview.expensive_model_warning.is_some());
        let preview = preview_cost(10, "openai/gpt-4o-mini");
        assert!(preview.expensive_model_warning.is_none());
    }
}
