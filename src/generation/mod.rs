//! The Generation Driver: invokes the Gateway with the assembled prompt,
//! attaches footnote attributions, and writes output atomically to a
//! path-confined destination (spec §4.7).

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::assembly::AssembledContext;
use crate::error::{CoreError, CoreResult};
use crate::gateway::{ChatMessage, CompletionOptions, LlmGateway};
use crate::store::Chunk;

pub struct GeneratedDocument {
    pub text: String,
    pub conflicts: Vec<crate::assembly::ConflictRecord>,
}

async fn invoke_generation(gateway: &dyn LlmGateway, model: &str, prompt: &str) -> CoreResult<String> {
    let messages = [ChatMessage {
        role: "user".to_string(),
        content: prompt.to_string(),
    }];
    gateway
        .complete(model, &messages, &CompletionOptions { max_tokens: None, temperature: Some(0.2) })
        .await
}

fn footnote_metadata(chunk: &Chunk) -> String {
    let map = chunk.metadata_map();
    if map.is_empty() {
        String::new()
    } else {
        let rendered: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!(" §{}", rendered.join(", "))
    }
}

/// Appends `[^N]: source_path §metadata` for each packed chunk, preserving
/// any footnote markers the model already emitted in `generated_text`.
fn attach_footnotes(generated_text: &str, packed_chunks: &[Chunk]) -> String {
    if packed_chunks.is_empty() {
        return generated_text.to_string();
    }
    let mut out = generated_text.trim_end().to_string();
    out.push_str("\n\n");
    for (idx, chunk) in packed_chunks.iter().enumerate() {
        let footnote = idx + 1;
        out.push_str(&format!(
            "[^{footnote}]: {}{}\n",
            chunk.source_path,
            footnote_metadata(chunk)
        ));
    }
    out
}

/// Confines `target` to a descendant of `root`, lexically (no filesystem
/// access, so it also rejects paths that don't exist yet).
fn confine_to_root(target: &Path, root: &Path) -> CoreResult<PathBuf> {
    if target.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(CoreError::PathTraversal {
            path: target.to_string_lossy().to_string(),
        });
    }
    let joined = if target.is_absolute() {
        target.to_path_buf()
    } else {
        root.join(target)
    };
    if !joined.starts_with(root) {
        return Err(CoreError::PathTraversal {
            path: target.to_string_lossy().to_string(),
        });
    }
    Ok(joined)
}

/// Writes `contents` to `path` via `temp + rename`, refusing to overwrite an
/// existing file unless `confirm_overwrite` is true.
pub fn write_atomic(
    path: &Path,
    project_root: &Path,
    contents: &str,
    confirm_overwrite: bool,
) -> CoreResult<()> {
    let confined = confine_to_root(path, project_root)?;

    if confined.exists() && !confirm_overwrite {
        return Err(CoreError::Configuration(format!(
            "{} already exists; pass an overwrite confirmation to replace it",
            confined.display()
        )));
    }

    let temp_path = confined.with_extension("tmp-write");
    {
        let mut file = std::fs::File::create(&temp_path)
            .map_err(|e| CoreError::Configuration(format!("creating {}: {e}", temp_path.display())))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| CoreError::Configuration(format!("writing {}: {e}", temp_path.display())))?;
    }
    std::fs::rename(&temp_path, &confined)
        .map_err(|e| CoreError::Configuration(format!("renaming into {}: {e}", confined.display())))?;
    Ok(())
}

/// Runs generation against an already-assembled context and returns the
/// attributed document, without writing it anywhere.
pub async fn generate(
    gateway: &dyn LlmGateway,
    generation_model: &str,
    assembled: &AssembledContext,
) -> CoreResult<GeneratedDocument> {
    let generated_text = invoke_generation(gateway, generation_model, &assembled.prompt).await?;
    let text = attach_footnotes(&generated_text, &assembled.packed_chunks);
    Ok(GeneratedDocument {
        text,
        conflicts: assembled.conflicts.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::tempdir;

    fn chunk(id: i64, path: &str) -> Chunk {
        Chunk {
            id,
            source_id: "s".into(),
            source_path: path.into(),
            ordinal: 0,
            text: "body".into(),
            context_prefix: String::new(),
            metadata: json!({"page": 3}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn footnotes_include_path_and_metadata() {
        let text = attach_footnotes("answer text", &[chunk(1, "notes.txt")]);
        assert!(text.contains("[^1]: notes.txt §page=3"));
    }

    #[test]
    fn no_packed_chunks_leaves_text_untouched() {
        let text = attach_footnotes("answer text", &[]);
        assert_eq!(text, "answer text");
    }

    #[test]
    fn confine_to_root_rejects_traversal() {
        let root = Path::new("/project");
        let result = confine_to_root(Path::new("../../etc/passwd"), root);
        assert!(matches!(result, Err(CoreError::PathTraversal { .. })));
    }

    #[test]
    fn write_atomic_refuses_overwrite_without_confirmation() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.md");
        std::fs::write(&target, "old").unwrap();
        let result = write_atomic(Path::new("out.md"), dir.path(), "new", false);
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "old");
    }

    #[test]
    fn write_atomic_succeeds_with_confirmation() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.md");
        std::fs::write(&target, "old").unwrap();
        write_atomic(Path::new("out.md"), dir.path(), "new", true).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
    }
}
