//! Narrow traits standing in for external systems this crate never
//! implements: the feature-spec store and the project-brief source. Both
//! are explicitly out of scope; these traits let the Context Assembler and
//! Generation Driver be exercised against a stub instead of a real system.

use crate::error::CoreResult;

/// Supplies the selected, approved feature document. Its content is opaque
/// to the core — no parsing, no validation beyond treating it as text.
pub trait FeatureSpecProvider: Send + Sync {
    fn feature_spec(&self) -> CoreResult<String>;
}

/// Supplies the verbatim project brief. Implementations must read from a
/// local file path only; a URL here is a configuration error the caller
/// should have already rejected.
pub trait ProjectBriefSource: Send + Sync {
    fn project_brief(&self) -> CoreResult<Option<String>>;
}

/// Reads the brief from a local file path, returning `None` when no path is
/// configured. The default implementation the core wires up when
/// `project.brief` is set.
pub struct FileProjectBrief {
    pub path: Option<std::path::PathBuf>,
}

impl ProjectBriefSource for FileProjectBrief {
    fn project_brief(&self) -> CoreResult<Option<String>> {
        match &self.path {
            None => Ok(None),
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    crate::error::CoreError::Configuration(format!(
                        "reading project brief {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(Some(text))
            }
        }
    }
}

/// A fixed, pre-supplied feature spec — what a caller already holding the
/// approved document text passes in.
pub struct StaticFeatureSpec(pub String);

impl FeatureSpecProvider for StaticFeatureSpec {
    fn feature_spec(&self) -> CoreResult<String> {
        Ok(self.0.clone())
    }
}
