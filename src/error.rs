//! Structured error taxonomy shared by the store, gateway, chunker, and
//! orchestrator. Every kind names what failed and the remediation step, so
//! callers can both match on kind and print the message directly.

use thiserror::Error;

/// The abstract error kinds a caller may need to branch on.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing credential: set the {env_var} environment variable")]
    Credential { env_var: String },

    #[error("path traversal: '{path}' escapes the allowed root")]
    PathTraversal { path: String },

    #[error("ssrf: '{url}' resolves to a disallowed address space")]
    Ssrf { url: String },

    #[error("unsupported source type: no chunker registered for '{kind}'")]
    UnsupportedSourceType { kind: String },

    #[error(
        "schema mismatch: embedding model '{configured}' has no vector index \
         (ingested with a different model); re-ingest with the configured model"
    )]
    SchemaMismatch { configured: String },

    #[error("store integrity violation: {0}")]
    StoreIntegrity(String),

    #[error("transient provider failure after {attempts} attempts: {message}")]
    TransientProviderFailure { attempts: u32, message: String },

    #[error("fatal provider failure: {0}")]
    FatalProviderFailure(String),

    #[error("interrupted")]
    Interrupted,
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
