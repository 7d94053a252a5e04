//! Layered configuration: explicit invocation overrides, then process
//! environment variables, then a per-project config file, then a global
//! config file, then built-in defaults. Config files are YAML, parsed with
//! serde_yaml's safe (non-executable-tag) loader. Credentials are never
//! accepted from a config file — only from the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    /// Local file path only; a URL here is a configuration error.
    pub brief: Option<PathBuf>,
    #[serde(default = "default_brief_max_tokens")]
    pub brief_max_tokens: u32,
}

fn default_brief_max_tokens() -> u32 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    #[serde(default)]
    pub context_model: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "openai/text-embedding-3-small".to_string(),
            context_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    #[serde(default = "default_max_source_summaries")]
    pub max_source_summaries: u32,
}

fn default_max_source_summaries() -> u32 {
    5
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".to_string(),
            max_source_summaries: default_max_source_summaries(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Hybrid,
    Dense,
    Bm25,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_mode")]
    pub mode: RetrievalMode,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default)]
    pub hyde: bool,
    #[serde(default)]
    pub hyde_model: Option<String>,
    pub scorer_model: String,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: u8,
    #[serde(default = "default_token_budget")]
    pub token_budget: u32,
}

fn default_retrieval_mode() -> RetrievalMode {
    RetrievalMode::Hybrid
}
fn default_top_k() -> usize {
    12
}
fn default_rrf_k() -> u32 {
    60
}
fn default_relevance_threshold() -> u8 {
    4
}
fn default_token_budget() -> u32 {
    6000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_retrieval_mode(),
            top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            hyde: false,
            hyde_model: None,
            scorer_model: "openai/gpt-4o-mini".to_string(),
            relevance_threshold: default_relevance_threshold(),
            token_budget: default_token_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerFamilyConfig {
    pub chunk_size: u32,
    #[serde(default)]
    pub overlap: u32,
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkersConfig {
    #[serde(default)]
    pub by_family: HashMap<String, ChunkerFamilyConfig>,
}

impl Default for ChunkersConfig {
    fn default() -> Self {
        let mut by_family = HashMap::new();
        by_family.insert(
            "markdown".to_string(),
            ChunkerFamilyConfig {
                chunk_size: 512,
                overlap: 51,
                strategy: Some("heading_aware".to_string()),
            },
        );
        by_family.insert(
            "pdf".to_string(),
            ChunkerFamilyConfig {
                chunk_size: 400,
                overlap: 80,
                strategy: None,
            },
        );
        by_family.insert(
            "epub".to_string(),
            ChunkerFamilyConfig {
                chunk_size: 800,
                overlap: 80,
                strategy: None,
            },
        );
        by_family.insert(
            "text".to_string(),
            ChunkerFamilyConfig {
                chunk_size: 512,
                overlap: 51,
                strategy: None,
            },
        );
        by_family.insert(
            "json".to_string(),
            ChunkerFamilyConfig {
                chunk_size: 300,
                overlap: 0,
                strategy: None,
            },
        );
        by_family.insert(
            "vcs".to_string(),
            ChunkerFamilyConfig {
                chunk_size: 600,
                overlap: 0,
                strategy: None,
            },
        );
        by_family.insert(
            "web".to_string(),
            ChunkerFamilyConfig {
                chunk_size: 512,
                overlap: 51,
                strategy: None,
            },
        );
        by_family.insert(
            "audio".to_string(),
            ChunkerFamilyConfig {
                chunk_size: 512,
                overlap: 51,
                strategy: None,
            },
        );
        Self { by_family }
    }
}

impl ChunkersConfig {
    pub fn get(&self, family: &str) -> ChunkerFamilyConfig {
        self.by_family
            .get(family)
            .cloned()
            .unwrap_or(ChunkerFamilyConfig {
                chunk_size: 512,
                overlap: 0,
                strategy: None,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub summary_model: String,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    /// Model the Gateway's `transcribe` call uses for the Audio family.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// Paths the orchestrator is permitted to read from; a source path must
    /// normalize to a descendant of one of these roots.
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
    /// Require explicit confirmation before running an expensive preview
    /// unless the caller opted into auto-confirm.
    #[serde(default = "default_true")]
    pub confirm_expensive: bool,
}

fn default_summary_max_tokens() -> u32 {
    300
}

fn default_transcription_model() -> String {
    "openai/whisper-1".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            summary_model: "openai/gpt-4o-mini".to_string(),
            summary_max_tokens: default_summary_max_tokens(),
            transcription_model: default_transcription_model(),
            allowed_roots: Vec::new(),
            confirm_expensive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ragweave.db"),
        }
    }
}

/// The fully merged configuration used by every component.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunkers: ChunkersConfig,
    pub ingest: IngestConfig,
}

/// Raw layer read from a single YAML document; every field optional so that
/// layers can be partial and merged in precedence order.
#[derive(Debug, Clone, Deserialize, Default)]
struct PartialConfig {
    db: Option<DbConfig>,
    project: Option<ProjectConfig>,
    embedding: Option<EmbeddingConfig>,
    generation: Option<GenerationConfig>,
    retrieval: Option<RetrievalConfig>,
    chunkers: Option<ChunkersConfig>,
    ingest: Option<IngestConfig>,
}

fn parse_yaml_layer(text: &str) -> Result<PartialConfig> {
    // serde_yaml::from_str uses the safe loader: no arbitrary tag execution,
    // unlike e.g. a full YAML 1.1 loader with `!!python/object` support.
    serde_yaml::from_str(text).context("invalid YAML configuration")
}

fn read_layer(path: &Path) -> Result<Option<PartialConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    Some(parse_yaml_layer(&text)).transpose()
}

fn merge(base: &mut PartialConfig, overlay: PartialConfig) {
    if overlay.db.is_some() {
        base.db = overlay.db;
    }
    if overlay.project.is_some() {
        base.project = overlay.project;
    }
    if overlay.embedding.is_some() {
        base.embedding = overlay.embedding;
    }
    if overlay.generation.is_some() {
        base.generation = overlay.generation;
    }
    if overlay.retrieval.is_some() {
        base.retrieval = overlay.retrieval;
    }
    if overlay.chunkers.is_some() {
        base.chunkers = overlay.chunkers;
    }
    if overlay.ingest.is_some() {
        base.ingest = overlay.ingest;
    }
}

/// Environment variable overrides the core recognizes directly (outside the
/// credential variables, which the Gateway reads on its own).
fn apply_env_overrides(partial: &mut PartialConfig) {
    if let Ok(db_path) = std::env::var("RAGWEAVE_DB_PATH") {
        partial.db = Some(DbConfig {
            path: PathBuf::from(db_path),
        });
    }
    if let Ok(mode) = std::env::var("RAGWEAVE_RETRIEVAL_MODE") {
        let mode = match mode.as_str() {
            "hybrid" => RetrievalMode::Hybrid,
            "dense" => RetrievalMode::Dense,
            "bm25" => RetrievalMode::Bm25,
            _ => return,
        };
        let mut retrieval = partial.retrieval.clone().unwrap_or_default();
        retrieval.mode = mode;
        partial.retrieval = Some(retrieval);
    }
}

/// Load and merge the five precedence layers, then validate. `flags` carries
/// explicit invocation overrides (the highest-precedence layer); pass an
/// empty `PartialConfig`-shaped override via [`ConfigOverrides`] when there
/// are none.
pub fn load_config(
    overrides: &ConfigOverrides,
    project_config_path: Option<&Path>,
    global_config_path: Option<&Path>,
) -> Result<Config> {
    let mut merged = PartialConfig::default();

    if let Some(global) = global_config_path {
        if let Some(layer) = read_layer(global)? {
            merge(&mut merged, layer);
        }
    }
    if let Some(project) = project_config_path {
        if let Some(layer) = read_layer(project)? {
            merge(&mut merged, layer);
        }
    }
    apply_env_overrides(&mut merged);
    if let Some(layer) = overrides.0.clone() {
        merge(&mut merged, layer);
    }

    let embedding = merged
        .embedding
        .context("missing required section: embedding.model")?;
    let generation = merged
        .generation
        .context("missing required section: generation.model")?;
    let ingest = merged
        .ingest
        .context("missing required section: ingest.summary_model")?;

    let config = Config {
        db: merged.db.unwrap_or_default(),
        project: merged.project.unwrap_or_default(),
        embedding,
        generation,
        retrieval: merged.retrieval.unwrap_or_default(),
        chunkers: merged.chunkers.unwrap_or_default(),
        ingest,
    };

    validate(&config)?;
    Ok(config)
}

/// A caller-supplied top-precedence layer (explicit invocation flags).
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides(Option<PartialConfig>);

impl ConfigOverrides {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(Self(Some(parse_yaml_layer(text)?)))
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }
    if !config.embedding.model.contains('/') {
        bail!(
            "embedding.model '{}' must be named provider/model",
            config.embedding.model
        );
    }
    if !config.generation.model.contains('/') {
        bail!(
            "generation.model '{}' must be named provider/model",
            config.generation.model
        );
    }
    if config.retrieval.relevance_threshold > 10 {
        bail!("retrieval.relevance_threshold must be in 0..=10");
    }
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be at least 1");
    }
    if let Some(brief) = &config.project.brief {
        let as_str = brief.to_string_lossy();
        if as_str.contains("://") {
            bail!("project.brief must be a local file path, not a URL: {as_str}");
        }
    }
    Ok(())
}
