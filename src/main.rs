//! # ragweave-cli
//!
//! A thin command-line driver over the [`ragweave`] library: `init`,
//! `ingest`, `retrieve`, and `generate`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use ragweave::assembly::assemble_context;
use ragweave::config::{load_config, ConfigOverrides, Config};
use ragweave::contracts::{FileProjectBrief, StaticFeatureSpec};
use ragweave::gateway::openai::OpenAiGateway;
use ragweave::gateway::LlmGateway;
use ragweave::generation::{generate, write_atomic};
use ragweave::ingest::ingest_source;
use ragweave::retrieval::retrieve;
use ragweave::store::{db, migrate, Repository};

#[derive(Parser)]
#[command(
    name = "ragweave-cli",
    about = "ragweave — a local-first, grounded retrieval-augmented-generation core",
    version
)]
struct Cli {
    /// Path to the per-project YAML configuration file
    #[arg(long, global = true, default_value = "./ragweave.yaml")]
    config: PathBuf,

    /// Path to the global YAML configuration file
    #[arg(long, global = true)]
    global_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply all migrations
    Init,

    /// Ingest a single source file
    Ingest {
        /// Path to the source file, relative to an allowed root
        path: PathBuf,

        /// Skip the cost-preview confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Run hybrid retrieval for a query and print the ranked chunks
    Retrieve {
        query: String,
    },

    /// Retrieve, assemble, and generate a document for a query
    Generate {
        query: String,

        /// Write the generated document to this path instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Confirm overwriting an existing output file
        #[arg(long)]
        yes: bool,

        /// Opaque feature-spec text to include in the prompt verbatim
        #[arg(long, default_value = "")]
        feature_spec: String,
    },
}

fn init_logging() {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load_cli_config(cli: &Cli) -> anyhow::Result<Config> {
    load_config(
        &ConfigOverrides::none(),
        Some(cli.config.as_path()),
        cli.global_config.as_deref(),
    )
}

async fn open_repository(config: &Config) -> anyhow::Result<Repository> {
    let pool = db::connect(config).await?;
    migrate::run(&pool).await?;
    Ok(Repository::new(pool))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_cli_config(&cli)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run(&pool).await?;
            println!("Database initialized at {}.", config.db.path.display());
        }

        Commands::Ingest { path, yes } => {
            let repository = open_repository(&config).await?;
            let gateway: Arc<dyn LlmGateway> = Arc::new(OpenAiGateway::new());
            let raw_path = path.to_string_lossy().to_string();

            // Web fetches and remote vcs clones acquire their own bytes;
            // only a local path needs a local read here.
            let raw_bytes = if ragweave::ingest::is_remote_source(&raw_path) {
                None
            } else {
                Some(std::fs::read(&path)?)
            };

            if config.ingest.confirm_expensive && !yes {
                let size_note = raw_bytes
                    .as_ref()
                    .map(|b| format!("{} bytes", b.len()))
                    .unwrap_or_else(|| "fetched remotely".to_string());
                eprintln!(
                    "About to ingest {} ({size_note}). Re-run with --yes to skip this check.",
                    path.display()
                );
                return Ok(());
            }

            let outcome = ingest_source(&repository, gateway, &config, &raw_path, raw_bytes.as_deref())
                .await?;
            println!("{outcome:?}");
        }

        Commands::Retrieve { query } => {
            let repository = open_repository(&config).await?;
            let gateway = OpenAiGateway::new();
            let outcome = retrieve(&repository, &gateway, &config, &query).await?;
            if outcome.warnings.hyde_fallback {
                eprintln!("warning: HyDE expansion failed; fell back to the raw query");
            }
            for retrieved in &outcome.chunks {
                println!(
                    "{:.4}  {}#{}  {}",
                    retrieved.score,
                    retrieved.chunk.source_path,
                    retrieved.chunk.ordinal,
                    truncate(&retrieved.chunk.text, 120)
                );
            }
        }

        Commands::Generate { query, out, yes, feature_spec } => {
            let repository = open_repository(&config).await?;
            let gateway = OpenAiGateway::new();
            let retrieved = retrieve(&repository, &gateway, &config, &query).await?;

            let brief_source = FileProjectBrief {
                path: config.project.brief.clone(),
            };
            let feature_spec_source = StaticFeatureSpec(feature_spec);

            let assembled = assemble_context(
                &repository,
                &gateway,
                &config,
                &query,
                retrieved.chunks,
                &brief_source,
                &feature_spec_source,
            )
            .await?;

            if !assembled.conflicts.is_empty() {
                eprintln!("warning: {} conflicting source pairs detected", assembled.conflicts.len());
            }
            if let Some(warning) = &assembled.budget_warning {
                eprintln!("warning: {warning}");
            }

            let document = generate(&gateway, &config.generation.model, &assembled).await?;

            match out {
                Some(path) => {
                    let project_root = std::env::current_dir()?;
                    write_atomic(&path, &project_root, &document.text, yes)?;
                    println!("Wrote {}.", path.display());
                }
                None => println!("{}", document.text),
            }
        }
    }

    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect::<String>() + "…"
    }
}
