//! # ragweave
//!
//! **A local-first, grounded retrieval-augmented-generation core.**
//!
//! ragweave ingests heterogeneous documents into a per-project SQLite
//! store, retrieves against them with a hybrid BM25 + dense engine, and
//! assembles a trust-boundary-respecting prompt for a downstream generation
//! model. It is a library first; `ragweave-cli` is a thin driver over it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────────┐
//! │ Chunkers │──▶│  Ingest     │──▶│  SQLite   │◀──│  Retriever   │
//! │ md/pdf/… │   │ Orchestrator│   │ FTS5+Vec  │   │ BM25+Dense   │
//! └──────────┘   └─────┬──────┘   └───────────┘   └──────┬───────┘
//!                      │                                 │
//!                      ▼                                 ▼
//!               ┌─────────────┐                   ┌──────────────┐
//!               │  LLM Gateway│◀──────────────────│   Assembler   │
//!               └─────────────┘                   └──────┬───────┘
//!                                                         ▼
//!                                                  ┌──────────────┐
//!                                                  │  Generation   │
//!                                                  └──────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **Ingest Orchestrator** ([`ingest`]) validates a source path,
//!    computes its digest, decides whether to skip/replace/create, and
//!    dispatches to the matching **chunker** ([`chunk`]).
//! 2. Each chunk is context-prefixed and embedded through the **LLM
//!    Gateway** ([`gateway`]), then committed atomically to the
//!    **Knowledge Store** ([`store`]).
//! 3. The **Retriever** ([`retrieval`]) runs BM25 and dense channels in
//!    parallel, with optional HyDE expansion, fused by Reciprocal Rank
//!    Fusion.
//! 4. The **Context Assembler** ([`assembly`]) scores relevance, surfaces
//!    contradictions, packs chunks under a token budget, and renders the
//!    final prompt with an explicit untrusted-data boundary.
//! 5. The **Generation Driver** ([`generation`]) invokes the Gateway,
//!    attaches footnote attributions, and writes the result atomically.
//!
//! ## Quick Start
//!
//! ```bash
//! ragweave-cli init
//! ragweave-cli ingest notes.md
//! ragweave-cli retrieve "widget torque specification"
//! ragweave-cli generate --out answer.md "widget torque specification"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Layered YAML configuration parsing and validation |
//! | [`error`] | The structured `CoreError` taxonomy shared by every module |
//! | [`store`] | The Knowledge Store: schema, migrations, and the `Repository` |
//! | [`gateway`] | Provider-agnostic LLM capability (`complete`/`embed`/`transcribe`) |
//! | [`chunk`] | The Chunker Set: one implementation per source family |
//! | [`ingest`] | The Ingest Orchestrator: digest, dedup, chunk, embed, commit |
//! | [`retrieval`] | Hybrid BM25 + dense retrieval with HyDE and RRF |
//! | [`assembly`] | Relevance scoring, conflict detection, budgeted prompt assembly |
//! | [`generation`] | Invokes the Gateway and writes the attributed output |
//! | [`contracts`] | Narrow traits standing in for out-of-scope external systems |
//! | [`diagnostics`] | Ambient chunker-family usability reporting |
//! | [`stats`] | Read-only document/chunk/vector-index counts |
//!
//! ## Configuration
//!
//! ragweave is configured via layered YAML files (default: `ragweave.yaml`
//! per project, with a global file and environment overrides above it). See
//! [`config`] for the recognised sections and [`config::load_config`] for
//! precedence and validation rules.

pub mod assembly;
pub mod chunk;
pub mod config;
pub mod contracts;
pub mod diagnostics;
pub mod error;
pub mod gateway;
pub mod generation;
pub mod ingest;
pub mod retrieval;
pub mod stats;
pub mod store;
