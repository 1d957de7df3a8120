//! # DocuMind
//!
//! Question answering over uploaded documents with page-accurate citations.
//!
//! DocuMind extracts text from plain text, PDF and DOCX files page by page,
//! cuts it into overlapping chunks, embeds them into a persistent similarity
//! index, and answers questions by retrieving the closest chunks and handing
//! them to a generation backend that runs in its own process.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Extract  │──▶│ Chunk+Embed  │──▶│ SQLite index │
//! │ txt/pdf/ │   │              │   │ (recovering) │
//! │ docx     │   └──────────────┘   └──────┬───────┘
//! └──────────┘                             │
//!                   ┌──────────────────────┤
//!                   ▼                      ▼
//!             ┌───────────┐  JSON   ┌──────────────┐
//!             │ Query     │────────▶│ dmind-worker │
//!             │ pipeline  │◀────────│ (Ollama)     │
//!             └───────────┘         └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dmind index ./papers              # index a directory
//! dmind ask "What color is the sky?"
//! dmind search "sky" --k 8          # retrieval only
//! dmind summarize report.pdf       # summary of one file
//! dmind check                       # is the generation backend reachable?
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Page-aware text extraction |
//! | [`embedding`] | HTTP embedding providers |
//! | [`sqlite_index`] | Persistent vector index with recovery |
//! | [`bridge`] | Subprocess generation bridge |
//! | [`ingest`] | Batch indexing pipeline |
//! | [`query`] | Query state machine |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod bridge;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod query;
pub mod sqlite_index;
