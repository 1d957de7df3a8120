//! # DocuMind Core
//!
//! Runtime-agnostic logic for DocuMind: data models, the error taxonomy,
//! page-aware chunking, the embedding and vector-index traits, and the
//! generation bridge protocol.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! Those live in the `documind` app crate and the `documind-worker` binary.

pub mod bridge;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod prompt;
pub mod protocol;
pub mod store;

pub use error::{Error, Result};
