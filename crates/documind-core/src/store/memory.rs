//! In-memory [`VectorIndex`] implementation for tests and embedding hosts.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`, so insertion order
//! is the vector order. Search is brute-force cosine similarity. The first
//! stored vector fixes the index width until the next reset.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{DocumentSummary, ScoredEntry, VectorIndexEntry};

use super::{candidate, check_dims, rank_by_similarity, summarize_documents, VectorIndex};

/// Volatile vector index. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<Vec<VectorIndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Index("in-memory index lock poisoned".to_string())
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, entries: &[VectorIndexEntry]) -> Result<()> {
        let mut stored = self.entries.write().map_err(poisoned)?;
        let width = stored
            .first()
            .or_else(|| entries.first())
            .map(|e| e.vector.len());
        if let Some(width) = width {
            for entry in entries {
                check_dims(width, entry.vector.len())?;
            }
        }
        for entry in entries {
            match stored.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => stored.push(entry.clone()),
            }
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        let stored = self.entries.read().map_err(poisoned)?;
        if let Some(first) = stored.first() {
            check_dims(first.vector.len(), vector.len())?;
        }
        Ok(rank_by_similarity(vector, stored.iter().map(candidate), k))
    }

    async fn reset(&self) -> Result<()> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }

    async fn documents(&self) -> Result<Vec<DocumentSummary>> {
        let stored = self.entries.read().map_err(poisoned)?;
        Ok(summarize_documents(stored.iter().map(|e| &e.metadata)))
    }
}
