//! Vector index abstraction for DocuMind.
//!
//! The [`VectorIndex`] trait defines everything the indexing and query
//! pipelines need from similarity storage, enabling pluggable backends
//! (SQLite on disk, in-memory).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{DocumentSummary, EntryMetadata, ScoredEntry, VectorIndexEntry};

/// Record of an on-disk store that failed validation and was rebuilt empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryEvent {
    pub path: String,
    pub reason: String,
}

/// Abstract similarity index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace entries by id |
/// | [`search`](VectorIndex::search) | Top-k cosine similarity search |
/// | [`reset`](VectorIndex::reset) | Drop every entry and reinitialise |
/// | [`count`](VectorIndex::count) | Number of stored entries |
/// | [`documents`](VectorIndex::documents) | Per-document summaries |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries. Each entry is replaced atomically; an
    /// entry keeps its original insertion position when replaced.
    async fn upsert(&self, entries: &[VectorIndexEntry]) -> Result<()>;

    /// Return at most `k` entries by descending cosine similarity. Ties
    /// go to the entry inserted first.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>>;

    /// Irreversibly remove all entries and leave an empty, usable index.
    async fn reset(&self) -> Result<()>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize>;

    /// One summary per indexed document, in first-insertion order.
    async fn documents(&self) -> Result<Vec<DocumentSummary>>;

    /// The most recent corruption recovery performed by this handle, if any.
    fn last_recovery(&self) -> Option<RecoveryEvent> {
        None
    }
}

/// Score candidates against `query` and keep the best `k`.
///
/// Candidates must be supplied in insertion order; the sort is stable so
/// equal scores keep that order.
pub fn rank_by_similarity<I>(query: &[f32], candidates: I, k: usize) -> Vec<ScoredEntry>
where
    I: IntoIterator<Item = (String, EntryMetadata, Vec<f32>)>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .map(|(id, metadata, vector)| ScoredEntry {
            score: cosine_similarity(query, &vector),
            id,
            metadata,
        })
        .collect();

    scored.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));
    scored.truncate(k);
    scored
}

/// NaN scores sort below every real score.
fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// Reject a vector whose width differs from the vectors already indexed.
pub fn check_dims(indexed: usize, got: usize) -> Result<()> {
    if indexed == got {
        Ok(())
    } else {
        Err(Error::Embedding(format!(
            "vector has {} dimensions but the index holds {}-dimensional vectors; \
             reset the index after changing the embedding model",
            got, indexed
        )))
    }
}

/// Group entry metadata (in insertion order) into per-document summaries.
pub fn summarize_documents<'a, I>(entries: I) -> Vec<DocumentSummary>
where
    I: IntoIterator<Item = &'a EntryMetadata>,
{
    let mut order: Vec<String> = Vec::new();
    let mut acc: HashMap<String, (String, usize, BTreeSet<u32>)> = HashMap::new();

    for meta in entries {
        let slot = acc.entry(meta.document_id.clone()).or_insert_with(|| {
            order.push(meta.document_id.clone());
            (meta.document_name.clone(), 0, BTreeSet::new())
        });
        slot.1 += 1;
        slot.2.insert(meta.page_number);
    }

    order
        .into_iter()
        .filter_map(|id| {
            acc.remove(&id).map(|(name, chunks, pages)| DocumentSummary {
                document_id: id,
                document_name: name,
                chunks,
                pages: pages.len(),
            })
        })
        .collect()
}

/// Convert an entry into the tuple form accepted by [`rank_by_similarity`].
pub(crate) fn candidate(entry: &VectorIndexEntry) -> (String, EntryMetadata, Vec<f32>) {
    (
        entry.id.clone(),
        entry.metadata.clone(),
        entry.vector.clone(),
    )
}
