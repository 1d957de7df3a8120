//! Indexing pipeline orchestration.
//!
//! Coordinates extraction → chunking → embedding → vector index for a batch
//! of uploaded files, one file at a time. A file that cannot be read,
//! embedded, or stored is recorded in the [`BatchReport`] and the batch
//! carries on with the entries of earlier files intact; only invalid
//! chunking parameters abort the whole batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use documind_core::chunk::split_pages;
use documind_core::embedding::Embedder;
use documind_core::models::{FileKind, SourceDocument, VectorIndexEntry};
use documind_core::store::VectorIndex;
use documind_core::{Error, Result};

use crate::config::Config;
use crate::extract::extract;

/// Result of indexing one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileOutcome {
    Indexed {
        pages: usize,
        chunks: usize,
        characters: usize,
    },
    Failed {
        kind: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub filename: String,
    /// Empty when the file could not even be read.
    pub document_id: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn is_indexed(&self) -> bool {
        matches!(self.outcome, FileOutcome::Indexed { .. })
    }
}

/// Aggregate counts over the successfully indexed files of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub documents: usize,
    pub chunks: usize,
    pub characters: usize,
    pub average_chunk_size: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub stats: BatchStats,
}

impl BatchReport {
    pub fn failed(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| !f.is_indexed())
    }

    fn push(&mut self, report: FileReport) {
        if let FileOutcome::Indexed {
            chunks, characters, ..
        } = report.outcome
        {
            self.stats.documents += 1;
            self.stats.chunks += chunks;
            self.stats.characters += characters;
            self.stats.average_chunk_size = if self.stats.chunks == 0 {
                0.0
            } else {
                self.stats.characters as f64 / self.stats.chunks as f64
            };
        }
        self.files.push(report);
    }
}

/// Runs uploads through the indexing pipeline into a shared index.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunk_size: usize,
    chunk_overlap: usize,
    batch_size: usize,
    max_file_bytes: u64,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        let defaults = Config::default();
        Self::from_config(&defaults, embedder, index)
    }

    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            embedder,
            index,
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            batch_size: config.embedding.batch_size.max(1),
            max_file_bytes: config.ingest.max_file_bytes,
        }
    }

    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Index every document, collecting per-file outcomes.
    ///
    /// Returns `Err` only for a chunking error, which is fatal to the batch.
    pub async fn index_batch(&self, documents: Vec<SourceDocument>) -> Result<BatchReport> {
        self.check_chunking()?;

        let mut report = BatchReport::default();
        for doc in documents {
            let outcome = self.outcome_for(&doc).await?;
            report.push(FileReport {
                filename: doc.filename.clone(),
                document_id: doc.id.clone(),
                outcome,
            });
        }

        log_batch(&report);
        Ok(report)
    }

    /// Read files from disk and index them one at a time.
    ///
    /// Directories are walked recursively and only files with a supported
    /// extension are taken from them; files named explicitly are always
    /// attempted. A file over `max_file_bytes` is rejected from its metadata
    /// without being read. Unreadable files are reported as extraction
    /// failures.
    pub async fn index_paths(&self, paths: &[PathBuf]) -> Result<BatchReport> {
        self.check_chunking()?;

        let mut report = BatchReport::default();
        for path in collect_files(paths) {
            let doc = match read_source(&path, self.max_file_bytes).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        kind = e.kind(),
                        error = %e,
                        "could not read file"
                    );
                    report.push(FileReport {
                        filename: display_name(&path),
                        document_id: String::new(),
                        outcome: FileOutcome::Failed {
                            kind: e.kind(),
                            message: e.to_string(),
                        },
                    });
                    continue;
                }
            };

            let outcome = self.outcome_for(&doc).await?;
            report.push(FileReport {
                filename: doc.filename.clone(),
                document_id: doc.id.clone(),
                outcome,
            });
        }

        log_batch(&report);
        Ok(report)
    }

    fn check_chunking(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Chunking("chunk_size must be > 0".to_string()));
        }
        Ok(())
    }

    /// Index one document. Failures other than chunking become a
    /// `Failed` outcome so the batch carries on.
    async fn outcome_for(&self, doc: &SourceDocument) -> Result<FileOutcome> {
        match self.index_document(doc).await {
            Ok(outcome) => Ok(outcome),
            Err(e @ Error::Chunking(_)) => Err(e),
            Err(e) => {
                warn!(file = %doc.filename, kind = e.kind(), error = %e, "failed to index file");
                Ok(FileOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Run one document through the pipeline and upsert its entries.
    pub async fn index_document(&self, doc: &SourceDocument) -> Result<FileOutcome> {
        if doc.bytes.len() as u64 > self.max_file_bytes {
            return Err(too_large(
                &doc.filename,
                doc.bytes.len() as u64,
                self.max_file_bytes,
            ));
        }
        let kind = doc
            .kind
            .ok_or_else(|| Error::UnsupportedFormat(doc.filename.clone()))?;

        let pages = extract(doc).await?;
        let mut chunks = split_pages(&doc.id, &pages, self.chunk_size, self.chunk_overlap)?;
        debug!(file = %doc.filename, pages = pages.len(), chunks = chunks.len(), "chunked");

        for group in chunks.chunks_mut(self.batch_size) {
            let texts: Vec<String> = group.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != group.len() {
                return Err(Error::Embedding(format!(
                    "expected {} vectors, got {}",
                    group.len(),
                    vectors.len()
                )));
            }
            for (chunk, vector) in group.iter_mut().zip(vectors) {
                chunk.vector = Some(vector);
            }
        }

        let entries: Vec<VectorIndexEntry> = chunks
            .iter()
            .filter_map(|c| VectorIndexEntry::from_chunk(c, &doc.filename, kind))
            .collect();
        self.index.upsert(&entries).await?;

        let characters = chunks.iter().map(|c| c.text.chars().count()).sum();
        info!(file = %doc.filename, pages = pages.len(), chunks = chunks.len(), "indexed");
        Ok(FileOutcome::Indexed {
            pages: pages.len(),
            chunks: chunks.len(),
            characters,
        })
    }
}

/// Read one file from disk, rejecting it from its metadata alone when it is
/// larger than `max_file_bytes`.
pub async fn read_source(path: &Path, max_file_bytes: u64) -> Result<SourceDocument> {
    let filename = display_name(path);
    let unreadable =
        |e: std::io::Error| Error::Extraction(format!("could not read {}: {}", path.display(), e));

    let len = tokio::fs::metadata(path).await.map_err(unreadable)?.len();
    if len > max_file_bytes {
        return Err(too_large(&filename, len, max_file_bytes));
    }
    let bytes = tokio::fs::read(path).await.map_err(unreadable)?;
    Ok(SourceDocument::new(filename, bytes))
}

fn too_large(filename: &str, len: u64, limit: u64) -> Error {
    Error::Extraction(format!(
        "{} is {} bytes, over the {} byte limit",
        filename, len, limit
    ))
}

fn log_batch(report: &BatchReport) {
    info!(
        documents = report.stats.documents,
        chunks = report.stats.chunks,
        failed = report.failed().count(),
        "batch indexed"
    );
}

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| FileKind::from_filename(&display_name(p)).is_some())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
