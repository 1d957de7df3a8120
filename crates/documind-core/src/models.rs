//! Core data models shared by the indexing and query pipelines.
//!
//! Provenance flows one way: a [`Page`] comes out of an extractor, a
//! [`Chunk`] inherits its `(document_id, page_number)` from the page it was
//! cut from, a [`VectorIndexEntry`] persists that chunk, and a [`Citation`]
//! is built from the entry's metadata. Nothing downstream re-derives a page
//! number by searching text.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Namespace for deterministic chunk ids (UUIDv5).
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6d, 0x1f, 0x0c, 0x8e, 0x3b, 0x52, 0x4a, 0x7d, 0x9e, 0x21, 0x55, 0xc4, 0x0b, 0x8a, 0x6f, 0x13,
]);

/// Default number of retrieved chunks per query.
pub const DEFAULT_K: usize = 4;

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Pdf,
    Docx,
}

impl FileKind {
    /// Resolve the kind from a filename extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "text" | "md" => Some(FileKind::Text),
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Pdf => "pdf",
            FileKind::Docx => "docx",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(FileKind::Text),
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded file. Immutable once created.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Hex SHA-256 over `filename || 0x00 || bytes`.
    pub id: String,
    pub filename: String,
    /// Hex SHA-256 of the raw bytes alone.
    pub content_hash: String,
    /// `None` when the extension is not a supported format; the extractor
    /// reports that as an unsupported-format failure for this file only.
    pub kind: Option<FileKind>,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let content_hash = format!("{:x}", hasher.finalize());

        let mut hasher = Sha256::new();
        hasher.update(filename.as_bytes());
        hasher.update([0u8]);
        hasher.update(&bytes);
        let id = format!("{:x}", hasher.finalize());

        let kind = FileKind::from_filename(&filename);

        Self {
            id,
            filename,
            content_hash,
            kind,
            bytes,
        }
    }
}

/// One page of extracted text. `number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

/// A bounded span of a document's text with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub page_number: u32,
    /// Zero-based position within the document.
    pub chunk_index: u32,
    pub text: String,
    /// Character offsets `[char_start, char_end)` within the attributed page.
    pub char_start: usize,
    pub char_end: usize,
    /// Populated after embedding.
    pub vector: Option<Vec<f32>>,
}

/// Deterministic chunk id: UUIDv5 over `document_id:chunk_index`.
pub fn chunk_id(document_id: &str, chunk_index: u32) -> String {
    Uuid::new_v5(
        &CHUNK_ID_NAMESPACE,
        format!("{}:{}", document_id, chunk_index).as_bytes(),
    )
    .to_string()
}

/// Metadata persisted alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub document_id: String,
    pub document_name: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub text: String,
    pub file_kind: FileKind,
    pub char_start: usize,
    pub char_end: usize,
}

/// The persisted form of an embedded chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

impl VectorIndexEntry {
    /// Build an entry from an embedded chunk. Returns `None` if the chunk
    /// has no vector yet.
    pub fn from_chunk(chunk: &Chunk, document_name: &str, kind: FileKind) -> Option<Self> {
        let vector = chunk.vector.clone()?;
        Some(Self {
            id: chunk.id.clone(),
            vector,
            metadata: EntryMetadata {
                document_id: chunk.document_id.clone(),
                document_name: document_name.to_string(),
                page_number: chunk.page_number,
                chunk_index: chunk.chunk_index,
                text: chunk.text.clone(),
                file_kind: kind,
                char_start: chunk.char_start,
                char_end: chunk.char_end,
            },
        })
    }
}

/// A search hit: entry metadata plus cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub id: String,
    pub metadata: EntryMetadata,
    pub score: f32,
}

/// Summary of one indexed document, as reported by [`crate::store::VectorIndex::documents`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub document_name: String,
    pub chunks: usize,
    pub pages: usize,
}

/// A natural-language question.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub k: usize,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            k: DEFAULT_K,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
}

/// Retrieved chunks, descending by similarity, at most `k` long.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub items: Vec<ScoredEntry>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if some retrieved chunk came from `(document_name, page_number)`.
    pub fn contains_page(&self, document_name: &str, page_number: u32) -> bool {
        self.items.iter().any(|item| {
            item.metadata.document_name == document_name
                && item.metadata.page_number == page_number
        })
    }
}

/// Source reference attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub document_name: String,
    pub page_number: u32,
    pub excerpt: String,
}

/// A generated answer with its citations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}
