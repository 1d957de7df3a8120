//! SQLite-backed [`VectorIndex`] with corruption recovery.
//!
//! An index is a directory holding two files:
//!
//! | File | Contents |
//! |------|----------|
//! | `MANIFEST.json` | `{"format":"documind-index","schema_version":1}` |
//! | `index.sqlite` | `index_meta` and `entries` tables (WAL, `synchronous=FULL`) |
//!
//! The directory is opened on first use and validated before anything else
//! touches it: the manifest must parse and match, `PRAGMA quick_check` must
//! report `ok`, and `index_meta.schema_version` must match. A store that
//! fails any check is logged as `index_corruption_recovered`, deleted, and
//! recreated empty. The manifest is written last on initialisation, so a
//! half-created directory also fails validation.
//!
//! The first upsert records the vector width (and the embedding model, when
//! the handle was given one) in `index_meta`. Later upserts and searches
//! with a different width or model fail with an embedding error instead of
//! scoring unrelated vectors.
//!
//! `reset()` holds the handle's write lock; every other operation holds the
//! read lock. Each upsert statement commits on its own. A directory that
//! holds other files but no index is never opened, recovered, or reset.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use documind_core::embedding::{blob_to_vec, vec_to_blob};
use documind_core::models::{
    DocumentSummary, EntryMetadata, FileKind, ScoredEntry, VectorIndexEntry,
};
use documind_core::store::{check_dims, rank_by_similarity, RecoveryEvent, VectorIndex};
use documind_core::{Error, Result};

use crate::db;
use crate::migrate::{self, SCHEMA_VERSION};

pub const MANIFEST_FILE: &str = "MANIFEST.json";
pub const DB_FILE: &str = "index.sqlite";
const FORMAT_NAME: &str = "documind-index";
const META_DIMS: &str = "embedding_dims";
const META_MODEL: &str = "embedding_model";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Manifest {
    format: String,
    schema_version: u32,
}

impl Manifest {
    fn current() -> Self {
        Self {
            format: FORMAT_NAME.to_string(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

fn index_err(e: impl std::fmt::Display) -> Error {
    Error::Index(e.to_string())
}

/// Embedding recorded by the first upsert into an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedEmbedding {
    pub model: Option<String>,
    pub dims: usize,
}

/// Persistent vector index rooted at one directory.
///
/// Many handles may coexist as long as they point at different
/// directories.
pub struct SqliteVectorIndex {
    dir: PathBuf,
    embedding_model: Option<String>,
    pool: RwLock<Option<SqlitePool>>,
    last_recovery: Mutex<Option<RecoveryEvent>>,
}

impl SqliteVectorIndex {
    /// Create a handle. No I/O happens until the first operation.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            embedding_model: None,
            pool: RwLock::new(None),
            last_recovery: Mutex::new(None),
        }
    }

    /// Tie the index to one embedding model. An index built with another
    /// model refuses upserts and searches from this handle.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into()).filter(|m| !m.is_empty());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The embedding the stored vectors were built with, once anything has
    /// been indexed.
    pub async fn embedding(&self) -> Result<Option<IndexedEmbedding>> {
        let pool = self.handle().await?;
        let dims = match stored_dims(&pool).await? {
            Some(dims) => dims,
            None => return Ok(None),
        };
        let model = migrate::meta_value(&pool, META_MODEL)
            .await
            .map_err(index_err)?;
        Ok(Some(IndexedEmbedding { model, dims }))
    }

    /// Open (and if needed, recover) the store now instead of on first use.
    pub async fn open(&self) -> Result<()> {
        self.handle().await.map(|_| ())
    }

    /// Close the underlying pool. A later operation reopens it.
    pub async fn close(&self) {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
            debug!(dir = %self.dir.display(), "index closed");
        }
    }

    /// Read access to an open, validated pool.
    async fn handle(&self) -> Result<RwLockReadGuard<'_, SqlitePool>> {
        {
            let guard = self.pool.read().await;
            if guard.is_some() {
                return RwLockReadGuard::try_map(guard, |p| p.as_ref())
                    .map_err(|_| Error::Index("index handle closed".to_string()));
            }
        }

        let mut guard = self.pool.write().await;
        if guard.is_none() {
            *guard = Some(self.open_validated().await?);
        }
        RwLockReadGuard::try_map(guard.downgrade(), |p| p.as_ref())
            .map_err(|_| Error::Index("index handle closed".to_string()))
    }

    async fn open_validated(&self) -> Result<SqlitePool> {
        if !self.has_store_files() {
            self.ensure_not_foreign()?;
            return self.initialise().await;
        }

        match self.validate().await {
            Ok(pool) => Ok(pool),
            Err(reason) => {
                warn!(
                    event = "index_corruption_recovered",
                    path = %self.dir.display(),
                    reason = %reason,
                    "index_corruption_recovered"
                );
                self.record_recovery(RecoveryEvent {
                    path: self.dir.display().to_string(),
                    reason,
                });
                remove_dir(&self.dir)?;
                self.initialise().await
            }
        }
    }

    fn has_store_files(&self) -> bool {
        self.dir.join(MANIFEST_FILE).exists() || self.dir.join(DB_FILE).exists()
    }

    /// Refuse a non-empty directory that holds no index files.
    fn ensure_not_foreign(&self) -> Result<()> {
        if !self.has_store_files() && dir_has_entries(&self.dir)? {
            return Err(Error::Index(format!(
                "{} exists but is not a documind index",
                self.dir.display()
            )));
        }
        Ok(())
    }

    /// Check `dims` (and this handle's model) against what the index was
    /// built with. With `record`, an index that has no embedding yet adopts
    /// them.
    async fn check_embedding(
        &self,
        pool: &SqlitePool,
        dims: usize,
        record: bool,
    ) -> Result<()> {
        let indexed = if record {
            let value = migrate::meta_value_or_insert(pool, META_DIMS, &dims.to_string())
                .await
                .map_err(index_err)?;
            Some(parse_dims(&value)?)
        } else {
            stored_dims(pool).await?
        };
        if let Some(indexed) = indexed {
            check_dims(indexed, dims)?;
        }

        let Some(model) = &self.embedding_model else {
            return Ok(());
        };
        let stored = if record {
            Some(
                migrate::meta_value_or_insert(pool, META_MODEL, model)
                    .await
                    .map_err(index_err)?,
            )
        } else {
            migrate::meta_value(pool, META_MODEL)
                .await
                .map_err(index_err)?
        };
        match stored {
            Some(stored) if stored != *model => Err(Error::Embedding(format!(
                "index was built with embedding model {:?} but {:?} is configured; \
                 reset the index after changing the embedding model",
                stored, model
            ))),
            _ => Ok(()),
        }
    }

    /// Run every integrity check; the error string is the recovery reason.
    async fn validate(&self) -> std::result::Result<SqlitePool, String> {
        let raw = std::fs::read_to_string(self.dir.join(MANIFEST_FILE))
            .map_err(|e| format!("manifest unreadable: {}", e))?;
        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|e| format!("manifest invalid: {}", e))?;
        if manifest != Manifest::current() {
            return Err(format!(
                "manifest mismatch: format {:?}, schema_version {}",
                manifest.format, manifest.schema_version
            ));
        }

        let db_path = self.dir.join(DB_FILE);
        if !db_path.exists() {
            return Err("database file missing".to_string());
        }
        let pool = db::connect(&db_path, false)
            .await
            .map_err(|e| format!("database unopenable: {}", e))?;

        match check_database(&pool).await {
            Ok(()) => Ok(pool),
            Err(reason) => {
                pool.close().await;
                Err(reason)
            }
        }
    }

    async fn initialise(&self) -> Result<SqlitePool> {
        std::fs::create_dir_all(&self.dir).map_err(index_err)?;
        let pool = db::connect(&self.dir.join(DB_FILE), true)
            .await
            .map_err(index_err)?;
        migrate::run_migrations(&pool).await.map_err(index_err)?;
        write_manifest(&self.dir)?;
        info!(dir = %self.dir.display(), "initialised empty index");
        Ok(pool)
    }

    fn record_recovery(&self, event: RecoveryEvent) {
        if let Ok(mut slot) = self.last_recovery.lock() {
            *slot = Some(event);
        }
    }
}

async fn check_database(pool: &SqlitePool) -> std::result::Result<(), String> {
    let status: String = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_one(pool)
        .await
        .map_err(|e| format!("quick_check failed: {}", e))?;
    if status != "ok" {
        return Err(format!("quick_check reported: {}", status));
    }

    let version = migrate::schema_version(pool)
        .await
        .map_err(|e| format!("index_meta unreadable: {}", e))?;
    match version {
        Some(v) if v == SCHEMA_VERSION.to_string() => Ok(()),
        Some(v) => Err(format!("schema_version {} does not match", v)),
        None => Err("schema_version missing".to_string()),
    }
}

fn write_manifest(dir: &Path) -> Result<()> {
    let json = serde_json::to_vec(&Manifest::current()).map_err(index_err)?;
    let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp).map_err(index_err)?;
        file.write_all(&json).map_err(index_err)?;
        file.sync_all().map_err(index_err)?;
    }
    std::fs::rename(&tmp, dir.join(MANIFEST_FILE)).map_err(index_err)?;
    Ok(())
}

async fn stored_dims(pool: &SqlitePool) -> Result<Option<usize>> {
    match migrate::meta_value(pool, META_DIMS)
        .await
        .map_err(index_err)?
    {
        Some(value) => parse_dims(&value).map(Some),
        None => Ok(None),
    }
}

fn parse_dims(value: &str) -> Result<usize> {
    value.parse().map_err(|_| {
        Error::Index(format!(
            "index_meta {} is not a number: {:?}",
            META_DIMS, value
        ))
    })
}

fn dir_has_entries(dir: &Path) -> Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(index_err(e)),
    }
}

fn remove_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(index_err(e)),
    }
}

fn row_metadata(row: &sqlx::sqlite::SqliteRow) -> EntryMetadata {
    let page_number: i64 = row.get("page_number");
    let chunk_index: i64 = row.get("chunk_index");
    let char_start: i64 = row.get("char_start");
    let char_end: i64 = row.get("char_end");
    let file_kind: String = row.get("file_kind");
    EntryMetadata {
        document_id: row.get("document_id"),
        document_name: row.get("document_name"),
        page_number: page_number as u32,
        chunk_index: chunk_index as u32,
        text: row.get("text"),
        file_kind: FileKind::parse(&file_kind).unwrap_or(FileKind::Text),
        char_start: char_start as usize,
        char_end: char_end as usize,
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, entries: &[VectorIndexEntry]) -> Result<()> {
        let pool = self.handle().await?;
        let Some(first) = entries.first() else {
            return Ok(());
        };
        let width = first.vector.len();
        for entry in entries {
            check_dims(width, entry.vector.len())?;
        }
        self.check_embedding(&pool, width, true).await?;
        let now = chrono::Utc::now().timestamp();

        for entry in entries {
            let meta = &entry.metadata;
            sqlx::query(
                r#"
                INSERT INTO entries (id, document_id, document_name, page_number, chunk_index,
                                     text, file_kind, char_start, char_end, dims, embedding,
                                     indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    document_id = excluded.document_id,
                    document_name = excluded.document_name,
                    page_number = excluded.page_number,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    file_kind = excluded.file_kind,
                    char_start = excluded.char_start,
                    char_end = excluded.char_end,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(&entry.id)
            .bind(&meta.document_id)
            .bind(&meta.document_name)
            .bind(meta.page_number as i64)
            .bind(meta.chunk_index as i64)
            .bind(&meta.text)
            .bind(meta.file_kind.as_str())
            .bind(meta.char_start as i64)
            .bind(meta.char_end as i64)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .bind(now)
            .execute(&*pool)
            .await
            .map_err(index_err)?;
        }

        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        let pool = self.handle().await?;
        if k == 0 {
            return Ok(Vec::new());
        }
        self.check_embedding(&pool, vector.len(), false).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, document_id, document_name, page_number, chunk_index, text,
                   file_kind, char_start, char_end, embedding
            FROM entries
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&*pool)
        .await
        .map_err(index_err)?;

        let candidates = rows.iter().map(|row| {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            (id, row_metadata(row), blob_to_vec(&blob))
        });

        Ok(rank_by_similarity(vector, candidates, k))
    }

    async fn reset(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if guard.is_none() {
            self.ensure_not_foreign()?;
        }
        if let Some(pool) = guard.take() {
            pool.close().await;
        }
        remove_dir(&self.dir)?;
        *guard = Some(self.initialise().await?);
        info!(dir = %self.dir.display(), "index reset");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let pool = self.handle().await?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&*pool)
            .await
            .map_err(index_err)?;
        Ok(n as usize)
    }

    async fn documents(&self) -> Result<Vec<DocumentSummary>> {
        let pool = self.handle().await?;
        let rows = sqlx::query(
            r#"
            SELECT document_id,
                   MIN(document_name) AS document_name,
                   COUNT(*) AS chunks,
                   COUNT(DISTINCT page_number) AS pages,
                   MIN(seq) AS first_seq
            FROM entries
            GROUP BY document_id
            ORDER BY first_seq ASC
            "#,
        )
        .fetch_all(&*pool)
        .await
        .map_err(index_err)?;

        Ok(rows
            .iter()
            .map(|row| {
                let chunks: i64 = row.get("chunks");
                let pages: i64 = row.get("pages");
                DocumentSummary {
                    document_id: row.get("document_id"),
                    document_name: row.get("document_name"),
                    chunks: chunks as usize,
                    pages: pages as usize,
                }
            })
            .collect())
    }

    fn last_recovery(&self) -> Option<RecoveryEvent> {
        self.last_recovery.lock().ok().and_then(|slot| slot.clone())
    }
}
