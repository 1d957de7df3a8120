use sqlx::SqlitePool;

/// On-disk schema version stored in `index_meta` and the manifest.
pub const SCHEMA_VERSION: u32 = 1;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Create meta table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create entries table. `seq` records first insertion and survives
    // upserts, which keeps similarity ties stable.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            document_id TEXT NOT NULL,
            document_name TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            file_kind TEXT NOT NULL,
            char_start INTEGER NOT NULL,
            char_end INTEGER NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_document_id ON entries(document_id)")
        .execute(pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES ('schema_version', ?)")
        .bind(SCHEMA_VERSION.to_string())
        .execute(pool)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES ('created_at', ?)")
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

    Ok(())
}

/// Read `index_meta.schema_version`, if present.
pub async fn schema_version(pool: &SqlitePool) -> Result<Option<String>, sqlx::Error> {
    meta_value(pool, "schema_version").await
}

pub async fn meta_value(pool: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
}

/// Store `value` under `key` unless a value is already there, then return
/// whichever value the table holds.
pub async fn meta_value_or_insert(
    pool: &SqlitePool,
    key: &str,
    value: &str,
) -> Result<String, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await
}
