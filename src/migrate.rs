use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent — safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per ingested drawing; id is the content digest.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_filename TEXT NOT NULL,
            schema_version TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-derived-form state. (document_id, kind) is the idempotency key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            document_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            locator TEXT,
            error TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (document_id, kind),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            label TEXT NOT NULL,
            source_ref TEXT NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            truncated INTEGER NOT NULL DEFAULT 0,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            UNIQUE(document_id, chunk_type, source_ref),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS standards_clauses (
            id TEXT PRIMARY KEY,
            standard TEXT NOT NULL,
            clause_number TEXT NOT NULL,
            category TEXT,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            UNIQUE(standard, clause_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_chunk_type ON chunks(chunk_type)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_standards_clauses_standard ON standards_clauses(standard)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
