use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Every statement is idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per chunk; metadata is the flat map, embedding is f32 LE bytes.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Which embedder produced the stored vectors.
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

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_filename ON chunks(filename)")
        .execute(pool)
        .await?;

    Ok(())
}
