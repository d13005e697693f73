use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // 确保使用create_if_missing选项
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(SqliteConnectOptions::new().filename(path).create_if_missing(true))
            .await?;

        info!("Database connected: {}", path.display());
        Ok(Self { pool })
    }

    /// Single-connection in-memory database.
    pub async fn memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id TEXT NOT NULL UNIQUE,
                doc_id TEXT NOT NULL,
                heading TEXT NOT NULL,
                content TEXT NOT NULL,
                full_content TEXT,
                page INTEGER NOT NULL,
                bbox TEXT,
                kind TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
            .execute(&self.pool)
            .await?;

        // Only the search text is indexed; rowid mirrors chunks.id
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                content,
                tokenize='porter unicode61 remove_diacritics 2'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
