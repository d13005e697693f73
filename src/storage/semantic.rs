use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::database::Database;
use super::models::{SearchHit, StoredChunk};
use crate::chunker::Chunk;

/// 检索存储能力
#[async_trait]
pub trait SemanticStore: Send + Sync {
    /// Stores `chunks` under `doc_id`, replacing whatever the document had before.
    async fn add(&self, chunks: &[Chunk], doc_id: &str) -> Result<usize>;

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;

    /// Returns the number of chunks removed.
    async fn delete(&self, doc_id: &str) -> Result<u64>;

    async fn reset(&self) -> Result<()>;

    async fn list_all(&self, limit: usize) -> Result<Vec<StoredChunk>>;

    async fn count(&self, doc_id: &str) -> Result<i64>;
}

/// SQLite chunks table with an FTS5 index ranked by bm25.
pub struct SqliteSemanticStore {
    pool: SqlitePool,
}

impl SqliteSemanticStore {
    pub async fn new(db: &Database) -> Result<Self> {
        db.init_schema().await?;
        Ok(Self { pool: db.pool().clone() })
    }
}

#[async_trait]
impl SemanticStore for SqliteSemanticStore {
    async fn add(&self, chunks: &[Chunk], doc_id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE rowid IN (SELECT id FROM chunks WHERE doc_id = ?)")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        let replaced = sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if replaced > 0 {
            info!("Replacing {} existing chunks of {}", replaced, doc_id);
        }

        let now = chrono::Utc::now().to_rfc3339();
        for chunk in chunks {
            let row_id = sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, doc_id, heading, content, full_content, page, bbox, kind, source, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(doc_id)
            .bind(&chunk.heading)
            .bind(&chunk.content)
            .bind(&chunk.full_content)
            .bind(chunk.page as i64)
            .bind(chunk.bbox.map(|b| b.to_string()))
            .bind(chunk.kind.as_str())
            .bind(&chunk.source)
            .bind(&now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            sqlx::query("INSERT INTO chunks_fts (rowid, content) VALUES (?, ?)")
                .bind(row_id)
                .bind(&chunk.content)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!("Stored {} chunks for {}", chunks.len(), doc_id);
        Ok(chunks.len())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let Some(fts_query) = match_expression(query) else {
            debug!("query '{}' has no searchable terms", query);
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.doc_id, c.heading, c.content, c.full_content, c.page, c.bbox,
                   c.kind, c.source, c.created_at, bm25(chunks_fts) AS bm25_rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.rowid
            WHERE chunks_fts MATCH ?
            ORDER BY bm25_rank
            LIMIT ?
            "#,
        )
        .bind(&fts_query)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let rank: f64 = row.try_get("bm25_rank")?;
            let stored = StoredChunk {
                chunk_id: row.try_get("chunk_id")?,
                doc_id: row.try_get("doc_id")?,
                heading: row.try_get("heading")?,
                content: row.try_get("content")?,
                full_content: row.try_get("full_content")?,
                page: row.try_get("page")?,
                bbox: row.try_get("bbox")?,
                kind: row.try_get("kind")?,
                source: row.try_get("source")?,
                created_at: row.try_get("created_at")?,
            };
            hits.push(SearchHit {
                text: stored.display_text().to_string(),
                bbox: stored.bbox(),
                kind: stored.kind(),
                page: stored.page.max(1) as u32,
                chunk_id: stored.chunk_id,
                doc_id: stored.doc_id,
                heading: stored.heading,
                source: stored.source,
                // bm25 is lower-is-better and usually negative
                score: 1.0 / (1.0 + rank.abs()),
            });
        }

        debug!("search '{}' -> {} hits", query, hits.len());
        Ok(hits)
    }

    async fn delete(&self, doc_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts WHERE rowid IN (SELECT id FROM chunks WHERE doc_id = ?)")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!("Deleted {} chunks for {}", removed, doc_id);
        Ok(removed)
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        tx.commit().await?;
        info!("Semantic store reset");
        Ok(())
    }

    async fn list_all(&self, limit: usize) -> Result<Vec<StoredChunk>> {
        let chunks = sqlx::query_as::<_, StoredChunk>(
            r#"
            SELECT chunk_id, doc_id, heading, content, full_content, page, bbox, kind, source, created_at
            FROM chunks
            ORDER BY doc_id, id
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }

    async fn count(&self, doc_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Quotes every alphanumeric term and ORs them; `None` when nothing is left.
fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{BBox, UnitKind};

    async fn store() -> SqliteSemanticStore {
        let db = Database::memory().await.unwrap();
        SqliteSemanticStore::new(&db).await.unwrap()
    }

    fn chunk(content: &str, full: Option<&str>) -> Chunk {
        Chunk {
            heading: "Results".into(),
            content: content.into(),
            full_content: full.map(str::to_string),
            page: 2,
            bbox: Some(BBox::new(10.0, 20.0, 30.0, 40.0)),
            kind: if full.is_some() { UnitKind::Table } else { UnitKind::Text },
            source: "layout".into(),
        }
    }

    #[test]
    fn match_expression_quotes_terms() {
        assert_eq!(match_expression("Revenue, Q1?").as_deref(), Some("\"revenue\" OR \"q1\""));
        assert_eq!(match_expression("  ?! "), None);
    }

    #[tokio::test]
    async fn search_substitutes_full_content() {
        let store = store().await;
        let table = "| Region | Q1 |\n| --- | --- |\n| North | 10 |";
        store
            .add(
                &[
                    chunk("LLM Summary: revenue rose in the north.", Some(table)),
                    chunk("Unrelated paragraph about staffing.", None),
                ],
                "report",
            )
            .await
            .unwrap();

        let hits = store.search("revenue north", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, table);
        assert_eq!(hits[0].doc_id, "report");
        assert_eq!(hits[0].page, 2);
        assert_eq!(hits[0].bbox, Some(BBox::new(10.0, 20.0, 30.0, 40.0)));
        assert_eq!(hits[0].kind, Some(UnitKind::Table));
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn re_adding_replaces_document_chunks() {
        let store = store().await;
        store.add(&[chunk("first version", None), chunk("more", None)], "doc").await.unwrap();
        store.add(&[chunk("second version", None)], "doc").await.unwrap();

        assert_eq!(store.count("doc").await.unwrap(), 1);
        assert!(store.search("first", 5).await.unwrap().is_empty());
        assert_eq!(store.search("second", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_and_reset_empty_the_index() {
        let store = store().await;
        store.add(&[chunk("alpha text", None)], "a").await.unwrap();
        store.add(&[chunk("beta text", None)], "b").await.unwrap();

        assert_eq!(store.delete("a").await.unwrap(), 1);
        assert_eq!(store.count("a").await.unwrap(), 0);
        assert!(store.search("alpha", 5).await.unwrap().is_empty());
        assert_eq!(store.search("text", 5).await.unwrap().len(), 1);

        store.reset().await.unwrap();
        assert!(store.list_all(1000).await.unwrap().is_empty());
        assert!(store.search("text", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_all_respects_limit() {
        let store = store().await;
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk(&format!("chunk {}", i), None)).collect();
        store.add(&chunks, "doc").await.unwrap();

        let listed = store.list_all(3).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|c| c.doc_id == "doc" && c.heading == "Results"));
    }
}
