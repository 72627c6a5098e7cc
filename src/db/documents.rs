//! Document and extracted text database operations

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::Result;

/// Longest text stored per extraction, in characters
pub const MAX_TEXT_LEN: usize = 1000;

/// Uploaded document record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: i64,
    pub name: String,
    pub date: DateTime<Utc>,
}

/// Text extracted from a document by one OCR run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentText {
    pub id: i64,
    pub document_id: i64,
    pub text: String,
}

/// Document repository
pub struct DocumentRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DocumentRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Start a transaction for multi-row changes
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Get a document by ID
    pub async fn get(&self, id: i64) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(
            "SELECT id, name, date FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(document)
    }

    pub async fn exists(&self, id: i64) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(found.is_some())
    }

    /// List all documents, newest first
    pub async fn list(&self) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(
            "SELECT id, name, date FROM documents ORDER BY date DESC, id DESC",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(documents)
    }

    /// All document names, i.e. every storage key that is still referenced
    pub async fn names(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM documents")
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// List extracted texts for a document in insertion order
    ///
    /// An empty list does not mean the document is missing; use
    /// [`exists`](Self::exists) to tell the two apart.
    pub async fn list_texts(&self, document_id: i64) -> Result<Vec<DocumentText>> {
        let texts = sqlx::query_as::<_, DocumentText>(
            r#"
            SELECT id, document_id, text
            FROM documents_text
            WHERE document_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(self.pool)
        .await?;

        Ok(texts)
    }

    pub async fn count_texts(&self, document_id: i64) -> Result<i64> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM documents_text WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(self.pool)
                .await?;

        Ok(result.0)
    }

    /// Transaction-aware document insert
    pub async fn create_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        name: &str,
        date: DateTime<Utc>,
    ) -> Result<Document> {
        let document = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents (name, date)
            VALUES (?, ?)
            RETURNING id, name, date
            "#,
        )
        .bind(name)
        .bind(date)
        .fetch_one(&mut **tx)
        .await?;

        Ok(document)
    }

    /// Transaction-aware variant of [`get`](Self::get)
    pub async fn get_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(
            "SELECT id, name, date FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(document)
    }

    /// Delete every extracted text of a document
    pub async fn delete_texts_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        document_id: i64,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents_text WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete the document row itself
    pub async fn delete_tx(&self, tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert one extracted text
    ///
    /// Callers are expected to bound `text` to [`MAX_TEXT_LEN`] characters.
    pub async fn insert_text_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        document_id: i64,
        text: &str,
    ) -> Result<DocumentText> {
        let document_text = sqlx::query_as::<_, DocumentText>(
            r#"
            INSERT INTO documents_text (document_id, text)
            VALUES (?, ?)
            RETURNING id, document_id, text
            "#,
        )
        .bind(document_id)
        .bind(text)
        .fetch_one(&mut **tx)
        .await?;

        Ok(document_text)
    }
}

/// Cut `text` down to at most [`MAX_TEXT_LEN`] characters
pub fn bound_text(text: &str) -> &str {
    match text.char_indices().nth(MAX_TEXT_LEN) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use tempfile::TempDir;

    async fn create(repo: &DocumentRepository<'_>, name: &str) -> Document {
        let mut tx = repo.begin().await.unwrap();
        let document = repo.create_tx(&mut tx, name, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();
        document
    }

    async fn add_text(repo: &DocumentRepository<'_>, document_id: i64, text: &str) -> DocumentText {
        let mut tx = repo.begin().await.unwrap();
        let row = repo.insert_text_tx(&mut tx, document_id, text).await.unwrap();
        tx.commit().await.unwrap();
        row
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let pool = test_pool(&temp_dir).await;
        let repo = DocumentRepository::new(&pool);

        let created = create(&repo, "a.png").await;
        assert!(created.id > 0);

        let fetched = repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "a.png");
        assert_eq!(fetched.date.timestamp(), created.date.timestamp());
        assert!(repo.exists(created.id).await.unwrap());
        assert!(repo.get(created.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_name_is_unique() {
        let temp_dir = TempDir::new().unwrap();
        let pool = test_pool(&temp_dir).await;
        let repo = DocumentRepository::new(&pool);

        create(&repo, "dup.png").await;

        let mut tx = repo.begin().await.unwrap();
        let result = repo.create_tx(&mut tx, "dup.png", Utc::now()).await;
        assert!(result.is_err());
        tx.rollback().await.unwrap();

        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_insert() {
        let temp_dir = TempDir::new().unwrap();
        let pool = test_pool(&temp_dir).await;
        let repo = DocumentRepository::new(&pool);

        let mut tx = repo.begin().await.unwrap();
        let document = repo.create_tx(&mut tx, "gone.png", Utc::now()).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(repo.get(document.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_texts_in_insertion_order() {
        let temp_dir = TempDir::new().unwrap();
        let pool = test_pool(&temp_dir).await;
        let repo = DocumentRepository::new(&pool);

        let document = create(&repo, "b.png").await;
        assert!(repo.list_texts(document.id).await.unwrap().is_empty());

        add_text(&repo, document.id, "first").await;
        add_text(&repo, document.id, "second").await;
        // Duplicate content is a new row, not an update
        add_text(&repo, document.id, "second").await;

        let texts = repo.list_texts(document.id).await.unwrap();
        let values: Vec<&str> = texts.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(values, vec!["first", "second", "second"]);
        assert!(texts.iter().all(|t| t.document_id == document.id));
        assert_eq!(repo.count_texts(document.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_text_requires_document() {
        let temp_dir = TempDir::new().unwrap();
        let pool = test_pool(&temp_dir).await;
        let repo = DocumentRepository::new(&pool);

        let mut tx = repo.begin().await.unwrap();
        assert!(repo.insert_text_tx(&mut tx, 42, "orphan").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_texts_then_document() {
        let temp_dir = TempDir::new().unwrap();
        let pool = test_pool(&temp_dir).await;
        let repo = DocumentRepository::new(&pool);

        let keep = create(&repo, "keep.png").await;
        let doomed = create(&repo, "doomed.png").await;
        add_text(&repo, keep.id, "stays").await;
        add_text(&repo, doomed.id, "one").await;
        add_text(&repo, doomed.id, "two").await;

        let mut tx = repo.begin().await.unwrap();
        assert_eq!(repo.delete_texts_tx(&mut tx, doomed.id).await.unwrap(), 2);
        assert!(repo.delete_tx(&mut tx, doomed.id).await.unwrap());
        tx.commit().await.unwrap();

        assert!(!repo.exists(doomed.id).await.unwrap());
        assert_eq!(repo.count_texts(doomed.id).await.unwrap(), 0);
        assert_eq!(repo.count_texts(keep.id).await.unwrap(), 1);

        let mut tx = repo.begin().await.unwrap();
        assert!(!repo.delete_tx(&mut tx, doomed.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_names() {
        let temp_dir = TempDir::new().unwrap();
        let pool = test_pool(&temp_dir).await;
        let repo = DocumentRepository::new(&pool);

        create(&repo, "x.png").await;
        create(&repo, "y.jpg").await;

        let names = repo.names().await.unwrap();
        assert!(names.contains("x.png"));
        assert!(names.contains("y.jpg"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_bound_text() {
        assert_eq!(bound_text("short"), "short");

        let long: String = "ж".repeat(MAX_TEXT_LEN + 10);
        let bounded = bound_text(&long);
        assert_eq!(bounded.chars().count(), MAX_TEXT_LEN);
    }
}
