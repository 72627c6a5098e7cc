//! Document API endpoints
//!
//! - POST /upload_doc - store an image and create its document row
//! - DELETE /doc_delete/:doc_id - remove a document, its texts and its blob
//! - POST /doc_analyse/:doc_id - queue text extraction
//! - GET /get_text/:doc_id - list extracted texts
//! - GET /doc/:doc_id - document metadata

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};

use crate::db::{Document, DocumentRepository, DocumentText};
use crate::error::{AppError, Result, StorageError};
use crate::state::AppState;
use crate::storage::DeleteOutcome;

/// Multipart field carrying the uploaded file
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentTextsResponse {
    pub document_id: i64,
    pub texts: Vec<DocumentText>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload_doc", post(upload_doc))
        .route("/doc_delete/:doc_id", delete(delete_doc))
        .route("/doc_analyse/:doc_id", post(analyse_doc))
        .route("/get_text/:doc_id", get(get_text))
        .route("/doc/:doc_id", get(get_doc))
}

fn bad_multipart(e: MultipartError) -> AppError {
    tracing::warn!("Failed to read multipart upload: {}", e);
    AppError::BadRequest(format!("Failed to read upload: {}", e))
}

/// POST /upload_doc
///
/// The size limit is enforced while the body streams in, so an oversized
/// upload never reaches the blob store.
async fn upload_doc(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<Document>> {
    let max = state.blobs().max_size();

    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        let mut data = Vec::new();

        while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
            let size = data.len() + chunk.len();
            if size > max {
                tracing::warn!(size, max, "Upload rejected, file too large");
                return Err(StorageError::TooLarge { size, max }.into());
            }
            data.extend_from_slice(&chunk);
        }

        let document = store_upload(&state, &data, &original_name).await?;
        tracing::info!(
            document_id = document.id,
            name = %document.name,
            size = data.len(),
            "Document uploaded"
        );
        return Ok(Json(document));
    }

    Err(AppError::BadRequest(format!(
        "Missing multipart field '{}'",
        FILE_FIELD
    )))
}

/// Write the blob, then its row; the blob is removed again if the row fails
async fn store_upload(state: &AppState, data: &[u8], original_name: &str) -> Result<Document> {
    let key = state.blobs().put(data, original_name).await?;
    let repo = DocumentRepository::new(state.db());

    let created = async {
        let mut tx = repo.begin().await?;
        let document = repo.create_tx(&mut tx, &key, Utc::now()).await?;
        tx.commit().await?;
        Ok::<_, AppError>(document)
    }
    .await;

    if created.is_err() {
        if let Err(e) = state.blobs().delete(&key).await {
            tracing::warn!(key = %key, "Failed to remove blob after failed insert: {}", e);
        }
    }

    created
}

/// DELETE /doc_delete/:doc_id
async fn delete_doc(
    State(state): State<AppState>,
    Path(doc_id): Path<i64>,
) -> Result<Json<MessageResponse>> {
    let repo = DocumentRepository::new(state.db());
    let mut tx = repo.begin().await?;

    match delete_in_tx(&state, &repo, &mut tx, doc_id).await {
        Ok(texts) => {
            tx.commit().await?;
            tracing::info!(document_id = doc_id, texts, "Document deleted");
            Ok(Json(MessageResponse {
                message: "Document deleted".to_string(),
            }))
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(document_id = doc_id, "Rollback failed: {}", rollback);
            }
            Err(e)
        }
    }
}

async fn delete_in_tx(
    state: &AppState,
    repo: &DocumentRepository<'_>,
    tx: &mut Transaction<'static, Sqlite>,
    doc_id: i64,
) -> Result<u64> {
    let document = repo
        .get_tx(tx, doc_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {} not found", doc_id)))?;

    let texts = repo.delete_texts_tx(tx, doc_id).await?;
    repo.delete_tx(tx, doc_id).await?;

    if state.blobs().delete(&document.name).await? == DeleteOutcome::NotFound {
        tracing::warn!(document_id = doc_id, name = %document.name, "Blob already absent");
    }

    Ok(texts)
}

/// POST /doc_analyse/:doc_id
///
/// Returns as soon as the job is queued.
async fn analyse_doc(
    State(state): State<AppState>,
    Path(doc_id): Path<i64>,
) -> Result<Json<MessageResponse>> {
    let document = DocumentRepository::new(state.db())
        .get(doc_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {} not found", doc_id)))?;

    let path = state.blobs().path_for(&document.name)?;
    state.extraction().enqueue(document.id, &path).await?;

    Ok(Json(MessageResponse {
        message: "Analysis started".to_string(),
    }))
}

/// GET /get_text/:doc_id
async fn get_text(
    State(state): State<AppState>,
    Path(doc_id): Path<i64>,
) -> Result<Json<DocumentTextsResponse>> {
    let repo = DocumentRepository::new(state.db());
    if !repo.exists(doc_id).await? {
        return Err(AppError::NotFound(format!("Document {} not found", doc_id)));
    }

    let texts = repo.list_texts(doc_id).await?;
    Ok(Json(DocumentTextsResponse {
        document_id: doc_id,
        texts,
    }))
}

/// GET /doc/:doc_id
async fn get_doc(State(state): State<AppState>, Path(doc_id): Path<i64>) -> Result<Json<Document>> {
    DocumentRepository::new(state.db())
        .get(doc_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Document {} not found", doc_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{create_pool, JobRepository};
    use crate::extraction::JobOutcome;
    use crate::ocr::{sample_png, MockProvider, OcrProviderTrait, OcrService};
    use crate::routes::app;
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _temp_dir: TempDir,
        state: AppState,
        server: TestServer,
    }

    async fn harness(text: &str) -> Harness {
        let temp_dir = TempDir::new().unwrap();

        let mut config = Config::default();
        config.database.url = format!("sqlite://{}", temp_dir.path().join("api.db").display());
        config.storage.root = temp_dir.path().join("documents");
        config.worker.concurrency = 1;
        config.worker.base_delay_ms = 0;
        config.worker.poll_interval_ms = 10;

        let pool = create_pool(&config.database).await.unwrap();
        let providers: Vec<Arc<dyn OcrProviderTrait>> = vec![Arc::new(MockProvider::returning(text))];
        let ocr = Arc::new(OcrService::with_providers(providers, "rus"));
        let state = AppState::new(config, pool, ocr).await.unwrap();
        let server = TestServer::new(app(state.clone())).unwrap();

        Harness {
            _temp_dir: temp_dir,
            state,
            server,
        }
    }

    fn image_form(data: Vec<u8>, file_name: &str) -> MultipartForm {
        MultipartForm::new().add_part(
            "file",
            Part::bytes(data).file_name(file_name).mime_type("image/png"),
        )
    }

    async fn upload(h: &Harness, data: Vec<u8>) -> Document {
        let response = h.server.post("/upload_doc").multipart(image_form(data, "scan.png")).await;
        response.assert_status_ok();
        response.json::<Document>()
    }

    async fn blob_count(h: &Harness) -> usize {
        h.state.blobs().list().await.unwrap().len()
    }

    async fn wait_for_job(events: &mut tokio::sync::broadcast::Receiver<crate::extraction::JobEvent>) -> JobOutcome {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("extraction did not finish in time")
            .unwrap()
            .outcome
    }

    #[tokio::test]
    async fn test_upload_then_get_document() {
        let h = harness("unused").await;

        let document = upload(&h, sample_png()).await;
        assert!(document.name.ends_with(".png"));
        assert!(h.state.blobs().exists(&document.name).await);

        let response = h.server.get(&format!("/doc/{}", document.id)).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Document>(), document);
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let h = harness("unused").await;

        let too_big = vec![0u8; 2 * 1024 * 1024 + 1];
        let response = h.server.post("/upload_doc").multipart(image_form(too_big, "big.png")).await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(blob_count(&h).await, 0);
        assert!(DocumentRepository::new(h.state.db()).list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_limit_is_inclusive() {
        let h = harness("unused").await;

        let exact = vec![7u8; 2 * 1024 * 1024];
        let document = upload(&h, exact).await;
        assert_eq!(document.name.len(), 36 + ".png".len());
    }

    #[tokio::test]
    async fn test_missing_file_field_rejected() {
        let h = harness("unused").await;

        let form = MultipartForm::new().add_text("comment", "no file here");
        let response = h.server.post("/upload_doc").multipart(form).await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(blob_count(&h).await, 0);
    }

    #[tokio::test]
    async fn test_uploads_get_distinct_keys() {
        let h = harness("unused").await;

        let mut names = HashSet::new();
        for i in 0..10u8 {
            let document = upload(&h, vec![i; 16]).await;
            names.insert(document.name);
        }

        assert_eq!(names.len(), 10);
        assert_eq!(blob_count(&h).await, 10);
    }

    #[tokio::test]
    async fn test_delete_missing_document() {
        let h = harness("unused").await;
        let existing = upload(&h, sample_png()).await;

        let response = h.server.delete(&format!("/doc_delete/{}", existing.id + 100)).await;

        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(blob_count(&h).await, 1);
        assert_eq!(DocumentRepository::new(h.state.db()).list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_blob_texts_and_row() {
        let h = harness("Текст").await;
        let document = upload(&h, sample_png()).await;

        let mut events = h.state.extraction().subscribe();
        h.server.post(&format!("/doc_analyse/{}", document.id)).await.assert_status_ok();
        assert!(matches!(wait_for_job(&mut events).await, JobOutcome::Completed { .. }));

        let response = h.server.delete(&format!("/doc_delete/{}", document.id)).await;
        response.assert_status_ok();
        assert_eq!(response.json::<MessageResponse>().message, "Document deleted");

        assert!(!h.state.blobs().exists(&document.name).await);
        assert_eq!(
            DocumentRepository::new(h.state.db()).count_texts(document.id).await.unwrap(),
            0
        );
        h.server
            .get(&format!("/get_text/{}", document.id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        h.server
            .get(&format!("/doc/{}", document.id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_blob() {
        let h = harness("unused").await;
        let document = upload(&h, sample_png()).await;
        h.state.blobs().delete(&document.name).await.unwrap();

        h.server
            .delete(&format!("/doc_delete/{}", document.id))
            .await
            .assert_status_ok();
        assert!(DocumentRepository::new(h.state.db()).get(document.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_insert_removes_blob() {
        let h = harness("unused").await;
        sqlx::query(
            "CREATE TRIGGER reject_documents BEFORE INSERT ON documents \
             BEGIN SELECT RAISE(ABORT, 'insert rejected'); END",
        )
        .execute(h.state.db())
        .await
        .unwrap();

        let response = h
            .server
            .post("/upload_doc")
            .multipart(image_form(sample_png(), "scan.png"))
            .await;

        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.json::<serde_json::Value>()["error"], "database_error");
        assert_eq!(blob_count(&h).await, 0);
        assert!(DocumentRepository::new(h.state.db()).list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_rolls_back() {
        let h = harness("unused").await;
        let document = upload(&h, sample_png()).await;

        let repo = DocumentRepository::new(h.state.db());
        let mut tx = repo.begin().await.unwrap();
        repo.insert_text_tx(&mut tx, document.id, "kept").await.unwrap();
        tx.commit().await.unwrap();

        sqlx::query(
            "CREATE TRIGGER protect_documents BEFORE DELETE ON documents \
             BEGIN SELECT RAISE(ABORT, 'delete rejected'); END",
        )
        .execute(h.state.db())
        .await
        .unwrap();

        let response = h.server.delete(&format!("/doc_delete/{}", document.id)).await;

        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(repo.count_texts(document.id).await.unwrap(), 1);
        assert_eq!(repo.get(document.id).await.unwrap(), Some(document.clone()));
        assert!(h.state.blobs().exists(&document.name).await);
    }

    #[tokio::test]
    async fn test_analyse_missing_document_queues_nothing() {
        let h = harness("unused").await;

        let response = h.server.post("/doc_analyse/42").await;

        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        assert!(JobRepository::new(h.state.db()).list_for_document(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_analyse_then_get_text() {
        let h = harness("Привет, мир").await;
        let document = upload(&h, sample_png()).await;

        let empty = h.server.get(&format!("/get_text/{}", document.id)).await;
        empty.assert_status_ok();
        assert!(empty.json::<DocumentTextsResponse>().texts.is_empty());

        let mut events = h.state.extraction().subscribe();
        let response = h.server.post(&format!("/doc_analyse/{}", document.id)).await;
        response.assert_status_ok();
        assert_eq!(response.json::<MessageResponse>().message, "Analysis started");

        assert!(matches!(wait_for_job(&mut events).await, JobOutcome::Completed { .. }));

        let jobs = JobRepository::new(h.state.db())
            .list_for_document(document.id)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(std::path::Path::new(&jobs[0].file_path).is_absolute());

        let response = h.server.get(&format!("/get_text/{}", document.id)).await;
        response.assert_status_ok();
        let body = response.json::<DocumentTextsResponse>();
        assert_eq!(body.document_id, document.id);
        assert_eq!(body.texts.len(), 1);
        assert_eq!(body.texts[0].document_id, document.id);
        assert_eq!(body.texts[0].text, "Привет, мир");
    }

    #[tokio::test]
    async fn test_analyse_twice_stores_two_texts() {
        let h = harness("twice").await;
        let document = upload(&h, sample_png()).await;

        let mut events = h.state.extraction().subscribe();
        h.server.post(&format!("/doc_analyse/{}", document.id)).await.assert_status_ok();
        h.server.post(&format!("/doc_analyse/{}", document.id)).await.assert_status_ok();
        wait_for_job(&mut events).await;
        wait_for_job(&mut events).await;

        let body = h
            .server
            .get(&format!("/get_text/{}", document.id))
            .await
            .json::<DocumentTextsResponse>();
        assert_eq!(body.texts.len(), 2);
        assert_ne!(body.texts[0].id, body.texts[1].id);
    }

    #[tokio::test]
    async fn test_get_text_missing_document() {
        let h = harness("unused").await;

        let response = h.server.get("/get_text/7").await;

        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness("unused").await;

        let response = h.server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["status"], "healthy");
    }
}
