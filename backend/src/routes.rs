use actix_files::Files;
use actix_multipart::{Multipart, MultipartError};
use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpResponse, ResponseError};
use futures::TryStreamExt;
use log::{debug, error, info};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use shared::TaskStatus;
use uuid::Uuid;

use crate::config::ServerSettings;
use crate::tasks::orchestrator::Orchestrator;
use crate::tasks::task_store::{TaskStore, TaskStoreError};
use crate::views;

const UPLOAD_FIELD: &str = "file";

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No image file in upload")]
    MissingFile,
    #[error("Upload exceeds {0} bytes")]
    TooLarge(usize),
    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Failed to create task: {0}")]
    Store(#[from] TaskStoreError),
}

impl ResponseError for UploadError {
    fn status_code(&self) -> StatusCode {
        match self {
            UploadError::MissingFile | UploadError::Multipart(_) => StatusCode::BAD_REQUEST,
            UploadError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            UploadError::Store(_) => "Failed to create task".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse { error })
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: String) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/analyze").route(web::post().to(analyze)))
        .service(web::resource("/processing/{task_id}").route(web::get().to(processing_page)))
        .service(web::resource("/status/{task_id}").route(web::get().to(get_status)))
        .service(web::resource("/result/{task_id}").route(web::get().to(result_page)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(Files::new("/static", static_dir));
}

fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location))
        .finish()
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

fn parse_task_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

pub fn image_hash(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

/// Buffers the first non-empty `file` part of the upload. Other parts are
/// drained and ignored.
async fn read_upload(mut payload: Multipart, limit: usize) -> Result<Vec<u8>, UploadError> {
    while let Some(mut field) = payload.try_next().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            while field.try_next().await?.is_some() {}
            continue;
        }
        let mut image_data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if image_data.len() + chunk.len() > limit {
                return Err(UploadError::TooLarge(limit));
            }
            image_data.extend_from_slice(&chunk);
        }
        if !image_data.is_empty() {
            return Ok(image_data);
        }
    }
    Err(UploadError::MissingFile)
}

async fn index() -> HttpResponse {
    html(views::index())
}

async fn analyze(
    orchestrator: web::Data<Orchestrator>,
    settings: web::Data<ServerSettings>,
    payload: Multipart,
) -> Result<HttpResponse, UploadError> {
    let image_data = read_upload(payload, settings.max_upload_bytes).await?;
    let task_id = Uuid::new_v4();
    debug!(
        "Upload for task {}: {} bytes, sha256 {}",
        task_id,
        image_data.len(),
        image_hash(&image_data)
    );

    orchestrator.submit(task_id, image_data).map_err(|e| {
        error!("Failed to register task {}: {}", task_id, e);
        UploadError::from(e)
    })?;
    info!("Accepted upload as task {}", task_id);

    Ok(see_other(&format!("/processing/{}", task_id)))
}

async fn processing_page(store: web::Data<TaskStore>, path: web::Path<String>) -> HttpResponse {
    match parse_task_id(&path).filter(|id| store.contains(*id)) {
        Some(task_id) => html(views::processing(task_id)),
        None => see_other("/"),
    }
}

async fn get_status(store: web::Data<TaskStore>, path: web::Path<String>) -> HttpResponse {
    match parse_task_id(&path).and_then(|id| store.get(id)) {
        Some(task) => HttpResponse::Ok().json(task),
        None => {
            debug!("Status requested for unknown task {}", path.as_str());
            HttpResponse::NotFound().json(json!({ "status": "not_found" }))
        }
    }
}

async fn result_page(store: web::Data<TaskStore>, path: web::Path<String>) -> HttpResponse {
    let Some(task_id) = parse_task_id(&path) else {
        return see_other("/");
    };
    match store.get(task_id) {
        Some(task) if task.status == TaskStatus::Completed => match &task.result {
            Some(result) => html(views::results(result)),
            None => see_other(&format!("/processing/{}", task_id)),
        },
        _ => see_other(&format!("/processing/{}", task_id)),
    }
}

async fn health(store: web::Data<TaskStore>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok", "tasks": store.len() }))
}
