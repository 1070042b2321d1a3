use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::validation::{
    has_allowed_extension, parse_languages, parse_mode, sanitized_filename,
};
use crate::core::state::AppState;
use crate::core::time::now_utc;
use crate::schemas::{TaskCreatedResponse, TaskResponse};
use crate::services::export;
use crate::tasks::{Batch, InputFile, TaskStatus};


/// Extra room for multipart framing and form fields on top of the files.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

pub(crate) fn router(state: &AppState) -> Router<AppState> {
    let limits = state.settings().limits();
    let body_limit = usize::try_from(limits.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_mul(limits.max_files_per_batch + 1)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/", post(submit_task))
        .route("/:task_id", get(get_task).delete(clear_task))
        .route("/:task_id/cancel", post(cancel_task))
        .route("/:task_id/download", get(download_results))
        .layer(DefaultBodyLimit::max(body_limit))
}

#[derive(Debug, Default)]
struct Upload {
    files: Vec<InputFile>,
    submitted_files: usize,
    mode: Option<String>,
    languages: Vec<String>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("Upload exceeds the request size limit".to_string())
    } else {
        ApiError::BadRequest(format!("Invalid multipart data: {}", err.body_text()))
    }
}

async fn read_upload(state: &AppState, mut multipart: Multipart) -> Result<Upload, ApiError> {
    let limits = state.settings().limits();
    let max_bytes = limits.max_upload_bytes();
    let mut upload = Upload::default();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" | "file" => {
                let original = field.file_name().unwrap_or("").to_string();
                if original.is_empty() {
                    continue;
                }
                upload.submitted_files += 1;

                if !has_allowed_extension(&original, &limits.allowed_image_extensions) {
                    tracing::warn!(
                        filename = %original,
                        "Skipping file with disallowed extension"
                    );
                    continue;
                }

                let mut bytes = Vec::new();
                let mut oversized = false;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                        oversized = true;
                        break;
                    }
                    bytes.extend_from_slice(&chunk);
                }
                if oversized {
                    tracing::warn!(
                        filename = %original,
                        limit_mb = limits.max_upload_size_mb,
                        "Skipping oversized file"
                    );
                    continue;
                }

                let position = upload.files.len() + 1;
                let name = sanitized_filename(&original, position);
                upload.files.push(InputFile { name, bytes });
            }
            "mode" => upload.mode = Some(field.text().await.map_err(multipart_error)?),
            "languages" | "languages[]" => {
                upload.languages.push(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    Ok(upload)
}

fn parse_task_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Task not found".to_string()))
}

pub(crate) async fn submit_task(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<TaskCreatedResponse>, ApiError> {
    if !state.engines().any_available() {
        return Err(ApiError::ServiceUnavailable("OCR engine not available".to_string()));
    }

    let upload = read_upload(&state, multipart).await?;
    let mode = parse_mode(upload.mode.as_deref())?;
    let languages = parse_languages(&upload.languages)?;

    if upload.files.is_empty() && upload.submitted_files > 0 {
        return Err(ApiError::BadRequest("No valid image files found".to_string()));
    }

    let total_files = upload.files.len();
    let task_id = state.admission().admit(Batch { files: upload.files, mode, languages })?;
    tracing::info!(
        task_id = %task_id,
        total_files,
        mode = mode.as_str(),
        "Started processing task"
    );

    Ok(Json(TaskCreatedResponse { task_id: task_id.to_string() }))
}

pub(crate) async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_task_id(&task_id)?;
    let snapshot = state.store().get(id)?;
    Ok(Json(TaskResponse::from(snapshot)))
}

pub(crate) async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id = parse_task_id(&task_id)?;
    let snapshot = state.store().request_cancel(id)?;
    tracing::info!(task_id = %id, "Cancellation requested");
    Ok(Json(TaskResponse::from(snapshot)))
}

pub(crate) async fn clear_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_task_id(&task_id)?;
    if !state.store().delete(id) {
        return Err(ApiError::NotFound("Task not found".to_string()));
    }
    tracing::info!(task_id = %id, "Task cleared");
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn download_results(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&task_id)?;
    let snapshot = state.store().get(id)?;
    if snapshot.status != TaskStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "Task is not completed (status: {})",
            snapshot.status
        )));
    }

    let export = export::render(&snapshot, now_utc());
    if state.settings().retention().clear_on_download {
        state.store().delete(id);
        tracing::info!(task_id = %id, "Task cleared after download");
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export.filename),
            ),
        ],
        export.body,
    ))
}
