use serde::Serialize;

use crate::core::time::format_offset;
use crate::engines::registry::ServiceLevel;
use crate::engines::{EngineDescriptor, Language, LanguageSet};
use crate::tasks::{FileResult, TaskMode, TaskSnapshot, TaskStatus};

#[derive(Debug, Serialize)]
pub(crate) struct TaskCreatedResponse {
    pub(crate) task_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct FileResultResponse {
    pub(crate) filename: String,
    pub(crate) text: String,
    pub(crate) processed_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) note: Option<String>,
}

impl From<FileResult> for FileResultResponse {
    fn from(result: FileResult) -> Self {
        Self {
            filename: result.filename,
            text: result.text,
            processed_at: format_offset(result.processed_at),
            engine: result.engine,
            note: result.note,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TaskResponse {
    pub(crate) task_id: String,
    pub(crate) status: TaskStatus,
    pub(crate) mode: TaskMode,
    pub(crate) languages: LanguageSet,
    pub(crate) progress: u8,
    pub(crate) files_processed: usize,
    pub(crate) total_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) estimated_remaining: Option<f64>,
    pub(crate) results: Vec<FileResultResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    pub(crate) cancel_requested: bool,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<TaskSnapshot> for TaskResponse {
    fn from(snapshot: TaskSnapshot) -> Self {
        Self {
            task_id: snapshot.id.to_string(),
            status: snapshot.status,
            mode: snapshot.mode,
            languages: snapshot.languages,
            progress: snapshot.progress,
            files_processed: snapshot.files_processed,
            total_files: snapshot.total_files,
            estimated_remaining: snapshot.estimated_remaining,
            results: snapshot.results.into_iter().map(FileResultResponse::from).collect(),
            error: snapshot.error,
            cancel_requested: snapshot.cancel_requested,
            created_at: format_offset(snapshot.created_at),
            updated_at: format_offset(snapshot.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct EngineStatusResponse {
    pub(crate) name: &'static str,
    pub(crate) kind: &'static str,
    pub(crate) available: bool,
    pub(crate) languages: Vec<Language>,
}

impl From<EngineDescriptor> for EngineStatusResponse {
    fn from(descriptor: EngineDescriptor) -> Self {
        Self {
            name: descriptor.name,
            kind: descriptor.kind.as_str(),
            available: descriptor.available,
            languages: descriptor.languages,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ServiceStatusResponse {
    pub(crate) status: ServiceLevel,
    pub(crate) engines: Vec<EngineStatusResponse>,
    pub(crate) active_tasks: usize,
    pub(crate) processing_tasks: usize,
    pub(crate) max_concurrent_tasks: usize,
}
