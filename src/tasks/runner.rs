use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::store::{StoreError, TaskStore};
use super::types::{Batch, FileResult, InputFile, TaskStatus};
use crate::core::config::Settings;
use crate::core::time::now_utc;
use crate::engines::registry::FileRecognition;
use crate::engines::EngineRegistry;
use crate::services::preprocess::{preprocess, PreprocessOptions};

#[derive(Debug, Clone, Copy)]
pub(crate) struct RunnerOptions {
    pub(crate) preprocess: PreprocessOptions,
    pub(crate) file_timeout: Duration,
}

impl RunnerOptions {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            preprocess: PreprocessOptions {
                max_dimension: settings.processing().max_image_dimension,
                enhance_contrast: settings.processing().enhance_contrast,
            },
            file_timeout: settings.processing().recognition_timeout(),
        }
    }
}

enum RunFailure {
    /// The task was deleted underneath the runner.
    Evicted,
    Fatal(String),
}

impl From<StoreError> for RunFailure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => RunFailure::Evicted,
            other => RunFailure::Fatal(other.to_string()),
        }
    }
}

/// Drives one task through its files, strictly in submission order.
#[derive(Clone)]
pub(crate) struct TaskRunner {
    store: TaskStore,
    engines: Arc<EngineRegistry>,
    options: RunnerOptions,
}

impl TaskRunner {
    pub(crate) fn new(
        store: TaskStore,
        engines: Arc<EngineRegistry>,
        options: RunnerOptions,
    ) -> Self {
        Self { store, engines, options }
    }

    pub(crate) async fn run(&self, id: Uuid, batch: Batch) {
        let started = Instant::now();
        let total_files = batch.files.len();

        match self.process(id, batch).await {
            Ok(status) => {
                metrics::counter!("ocr_tasks_finished_total", "status" => status.as_str())
                    .increment(1);
                tracing::info!(
                    task_id = %id,
                    status = status.as_str(),
                    total_files,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Task finished"
                );
            }
            Err(RunFailure::Evicted) => {
                tracing::info!(task_id = %id, "Task removed while running; stopping");
            }
            Err(RunFailure::Fatal(message)) => {
                tracing::error!(task_id = %id, error = %message, "Task failed");
                metrics::counter!("ocr_tasks_finished_total", "status" => "error").increment(1);
                if let Err(err) = self.store.set_status(id, TaskStatus::Error, Some(message)) {
                    tracing::warn!(task_id = %id, error = %err, "Failed to record task error");
                }
            }
        }
    }

    async fn process(&self, id: Uuid, batch: Batch) -> Result<TaskStatus, RunFailure> {
        self.store.set_status(id, TaskStatus::Processing, None)?;
        let Batch { files, mode, languages } = batch;
        let total = files.len();

        for (index, file) in files.into_iter().enumerate() {
            if self.store.is_cancel_requested(id)? {
                self.store.set_status(id, TaskStatus::Cancelled, None)?;
                tracing::info!(task_id = %id, processed = index, total, "Task cancelled");
                return Ok(TaskStatus::Cancelled);
            }

            let started = Instant::now();
            let InputFile { name, bytes } = file;
            let options = self.options.preprocess;

            let prepared = tokio::task::spawn_blocking(move || preprocess(&bytes, options))
                .await
                .map_err(|err| RunFailure::Fatal(format!("Preprocessing {name} failed: {err}")))?;

            let recognition = match prepared {
                Ok(image) => {
                    tracing::debug!(
                        task_id = %id,
                        filename = %name,
                        source = ?image.source_dimensions(),
                        prepared = ?image.dimensions(),
                        "Image prepared"
                    );
                    self.engines
                        .recognize(&image, mode, &languages, self.options.file_timeout)
                        .await
                }
                Err(err) => {
                    tracing::warn!(
                        task_id = %id,
                        filename = %name,
                        error = %err,
                        "Unreadable image"
                    );
                    FileRecognition {
                        text: String::new(),
                        engine: None,
                        note: Some(format!("Could not read image: {err}")),
                    }
                }
            };

            let elapsed = started.elapsed();
            let engine_label = recognition.engine.unwrap_or("none");
            metrics::counter!("ocr_files_processed_total", "engine" => engine_label).increment(1);
            metrics::histogram!("ocr_file_duration_seconds").record(elapsed.as_secs_f64());
            tracing::debug!(
                task_id = %id,
                filename = %name,
                engine = engine_label,
                file = index + 1,
                total,
                chars = recognition.text.chars().count(),
                "File processed"
            );

            let result = FileResult {
                filename: name,
                text: recognition.text,
                processed_at: now_utc(),
                engine: recognition.engine.map(str::to_string),
                note: recognition.note,
            };
            self.store.append_result(id, result, elapsed)?;
        }

        // A cancel accepted while the last file was running still wins.
        if self.store.is_cancel_requested(id)? {
            self.store.set_status(id, TaskStatus::Cancelled, None)?;
            tracing::info!(task_id = %id, processed = total, total, "Task cancelled");
            return Ok(TaskStatus::Cancelled);
        }

        self.store.set_status(id, TaskStatus::Completed, None)?;
        Ok(TaskStatus::Completed)
    }
}
