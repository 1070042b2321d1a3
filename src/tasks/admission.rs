use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::runner::TaskRunner;
use super::store::TaskStore;
use super::types::Batch;

#[derive(Debug, Error)]
pub(crate) enum AdmissionError {
    #[error("No files were submitted")]
    EmptyBatch,
    #[error("At most {max} files can be processed at once (got {got})")]
    TooManyFiles { max: usize, got: usize },
    #[error("Server is busy; all {0} processing slots are in use. Try again shortly")]
    Overloaded(usize),
}

impl AdmissionError {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            AdmissionError::EmptyBatch => "empty_batch",
            AdmissionError::TooManyFiles { .. } => "too_many_files",
            AdmissionError::Overloaded(_) => "overloaded",
        }
    }
}

/// Fixed pool of runner slots. A batch either gets a slot now or is
/// rejected; nothing waits in line.
#[derive(Clone)]
pub(crate) struct AdmissionScheduler {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    max_files: usize,
    store: TaskStore,
    runner: TaskRunner,
}

impl AdmissionScheduler {
    pub(crate) fn new(
        max_concurrent: usize,
        max_files: usize,
        store: TaskStore,
        runner: TaskRunner,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_files,
            store,
            runner,
        }
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    #[cfg(test)]
    pub(crate) fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Creates the task and starts its runner, or rejects the batch without
    /// leaving a trace in the store. Must be called inside a Tokio runtime.
    pub(crate) fn admit(&self, batch: Batch) -> Result<Uuid, AdmissionError> {
        let result = self.try_admit(batch);
        match &result {
            Ok(id) => {
                metrics::counter!("ocr_tasks_admitted_total").increment(1);
                tracing::info!(task_id = %id, "Task admitted");
            }
            Err(err) => {
                metrics::counter!("ocr_tasks_rejected_total", "reason" => err.label())
                    .increment(1);
                tracing::warn!(reason = err.label(), error = %err, "Batch rejected");
            }
        }
        result
    }

    fn try_admit(&self, batch: Batch) -> Result<Uuid, AdmissionError> {
        if batch.files.is_empty() {
            return Err(AdmissionError::EmptyBatch);
        }
        if batch.files.len() > self.max_files {
            return Err(AdmissionError::TooManyFiles {
                max: self.max_files,
                got: batch.files.len(),
            });
        }

        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| AdmissionError::Overloaded(self.max_concurrent))?;

        let id = self.store.create(batch.mode, batch.languages.clone(), batch.filenames());
        let runner = self.runner.clone();
        tokio::spawn(async move {
            runner.run(id, batch).await;
            drop(permit);
        });

        Ok(id)
    }
}
