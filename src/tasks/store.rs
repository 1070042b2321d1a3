use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::{FileResult, TaskMode, TaskStatus};
use crate::core::time::now_utc;
use crate::engines::LanguageSet;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: TaskStatus, to: TaskStatus },
}

#[derive(Debug)]
struct TaskRecord {
    mode: TaskMode,
    languages: LanguageSet,
    filenames: Vec<String>,
    results: Vec<FileResult>,
    status: TaskStatus,
    error: Option<String>,
    cancel_requested: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    processing_time: Duration,
}

impl TaskRecord {
    fn touch(&mut self) {
        self.updated_at = now_utc();
    }

    fn transition(&mut self, id: Uuid, to: TaskStatus) -> Result<(), StoreError> {
        if !self.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { id, from: self.status, to });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    fn snapshot(&self, id: Uuid) -> TaskSnapshot {
        let total_files = self.filenames.len();
        let files_processed = self.results.len();

        TaskSnapshot {
            id,
            status: self.status,
            mode: self.mode,
            languages: self.languages.clone(),
            progress: progress_percent(files_processed, total_files),
            files_processed,
            total_files,
            estimated_remaining: self.estimated_remaining(),
            results: self.results.clone(),
            error: self.error.clone(),
            cancel_requested: self.cancel_requested,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn estimated_remaining(&self) -> Option<f64> {
        let processed = self.results.len();
        if self.status != TaskStatus::Processing || processed == 0 {
            return None;
        }
        let remaining = self.filenames.len().saturating_sub(processed);
        let mean = self.processing_time.as_secs_f64() / processed as f64;
        Some((mean * remaining as f64 * 10.0).round() / 10.0)
    }
}

/// Consistent copy of a task taken under its lock.
#[derive(Debug, Clone)]
pub(crate) struct TaskSnapshot {
    pub(crate) id: Uuid,
    pub(crate) status: TaskStatus,
    pub(crate) mode: TaskMode,
    pub(crate) languages: LanguageSet,
    pub(crate) progress: u8,
    pub(crate) files_processed: usize,
    pub(crate) total_files: usize,
    pub(crate) estimated_remaining: Option<f64>,
    pub(crate) results: Vec<FileResult>,
    pub(crate) error: Option<String>,
    pub(crate) cancel_requested: bool,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StoreCounts {
    pub(crate) total: usize,
    pub(crate) processing: usize,
}

/// In-memory task table.
///
/// The map lock is only held long enough to clone a record handle; record
/// mutations happen under the per-record mutex. Neither lock is ever held
/// across an `.await`.
#[derive(Clone, Default)]
pub(crate) struct TaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, Arc<Mutex<TaskRecord>>>>>,
}

impl TaskStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create(
        &self,
        mode: TaskMode,
        languages: LanguageSet,
        filenames: Vec<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = now_utc();
        let record = TaskRecord {
            mode,
            languages,
            results: Vec::with_capacity(filenames.len()),
            filenames,
            status: TaskStatus::Queued,
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            processing_time: Duration::ZERO,
        };
        self.tasks.write().insert(id, Arc::new(Mutex::new(record)));
        id
    }

    fn record(&self, id: Uuid) -> Result<Arc<Mutex<TaskRecord>>, StoreError> {
        self.tasks.read().get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    pub(crate) fn get(&self, id: Uuid) -> Result<TaskSnapshot, StoreError> {
        let record = self.record(id)?;
        let snapshot = record.lock().snapshot(id);
        Ok(snapshot)
    }

    /// Appends the next file result. Only a processing task with files left
    /// accepts results.
    pub(crate) fn append_result(
        &self,
        id: Uuid,
        result: FileResult,
        elapsed: Duration,
    ) -> Result<(), StoreError> {
        let record = self.record(id)?;
        let mut record = record.lock();
        if record.status != TaskStatus::Processing
            || record.results.len() >= record.filenames.len()
        {
            return Err(StoreError::InvalidTransition {
                id,
                from: record.status,
                to: TaskStatus::Processing,
            });
        }
        record.results.push(result);
        record.processing_time += elapsed;
        record.touch();
        Ok(())
    }

    /// Moves the task forward. `error` is recorded only for [`TaskStatus::Error`].
    pub(crate) fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let record = self.record(id)?;
        let mut record = record.lock();
        record.transition(id, status)?;
        if status == TaskStatus::Error {
            record.error = error;
        }
        Ok(())
    }

    /// Raises the advisory cancellation flag. The runner honours it at the
    /// next file boundary.
    pub(crate) fn request_cancel(&self, id: Uuid) -> Result<TaskSnapshot, StoreError> {
        let record = self.record(id)?;
        let mut record = record.lock();
        if record.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id,
                from: record.status,
                to: TaskStatus::Cancelled,
            });
        }
        record.cancel_requested = true;
        record.touch();
        Ok(record.snapshot(id))
    }

    pub(crate) fn is_cancel_requested(&self, id: Uuid) -> Result<bool, StoreError> {
        let record = self.record(id)?;
        let cancel_requested = record.lock().cancel_requested;
        Ok(cancel_requested)
    }

    /// Ids of tasks whose last update is older than `ttl`.
    pub(crate) fn list_older_than(&self, ttl: time::Duration) -> Vec<Uuid> {
        let cutoff = now_utc() - ttl;
        let records: Vec<(Uuid, Arc<Mutex<TaskRecord>>)> =
            self.tasks.read().iter().map(|(id, record)| (*id, Arc::clone(record))).collect();

        records
            .into_iter()
            .filter(|(_, record)| record.lock().updated_at < cutoff)
            .map(|(id, _)| id)
            .collect()
    }

    pub(crate) fn delete(&self, id: Uuid) -> bool {
        self.tasks.write().remove(&id).is_some()
    }

    pub(crate) fn counts(&self) -> StoreCounts {
        let records: Vec<Arc<Mutex<TaskRecord>>> = self.tasks.read().values().cloned().collect();
        let processing = records
            .iter()
            .filter(|record| record.lock().status == TaskStatus::Processing)
            .count();
        StoreCounts { total: records.len(), processing }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, id: Uuid, by: time::Duration) {
        if let Ok(record) = self.record(id) {
            let mut record = record.lock();
            record.updated_at -= by;
            record.created_at -= by;
        }
    }
}

pub(crate) fn progress_percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (100.0 * processed as f64 / total as f64).round();
    percent.clamp(0.0, 100.0) as u8
}
