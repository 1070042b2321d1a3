//! Task lifecycle: admission, per-file execution and retention.

mod admission;
pub(crate) mod janitor;
mod runner;
mod store;
mod types;

pub(crate) use admission::{AdmissionError, AdmissionScheduler};
pub(crate) use runner::{RunnerOptions, TaskRunner};
pub(crate) use store::{StoreError, TaskSnapshot, TaskStore};
pub(crate) use types::{Batch, FileResult, InputFile, TaskMode, TaskStatus};
