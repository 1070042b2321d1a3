use std::sync::Arc;

use crate::core::config::Settings;
use crate::engines::EngineRegistry;
use crate::tasks::{AdmissionScheduler, RunnerOptions, TaskRunner, TaskStore};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: TaskStore,
    engines: Arc<EngineRegistry>,
    admission: AdmissionScheduler,
}

impl AppState {
    pub(crate) fn new(settings: Settings, engines: Arc<EngineRegistry>) -> Self {
        let store = TaskStore::new();
        let runner = TaskRunner::new(
            store.clone(),
            Arc::clone(&engines),
            RunnerOptions::from_settings(&settings),
        );
        let admission = AdmissionScheduler::new(
            settings.limits().max_concurrent_tasks,
            settings.limits().max_files_per_batch,
            store.clone(),
            runner,
        );

        Self { inner: Arc::new(InnerState { settings, store, engines, admission }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &TaskStore {
        &self.inner.store
    }

    pub(crate) fn engines(&self) -> &EngineRegistry {
        &self.inner.engines
    }

    pub(crate) fn admission(&self) -> &AdmissionScheduler {
        &self.inner.admission
    }
}
