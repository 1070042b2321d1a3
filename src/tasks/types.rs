use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::engines::LanguageSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled)
    }

    /// Transitions only move forward; terminal states are final.
    pub(crate) fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Processing)
                | (TaskStatus::Queued, TaskStatus::Error)
                | (TaskStatus::Queued, TaskStatus::Cancelled)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Error)
                | (TaskStatus::Processing, TaskStatus::Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum TaskMode {
    #[default]
    Normal,
    HighAccuracy,
}

impl TaskMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TaskMode::Normal => "normal",
            TaskMode::HighAccuracy => "high_accuracy",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(TaskMode::Normal),
            "high_accuracy" | "high-accuracy" => Some(TaskMode::HighAccuracy),
            _ => None,
        }
    }
}

/// One uploaded image. The bytes live only until the runner reaches it.
#[derive(Debug, Clone)]
pub(crate) struct InputFile {
    pub(crate) name: String,
    pub(crate) bytes: Vec<u8>,
}

/// Validated submission handed to the admission scheduler.
#[derive(Debug, Clone)]
pub(crate) struct Batch {
    pub(crate) files: Vec<InputFile>,
    pub(crate) mode: TaskMode,
    pub(crate) languages: LanguageSet,
}

impl Batch {
    pub(crate) fn filenames(&self) -> Vec<String> {
        self.files.iter().map(|file| file.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileResult {
    pub(crate) filename: String,
    pub(crate) text: String,
    pub(crate) processed_at: OffsetDateTime,
    pub(crate) engine: Option<String>,
    pub(crate) note: Option<String>,
}
