//! Recognition engines and the policy that chooses between them.
//!
//! Every backend implements [`OcrEngine`]; the [`registry::EngineRegistry`]
//! probes them once at startup and owns the fallback chain.

mod language;
pub(crate) mod regions;
pub(crate) mod registry;
pub(crate) mod tesseract;
pub(crate) mod vision;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub(crate) use language::{Language, LanguageSet};
pub(crate) use registry::EngineRegistry;

use crate::core::config::Settings;
use crate::services::preprocess::PreparedImage;

/// Role of an engine in the fallback chain. Lower roles are tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EngineKind {
    Primary,
    Backup,
    Fallback,
}

impl EngineKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            EngineKind::Primary => "primary",
            EngineKind::Backup => "backup",
            EngineKind::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("languages not supported: {0}")]
    Unsupported(String),
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),
    #[error("recognition failed: {0}")]
    RecognitionFailure(String),
}

impl EngineError {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            EngineError::Unavailable(_) => "unavailable",
            EngineError::Unsupported(_) => "unsupported",
            EngineError::Timeout(_) => "timeout",
            EngineError::RecognitionFailure(_) => "failure",
        }
    }
}

/// Output of one engine for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Recognition {
    pub(crate) text: String,
    pub(crate) note: Option<String>,
}

impl Recognition {
    pub(crate) fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), note: None }
    }

    pub(crate) fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[async_trait]
pub(crate) trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> EngineKind;

    /// Checks that the backend can run and returns the languages it handles.
    /// Called once per process; the answer is cached by the registry.
    async fn probe(&self) -> Result<Vec<Language>, EngineError>;

    async fn recognize(
        &self,
        image: &PreparedImage,
        languages: &LanguageSet,
    ) -> Result<Recognition, EngineError>;
}

/// Cached view of an engine after probing.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct EngineDescriptor {
    pub(crate) name: &'static str,
    pub(crate) kind: EngineKind,
    pub(crate) priority: u8,
    pub(crate) available: bool,
    pub(crate) languages: Vec<Language>,
}

/// Builds the configured engines in priority order.
pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Vec<Arc<dyn OcrEngine>>> {
    let mut engines: Vec<Arc<dyn OcrEngine>> =
        vec![Arc::new(tesseract::TesseractEngine::new(&settings.engines().tesseract_path))];

    if let Some(url) = &settings.engines().vision_url {
        engines.push(Arc::new(vision::VisionEngine::new(
            url,
            &settings.engines().vision_model,
            settings.processing().recognition_timeout(),
        )?));
    } else {
        tracing::info!("OCR_VISION_URL not configured; backup engine disabled");
    }

    engines.push(Arc::new(regions::RegionDetector::default()));
    Ok(engines)
}
