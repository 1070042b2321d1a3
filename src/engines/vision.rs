use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{EngineError, EngineKind, Language, LanguageSet, OcrEngine, Recognition};
use crate::services::preprocess::PreparedImage;

/// Backup recognizer talking to an Ollama-compatible vision model.
#[derive(Debug, Clone)]
pub(crate) struct VisionEngine {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl VisionEngine {
    pub(crate) fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .context("Failed to build vision HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        })
    }

    /// Client timeouts surface as [`EngineError::Timeout`], like registry deadlines.
    fn request_error(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout(self.timeout)
        } else if err.is_connect() {
            EngineError::Unavailable(format!("vision service unreachable: {err}"))
        } else {
            EngineError::RecognitionFailure(err.to_string())
        }
    }
}

#[async_trait]
impl OcrEngine for VisionEngine {
    fn name(&self) -> &'static str {
        "vision"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Backup
    }

    async fn probe(&self) -> Result<Vec<Language>, EngineError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| EngineError::Unavailable(format!("GET {url} failed: {err}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Unavailable(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        Ok(Language::ALL.to_vec())
    }

    async fn recognize(
        &self,
        image: &PreparedImage,
        languages: &LanguageSet,
    ) -> Result<Recognition, EngineError> {
        let png = image.to_png().map_err(|err| EngineError::RecognitionFailure(err.to_string()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(png);

        let request = json!({
            "model": self.model,
            "prompt": extraction_prompt(languages),
            "images": [encoded],
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|err| self.request_error(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::RecognitionFailure(format!(
                "vision service returned {status}: {}",
                body.trim()
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                EngineError::Timeout(self.timeout)
            } else {
                EngineError::RecognitionFailure(format!("invalid response: {err}"))
            }
        })?;

        Ok(Recognition::text(body.response.trim()))
    }
}

fn extraction_prompt(languages: &LanguageSet) -> String {
    let names: Vec<&str> = languages.iter().map(Language::english_name).collect();
    format!(
        "Extract all text from this image exactly as written. The text is in {}. \
         Return only the extracted text, nothing else.",
        names.join(" and ")
    )
}
