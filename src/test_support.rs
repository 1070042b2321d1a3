use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use image::{GrayImage, ImageFormat, Luma};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::engines::{
    EngineError, EngineKind, EngineRegistry, Language, LanguageSet, OcrEngine, Recognition,
};
use crate::services::preprocess::{preprocess, PreparedImage, PreprocessOptions};

const MULTIPART_BOUNDARY: &str = "ocr-batch-test-boundary";

/// Every variable `Settings::load` reads. Cleared before each test so the
/// developer's shell cannot leak into assertions.
const SETTINGS_VARS: &[&str] = &[
    "OCR_HOST",
    "OCR_PORT",
    "OCR_ENV",
    "OCR_SERVICE_NAME",
    "OCR_API_PREFIX",
    "OCR_CORS_ORIGINS",
    "OCR_MAX_CONCURRENT_TASKS",
    "OCR_MAX_FILES_PER_BATCH",
    "OCR_MAX_UPLOAD_SIZE_MB",
    "OCR_ALLOWED_IMAGE_EXTENSIONS",
    "OCR_MAX_IMAGE_DIMENSION",
    "OCR_ENHANCE_CONTRAST",
    "OCR_RECOGNITION_TIMEOUT_SECONDS",
    "OCR_TASK_RETENTION_MINUTES",
    "OCR_JANITOR_INTERVAL_SECONDS",
    "OCR_CLEAR_ON_DOWNLOAD",
    "OCR_TESSERACT_PATH",
    "OCR_VISION_URL",
    "OCR_VISION_MODEL",
    "OCR_ENGINE_PROBE_TIMEOUT_SECONDS",
    "OCR_LOG_LEVEL",
    "OCR_LOG_JSON",
    "PROMETHEUS_ENABLED",
];

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    for name in SETTINGS_VARS {
        std::env::remove_var(name);
    }
    std::env::set_var("OCR_ENV", "test");
}

pub(crate) async fn setup_test_context(engines: Vec<FakeEngine>) -> TestContext {
    setup_test_context_with(engines, &[]).await
}

/// Like [`setup_test_context`] with extra environment overrides applied
/// before settings are loaded.
pub(crate) async fn setup_test_context_with(
    engines: Vec<FakeEngine>,
    overrides: &[(&str, &str)],
) -> TestContext {
    let guard = env_lock().await;
    set_test_env();
    for (name, value) in overrides {
        std::env::set_var(name, value);
    }

    let settings = Settings::load().expect("settings");
    let state = AppState::new(settings, registry_of(engines).await);
    let app = api::router::router(state.clone());

    TestContext { state, app, _guard: guard }
}

pub(crate) async fn registry_of(engines: Vec<FakeEngine>) -> Arc<EngineRegistry> {
    let engines = engines.into_iter().map(|engine| Arc::new(engine) as Arc<dyn OcrEngine>);
    Arc::new(EngineRegistry::probe(engines.collect(), Duration::from_secs(1)).await)
}

/// White page with a few dark blocks, encoded as PNG.
pub(crate) fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let image = GrayImage::from_fn(width, height, |x, y| {
        if (x / 8) % 3 == 1 && (y / 8) % 2 == 1 {
            Luma([20])
        } else {
            Luma([235])
        }
    });
    let mut buffer = std::io::Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).expect("encode png fixture");
    buffer.into_inner()
}

pub(crate) fn prepared_image() -> PreparedImage {
    let options = PreprocessOptions { max_dimension: 1024, enhance_contrast: false };
    preprocess(&png_fixture(64, 32), options).expect("prepare fixture")
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub(crate) async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub(crate) fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).expect("request body")
}

/// Builds a `multipart/form-data` upload with `files` parts followed by
/// plain text fields.
pub(crate) fn multipart_request(
    uri: &str,
    files: &[(&str, Vec<u8>)],
    fields: &[(&str, &str)],
) -> Request<Body> {
    let mut body = Vec::new();
    for (filename, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; \
                 filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; \
                 name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request body")
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

pub(crate) async fn read_text(response: axum::response::Response<Body>) -> String {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}

#[derive(Debug, Clone)]
enum FakeReply {
    Text(String),
    Note(String),
    Fail(String),
}

/// Scripted engine for registry, runner and router tests.
pub(crate) struct FakeEngine {
    name: &'static str,
    kind: EngineKind,
    languages: Vec<Language>,
    available: bool,
    reply: FakeReply,
    delay: Duration,
    probe_delay: Duration,
    gate: Option<watch::Receiver<bool>>,
    calls: Arc<AtomicUsize>,
}

impl FakeEngine {
    fn new(name: &'static str, kind: EngineKind, reply: FakeReply) -> Self {
        Self {
            name,
            kind,
            languages: Language::ALL.to_vec(),
            available: true,
            reply,
            delay: Duration::ZERO,
            probe_delay: Duration::ZERO,
            gate: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn primary(name: &'static str) -> Self {
        Self::new(name, EngineKind::Primary, FakeReply::Text(format!("text from {name}")))
    }

    pub(crate) fn backup(name: &'static str) -> Self {
        Self::new(name, EngineKind::Backup, FakeReply::Text(format!("text from {name}")))
    }

    pub(crate) fn fallback(name: &'static str) -> Self {
        Self::new(
            name,
            EngineKind::Fallback,
            FakeReply::Note("Detected 0 potential text regions".to_string()),
        )
    }

    pub(crate) fn supporting(mut self, languages: &[Language]) -> Self {
        self.languages = languages.to_vec();
        self
    }

    pub(crate) fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub(crate) fn replying(mut self, text: &str) -> Self {
        self.reply = FakeReply::Text(text.to_string());
        self
    }

    pub(crate) fn noting(mut self, note: &str) -> Self {
        self.reply = FakeReply::Note(note.to_string());
        self
    }

    pub(crate) fn failing(mut self, message: &str) -> Self {
        self.reply = FakeReply::Fail(message.to_string());
        self
    }

    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    /// Blocks every recognition until the channel carries `true`.
    pub(crate) fn gated(mut self, gate: watch::Receiver<bool>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Shared counter of `recognize` calls, bumped before any delay or gate.
    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn probe(&self) -> Result<Vec<Language>, EngineError> {
        tokio::time::sleep(self.probe_delay).await;
        if self.available {
            Ok(self.languages.clone())
        } else {
            Err(EngineError::Unavailable(format!("{} is switched off", self.name)))
        }
    }

    async fn recognize(
        &self,
        _image: &PreparedImage,
        _languages: &LanguageSet,
    ) -> Result<Recognition, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            gate.wait_for(|open| *open)
                .await
                .map_err(|err| EngineError::RecognitionFailure(err.to_string()))?;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.reply {
            FakeReply::Text(text) => Ok(Recognition::text(text.clone())),
            FakeReply::Note(note) => {
                Ok(Recognition { text: String::new(), note: Some(note.clone()) })
            }
            FakeReply::Fail(message) => Err(EngineError::RecognitionFailure(message.clone())),
        }
    }
}
