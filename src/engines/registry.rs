use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::{EngineDescriptor, EngineError, EngineKind, LanguageSet, OcrEngine, Recognition};
use crate::services::preprocess::PreparedImage;
use crate::tasks::TaskMode;

/// Coarse health derived from the probed engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ServiceLevel {
    /// At least one real recognizer is available.
    Ready,
    /// Only the region detector is left.
    Limited,
    Down,
}

/// What the fallback chain produced for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileRecognition {
    pub(crate) text: String,
    pub(crate) engine: Option<&'static str>,
    pub(crate) note: Option<String>,
}

impl FileRecognition {
    fn from_engine(engine: &'static str, recognition: Recognition) -> Self {
        Self { text: recognition.text, engine: Some(engine), note: recognition.note }
    }

    fn empty(engine: Option<&'static str>, note: String) -> Self {
        Self { text: String::new(), engine, note: Some(note) }
    }
}

struct RegisteredEngine {
    engine: Arc<dyn OcrEngine>,
    descriptor: EngineDescriptor,
}

/// Probed engines in priority order. Availability is fixed after [`probe`].
///
/// [`probe`]: EngineRegistry::probe
pub(crate) struct EngineRegistry {
    entries: Vec<RegisteredEngine>,
}

impl EngineRegistry {
    /// Probes every engine once. Priority follows the order engines are
    /// given in, within their kind.
    pub(crate) async fn probe(engines: Vec<Arc<dyn OcrEngine>>, probe_timeout: Duration) -> Self {
        let mut entries = Vec::with_capacity(engines.len());

        for (index, engine) in engines.into_iter().enumerate() {
            let probed = match tokio::time::timeout(probe_timeout, engine.probe()).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(probe_timeout)),
            };

            let (available, languages) = match probed {
                Ok(languages) => {
                    tracing::info!(
                        engine = engine.name(),
                        kind = engine.kind().as_str(),
                        languages = ?languages,
                        "Engine available"
                    );
                    (true, languages)
                }
                Err(err) => {
                    tracing::warn!(
                        engine = engine.name(),
                        kind = engine.kind().as_str(),
                        error = %err,
                        "Engine unavailable"
                    );
                    (false, Vec::new())
                }
            };

            let descriptor = EngineDescriptor {
                name: engine.name(),
                kind: engine.kind(),
                priority: u8::try_from(index).unwrap_or(u8::MAX),
                available,
                languages,
            };
            entries.push(RegisteredEngine { engine, descriptor });
        }

        entries.sort_by_key(|entry| (entry.descriptor.kind, entry.descriptor.priority));
        Self { entries }
    }

    pub(crate) fn descriptors(&self) -> Vec<EngineDescriptor> {
        self.entries.iter().map(|entry| entry.descriptor.clone()).collect()
    }

    pub(crate) fn any_available(&self) -> bool {
        self.entries.iter().any(|entry| entry.descriptor.available)
    }

    pub(crate) fn service_level(&self) -> ServiceLevel {
        let available: Vec<EngineKind> = self
            .entries
            .iter()
            .filter(|entry| entry.descriptor.available)
            .map(|entry| entry.descriptor.kind)
            .collect();

        if available.iter().any(|kind| *kind != EngineKind::Fallback) {
            ServiceLevel::Ready
        } else if !available.is_empty() {
            ServiceLevel::Limited
        } else {
            ServiceLevel::Down
        }
    }

    /// Ordered engines to consult for one file.
    ///
    /// Recognizers must support every requested language. When none does,
    /// `normal` degrades to the region detector and `high_accuracy` gets an
    /// empty list.
    pub(crate) fn candidates(
        &self,
        mode: TaskMode,
        languages: &LanguageSet,
    ) -> Vec<Arc<dyn OcrEngine>> {
        let recognizers: Vec<Arc<dyn OcrEngine>> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.descriptor.available
                    && entry.descriptor.kind != EngineKind::Fallback
                    && languages.is_subset_of(&entry.descriptor.languages)
            })
            .map(|entry| Arc::clone(&entry.engine))
            .collect();

        if !recognizers.is_empty() || mode == TaskMode::HighAccuracy {
            return recognizers;
        }

        self.entries
            .iter()
            .filter(|entry| {
                entry.descriptor.available && entry.descriptor.kind == EngineKind::Fallback
            })
            .map(|entry| Arc::clone(&entry.engine))
            .collect()
    }

    /// Runs the fallback chain for one prepared image. Engine errors never
    /// escape; they end up in the note of an empty result.
    ///
    /// `file_timeout` bounds all attempts for the file together. Engines
    /// left when it runs out are recorded as timed out without being called.
    pub(crate) async fn recognize(
        &self,
        image: &PreparedImage,
        mode: TaskMode,
        languages: &LanguageSet,
        file_timeout: Duration,
    ) -> FileRecognition {
        let candidates = self.candidates(mode, languages);
        if candidates.is_empty() {
            return FileRecognition::empty(
                None,
                format!("No available engine supports {languages}"),
            );
        }

        let deadline = Instant::now() + file_timeout;
        let mut failures = Vec::new();
        let mut answered = None;

        match mode {
            TaskMode::Normal => {
                for engine in &candidates {
                    match attempt(engine.as_ref(), image, languages, deadline, file_timeout).await {
                        Ok(recognition)
                            if recognition.has_text() || engine.kind() == EngineKind::Fallback =>
                        {
                            return FileRecognition::from_engine(engine.name(), recognition);
                        }
                        Ok(_) => {
                            answered.get_or_insert(engine.name());
                        }
                        Err(err) => failures.push(format!("{}: {err}", engine.name())),
                    }
                }
            }
            TaskMode::HighAccuracy => {
                let mut best: Option<(&'static str, Recognition)> = None;
                for engine in &candidates {
                    match attempt(engine.as_ref(), image, languages, deadline, file_timeout).await {
                        Ok(recognition) => {
                            answered.get_or_insert(engine.name());
                            let longer = best.as_ref().map_or(true, |(_, current)| {
                                recognition.text.chars().count() > current.text.chars().count()
                            });
                            if recognition.has_text() && longer {
                                best = Some((engine.name(), recognition));
                            }
                        }
                        Err(err) => failures.push(format!("{}: {err}", engine.name())),
                    }
                }
                if let Some((engine, recognition)) = best {
                    return FileRecognition::from_engine(engine, recognition);
                }
            }
        }

        let note = if failures.is_empty() {
            "No text detected".to_string()
        } else {
            format!("Text extraction failed: {}", failures.join("; "))
        };
        FileRecognition::empty(answered, note)
    }
}

async fn attempt(
    engine: &dyn OcrEngine,
    image: &PreparedImage,
    languages: &LanguageSet,
    deadline: Instant,
    file_timeout: Duration,
) -> Result<Recognition, EngineError> {
    if Instant::now() >= deadline {
        return Err(EngineError::Timeout(file_timeout));
    }

    let result = match tokio::time::timeout_at(deadline, engine.recognize(image, languages)).await
    {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(file_timeout)),
    };

    if let Err(err) = &result {
        metrics::counter!(
            "ocr_engine_failures_total",
            "engine" => engine.name(),
            "kind" => err.label()
        )
        .increment(1);
        tracing::warn!(engine = engine.name(), error = %err, "Engine attempt failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::Language;
    use crate::test_support::{self, FakeEngine};

    const FILE_TIMEOUT: Duration = Duration::from_secs(2);

    fn en() -> LanguageSet {
        LanguageSet::single(Language::En)
    }

    async fn registry(engines: Vec<FakeEngine>) -> EngineRegistry {
        let engines = engines.into_iter().map(|engine| Arc::new(engine) as Arc<dyn OcrEngine>);
        EngineRegistry::probe(engines.collect(), Duration::from_secs(1)).await
    }

    fn names(candidates: &[Arc<dyn OcrEngine>]) -> Vec<&'static str> {
        candidates.iter().map(|engine| engine.name()).collect()
    }

    #[tokio::test]
    async fn probe_caches_availability_and_sorts_by_kind() {
        let registry = registry(vec![
            FakeEngine::fallback("regions"),
            FakeEngine::backup("vision").unavailable(),
            FakeEngine::primary("tesseract").supporting(&[Language::En]),
        ])
        .await;

        let descriptors = registry.descriptors();
        let order: Vec<_> = descriptors.iter().map(|d| (d.name, d.available)).collect();
        assert_eq!(order, vec![("tesseract", true), ("vision", false), ("regions", true)]);
        assert!(descriptors[1].languages.is_empty());
        assert_eq!(registry.service_level(), ServiceLevel::Ready);
    }

    #[tokio::test]
    async fn probe_timeout_marks_engine_unavailable() {
        let engines: Vec<Arc<dyn OcrEngine>> =
            vec![Arc::new(FakeEngine::primary("slow").probe_delay(Duration::from_secs(5)))];
        let registry = EngineRegistry::probe(engines, Duration::from_millis(20)).await;
        assert!(!registry.any_available());
        assert_eq!(registry.service_level(), ServiceLevel::Down);
    }

    #[tokio::test]
    async fn normal_mode_degrades_to_fallback_when_language_unsupported() {
        let registry = registry(vec![
            FakeEngine::primary("tesseract").supporting(&[Language::En]),
            FakeEngine::fallback("regions"),
        ])
        .await;

        let korean = LanguageSet::single(Language::Ko);
        assert_eq!(names(&registry.candidates(TaskMode::Normal, &korean)), vec!["regions"]);
        assert!(registry.candidates(TaskMode::HighAccuracy, &korean).is_empty());
        assert_eq!(names(&registry.candidates(TaskMode::Normal, &en())), vec!["tesseract"]);
    }

    #[tokio::test]
    async fn candidates_require_every_requested_language() {
        let registry = registry(vec![
            FakeEngine::primary("tesseract").supporting(&[Language::En]),
            FakeEngine::backup("vision"),
        ])
        .await;

        let mixed = LanguageSet::new([Language::En, Language::Ja]).expect("set");
        assert_eq!(names(&registry.candidates(TaskMode::Normal, &mixed)), vec!["vision"]);
        assert_eq!(
            names(&registry.candidates(TaskMode::HighAccuracy, &en())),
            vec!["tesseract", "vision"]
        );
    }

    #[tokio::test]
    async fn normal_mode_stops_at_first_success() {
        let primary = FakeEngine::primary("tesseract").replying("hello");
        let backup = FakeEngine::backup("vision").replying("hello from backup");
        let backup_calls = backup.calls();
        let registry = registry(vec![primary, backup]).await;

        let image = test_support::prepared_image();
        let outcome = registry.recognize(&image, TaskMode::Normal, &en(), FILE_TIMEOUT).await;

        assert_eq!(outcome.text, "hello");
        assert_eq!(outcome.engine, Some("tesseract"));
        assert_eq!(backup_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn normal_mode_advances_past_failures() {
        let registry = registry(vec![
            FakeEngine::primary("tesseract").failing("boom"),
            FakeEngine::backup("vision").replying("rescued"),
        ])
        .await;
        let image = test_support::prepared_image();
        let outcome = registry.recognize(&image, TaskMode::Normal, &en(), FILE_TIMEOUT).await;
        assert_eq!(outcome.text, "rescued");
        assert_eq!(outcome.engine, Some("vision"));
    }

    #[tokio::test]
    async fn file_timeout_covers_every_attempt_for_the_file() {
        let primary =
            FakeEngine::primary("tesseract").replying("late").delay(Duration::from_secs(5));
        let backup = FakeEngine::backup("vision").replying("never asked");
        let backup_calls = backup.calls();
        let registry = registry(vec![primary, backup]).await;
        let image = test_support::prepared_image();

        let started = std::time::Instant::now();
        let outcome =
            registry.recognize(&image, TaskMode::Normal, &en(), Duration::from_millis(50)).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(outcome.text.is_empty());
        assert_eq!(outcome.engine, None);
        let note = outcome.note.expect("note");
        assert!(note.contains("tesseract: recognition timed out"));
        assert!(note.contains("vision: recognition timed out"));
        assert_eq!(backup_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn high_accuracy_keeps_answers_given_before_the_file_timeout() {
        let registry = registry(vec![
            FakeEngine::primary("tesseract").replying("fast answer"),
            FakeEngine::backup("vision")
                .replying("a far longer answer")
                .delay(Duration::from_secs(5)),
        ])
        .await;
        let image = test_support::prepared_image();

        let started = std::time::Instant::now();
        let outcome = registry
            .recognize(&image, TaskMode::HighAccuracy, &en(), Duration::from_millis(100))
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.text, "fast answer");
        assert_eq!(outcome.engine, Some("tesseract"));
    }

    #[tokio::test]
    async fn all_failures_yield_empty_result_with_note() {
        let registry = registry(vec![
            FakeEngine::primary("tesseract").failing("no traineddata"),
            FakeEngine::backup("vision").failing("model missing"),
        ])
        .await;
        let image = test_support::prepared_image();

        let outcome = registry.recognize(&image, TaskMode::Normal, &en(), FILE_TIMEOUT).await;
        assert!(outcome.text.is_empty());
        assert_eq!(outcome.engine, None);
        let note = outcome.note.expect("note");
        assert!(note.contains("tesseract"));
        assert!(note.contains("model missing"));
    }

    #[tokio::test]
    async fn high_accuracy_picks_longest_text() {
        let registry = registry(vec![
            FakeEngine::primary("tesseract").replying("short"),
            FakeEngine::backup("vision").replying("much longer text"),
        ])
        .await;
        let image = test_support::prepared_image();

        let outcome = registry.recognize(&image, TaskMode::HighAccuracy, &en(), FILE_TIMEOUT).await;
        assert_eq!(outcome.text, "much longer text");
        assert_eq!(outcome.engine, Some("vision"));
    }

    #[tokio::test]
    async fn high_accuracy_breaks_ties_by_priority() {
        let registry = registry(vec![
            FakeEngine::backup("vision").replying("abcd"),
            FakeEngine::primary("tesseract").replying("wxyz"),
        ])
        .await;
        let image = test_support::prepared_image();

        let outcome = registry.recognize(&image, TaskMode::HighAccuracy, &en(), FILE_TIMEOUT).await;
        assert_eq!(outcome.engine, Some("tesseract"));
    }

    #[tokio::test]
    async fn high_accuracy_counts_characters_not_bytes() {
        let registry = registry(vec![
            FakeEngine::primary("tesseract").replying("한국어"),
            FakeEngine::backup("vision").replying("abcd"),
        ])
        .await;
        let image = test_support::prepared_image();

        let outcome = registry.recognize(&image, TaskMode::HighAccuracy, &en(), FILE_TIMEOUT).await;
        assert_eq!(outcome.text, "abcd");
    }

    #[tokio::test]
    async fn unsupported_language_in_high_accuracy_records_empty_text() {
        let registry = registry(vec![
            FakeEngine::primary("tesseract").supporting(&[Language::En]),
            FakeEngine::fallback("regions"),
        ])
        .await;
        let image = test_support::prepared_image();

        let korean = LanguageSet::single(Language::Ko);
        let outcome =
            registry.recognize(&image, TaskMode::HighAccuracy, &korean, FILE_TIMEOUT).await;
        assert!(outcome.text.is_empty());
        assert_eq!(outcome.note.as_deref(), Some("No available engine supports ko"));
    }

    #[tokio::test]
    async fn fallback_result_is_returned_even_without_text() {
        let registry = registry(vec![FakeEngine::fallback("regions").noting("Detected 3 regions")])
            .await;
        let image = test_support::prepared_image();

        let outcome = registry.recognize(&image, TaskMode::Normal, &en(), FILE_TIMEOUT).await;
        assert!(outcome.text.is_empty());
        assert_eq!(outcome.engine, Some("regions"));
        assert_eq!(outcome.note.as_deref(), Some("Detected 3 regions"));
        assert_eq!(registry.service_level(), ServiceLevel::Limited);
    }
}
