use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{EngineError, EngineKind, Language, LanguageSet, OcrEngine, Recognition};
use crate::services::preprocess::PreparedImage;

/// Primary recognizer backed by the `tesseract` command line tool.
///
/// The prepared image is streamed to stdin as PNG and the text is read from
/// stdout, so no temporary files are involved.
#[derive(Debug, Clone)]
pub(crate) struct TesseractEngine {
    binary: String,
}

impl TesseractEngine {
    pub(crate) fn new(binary: &str) -> Self {
        Self { binary: binary.to_string() }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, EngineError> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                EngineError::Unavailable(format!("failed to run {}: {err}", self.binary))
            })
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Primary
    }

    async fn probe(&self) -> Result<Vec<Language>, EngineError> {
        let version = self.run(&["--version"]).await?;
        if !version.status.success() {
            return Err(EngineError::Unavailable(format!(
                "{} --version exited with {}",
                self.binary, version.status
            )));
        }

        let listing = self.run(&["--list-langs"]).await?;
        if !listing.status.success() {
            return Err(EngineError::Unavailable(format!(
                "{} --list-langs exited with {}",
                self.binary, listing.status
            )));
        }

        // Older builds print the list on stderr.
        let mut installed = String::from_utf8_lossy(&listing.stdout).into_owned();
        installed.push('\n');
        installed.push_str(&String::from_utf8_lossy(&listing.stderr));

        Ok(installed_languages(&installed))
    }

    async fn recognize(
        &self,
        image: &PreparedImage,
        languages: &LanguageSet,
    ) -> Result<Recognition, EngineError> {
        let png = image.to_png().map_err(|err| EngineError::RecognitionFailure(err.to_string()))?;
        let lang_arg = tesseract_lang_arg(languages);

        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", lang_arg.as_str(), "--oem", "3", "--psm", "3"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| EngineError::Unavailable(format!("failed to spawn tesseract: {err}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .await
                .map_err(|err| EngineError::RecognitionFailure(err.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| EngineError::RecognitionFailure(err.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Traineddata removed after the startup probe.
            if stderr.contains("Failed loading language") {
                return Err(EngineError::Unsupported(lang_arg));
            }
            return Err(EngineError::RecognitionFailure(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(Recognition::text(String::from_utf8_lossy(&output.stdout).trim()))
    }
}

fn tesseract_lang_arg(languages: &LanguageSet) -> String {
    languages.iter().map(Language::tesseract_code).collect::<Vec<_>>().join("+")
}

fn installed_languages(listing: &str) -> Vec<Language> {
    let installed: Vec<&str> = listing.lines().map(str::trim).collect();
    Language::ALL
        .into_iter()
        .filter(|language| installed.contains(&language.tesseract_code()))
        .collect()
}
