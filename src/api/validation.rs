use std::path::Path;

use crate::api::errors::ApiError;
use crate::engines::{Language, LanguageSet};
use crate::tasks::TaskMode;

/// Lowercased extension without the dot.
pub(crate) fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub(crate) fn has_allowed_extension(filename: &str, allowed_extensions: &[String]) -> bool {
    file_extension(filename)
        .map(|extension| allowed_extensions.iter().any(|allowed| allowed == &extension))
        .unwrap_or(false)
}

/// Drops directory components and any character outside `[A-Za-z0-9._-]`.
/// Whitespace becomes `_`. Names that end up empty fall back to
/// `file_<position>`.
pub(crate) fn sanitized_filename(name: &str, position: usize) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let clean = |part: &str| -> String {
        part.chars()
            .filter_map(|c| match c {
                c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => Some(c),
                c if c.is_whitespace() => Some('_'),
                _ => None,
            })
            .collect()
    };

    let (stem, extension) = match base.rsplit_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (base, None),
    };

    let mut stem: String = stem.split('.').map(clean).collect::<Vec<_>>().join(".");
    stem = stem.trim_matches(['.', '_']).to_string();
    if stem.is_empty() {
        stem = format!("file_{position}");
    }

    match extension.map(clean).filter(|extension| !extension.is_empty()) {
        Some(extension) => format!("{stem}.{extension}"),
        None => stem,
    }
}

pub(crate) fn parse_mode(value: Option<&str>) -> Result<TaskMode, ApiError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(TaskMode::default()),
        Some(value) => TaskMode::parse(value).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unknown mode '{value}'; expected 'normal' or 'high_accuracy'"
            ))
        }),
    }
}

/// Accepts repeated fields and comma separated lists. Defaults to English.
pub(crate) fn parse_languages(values: &[String]) -> Result<LanguageSet, ApiError> {
    let mut languages = Vec::new();
    for code in values.iter().flat_map(|value| value.split(',')).map(str::trim) {
        if code.is_empty() {
            continue;
        }
        let language = Language::parse(code).ok_or_else(|| {
            ApiError::BadRequest(format!("Unsupported language '{code}'; expected en, ja or ko"))
        })?;
        languages.push(language);
    }

    Ok(LanguageSet::new(languages).unwrap_or_else(|| LanguageSet::single(Language::En)))
}
