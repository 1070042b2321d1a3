use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Language {
    En,
    Ja,
    Ko,
}

impl Language {
    pub(crate) const ALL: [Language; 3] = [Language::En, Language::Ja, Language::Ko];

    pub(crate) fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ja => "ja",
            Language::Ko => "ko",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" | "eng" | "english" => Some(Language::En),
            "ja" | "jpn" | "japanese" => Some(Language::Ja),
            "ko" | "kor" | "korean" => Some(Language::Ko),
            _ => None,
        }
    }

    /// Traineddata name used by tesseract.
    pub(crate) fn tesseract_code(self) -> &'static str {
        match self {
            Language::En => "eng",
            Language::Ja => "jpn",
            Language::Ko => "kor",
        }
    }

    pub(crate) fn english_name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Ja => "Japanese",
            Language::Ko => "Korean",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Non-empty, ordered set of requested languages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub(crate) struct LanguageSet(BTreeSet<Language>);

impl LanguageSet {
    pub(crate) fn new(languages: impl IntoIterator<Item = Language>) -> Option<Self> {
        let set: BTreeSet<Language> = languages.into_iter().collect();
        if set.is_empty() {
            None
        } else {
            Some(Self(set))
        }
    }

    pub(crate) fn single(language: Language) -> Self {
        Self(BTreeSet::from([language]))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Language> + '_ {
        self.0.iter().copied()
    }

    pub(crate) fn is_subset_of(&self, supported: &[Language]) -> bool {
        self.0.iter().all(|language| supported.contains(language))
    }
}

impl fmt::Display for LanguageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<&str> = self.0.iter().map(|language| language.code()).collect();
        f.write_str(&codes.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_codes_and_aliases() {
        assert_eq!(Language::parse("EN"), Some(Language::En));
        assert_eq!(Language::parse(" jpn "), Some(Language::Ja));
        assert_eq!(Language::parse("korean"), Some(Language::Ko));
        assert_eq!(Language::parse("de"), None);
    }

    #[test]
    fn language_set_rejects_empty_and_dedups() {
        assert!(LanguageSet::new([]).is_none());
        let set = LanguageSet::new([Language::Ko, Language::En, Language::Ko]).expect("set");
        assert_eq!(set.iter().count(), 2);
        assert_eq!(set.to_string(), "en+ko");
    }

    #[test]
    fn subset_checks_every_language() {
        let set = LanguageSet::new([Language::En, Language::Ja]).expect("set");
        assert!(set.is_subset_of(&Language::ALL));
        assert!(!set.is_subset_of(&[Language::En]));
    }
}
