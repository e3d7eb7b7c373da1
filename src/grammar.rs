//! Single-phrase grammars.
//!
//! A grammar here is exactly one recognizable utterance: a word or a short
//! phrase. Matching is done on a normalized form (lowercase, punctuation
//! stripped, whitespace collapsed) so that transcripts like `"Five."` or
//! `"  FIVE "` are accepted for the phrase `five`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// An immutable, non-empty phrase forming the active single-choice grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GrammarPhrase {
    text: String,       // Trimmed phrase as given by the caller
    normalized: String, // Lowercase words separated by single spaces
}

impl GrammarPhrase {
    /// Validate and build a phrase.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidGrammar`] if the phrase is empty after
    /// trimming, or contains no speakable words (only punctuation/symbols).
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Err(SessionError::InvalidGrammar("phrase is empty".to_string()));
        }

        let normalized = normalize(trimmed);
        if normalized.is_empty() {
            return Err(SessionError::InvalidGrammar(format!("phrase '{}' has no speakable words", trimmed)));
        }

        Ok(Self { text: trimmed.to_string(), normalized })
    }

    /// The phrase text as loaded.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The normalized form used for matching.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Check whether a raw transcript contains this phrase as a contiguous
    /// sequence of whole words.
    pub fn matches(&self, transcript: &str) -> bool {
        let heard = normalize(transcript);
        if heard.is_empty() {
            return false;
        }

        let wanted: Vec<&str> = self.normalized.split(' ').collect();
        let heard: Vec<&str> = heard.split(' ').collect();

        heard.windows(wanted.len()).any(|window| window == wanted.as_slice())
    }
}

impl fmt::Display for GrammarPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl TryFrom<String> for GrammarPhrase {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<GrammarPhrase> for String {
    fn from(phrase: GrammarPhrase) -> Self {
        phrase.text
    }
}

/// Lowercase, replace everything that is not alphanumeric (or an apostrophe
/// inside a word) by a separator, and collapse runs of separators.
pub fn normalize(text: &str) -> String {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|word| word.trim_matches('\''))
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
