//! Natural-language-to-command seam
//!
//! Translation is an external collaborator: the coordinator only ever
//! receives literal command text, so callers run their input through a
//! `CommandTranslator` before building a request.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of translating free-form text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    /// A single candidate command
    Command(String),
    /// Several plausible candidates; the caller must disambiguate
    Ambiguous(Vec<String>),
    /// The text could not be mapped to a command
    NoMatch,
}

/// Translation provider errors
#[derive(Error, Debug)]
pub enum TranslateError {
    /// The backing provider failed
    #[error("translation provider error: {0}")]
    Provider(String),
}

/// Black-box translation from natural language to a shell command
#[async_trait]
pub trait CommandTranslator: Send + Sync {
    /// Translate free-form text into candidate command text
    ///
    /// # Errors
    /// Returns `TranslateError` only on provider failure; an unmappable
    /// input is `Ok(Translation::NoMatch)`.
    async fn translate(&self, text: &str) -> Result<Translation, TranslateError>;
}

/// Table-driven translator for scripting and tests
///
/// Exact-match lookups only; anything unknown is `NoMatch`.
#[derive(Debug, Default)]
pub struct StaticTranslator {
    table: HashMap<String, Vec<String>>,
}

impl StaticTranslator {
    /// Create an empty translator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an input phrase to one or more candidate commands
    #[must_use]
    pub fn with_mapping(mut self, phrase: impl Into<String>, candidates: Vec<String>) -> Self {
        self.table.insert(phrase.into(), candidates);
        self
    }
}

#[async_trait]
impl CommandTranslator for StaticTranslator {
    async fn translate(&self, text: &str) -> Result<Translation, TranslateError> {
        Ok(match self.table.get(text.trim()) {
            Some(candidates) if candidates.len() == 1 => {
                Translation::Command(candidates[0].clone())
            }
            Some(candidates) if !candidates.is_empty() => {
                Translation::Ambiguous(candidates.clone())
            }
            _ => Translation::NoMatch,
        })
    }
}
