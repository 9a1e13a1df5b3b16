//! Text analysis used when indexing document fields.
//!
//! Pilum only needs enough analysis to turn field text into index terms.
//! The default analyzer splits on Unicode word boundaries and lowercases;
//! a keyword analyzer treats the whole field value as a single term.
//! Individual documents may carry their own analyzer override.

use std::fmt::Debug;

use unicode_segmentation::UnicodeSegmentation;

/// Converts field text into index terms.
pub trait Analyzer: Send + Sync + Debug {
    /// Split `text` into the terms that should be indexed for it.
    fn analyze(&self, text: &str) -> Vec<String>;

    /// Name of this analyzer, used in diagnostics.
    fn name(&self) -> &'static str;
}

/// Unicode word segmentation plus lowercasing.
#[derive(Debug, Clone, Default)]
pub struct StandardAnalyzer;

impl StandardAnalyzer {
    /// Create a new standard analyzer.
    pub fn new() -> Self {
        StandardAnalyzer
    }
}

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        text.unicode_words().map(|w| w.to_lowercase()).collect()
    }

    fn name(&self) -> &'static str {
        "standard"
    }
}

/// Indexes the whole field value as one term, trimmed but otherwise
/// untouched. Useful for identifiers and exact-match fields.
#[derive(Debug, Clone, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    /// Create a new keyword analyzer.
    pub fn new() -> Self {
        KeywordAnalyzer
    }
}

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        }
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}
