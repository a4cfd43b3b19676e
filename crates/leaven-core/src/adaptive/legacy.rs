//! Keyword detection of adaptive steps for bakes stored before the explicit
//! `is_adaptive` flag existed.
//!
//! Only consulted when configuration opts in. New data should set the flag.

use serde::{Deserialize, Serialize};

use crate::timeline::Step;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyKeywords {
    words: Vec<String>,
}

impl LegacyKeywords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.into().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Whole-word, case-insensitive match against name and instructions.
    pub fn matches(&self, step: &Step) -> bool {
        let text = format!("{} {}", step.name, step.instructions).to_lowercase();
        text.split(|c: char| !c.is_alphanumeric())
            .any(|token| self.words.iter().any(|w| w == token))
    }
}

impl Default for LegacyKeywords {
    fn default() -> Self {
        Self::new(["until", "doubled", "ready"])
    }
}
