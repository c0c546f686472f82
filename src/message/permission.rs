//! Permission prompt detection
//!
//! The agent runs non-interactively, so when it wants confirmation it says so
//! in prose. Detection is a swappable strategy: the classifier only sees the
//! [`PermissionDetector`] trait.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CompanionError, Result};

/// Strategy that decides whether assistant text asks the user for permission
pub trait PermissionDetector: Send + Sync {
    /// Return the sentence containing the permission question, if any
    fn detect(&self, text: &str) -> Option<String>;
}

/// Direct confirmation phrases
const DEFAULT_PHRASES: &[&str] = &[
    "do you want me to proceed",
    "would you like me to proceed",
    "shall i proceed",
    "should i proceed",
    "may i proceed",
    "can i proceed",
    "please confirm",
    "can you confirm",
    "do you approve",
    "is it okay if i",
    "is it ok if i",
    "with your permission",
    "i need your permission",
    "requires your approval",
    "awaiting your approval",
];

/// Verbs that make "should I <verb>" style questions a permission request
const DEFAULT_ACTION_WORDS: &[&str] = &[
    "add", "apply", "change", "commit", "continue", "create", "delete", "deploy", "edit",
    "execute", "fix", "implement", "install", "make", "modify", "move", "overwrite", "proceed",
    "push", "remove", "rename", "replace", "run", "start", "uninstall", "update", "write",
];

/// Generic help questions that are never permission requests
const DEFAULT_EXCLUSIONS: &[&str] = &[
    "how can i help",
    "how may i help",
    "can i help you",
    "what can i help",
    "how can i assist",
    "anything else i can",
    "is there anything else",
    "what would you like me to",
    "let me know if",
];

const QUESTION_PATTERN: &str = r"\b(?:(?:should|shall|can|may|could) i|(?:do you want|would you like) me to)\s+(?:go ahead and\s+|now\s+)?([a-z]+)";

static DEFAULT_QUESTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(QUESTION_PATTERN).expect("question pattern is valid"));

/// Rule-set detector: phrase list, parametrized question pattern and exclusions
#[derive(Debug, Clone)]
pub struct PhraseRules {
    phrases: Vec<String>,
    action_words: HashSet<String>,
    exclusions: Vec<String>,
    question: Regex,
}

impl Default for PhraseRules {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_PHRASES.iter().map(|s| (*s).to_string()).collect(),
            action_words: DEFAULT_ACTION_WORDS.iter().map(|s| (*s).to_string()).collect(),
            exclusions: DEFAULT_EXCLUSIONS.iter().map(|s| (*s).to_string()).collect(),
            question: DEFAULT_QUESTION.clone(),
        }
    }
}

impl PhraseRules {
    /// Build a custom rule set
    ///
    /// # Errors
    /// Returns `CompanionError::Validation` if `question_pattern` is not a valid
    /// regex or lacks a capture group for the action word
    pub fn new(
        phrases: impl IntoIterator<Item = String>,
        action_words: impl IntoIterator<Item = String>,
        exclusions: impl IntoIterator<Item = String>,
        question_pattern: &str,
    ) -> Result<Self> {
        let question = Regex::new(question_pattern)
            .map_err(|e| CompanionError::validation(format!("Invalid question pattern: {e}")))?;
        if question.captures_len() < 2 {
            return Err(CompanionError::validation(
                "Question pattern needs a capture group for the action word",
            ));
        }
        Ok(Self {
            phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
            action_words: action_words.into_iter().map(|w| w.to_lowercase()).collect(),
            exclusions: exclusions.into_iter().map(|e| e.to_lowercase()).collect(),
            question,
        })
    }

    fn sentence_matches(&self, lower: &str) -> bool {
        if self.exclusions.iter().any(|e| lower.contains(e.as_str())) {
            return false;
        }
        if self.phrases.iter().any(|p| lower.contains(p.as_str())) {
            return true;
        }
        self.question.captures_iter(lower).any(|caps| {
            caps.get(1)
                .is_some_and(|verb| self.action_words.contains(verb.as_str()))
        })
    }
}

impl PermissionDetector for PhraseRules {
    fn detect(&self, text: &str) -> Option<String> {
        split_sentences(text)
            .into_iter()
            .find(|sentence| self.sentence_matches(&sentence.to_lowercase()))
            .map(str::to_string)
    }
}

/// Split on sentence terminators, keeping the terminator with its sentence
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?' | '\n') {
            let end = idx + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
