//! Heuristic detection of programs waiting on standard input.
//!
//! The classifier looks at one output chunk at a time and answers a single
//! question: does this text look like a prompt? It knows nothing about the
//! running program. False positives only surface a redundant input hint;
//! false negatives leave the caller to send input unprompted.

use coderun_proto::{Error, Result};
use regex::Regex;

/// Cues matched against the lowercased chunk.
///
/// Entries that begin or end with a word character are matched on word
/// boundaries, so `type` does not fire on `TypeError` and `enter` does not
/// fire on `center`.
pub const DEFAULT_INPUT_CUES: &[&str] = &[
    "enter",
    "input",
    "type",
    "provide",
    "choose",
    "select",
    "press",
    "your name",
    "how many",
    "how much",
    "what is your",
    "password",
    "roll number",
    "(y/n)",
    "[y/n]",
];

/// Characters that end a typical prompt line (`Name:`, `Continue?`, `>>> `).
const PROMPT_TERMINATORS: &[char] = &['?', ':', '>'];

/// Stateless prompt detector over single output chunks.
#[derive(Debug, Clone, Default)]
pub struct InputClassifier {
    cues: Option<Regex>,
}

impl InputClassifier {
    /// Builds a classifier from a list of cues (case-insensitive).
    pub fn new<S: AsRef<str>>(cues: &[S]) -> Result<Self> {
        let alternatives: Vec<String> = cues
            .iter()
            .map(|cue| cue.as_ref().trim().to_lowercase())
            .filter(|cue| !cue.is_empty())
            .map(|cue| {
                let mut pattern = String::new();
                if cue.starts_with(|c: char| c.is_alphanumeric()) {
                    pattern.push_str(r"\b");
                }
                pattern.push_str(&regex::escape(&cue));
                if cue.ends_with(|c: char| c.is_alphanumeric()) {
                    pattern.push_str(r"\b");
                }
                pattern
            })
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { cues: None });
        }
        let cues = Regex::new(&alternatives.join("|"))
            .map_err(|e| Error::Config(format!("invalid input cues: {e}")))?;
        Ok(Self { cues: Some(cues) })
    }

    /// Classifier using [`DEFAULT_INPUT_CUES`].
    pub fn with_default_cues() -> Self {
        match Self::new(DEFAULT_INPUT_CUES) {
            Ok(classifier) => classifier,
            Err(e) => {
                tracing::warn!(error = %e, "Default input cues rejected, using punctuation only");
                Self::default()
            }
        }
    }

    /// Returns true if the chunk looks like the program is about to read input.
    pub fn needs_input(&self, chunk: &str) -> bool {
        let stripped = strip_ansi_escapes::strip_str(chunk);
        let text = stripped.to_lowercase();
        if text.trim().is_empty() {
            return false;
        }
        if text.trim_end().ends_with(PROMPT_TERMINATORS) {
            return true;
        }
        self.cues.as_ref().is_some_and(|cues| cues.is_match(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(chunk: &str) -> bool {
        InputClassifier::with_default_cues().needs_input(chunk)
    }

    #[test]
    fn test_prompts_are_detected() {
        for prompt in [
            "Enter your name:",
            "Enter a number: ",
            "What is your age?",
            "Continue? (y/n) ",
            "Please provide the roll number",
            "Choose an option",
            ">>> ",
            "Name:\n",
        ] {
            assert!(classify(prompt), "expected prompt: {prompt:?}");
        }
    }

    #[test]
    fn test_plain_output_is_not_a_prompt() {
        for text in [
            "Hello, world!",
            "3",
            "42\n",
            "Result = 7\n",
            "",
            "   \n",
            "TypeError: unsupported operand\n",
            "centered text\n",
        ] {
            assert!(!classify(text), "unexpected prompt: {text:?}");
        }
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert!(classify("ENTER YOUR NAME"));
        assert!(classify("eNtEr value"));
        assert!(classify("PASSWORD"));
    }

    #[test]
    fn test_ansi_sequences_are_ignored() {
        assert!(classify("\x1b[1;32mEnter value\x1b[0m"));
        assert!(!classify("\x1b[31mdone\x1b[0m\n"));
    }

    #[test]
    fn test_custom_cues() {
        let classifier = InputClassifier::new(&["gimme"]).unwrap();
        assert!(classifier.needs_input("gimme a number"));
        assert!(!classifier.needs_input("enter a number"));
        // Trailing prompt punctuation is independent of the cue list.
        assert!(classifier.needs_input("number:"));
    }

    #[test]
    fn test_empty_cue_list_keeps_punctuation_rule() {
        let classifier = InputClassifier::new::<&str>(&[]).unwrap();
        assert!(!classifier.needs_input("enter something"));
        assert!(classifier.needs_input("anything?"));
    }
}
