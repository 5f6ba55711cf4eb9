//! Outgoing message rewriting for no-answer and disclaimed outcomes.

use regex::Regex;

use crate::validator::{Outcome, Verdict, VerdictReason};

/// Message returned in place of the engine's own "no answer" wording.
pub const NO_ANSWER_MESSAGE: &str = "I couldn't find an answer to that question in the data available to you. \
Try rephrasing it or asking about a different topic.";

/// Advisory appended to disclaimed answers.
pub const ADVISORY_SUFFIX: &str = "\n\n---\nNote: this answer may include technical or restricted content \
that is outside the data normally available to your role. Please review it with a qualified \
reviewer of the underlying data before relying on it.";

const DEFAULT_NO_ANSWER_PATTERNS: &[&str] = &[
    r"(?i)\bcould(?:n['’]?t| not) find (?:an?|any) (?:answer|results?|information|data)\b",
    r"(?i)\b(?:unable|not able) to (?:find|answer|locate)\b",
    r"(?i)\bno (?:answer|results?|data|relevant (?:information|data)) (?:was |were )?(?:found|available)\b",
    r"(?i)\bi (?:do not|don['’]?t) (?:know|have (?:enough )?information)\b",
    r"(?i)\bthere is no (?:information|data)\b",
];

/// Recognizes engine answers that explicitly say nothing was found.
#[derive(Debug, Clone)]
pub struct NoAnswerMatcher {
    patterns: Vec<Regex>,
}

impl Default for NoAnswerMatcher {
    fn default() -> Self {
        Self {
            patterns: compile(DEFAULT_NO_ANSWER_PATTERNS.iter().copied()),
        }
    }
}

impl NoAnswerMatcher {
    /// Built-in patterns plus `extra`.
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to compile.
    pub fn with_extra(extra: &[String]) -> Result<Self, regex::Error> {
        let mut matcher = Self::default();
        for pattern in extra {
            matcher.patterns.push(Regex::new(pattern)?);
        }
        Ok(matcher)
    }

    /// Whether `answer` is an explicit "nothing found" reply.
    pub fn is_no_answer(&self, answer: &str) -> bool {
        let answer = answer.trim();
        answer.is_empty() || self.patterns.iter().any(|re| re.is_match(answer))
    }
}

fn compile<'a>(patterns: impl Iterator<Item = &'a str>) -> Vec<Regex> {
    patterns.filter_map(|pattern| Regex::new(pattern).ok()).collect()
}

/// Produce the caller-facing message for a verdict.
///
/// Returns `None` for Deny and Error; those outcomes carry only an error.
pub fn transform(verdict: &Verdict, raw_message: &str) -> Option<String> {
    match verdict.outcome {
        Outcome::Allow if verdict.reason == VerdictReason::NoAnswer => {
            Some(NO_ANSWER_MESSAGE.to_owned())
        }
        Outcome::Allow => Some(raw_message.to_owned()),
        Outcome::Disclaim => Some(format!("{}{ADVISORY_SUFFIX}", raw_message.trim_end())),
        Outcome::Deny | Outcome::Error => None,
    }
}
