//! Per-line classification.
//!
//! Each input line is classified once, independently of parser state. The
//! state machine in `machine.rs` then dispatches on the resulting [`LineKind`].

use std::sync::LazyLock;

use regex::Regex;

/// Comment and example lines, dropped without diagnostics.
static IGNORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:#|//|(?:eg|example)\s*:)").expect("ignore marker regex")
});

/// Keyword tags. `Q` may carry a number (`Q12:`).
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(des|q\d*|ans(?:wer)?|exp(?:lanation)?)\s*:\s*(.*?)\s*$")
        .expect("tag regex")
});

/// Option labels: `A:`, `A)`, `(A)`, `[A]`.
static OPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\(([A-Za-z])\)|\[([A-Za-z])\]|([A-Za-z])\s*[:)])\s*(.*?)\s*$")
        .expect("option regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Ignored,
    Announcement(String),
    QuestionStart(String),
    Option { label: char, text: String },
    Answer(String),
    Explanation(String),
    Text(String),
}

pub fn classify(line: &str) -> LineKind {
    if line.trim().is_empty() {
        return LineKind::Blank;
    }
    if IGNORE_RE.is_match(line) {
        return LineKind::Ignored;
    }

    if let Some(caps) = TAG_RE.captures(line) {
        let tag = caps[1].to_ascii_uppercase();
        let rest = caps[2].to_string();
        return match tag.as_str() {
            "DES" => LineKind::Announcement(rest),
            "ANS" | "ANSWER" => LineKind::Answer(rest),
            "EXP" | "EXPLANATION" => LineKind::Explanation(rest),
            _ => LineKind::QuestionStart(rest),
        };
    }

    if let Some(caps) = OPTION_RE.captures(line) {
        let label = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .and_then(|m| m.as_str().chars().next())
            .map(|c| c.to_ascii_uppercase());
        if let Some(label) = label {
            return LineKind::Option {
                label,
                text: caps[4].to_string(),
            };
        }
    }

    LineKind::Text(line.trim().to_string())
}
