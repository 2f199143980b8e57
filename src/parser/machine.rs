//! Recover-and-continue state machine over classified lines.
//!
//! Two states: `Scanning` (between blocks) and `InQuestion` (a block opened by
//! `Q:`). A block counts as open until it receives `ANS:`; after that, `EXP:`
//! and continuation lines still attach to it, and a `DES:` closes it.

use std::collections::BTreeMap;

use crate::config::ParserConfig;
use crate::parser::diagnostic::Diagnostic;
use crate::parser::line::LineKind;
use crate::sequence::{Item, Question};

/// A question block under construction.
#[derive(Debug)]
struct Block {
    opened_at: usize,
    prompt: Vec<String>,
    options: BTreeMap<char, String>,
    last_label: Option<char>,
    /// Line and raw token of the latest `ANS:`.
    answer: Option<(usize, String)>,
    explanation: Option<String>,
    /// Announcements found while the block was open; emitted after it.
    deferred: Vec<String>,
}

impl Block {
    fn open(line: usize, first: String) -> Self {
        let prompt = if first.is_empty() { Vec::new() } else { vec![first] };
        Self {
            opened_at: line,
            prompt,
            options: BTreeMap::new(),
            last_label: None,
            answer: None,
            explanation: None,
            deferred: Vec::new(),
        }
    }

    fn answered(&self) -> bool {
        self.answer.is_some()
    }
}

#[derive(Debug)]
enum State {
    Scanning,
    InQuestion(Block),
}

pub(crate) struct Machine<'a> {
    config: &'a ParserConfig,
    state: State,
    items: Vec<Item>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(config: &'a ParserConfig) -> Self {
        Self {
            config,
            state: State::Scanning,
            items: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub(crate) fn feed(&mut self, line: usize, kind: LineKind) {
        match kind {
            LineKind::Blank | LineKind::Ignored => {}
            LineKind::Announcement(text) => self.on_announcement(line, text),
            LineKind::QuestionStart(text) => self.on_question(line, text),
            LineKind::Option { label, text } => self.on_option(line, label, text),
            LineKind::Answer(token) => self.on_answer(line, token),
            LineKind::Explanation(text) => self.on_explanation(line, text),
            LineKind::Text(text) => self.on_text(line, text),
        }
    }

    /// Close any open block and hand back items plus line-ordered diagnostics.
    pub(crate) fn finish(mut self, last_line: usize) -> (Vec<Item>, Vec<Diagnostic>) {
        self.close_block();
        if self.items.is_empty() {
            self.diagnostics.push(Diagnostic::error(
                last_line.max(1),
                "no announcements (DES:) or questions (Q:) found",
            ));
        }
        self.diagnostics.sort_by_key(|d| d.location.line);
        (self.items, self.diagnostics)
    }

    fn on_announcement(&mut self, line: usize, text: String) {
        if text.is_empty() {
            self.diagnostics
                .push(Diagnostic::warning(line, "empty announcement ignored"));
            return;
        }
        if let State::InQuestion(block) = &mut self.state
            && !block.answered()
        {
            self.diagnostics.push(Diagnostic::error(
                line,
                format!(
                    "announcement nested inside question block opened on line {}",
                    block.opened_at
                ),
            ));
            block.deferred.push(text);
            return;
        }
        self.close_block();
        self.items.push(Item::Announcement { text });
    }

    fn on_question(&mut self, line: usize, text: String) {
        self.close_block();
        self.state = State::InQuestion(Block::open(line, text));
    }

    fn on_option(&mut self, line: usize, label: char, text: String) {
        let State::InQuestion(block) = &mut self.state else {
            self.diagnostics.push(Diagnostic::warning(
                line,
                format!("option {label} outside a question block ignored"),
            ));
            return;
        };
        if block.answered() {
            self.diagnostics.push(Diagnostic::warning(
                line,
                format!("option {label} declared after the answer"),
            ));
        }
        if block.options.insert(label, text).is_some() {
            self.diagnostics.push(Diagnostic::warning(
                line,
                format!("option {label} declared again; the earlier text was replaced"),
            ));
        }
        block.last_label = Some(label);
    }

    fn on_answer(&mut self, line: usize, token: String) {
        let State::InQuestion(block) = &mut self.state else {
            self.diagnostics.push(Diagnostic::warning(
                line,
                "answer outside a question block ignored",
            ));
            return;
        };
        if block.answered() {
            self.diagnostics.push(Diagnostic::warning(
                line,
                "answer declared again; the earlier answer was replaced",
            ));
        }
        block.answer = Some((line, token));
    }

    fn on_explanation(&mut self, line: usize, text: String) {
        let State::InQuestion(block) = &mut self.state else {
            self.diagnostics.push(Diagnostic::warning(
                line,
                "explanation outside a question block ignored",
            ));
            return;
        };
        if !block.answered() {
            self.diagnostics.push(Diagnostic::error(
                line,
                "explanation requires a prior answer (add ANS: before EXP:)",
            ));
        }
        if block.explanation.is_some() {
            self.diagnostics.push(Diagnostic::warning(
                line,
                "explanation declared again; the earlier text was replaced",
            ));
        }
        block.explanation = Some(text);
    }

    fn on_text(&mut self, line: usize, text: String) {
        let State::InQuestion(block) = &mut self.state else {
            self.diagnostics.push(Diagnostic::warning(
                line,
                format!("unrecognized line outside a question block ignored: {}", clip(&text)),
            ));
            return;
        };

        if !block.answered() {
            match block.last_label.and_then(|l| block.options.get_mut(&l)) {
                Some(option) => {
                    if !option.is_empty() {
                        option.push(' ');
                    }
                    option.push_str(&text);
                }
                None => block.prompt.push(text),
            }
            return;
        }

        match &mut block.explanation {
            Some(explanation) => {
                if !explanation.is_empty() {
                    explanation.push('\n');
                }
                explanation.push_str(&text);
            }
            None => self.diagnostics.push(Diagnostic::warning(
                line,
                format!("unrecognized line after the answer ignored: {}", clip(&text)),
            )),
        }
    }

    fn close_block(&mut self) {
        let State::InQuestion(block) = std::mem::replace(&mut self.state, State::Scanning) else {
            return;
        };
        let Block {
            opened_at,
            prompt,
            options,
            answer,
            explanation,
            deferred,
            ..
        } = block;

        let prompt = prompt.join("\n").trim().to_string();
        let mut missing = Vec::new();
        if prompt.is_empty() {
            missing.push("question text".to_string());
        }
        let absent: Vec<String> = self
            .config
            .required_labels
            .iter()
            .filter(|l| !options.contains_key(l))
            .map(char::to_string)
            .collect();
        if !absent.is_empty() {
            missing.push(format!("option(s) {}", absent.join(", ")));
        }
        if answer.is_none() {
            missing.push("answer (ANS:)".to_string());
        }
        if !missing.is_empty() {
            self.diagnostics.push(Diagnostic::error(
                opened_at,
                format!("question is incomplete, missing {}", missing.join("; ")),
            ));
        }

        if options.len() > self.config.max_options {
            self.diagnostics.push(Diagnostic::error(
                opened_at,
                format!(
                    "question has {} options, at most {} are allowed",
                    options.len(),
                    self.config.max_options
                ),
            ));
        }
        for (label, text) in &options {
            if text.trim().is_empty() {
                self.diagnostics.push(Diagnostic::error(
                    opened_at,
                    format!("option {label} has no text"),
                ));
            } else if text.chars().count() > self.config.max_option_chars {
                self.diagnostics.push(Diagnostic::warning(
                    opened_at,
                    format!(
                        "option {label} is longer than {} characters and may be rejected",
                        self.config.max_option_chars
                    ),
                ));
            }
        }
        if prompt.chars().count() > self.config.max_prompt_chars {
            self.diagnostics.push(Diagnostic::warning(
                opened_at,
                format!(
                    "question text is longer than {} characters and may be rejected",
                    self.config.max_prompt_chars
                ),
            ));
        }

        if let Some(text) = &explanation
            && text.trim().chars().count() > self.config.max_explanation_chars
        {
            self.diagnostics.push(Diagnostic::warning(
                opened_at,
                format!(
                    "explanation is longer than {} characters and will be posted as a reply",
                    self.config.max_explanation_chars
                ),
            ));
        }

        let correct_label = answer.and_then(|(line, token)| match resolve_answer(&token, &options) {
            Ok(label) => Some(label),
            Err(message) => {
                self.diagnostics.push(Diagnostic::error(line, message));
                None
            }
        });

        self.items.push(Item::Question(Question {
            prompt,
            options,
            correct_label,
            explanation: explanation.filter(|e| !e.trim().is_empty()),
        }));
        self.items
            .extend(deferred.into_iter().map(|text| Item::Announcement { text }));
    }
}

/// Normalize an `ANS:` token to one of the declared labels.
///
/// Accepts a letter (any case, optionally bracketed) or a 1-based position.
fn resolve_answer(token: &str, options: &BTreeMap<char, String>) -> Result<char, String> {
    let token = token
        .trim()
        .trim_matches(|c| matches!(c, '(' | ')' | '[' | ']' | '.' | ':'))
        .trim();
    if token.is_empty() {
        return Err("answer is empty".into());
    }

    if token.chars().all(|c| c.is_ascii_digit()) {
        let position: usize = token
            .parse()
            .map_err(|_| format!("answer {token} is not a valid option number"))?;
        return position
            .checked_sub(1)
            .and_then(|i| options.keys().nth(i).copied())
            .ok_or_else(|| {
                format!(
                    "answer {position} is out of range, the question has {} option(s)",
                    options.len()
                )
            });
    }

    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => {
            let label = c.to_ascii_uppercase();
            if options.contains_key(&label) {
                Ok(label)
            } else {
                let declared: Vec<String> = options.keys().map(char::to_string).collect();
                Err(format!(
                    "answer {label} does not match any declared option ({})",
                    if declared.is_empty() {
                        "none declared".to_string()
                    } else {
                        declared.join(", ")
                    }
                ))
            }
        }
        _ => Err(format!("answer '{token}' is not an option letter or number")),
    }
}

fn clip(text: &str) -> String {
    const MAX: usize = 40;
    if text.chars().count() > MAX {
        format!("'{}…'", text.chars().take(MAX).collect::<String>())
    } else {
        format!("'{text}'")
    }
}
