//! Permissive line-oriented parser for operator quiz text.
//!
//! A malformed line never stops parsing: every problem becomes a
//! [`Diagnostic`] and the rest of the input is still processed. Whether the
//! result may become a job is left to the caller via [`ParseResult::ok`].

pub mod diagnostic;
pub mod line;
mod machine;

pub use diagnostic::{Diagnostic, Location, Severity};
pub use line::{LineKind, classify};

use crate::config::ParserConfig;
use crate::sequence::Sequence;

/// Everything one parse produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    /// True iff no diagnostic has error severity.
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Items in input order, including questions that carry errors.
    pub sequence: Sequence,
}

impl ParseResult {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Operator-facing diagnostics summary, errors first.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let errors: Vec<_> = self.errors().collect();
        let warnings: Vec<_> = self.warnings().collect();

        if !errors.is_empty() {
            out.push_str(&format!("❌ {} format error(s):\n", errors.len()));
            for d in &errors {
                out.push_str(&format!("• {d}\n"));
            }
        }
        if !warnings.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("⚠️ {} warning(s):\n", warnings.len()));
            for d in &warnings {
                out.push_str(&format!("• {d}\n"));
            }
        }
        if out.is_empty() {
            out.push_str("✅ No problems found.\n");
        }
        out.trim_end().to_string()
    }
}

/// Stateless parser; the same text always yields the same result.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    config: ParserConfig,
}

impl Parser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn parse(&self, text: &str) -> ParseResult {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        let mut machine = machine::Machine::new(&self.config);
        let mut last_line = 0;

        for (idx, raw) in normalized.split('\n').enumerate() {
            last_line = idx + 1;
            machine.feed(last_line, classify(raw));
        }

        let (items, diagnostics) = machine.finish(last_line);
        let ok = !diagnostics.iter().any(Diagnostic::is_error);
        tracing::debug!(
            items = items.len(),
            diagnostics = diagnostics.len(),
            ok,
            "Parsed operator text"
        );

        ParseResult {
            ok,
            diagnostics,
            sequence: Sequence::new(items),
        }
    }
}

/// Parse with the default configuration.
pub fn parse(text: &str) -> ParseResult {
    Parser::default().parse(text)
}
