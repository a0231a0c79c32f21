//! A recoverable diagnostic stream.
//!
//! The lexer and parser never abort at the first error: they record a
//! [`Diagnostic`] and keep going, so a single invocation can surface many
//! problems at once (see `spec.md` §4.2, §4.4). A [`DiagnosticBag`] collects
//! them in emission order and can render any of them against the original
//! source text with a caret underline, in the style of a compiler's `-E`
//! output.

use crate::error::ErrorKind;
use crate::span::SourceSpan;
use crate::style::Style;
use std::fmt;

/// A single recoverable problem found while processing source text.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    /// Short machine-stable code, e.g. `"inconsistent_indent"`.
    pub code: &'static str,
    pub message: String,
    pub span: SourceSpan,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            span,
        }
    }

    /// Renders this diagnostic with a line of source context and a caret
    /// underline, e.g.:
    ///
    /// ```text
    /// error[expected_identifier]: expected a passage name after '->'
    ///    2 | * [go] ->
    ///      |          ^
    /// ```
    pub fn display_with_source(&self, source: &str) -> String {
        let line_no = self.span.start.line;
        let line_content = source
            .lines()
            .nth(line_no.saturating_sub(1) as usize)
            .unwrap_or("");
        let col = self.span.start.column.saturating_sub(1) as usize;
        let len = self.span.len().max(1);
        let underline = format!("{}{}", " ".repeat(col), "^".repeat(len));

        format!(
            "{}[{}]: {}\n{:>5} | {}\n      | {}",
            Style::bold_red("error"),
            self.code,
            self.message,
            line_no,
            line_content,
            Style::red(&underline),
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {} at {}", self.kind, self.code, self.message, self.span)
    }
}

/// An ordered collection of diagnostics emitted during one lex/parse pass.
///
/// Diagnostics accumulate; nothing is ever dropped or deduplicated. A bag
/// with no diagnostics means the pass was entirely clean.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.diagnostics.iter()
    }

    /// The first diagnostic considered non-recoverable, if any. The emitter
    /// uses this to decide whether it can still produce a `Story` (§4.5).
    pub fn first_fatal(&self) -> Option<&Diagnostic> {
        self.diagnostics
            .iter()
            .find(|d| matches!(d.kind, ErrorKind::ParseError))
    }
}

impl IntoIterator for DiagnosticBag {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourcePosition;

    fn span() -> SourceSpan {
        SourceSpan::new(
            SourcePosition::new("t.story", 2, 10, 9),
            SourcePosition::new("t.story", 2, 11, 10),
        )
    }

    #[test]
    fn bag_accumulates_in_order() {
        let mut bag = DiagnosticBag::new();
        bag.push(Diagnostic::new(ErrorKind::ParseError, "a", "first", span()));
        bag.push(Diagnostic::new(ErrorKind::ParseError, "b", "second", span()));
        let codes: Vec<_> = bag.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["a", "b"]);
    }

    #[test]
    fn empty_bag_reports_empty() {
        let bag = DiagnosticBag::new();
        assert!(bag.is_empty());
        assert!(bag.first_fatal().is_none());
    }

    #[test]
    fn display_with_source_underlines_the_span() {
        let d = Diagnostic::new(
            ErrorKind::ParseError,
            "expected_identifier",
            "expected a passage name after '->'",
            span(),
        );
        let rendered = d.display_with_source(":: start\n  * [go] ->\n");
        assert!(rendered.contains("expected_identifier"));
        assert!(rendered.contains('^'));
    }
}
