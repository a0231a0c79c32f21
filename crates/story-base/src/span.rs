//! Source location tracking for error reporting.
//!
//! A [`SourcePosition`] pins a single point in a source file — line, column,
//! and byte offset together, since each is useful in a different context:
//! byte offset for slicing, line/column for human-readable diagnostics. A
//! [`SourceSpan`] is an ordered pair of positions describing a contiguous
//! region.
//!
//! # Example
//!
//! ```
//! use story_base::{SourcePosition, SourceSpan};
//!
//! let start = SourcePosition::new("start.story", 1, 1, 0);
//! let end = SourcePosition::new("start.story", 1, 6, 5);
//! let span = SourceSpan::new(start, end);
//!
//! assert_eq!(span.start.line, 1);
//! assert!(span.start.byte_offset <= span.end.byte_offset);
//! ```

use std::fmt;
use std::rc::Rc;

/// A single point in a source file.
///
/// `line` and `column` are 1-based; `byte_offset` is 0-based and matches
/// Rust's string slicing semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    /// Name of the originating source file (or a synthetic name such as
    /// `"<repl>"` for sources with no file on disk).
    pub file: Rc<str>,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
    /// 0-based byte offset from the start of the file.
    pub byte_offset: usize,
}

impl SourcePosition {
    /// Creates a source position. `line` and `column` should both be `>= 1`.
    pub fn new(file: impl Into<Rc<str>>, line: u32, column: u32, byte_offset: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            byte_offset,
        }
    }

    /// A position at the start of a synthetic, file-less source.
    pub fn synthetic() -> Self {
        Self::new("<synthetic>", 1, 1, 0)
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An ordered pair of [`SourcePosition`]s describing a contiguous source region.
///
/// Invariant: `span.start.byte_offset <= span.end.byte_offset` for any span
/// produced by the lexer or parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl SourceSpan {
    /// Creates a span from two positions.
    pub fn new(start: SourcePosition, end: SourcePosition) -> Self {
        Self { start, end }
    }

    /// A span that covers nothing, anchored at a single synthetic position.
    pub fn synthetic() -> Self {
        let pos = SourcePosition::synthetic();
        Self::new(pos.clone(), pos)
    }

    /// Creates a span covering from the start of `self` to the end of `other`.
    ///
    /// Useful for building compound expressions: the span of `a + b` is
    /// `a.span().merge(b.span())`.
    pub fn merge(&self, other: &SourceSpan) -> SourceSpan {
        let start = if self.start.byte_offset <= other.start.byte_offset {
            self.start.clone()
        } else {
            other.start.clone()
        };
        let end = if self.end.byte_offset >= other.end.byte_offset {
            self.end.clone()
        } else {
            other.end.clone()
        };
        SourceSpan::new(start, end)
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end.byte_offset.saturating_sub(self.start.byte_offset)
    }

    /// Returns `true` if this span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start.byte_offset >= self.end.byte_offset
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}..{}:{}",
            self.start.file, self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, column: u32, byte_offset: usize) -> SourcePosition {
        SourcePosition::new("test.story", line, column, byte_offset)
    }

    #[test]
    fn span_new_stores_positions() {
        let span = SourceSpan::new(pos(1, 1, 0), pos(1, 6, 5));
        assert_eq!(span.start.byte_offset, 0);
        assert_eq!(span.end.byte_offset, 5);
    }

    #[test]
    fn span_merge_combines_ranges() {
        let a = SourceSpan::new(pos(1, 1, 0), pos(1, 6, 5));
        let b = SourceSpan::new(pos(1, 4, 3), pos(2, 1, 10));
        let merged = a.merge(&b);
        assert_eq!(merged.start.byte_offset, 0);
        assert_eq!(merged.end.byte_offset, 10);
    }

    #[test]
    fn span_len_returns_size() {
        let span = SourceSpan::new(pos(1, 1, 0), pos(1, 6, 5));
        assert_eq!(span.len(), 5);
    }

    #[test]
    fn span_is_empty_for_zero_length() {
        let empty = SourceSpan::new(pos(1, 1, 5), pos(1, 1, 5));
        assert!(empty.is_empty());
        let nonempty = SourceSpan::new(pos(1, 1, 5), pos(1, 6, 10));
        assert!(!nonempty.is_empty());
    }

    #[test]
    fn display_formats_as_file_line_col_range() {
        let span = SourceSpan::new(pos(1, 1, 0), pos(2, 3, 10));
        assert_eq!(format!("{span}"), "test.story:1:1..2:3");
    }
}
