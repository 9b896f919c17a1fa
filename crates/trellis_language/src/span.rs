//! Source location tracking.
//!
//! `Span` records where a declaration came from so that errors raised long
//! after parsing can still point back at the source.

use trellis_foundation::ErrorContext;

/// A span of source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset where this span starts.
    pub start: usize,
    /// Byte offset where this span ends (exclusive).
    pub end: usize,
    /// 1-based line number where this span starts.
    pub line: u32,
    /// 1-based column number where this span starts.
    pub column: u32,
}

impl Span {
    /// Creates a new span.
    #[must_use]
    pub const fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Returns true if this span carries a real position.
    ///
    /// ASTs built programmatically use the default span, which has line 0.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        self.line > 0
    }

    /// Returns the length of this span in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if this span is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Builds an error context pointing at this span.
    #[must_use]
    pub fn context(&self) -> ErrorContext {
        let context = ErrorContext::new();
        if self.is_known() {
            context.with_position(self.line, self.column)
        } else {
            context
        }
    }
}
