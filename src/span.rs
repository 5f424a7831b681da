// Copyright 2023 - 2025 The faultline authors

//! Line/column positions and the text regions between them.
//!
//! Convertible from [proc_macro2::Span] and [proc_macro2::LineColumn], and
//! built for one job: splicing a replacement string into an otherwise
//! untouched source string.

use std::fmt;

use serde::Serialize;

/// A (line, column) position in a source file.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub struct LineColumn {
    /// 1-based line number.
    pub line: usize,

    /// 1-based column, measured in chars.
    pub column: usize,
}

impl From<proc_macro2::LineColumn> for LineColumn {
    fn from(l: proc_macro2::LineColumn) -> Self {
        LineColumn {
            line: l.line,
            column: l.column + 1,
        }
    }
}

impl fmt::Debug for LineColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A contiguous text span in a file.
#[derive(Clone, Copy, Eq, PartialEq, Serialize)]
pub struct Span {
    /// The *inclusive* position where the span starts.
    pub start: LineColumn,
    /// The *exclusive* position where the span ends.
    pub end: LineColumn,
}

impl Span {
    /// A span between two `(line, column)` points.
    #[allow(dead_code)]
    pub fn between(start: (usize, usize), end: (usize, usize)) -> Self {
        Span {
            start: LineColumn {
                line: start.0,
                column: start.1,
            },
            end: LineColumn {
                line: end.0,
                column: end.1,
            },
        }
    }

    /// Return the region of a multi-line string that this span covers.
    pub fn extract(&self, s: &str) -> String {
        let (a, b) = self.byte_range(s);
        s[a..b].to_owned()
    }

    /// Return a copy of `s` with the region identified by this span replaced
    /// by `replacement`.
    pub fn replace(&self, s: &str, replacement: &str) -> String {
        let (a, b) = self.byte_range(s);
        let mut r = String::with_capacity(s.len() - (b - a) + replacement.len());
        r.push_str(&s[..a]);
        r.push_str(replacement);
        r.push_str(&s[b..]);
        r
    }

    /// Resolve the span to a byte range within `s`.
    ///
    /// Positions past the end of a line or past the last line clamp to the
    /// end of the text, so a span from a parser that counted a final
    /// missing newline still resolves.
    fn byte_range(&self, s: &str) -> (usize, usize) {
        let a = byte_offset(s, self.start);
        let b = byte_offset(s, self.end).max(a);
        (a, b)
    }
}

/// Byte offset of a 1-based (line, char-column) position within `s`.
///
/// A `\r` before a line-ending `\n` counts as part of the preceding column
/// rather than a column of its own, matching how `proc_macro2` counts.
fn byte_offset(s: &str, pos: LineColumn) -> usize {
    let mut line = 1;
    let mut start_of_line = 0;
    if pos.line > 1 {
        let mut found = false;
        for (i, c) in s.char_indices() {
            if c == '\n' {
                line += 1;
                if line == pos.line {
                    start_of_line = i + 1;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            return s.len();
        }
    }
    let rest = &s[start_of_line..];
    let mut col = 1;
    for (i, c) in rest.char_indices() {
        if col == pos.column || c == '\n' {
            return start_of_line + i;
        }
        if c != '\r' {
            col += 1;
        }
    }
    s.len()
}

impl From<proc_macro2::Span> for Span {
    fn from(s: proc_macro2::Span) -> Self {
        Span {
            start: s.start().into(),
            end: s.end().into(),
        }
    }
}

impl From<&proc_macro2::Span> for Span {
    fn from(s: &proc_macro2::Span) -> Self {
        Span {
            start: s.start().into(),
            end: s.end().into(),
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}..{:?}", self.start, self.end)
    }
}
