// Copyright 2023 - 2025 The faultline authors

//! A mutant: one source file, one span, one replacement, and a stable
//! line-relative identity.

use std::fmt;

use anyhow::{ensure, Result};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use similar::TextDiff;

use crate::catalog::MutationKind;
use crate::source::SourceFile;
use crate::span::Span;

/// Stable identity of a mutant within its file.
///
/// The line *text* is part of the identity, not only its number, so the
/// identity survives unrelated edits above it; `line_number` is re-derived
/// against the current file content on replay.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MutantId {
    /// Verbatim text of the source line at mutation time, without newline.
    pub line_text: String,
    /// Ordinal of this mutation among candidates on the line, 0-based.
    pub index: usize,
    /// 0-based line index.
    pub line_number: usize,
}

impl MutantId {
    /// Equality for replay: same line text and same per-line ordinal.
    ///
    /// The stored `line_number` may be stale relative to the file on disk.
    pub fn matches(&self, other: &MutantId) -> bool {
        self.line_text == other.line_text && self.index == other.index
    }
}

/// A mutation that could be applied to source code.
#[derive(Clone, Eq, PartialEq)]
pub struct Mutant {
    /// The file being mutated.
    pub source_file: SourceFile,

    /// Line-relative identity.
    pub id: MutantId,

    /// The textual region deleted and replaced.
    pub span: Span,

    /// Catalog kind that produced this mutant.
    pub kind: MutationKind,

    /// The replacement text.
    pub replacement: String,
}

impl Mutant {
    /// The original text under the span.
    pub fn original_text(&self) -> String {
        self.span.extract(self.source_file.code())
    }

    /// The whole file text with this mutation applied.
    ///
    /// It is an internal error for the result to equal the original: a
    /// recorded mutation must change the text.
    pub fn mutated_code(&self) -> Result<String> {
        let mutated = self.span.replace(self.source_file.code(), &self.replacement);
        ensure!(
            mutated != self.source_file.code(),
            "mutation recorded for {} but the mutated source is unchanged",
            self.name(),
        );
        Ok(mutated)
    }

    /// `src/lib.rs:3: replace < with <=` (1-based line for humans).
    pub fn name(&self) -> String {
        format!(
            "{}:{}: {}",
            self.source_file.path_slashes(),
            self.id.line_number + 1,
            self.describe_change()
        )
    }

    pub fn describe_change(&self) -> String {
        if self.replacement.is_empty() {
            format!("delete {}", squash_lines(&self.original_text()))
        } else {
            format!(
                "replace {} with {}",
                squash_lines(&self.original_text()),
                self.replacement
            )
        }
    }

    /// A unified diff between the original file and `mutated_code`.
    pub fn diff(&self, mutated_code: &str) -> String {
        let old_label = self.source_file.path_slashes();
        let new_label = self.describe_change().replace('\n', " ");
        TextDiff::from_lines(self.source_file.code(), mutated_code)
            .unified_diff()
            .context_radius(3)
            .header(&old_label, &new_label)
            .to_string()
    }
}

impl fmt::Debug for Mutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutant")
            .field("file", &self.source_file.path_slashes())
            .field("line", &self.id.line_number)
            .field("index", &self.id.index)
            .field("kind", &self.kind)
            .field("replacement", &self.replacement)
            .field("span", &self.span)
            .finish()
    }
}

impl Serialize for Mutant {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut ss = serializer.serialize_struct("Mutant", 6)?;
        ss.serialize_field("file", &self.source_file.path_slashes())?;
        ss.serialize_field("line", &(self.id.line_number + 1))?;
        ss.serialize_field("index", &self.id.index)?;
        ss.serialize_field("kind", &self.kind)?;
        ss.serialize_field("original", &self.original_text())?;
        ss.serialize_field("replacement", &self.replacement)?;
        ss.end()
    }
}

/// Squash a multi-line fragment to one line for display.
fn squash_lines(s: &str) -> String {
    if !s.contains('\n') {
        return s.to_owned();
    }
    let mut r = String::new();
    let mut in_indent = false;
    for c in s.chars() {
        match c {
            ' ' | '\t' | '\n' if in_indent => (),
            '\n' => {
                if !r.ends_with(' ') {
                    r.push(' ');
                }
                in_indent = true;
            }
            c => {
                in_indent = false;
                r.push(c);
            }
        }
    }
    r
}
