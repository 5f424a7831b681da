// Copyright 2023 - 2025 The faultline authors

//! Access to the source files under test.
//!
//! A [SourceFile] owns one file's text. The text is normalized to end with
//! a newline while in memory; a flag remembers whether the file on disk
//! lacked one so writes can restore the original shape. Lines carrying a
//! `pragma: no mutate` marker are recorded so the visitor can exclude them.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use globset::GlobSet;
use ignore::WalkBuilder;
use serde::{Serialize, Serializer};
use tracing::warn;

/// The comment marker that opts a single line out of mutation.
///
/// A line is excluded when it contains `pragma:` and the remainder of the
/// line contains `no mutate`, e.g. `let x = 1; // pragma: no mutate`.
const PRAGMA_MARKER: &str = "pragma:";
const PRAGMA_NO_MUTATE: &str = "no mutate";

/// A source file eligible for mutation.
///
/// Clones share the text.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SourceFile {
    /// Path as given on the command line or discovered, relative to the
    /// working directory.
    pub path: Utf8PathBuf,

    /// Full text, always ending with a newline.
    text: Arc<String>,

    /// False if the file on disk did not end with a newline; writes of
    /// mutated text then drop the final newline again.
    pub had_trailing_newline: bool,

    /// 0-based indices of lines excluded by the pragma marker.
    pub no_mutate_lines: BTreeSet<usize>,
}

impl SourceFile {
    /// Load a file from disk.
    pub fn load(path: &Utf8Path) -> Result<SourceFile> {
        let code =
            fs::read_to_string(path).with_context(|| format!("failed to read source {path:?}"))?;
        Ok(SourceFile::from_code(path.to_owned(), &code))
    }

    /// Construct from text already in hand.
    pub fn from_code(path: Utf8PathBuf, code: &str) -> SourceFile {
        let had_trailing_newline = code.ends_with('\n');
        let mut text = code.to_owned();
        if !had_trailing_newline {
            text.push('\n');
        }
        let no_mutate_lines = pragma_no_mutate_lines(&text);
        SourceFile {
            path,
            text: Arc::new(text),
            had_trailing_newline,
            no_mutate_lines,
        }
    }

    /// The (normalized) text.
    pub fn code(&self) -> &str {
        &self.text
    }

    /// The text of one 0-based line, without its newline.
    pub fn line_text(&self, line_index: usize) -> Option<&str> {
        self.text.split('\n').nth(line_index)
    }

    /// Shape `mutated` (derived from `code()`) for writing back to disk,
    /// restoring a missing final newline.
    pub fn text_for_write<'a>(&self, mutated: &'a str) -> &'a str {
        if self.had_trailing_newline {
            mutated
        } else {
            debug_assert!(mutated.ends_with('\n'));
            mutated.strip_suffix('\n').unwrap_or(mutated)
        }
    }

    /// Forward-slashed path for display and report keys.
    pub fn path_slashes(&self) -> String {
        use path_slash::PathExt;
        self.path.as_std_path().to_slash_lossy().into_owned()
    }
}

impl Serialize for SourceFile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.path_slashes())
    }
}

fn pragma_no_mutate_lines(text: &str) -> BTreeSet<usize> {
    text.split('\n')
        .enumerate()
        .filter(|(_, line)| {
            line.find(PRAGMA_MARKER)
                .is_some_and(|at| line[at + PRAGMA_MARKER.len()..].contains(PRAGMA_NO_MUTATE))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Guess which paths hold the code to mutate when none were given.
pub fn guess_paths_to_mutate() -> Result<Vec<Utf8PathBuf>> {
    ensure!(
        Utf8Path::new("src").is_dir(),
        "could not find a src/ directory; pass --paths-to-mutate"
    );
    Ok(vec![Utf8PathBuf::from("src")])
}

/// Find all `.rs` files under `paths_to_mutate`, excluding anything inside
/// the test directories or matching the exclude patterns.
///
/// Results are sorted so discovery order, and therefore mutant enumeration
/// order, is stable.
pub fn source_files(
    paths_to_mutate: &[Utf8PathBuf],
    tests_dirs: &[Utf8PathBuf],
    exclude: &GlobSet,
) -> Result<Vec<Utf8PathBuf>> {
    let mut found = Vec::new();
    for path in paths_to_mutate {
        ensure!(path.try_exists()?, "path to mutate {path:?} does not exist");
        if path.is_file() {
            found.push(path.clone());
            continue;
        }
        for entry in WalkBuilder::new(path).sort_by_file_name(Ord::cmp).build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("error walking {path:?}: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(file) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
                continue;
            };
            if file.extension() != Some("rs") {
                continue;
            }
            if exclude.is_match(file.as_std_path()) {
                continue;
            }
            if tests_dirs
                .iter()
                .any(|t| file.starts_with(t) || file.components().any(|c| c.as_str() == t.as_str()))
            {
                continue;
            }
            found.push(file);
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}
