// Copyright 2023 - 2025 The faultline authors

//! Externally whitelisted lines: coverage data and patch files.
//!
//! Both produce the same shape: per file, the set of 1-based lines that
//! mutation is allowed to touch. Files absent from the map are entirely
//! excluded.

use std::collections::{BTreeSet, HashMap};
use std::fs;

use anyhow::{anyhow, Context};
use camino::{Utf8Path, Utf8PathBuf};
use patch::{Line, Patch};
use tracing::debug;

use crate::Result;

pub type CoveredLines = HashMap<String, BTreeSet<usize>>;

pub const COVERAGE_FILENAME: &str = "lcov.info";

/// Parse an lcov tracefile into covered lines per source file.
///
/// Only `SF:` and `DA:` records matter; a line is covered when any `DA:`
/// record gives it a nonzero hit count.
pub fn read_coverage_data(path: &Utf8Path) -> Result<CoveredLines> {
    let text = fs::read_to_string(path).with_context(|| format!("read coverage {path:?}"))?;
    parse_lcov(&text)
}

fn parse_lcov(text: &str) -> Result<CoveredLines> {
    let mut covered = CoveredLines::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(path) = line.strip_prefix("SF:") {
            let path = normalize_path(path);
            covered.entry(path.clone()).or_default();
            current = Some(path);
        } else if let Some(record) = line.strip_prefix("DA:") {
            let file = current
                .as_ref()
                .ok_or_else(|| anyhow!("DA record before any SF record"))?;
            let (lineno, count) = record
                .split_once(',')
                .ok_or_else(|| anyhow!("malformed DA record {record:?}"))?;
            let lineno: usize = lineno.parse().context("DA line number")?;
            // checksummed records have a third field
            let count = count.split(',').next().unwrap_or(count);
            let count: u64 = count.parse().context("DA hit count")?;
            if count > 0 {
                covered.get_mut(file).expect("current file entry").insert(lineno);
            }
        } else if line == "end_of_record" {
            current = None;
        }
    }
    Ok(covered)
}

/// Parse a unified diff into added lines per new file.
///
/// Only additions count: a mutant is in scope if its line is new in the
/// patch.
pub fn read_patch_data(path: &Utf8Path) -> Result<CoveredLines> {
    let text = fs::read_to_string(path).with_context(|| format!("read patch {path:?}"))?;
    let patches = Patch::from_multiple(&text)
        .map_err(|err| anyhow!("failed to parse patch {path:?}: {err}"))?;
    let mut covered = CoveredLines::new();
    for patch in &patches {
        let file = normalize_path(strip_patch_prefix(&patch.new.path));
        if file == "/dev/null" {
            continue;
        }
        let lines = covered.entry(file).or_default();
        for hunk in &patch.hunks {
            let mut new_lineno = hunk.new_range.start as usize;
            for line in &hunk.lines {
                match line {
                    Line::Add(_) => {
                        lines.insert(new_lineno);
                        new_lineno += 1;
                    }
                    Line::Context(_) => new_lineno += 1,
                    Line::Remove(_) => (),
                }
            }
        }
    }
    debug!(files = covered.len(), "parsed patch data");
    Ok(covered)
}

/// Remove the `a/`/`b/` prefixes git puts in diff paths.
fn strip_patch_prefix(path: &str) -> &str {
    path.strip_prefix("b/")
        .or_else(|| path.strip_prefix("a/"))
        .unwrap_or(path)
}

/// Keys must compare equal to [crate::source::SourceFile::path_slashes];
/// relative `./` prefixes are dropped.
fn normalize_path(path: &str) -> String {
    let path = path.trim();
    let path = path.strip_prefix("./").unwrap_or(path);
    Utf8PathBuf::from(path).as_str().replace('\\', "/")
}

/// The covered-lines gate for one file.
pub fn gate_for<'a>(
    covered: Option<&'a CoveredLines>,
    filename: &str,
) -> crate::visit::CoverageGate<'a> {
    covered.map(|map| map.get(filename))
}

#[cfg(test)]
mod test {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn lcov_covered_lines() {
        let covered = parse_lcov(indoc! {"
            TN:
            SF:src/lib.rs
            DA:1,5
            DA:2,0
            DA:3,1
            LF:3
            LH:2
            end_of_record
            SF:./src/other.rs
            DA:10,1
            end_of_record
        "})
        .unwrap();
        assert_eq!(
            covered["src/lib.rs"],
            [1, 3].into_iter().collect::<BTreeSet<_>>()
        );
        assert_eq!(
            covered["src/other.rs"],
            [10].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn lcov_file_with_no_hits_is_present_but_empty() {
        let covered = parse_lcov("SF:src/dead.rs\nDA:1,0\nend_of_record\n").unwrap();
        assert!(covered["src/dead.rs"].is_empty());
    }

    #[test]
    fn patch_added_lines() {
        let covered_text = indoc! {"
            --- a/src/lib.rs
            +++ b/src/lib.rs
            @@ -1,4 +1,5 @@
             fn foo() -> u32 {
            -    let f = 2;
            +    let f = 3;
            +    let g = 4;
                 f
             }
        "};
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(tmp.path()).unwrap().join("x.diff");
        fs::write(&path, covered_text).unwrap();
        let covered = read_patch_data(&path).unwrap();
        assert_eq!(
            covered["src/lib.rs"],
            [2, 3].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn gate_distinguishes_off_uncovered_and_covered() {
        let mut covered = CoveredLines::new();
        covered.insert("src/lib.rs".to_owned(), [1].into_iter().collect());
        assert!(gate_for(None, "src/lib.rs").is_none());
        assert_eq!(gate_for(Some(&covered), "src/unknown.rs"), Some(None));
        assert!(matches!(
            gate_for(Some(&covered), "src/lib.rs"),
            Some(Some(lines)) if lines.contains(&1)
        ));
    }
}
