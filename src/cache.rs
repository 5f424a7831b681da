// Copyright 2023 - 2025 The faultline authors

//! The persistent mutant cache.
//!
//! `.faultline-cache` holds one record per known mutant, keyed by file and
//! line-relative identity, with an integer primary key for the CLI, plus
//! the baseline timing record. Records carry the tests hash they were
//! computed under; a changed test tree invalidates them without deleting
//! them.
//!
//! Writes re-serialize the whole document to a temp file and rename it
//! into place while holding an exclusive lock on a sidecar lock file, so
//! concurrent faultline processes cannot interleave partial writes.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::mutant::{Mutant, MutantId};
use crate::source::SourceFile;
use crate::tester::MutantStatus;

pub const CACHE_FILENAME: &str = ".faultline-cache";
const LOCK_FILENAME: &str = ".faultline-cache.lock";
const CACHE_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheDoc {
    format: u32,
    next_pk: u64,
    baseline: Option<BaselineRecord>,
    /// Per file (slashed relative path), in discovery order.
    files: HashMap<String, Vec<MutantRecord>>,
}

impl Default for CacheDoc {
    fn default() -> Self {
        CacheDoc {
            format: CACHE_FORMAT,
            next_pk: 1,
            baseline: None,
            files: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineRecord {
    pub time_elapsed: f64,
    pub tests_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutantRecord {
    pub pk: u64,
    #[serde(flatten)]
    pub id: MutantId,
    pub status: MutantStatus,
    /// Hash of the test tree the status was computed under.
    pub tests_hash: String,
    pub updated: Option<String>,
}

/// Handle on the cache document; persists on every status write.
#[derive(Debug)]
pub struct Cache {
    path: Utf8PathBuf,
    lock_path: Utf8PathBuf,
    doc: CacheDoc,
}

impl Cache {
    /// Open (or create) the cache in `dir`.
    pub fn open(dir: &Utf8Path) -> Result<Cache> {
        let path = dir.join(CACHE_FILENAME);
        let lock_path = dir.join(LOCK_FILENAME);
        let doc = if path.is_file() {
            let text =
                fs::read_to_string(&path).with_context(|| format!("read cache {path:?}"))?;
            match serde_json::from_str::<CacheDoc>(&text) {
                Ok(doc) if doc.format == CACHE_FORMAT => doc,
                Ok(doc) => {
                    warn!(format = doc.format, "incompatible cache format, starting fresh");
                    CacheDoc::default()
                }
                Err(err) => {
                    warn!(?err, "unreadable cache, starting fresh");
                    CacheDoc::default()
                }
            }
        } else {
            CacheDoc::default()
        };
        Ok(Cache {
            path,
            lock_path,
            doc,
        })
    }

    /// Write the document out, atomically, under the file lock.
    fn persist(&self) -> Result<()> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("open cache lock {:?}", self.lock_path))?;
        lock_file.lock_exclusive().context("lock cache")?;
        let result = self.write_unlocked();
        let _ = FileExt::unlock(&lock_file);
        result
    }

    fn write_unlocked(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or(Utf8Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).context("create cache temp file")?;
        serde_json::to_writer_pretty(&mut tmp, &self.doc).context("serialize cache")?;
        tmp.as_file_mut().flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("replace cache {:?}", self.path))?;
        Ok(())
    }

    /// Known mutants of one file, fixing up stale line numbers against the
    /// file's current content.
    ///
    /// A record matches the current file as long as a line with its exact
    /// text still exists; the nearest such line to the remembered position
    /// wins.
    pub fn refresh_line_numbers(&mut self, source_file: &SourceFile) {
        let Some(records) = self.doc.files.get_mut(&source_file.path_slashes()) else {
            return;
        };
        let lines: Vec<&str> = source_file.code().split('\n').collect();
        for record in records {
            if lines.get(record.id.line_number).copied() == Some(record.id.line_text.as_str()) {
                continue;
            }
            let moved_to = lines
                .iter()
                .enumerate()
                .filter(|(_, line)| **line == record.id.line_text)
                .min_by_key(|(i, _)| i.abs_diff(record.id.line_number))
                .map(|(i, _)| i);
            if let Some(new_line) = moved_to {
                debug!(
                    pk = record.pk,
                    old_line = record.id.line_number,
                    new_line,
                    "mutant line moved"
                );
                record.id.line_number = new_line;
            }
        }
    }

    /// Insert records for newly discovered mutants and return how many
    /// were new. Existing records keep their pk and status.
    pub fn register_mutants(&mut self, mutants: &[Mutant]) -> Result<usize> {
        let mut added = 0;
        for mutant in mutants {
            let file = mutant.source_file.path_slashes();
            let records = self.doc.files.entry(file).or_default();
            if let Some(record) = records.iter_mut().find(|r| r.id.matches(&mutant.id)) {
                record.id.line_number = mutant.id.line_number;
            } else {
                records.push(MutantRecord {
                    pk: self.doc.next_pk,
                    id: mutant.id.clone(),
                    status: MutantStatus::Untested,
                    tests_hash: String::new(),
                    updated: None,
                });
                self.doc.next_pk += 1;
                added += 1;
            }
        }
        if added > 0 {
            self.persist()?;
        }
        Ok(added)
    }

    /// Batched status lookup for one file's mutants: the cached status when
    /// the tests hash matches, otherwise [MutantStatus::Untested].
    pub fn statuses_for_file(
        &self,
        filename: &str,
        tests_hash: &str,
    ) -> HashMap<MutantId, MutantStatus> {
        self.doc
            .files
            .get(filename)
            .map(|records| {
                records
                    .iter()
                    .map(|r| {
                        let status = if r.tests_hash == tests_hash {
                            r.status
                        } else {
                            MutantStatus::Untested
                        };
                        (r.id.clone(), status)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record the tested status of one mutant and persist.
    pub fn set_status(
        &mut self,
        filename: &str,
        id: &MutantId,
        status: MutantStatus,
        tests_hash: &str,
    ) -> Result<()> {
        let records = self.doc.files.entry(filename.to_owned()).or_default();
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        if let Some(record) = records.iter_mut().find(|r| r.id.matches(id)) {
            record.status = status;
            record.tests_hash = tests_hash.to_owned();
            record.updated = Some(now);
        } else {
            records.push(MutantRecord {
                pk: self.doc.next_pk,
                id: id.clone(),
                status,
                tests_hash: tests_hash.to_owned(),
                updated: Some(now),
            });
            self.doc.next_pk += 1;
        }
        self.persist()
    }

    /// The cached baseline time, if it was computed under this tests hash.
    pub fn baseline_time(&self, tests_hash: &str) -> Option<f64> {
        self.doc
            .baseline
            .as_ref()
            .filter(|b| b.tests_hash == tests_hash)
            .map(|b| b.time_elapsed)
    }

    pub fn set_baseline_time(&mut self, time_elapsed: f64, tests_hash: &str) -> Result<()> {
        self.doc.baseline = Some(BaselineRecord {
            time_elapsed,
            tests_hash: tests_hash.to_owned(),
        });
        self.persist()
    }

    /// Find a mutant record by primary key.
    pub fn find_by_pk(&self, pk: u64) -> Option<(&str, &MutantRecord)> {
        self.doc.files.iter().find_map(|(file, records)| {
            records
                .iter()
                .find(|r| r.pk == pk)
                .map(|r| (file.as_str(), r))
        })
    }

    /// All records grouped by file, files sorted, records in pk order.
    pub fn records_by_file(&self) -> Vec<(&str, &[MutantRecord])> {
        let mut files: Vec<_> = self
            .doc
            .files
            .iter()
            .map(|(file, records)| (file.as_str(), records.as_slice()))
            .collect();
        files.sort_by_key(|(file, _)| *file);
        files
    }

    pub fn total_mutants(&self) -> usize {
        self.doc.files.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tmp_cache() -> (tempfile::TempDir, Cache) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().to_owned();
        let cache = Cache::open(&dir).unwrap();
        (tmp, cache)
    }

    fn id(line_text: &str, index: usize, line_number: usize) -> MutantId {
        MutantId {
            line_text: line_text.to_owned(),
            index,
            line_number,
        }
    }

    #[test]
    fn statuses_survive_reopen() {
        let (tmp, mut cache) = tmp_cache();
        cache
            .set_status("src/lib.rs", &id("a < b", 0, 3), MutantStatus::Killed, "h1")
            .unwrap();
        cache
            .set_status("src/lib.rs", &id("a < b", 1, 3), MutantStatus::Survived, "h1")
            .unwrap();

        let dir = Utf8Path::from_path(tmp.path()).unwrap().to_owned();
        let cache = Cache::open(&dir).unwrap();
        let statuses = cache.statuses_for_file("src/lib.rs", "h1");
        assert_eq!(statuses[&id("a < b", 0, 3)], MutantStatus::Killed);
        assert_eq!(statuses[&id("a < b", 1, 3)], MutantStatus::Survived);
    }

    #[test]
    fn changed_tests_hash_invalidates() {
        let (_tmp, mut cache) = tmp_cache();
        cache
            .set_status("src/lib.rs", &id("a < b", 0, 3), MutantStatus::Killed, "h1")
            .unwrap();
        let statuses = cache.statuses_for_file("src/lib.rs", "h2");
        assert_eq!(statuses[&id("a < b", 0, 3)], MutantStatus::Untested);
    }

    #[test]
    fn pks_are_stable_across_registration() {
        let (_tmp, mut cache) = tmp_cache();
        let source_file = SourceFile::from_code("src/lib.rs".into(), "fn f() { 1 + 2; }\n");
        let mutants = crate::visit::walk_file(
            &source_file,
            &crate::options::Options::for_tests(),
            None,
        )
        .unwrap();
        let added = cache.register_mutants(&mutants).unwrap();
        assert_eq!(added, mutants.len());
        let added_again = cache.register_mutants(&mutants).unwrap();
        assert_eq!(added_again, 0);
        let (file, record) = cache.find_by_pk(1).unwrap();
        assert_eq!(file, "src/lib.rs");
        assert_eq!(record.status, MutantStatus::Untested);
    }

    #[test]
    fn line_numbers_refresh_after_edits_above() {
        let (_tmp, mut cache) = tmp_cache();
        cache
            .set_status("src/lib.rs", &id("    a < b", 0, 1), MutantStatus::Survived, "h1")
            .unwrap();
        // two lines inserted above the mutated line
        let source_file = SourceFile::from_code(
            "src/lib.rs".into(),
            "// new\n// also new\nfn lt(a: u32, b: u32) -> bool {\n    a < b\n}\n",
        );
        cache.refresh_line_numbers(&source_file);
        let (_, record) = cache.find_by_pk(1).unwrap();
        assert_eq!(record.id.line_number, 3);
        // identity still matches: line text and index are what count
        assert!(record.id.matches(&id("    a < b", 0, 1)));
    }

    #[test]
    fn baseline_round_trip() {
        let (tmp, mut cache) = tmp_cache();
        assert_eq!(cache.baseline_time("h1"), None);
        cache.set_baseline_time(2.25, "h1").unwrap();
        assert_eq!(cache.baseline_time("h1"), Some(2.25));
        assert_eq!(cache.baseline_time("other"), None);

        let dir = Utf8Path::from_path(tmp.path()).unwrap().to_owned();
        let cache = Cache::open(&dir).unwrap();
        assert_eq!(cache.baseline_time("h1"), Some(2.25));
    }

    #[test]
    fn corrupt_cache_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().to_owned();
        fs::write(dir.join(CACHE_FILENAME), "{ not json").unwrap();
        let cache = Cache::open(&dir).unwrap();
        assert_eq!(cache.total_mutants(), 0);
    }
}
