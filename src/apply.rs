// Copyright 2023 - 2025 The faultline authors

//! Materialize a mutant into its source file, reversibly.
//!
//! The first materialization of a file copies it to `<file>.bak`; from
//! then on the `.bak` is the source of truth for the original content, so
//! a crashed run leaves the originals recoverable on disk. The mutated
//! text is written while holding the test lock, and [Materialized] puts
//! the original back when dropped, on success or unwind alike.

use std::fs;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::mutant::Mutant;

pub fn backup_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_owned();
    name.push_str(".bak");
    path.with_file_name(name)
}

/// A mutant written to disk, holding the test lock.
///
/// Only one of these exists at a time across all workers; that is the
/// whole point of the lock.
#[must_use]
pub struct Materialized<'lock> {
    path: Utf8PathBuf,
    _guard: MutexGuard<'lock, ()>,
}

/// Write `mutant` into its file.
///
/// Ensures the `.bak` exists first, then takes the lock and overwrites the
/// real file. The caller runs tests while the returned guard is alive.
pub fn materialize<'lock>(
    mutant: &Mutant,
    test_lock: &'lock Mutex<()>,
) -> Result<Materialized<'lock>> {
    let path = mutant.source_file.path.clone();
    let mutated = mutant.mutated_code()?;
    let to_write = mutant.source_file.text_for_write(&mutated).to_owned();
    ensure_backup(&path)?;
    let guard = test_lock.lock().unwrap_or_else(|poisoned| {
        // A worker panicked while testing; the file was still restored by
        // the guard's Drop, so the lock protects a consistent state.
        poisoned.into_inner()
    });
    debug!(%path, "write mutated source");
    fs::write(&path, to_write).with_context(|| format!("write mutated source {path:?}"))?;
    Ok(Materialized {
        path,
        _guard: guard,
    })
}

impl Drop for Materialized<'_> {
    fn drop(&mut self) {
        if let Err(err) = restore_from_backup(&self.path) {
            // Leave the .bak in place; the next run recovers it.
            warn!(path = %self.path, ?err, "failed to restore mutated file");
        }
    }
}

/// Copy `path` to `path.bak` unless the backup already exists.
///
/// An existing backup means either another mutant of this file ran earlier
/// in this run, or a previous run crashed; in both cases the backup, not
/// the working file, holds the original content.
fn ensure_backup(path: &Utf8Path) -> Result<()> {
    let backup = backup_path(path);
    if !backup.is_file() {
        fs::copy(path, &backup).with_context(|| format!("back up {path:?} to {backup:?}"))?;
    }
    Ok(())
}

fn restore_from_backup(path: &Utf8Path) -> Result<()> {
    let backup = backup_path(path);
    fs::copy(&backup, path).with_context(|| format!("restore {path:?} from {backup:?}"))?;
    Ok(())
}

/// Put originals back from any backups left by a crashed run.
pub fn recover_stale_backups(paths: &[Utf8PathBuf]) -> Result<()> {
    for path in paths {
        let backup = backup_path(path);
        if backup.is_file() {
            warn!(%path, "recovering original from stale backup");
            restore_from_backup(path)?;
            fs::remove_file(&backup).with_context(|| format!("remove {backup:?}"))?;
        }
    }
    Ok(())
}

/// Remove the backups of every file that had mutants enqueued.
pub fn cleanup_backups<'a>(paths: impl IntoIterator<Item = &'a Utf8PathBuf>) {
    for path in paths {
        let backup = backup_path(path);
        if backup.is_file() {
            if let Err(err) = fs::remove_file(&backup) {
                warn!(%backup, ?err, "failed to remove backup");
            }
        }
    }
}

/// Rewrite a file in place with a mutant, for the `apply` command.
///
/// With `backup` the original is kept in `<file>.bak`.
pub fn apply_in_place(mutant: &Mutant, backup: bool) -> Result<()> {
    let path = &mutant.source_file.path;
    let mutated = mutant.mutated_code()?;
    let to_write = mutant.source_file.text_for_write(&mutated);
    if backup {
        ensure_backup(path)?;
    }
    fs::write(path, to_write).with_context(|| format!("write mutated source {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::MutationKind;
    use crate::mutant::MutantId;
    use crate::source::SourceFile;
    use crate::span::Span;

    const CODE: &str = "fn lt(a: u32, b: u32) -> bool {\n    a < b\n}\n";

    fn mutant_in(dir: &Utf8Path) -> Mutant {
        let path = dir.join("lib.rs");
        fs::write(&path, CODE).unwrap();
        let source_file = SourceFile::load(&path).unwrap();
        Mutant {
            source_file,
            id: MutantId {
                line_text: "    a < b".to_owned(),
                index: 0,
                line_number: 1,
            },
            span: Span::between((2, 7), (2, 8)),
            kind: MutationKind::Operator,
            replacement: "<=".to_owned(),
        }
    }

    #[test]
    fn materialize_writes_and_drop_restores() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mutant = mutant_in(dir);
        let path = &mutant.source_file.path;
        let lock = Mutex::new(());
        {
            let _live = materialize(&mutant, &lock).unwrap();
            assert_eq!(
                fs::read_to_string(path).unwrap(),
                CODE.replace("a < b", "a <= b")
            );
            assert_eq!(fs::read_to_string(backup_path(path)).unwrap(), CODE);
        }
        assert_eq!(fs::read_to_string(path).unwrap(), CODE);
        // backup stays until the run-level cleanup
        assert!(backup_path(path).is_file());
        cleanup_backups([path.to_owned()].iter());
        assert!(!backup_path(path).is_file());
    }

    #[test]
    fn existing_backup_is_the_source_of_truth() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mutant = mutant_in(dir);
        let path = &mutant.source_file.path;
        // simulate a crashed run: backup holds the original, the file a mutant
        fs::write(backup_path(path), CODE).unwrap();
        fs::write(path, "garbage\n").unwrap();
        let lock = Mutex::new(());
        drop(materialize(&mutant, &lock).unwrap());
        assert_eq!(fs::read_to_string(path).unwrap(), CODE);
    }

    #[test]
    fn recover_stale_backups_restores_and_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let path = dir.join("lib.rs");
        fs::write(&path, "mutated garbage\n").unwrap();
        fs::write(backup_path(&path), CODE).unwrap();
        recover_stale_backups(&[path.clone()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), CODE);
        assert!(!backup_path(&path).is_file());
    }

    #[test]
    fn apply_in_place_without_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mutant = mutant_in(dir);
        let path = &mutant.source_file.path;
        apply_in_place(&mutant, false).unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            CODE.replace("a < b", "a <= b")
        );
        assert!(!backup_path(path).is_file());
    }

    #[test]
    fn missing_trailing_newline_is_preserved_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let path = dir.join("lib.rs");
        fs::write(&path, "fn t() -> bool { 1 < 2 }").unwrap();
        let source_file = SourceFile::load(&path).unwrap();
        let mutant = Mutant {
            source_file,
            id: MutantId {
                line_text: "fn t() -> bool { 1 < 2 }".to_owned(),
                index: 0,
                line_number: 0,
            },
            span: Span::between((1, 20), (1, 21)),
            kind: MutationKind::Operator,
            replacement: "<=".to_owned(),
        };
        let lock = Mutex::new(());
        {
            let _live = materialize(&mutant, &lock).unwrap();
            assert_eq!(
                fs::read_to_string(&path).unwrap(),
                "fn t() -> bool { 1 <= 2 }"
            );
        }
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "fn t() -> bool { 1 < 2 }"
        );
    }
}
