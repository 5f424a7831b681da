// Copyright 2023 - 2025 The faultline authors

//! The baseline: a content hash of the test tree, and a timing run of the
//! unmutated suite that anchors the timeout and the suspicious threshold.

use std::fs;
use std::time::Instant;

use anyhow::bail;
use camino::Utf8PathBuf;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::cache::Cache;
use crate::options::Options;
use crate::process::{ExitKind, ProcessSpawner};
use crate::Result;

/// Exit code meaning "no tests needed to run" under testmon-style runners.
const TESTMON_NOTHING_TO_RUN: i32 = 5;

/// A stable hash over the relative paths and contents of every file under
/// the test directories. When it changes, cached statuses stop applying.
pub fn hash_of_tests(tests_dirs: &[Utf8PathBuf]) -> Result<String> {
    let mut files = Vec::new();
    for dir in tests_dirs {
        if !dir.exists() {
            continue;
        }
        for entry in WalkBuilder::new(dir).sort_by_file_name(Ord::cmp).build() {
            let entry = entry?;
            if entry.file_type().is_some_and(|t| t.is_file()) {
                if let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) {
                    files.push(path);
                }
            }
        }
    }
    files.sort();
    let mut hasher = Sha256::new();
    for path in &files {
        hasher.update(path.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(fs::read(path)?);
    }
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

/// Time the unmutated test suite, or reuse the cached time for this tests
/// hash.
///
/// The suite must pass (exit 0, or 5 with `--testmon`); a failing baseline
/// is fatal, since every mutant result would be meaningless.
pub fn time_test_suite(
    spawner: &dyn ProcessSpawner,
    cache: &mut Cache,
    options: &Options,
    tests_hash: &str,
) -> Result<f64> {
    if let Some(cached) = cache.baseline_time(tests_hash) {
        println!("1. Using cached time for baseline tests, to run baseline again delete the cache file");
        debug!(cached, "baseline time from cache");
        return Ok(cached);
    }

    println!("1. Running tests without mutations");
    let start = Instant::now();
    let mut output = Vec::new();
    let mut feedback = |line: &str| {
        if !options.swallow_output {
            println!("{line}");
        }
        output.push(line.to_owned());
    };
    let exit = spawner.run(&options.runner, None, &mut feedback)?;
    let passed = match exit {
        ExitKind::Exited(0) => true,
        ExitKind::Exited(TESTMON_NOTHING_TO_RUN) if options.testmon => true,
        _ => false,
    };
    if !passed {
        bail!(
            "Tests don't run cleanly without mutations. Test command was: {}\n\nOutput:\n\n{}",
            options.runner,
            output.join("\n"),
        );
    }
    let baseline_time_elapsed = start.elapsed().as_secs_f64();
    info!(baseline_time_elapsed, "baseline finished");
    println!("Done");

    cache.set_baseline_time(baseline_time_elapsed, tests_hash)?;
    Ok(baseline_time_elapsed)
}

#[cfg(test)]
mod test {
    use camino::Utf8Path;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::process::SubprocessSpawner;

    fn write_tree(dir: &Utf8Path, files: &[(&str, &str)]) {
        for (name, content) in files {
            let path = dir.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn hash_changes_with_test_content() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        write_tree(dir, &[("tests/a.rs", "fn a() {}"), ("tests/b.rs", "fn b() {}")]);
        let h1 = hash_of_tests(&[dir.join("tests")]).unwrap();
        let h1_again = hash_of_tests(&[dir.join("tests")]).unwrap();
        assert_eq!(h1, h1_again);

        write_tree(dir, &[("tests/a.rs", "fn a() { changed(); }")]);
        let h2 = hash_of_tests(&[dir.join("tests")]).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn missing_tests_dir_hashes_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let h = hash_of_tests(&[dir.join("no-such-dir")]).unwrap();
        assert_eq!(h, hash_of_tests(&[]).unwrap());
    }

    #[test]
    fn baseline_records_and_reuses_time() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut cache = Cache::open(dir).unwrap();
        let mut options = Options::for_tests();
        options.runner = "true".to_owned();
        let spawner = SubprocessSpawner::default();
        let t1 = time_test_suite(&spawner, &mut cache, &options, "h").unwrap();
        assert!(t1 >= 0.0);
        assert_eq!(cache.baseline_time("h"), Some(t1));
        // second call must reuse the cache, even with a failing runner
        options.runner = "false".to_owned();
        let t2 = time_test_suite(&spawner, &mut cache, &options, "h").unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn failing_baseline_is_fatal_and_carries_output() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut cache = Cache::open(dir).unwrap();
        let mut options = Options::for_tests();
        options.runner = "sh -c \"echo boom; exit 1\"".to_owned();
        let spawner = SubprocessSpawner::default();
        let err = time_test_suite(&spawner, &mut cache, &options, "h").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("don't run cleanly"), "{message}");
        assert!(message.contains("boom"), "{message}");
        assert_eq!(cache.baseline_time("h"), None);
    }
}
