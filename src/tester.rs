// Copyright 2023 - 2025 The faultline authors

//! Drive the test suite against one mutant and classify the outcome.
//!
//! The sequence per mutant: consult the cached status, run the hooks,
//! materialize the mutant under the test lock, run the test command with a
//! hard timeout derived from the baseline, optionally rerun the full suite
//! when a hook narrowed it, restore the source, classify.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::apply::materialize;
use crate::hooks::{run_post_mutant, run_pre_mutant, HookVerdict};
use crate::mutant::Mutant;
use crate::options::Options;
use crate::process::{ExitKind, ProcessSpawner};
use crate::Result;

/// A test run is killed once it exceeds this multiple of the baseline.
pub const TIMEOUT_MULTIPLIER: f64 = 10.0;

/// Exit code meaning "no tests needed to run" under testmon-style runners.
const TESTMON_NOTHING_TO_RUN: i32 = 5;

/// The closed set of mutant outcomes.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    EnumString,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MutantStatus {
    /// Not yet tested under the current test tree.
    Untested,
    /// The tests noticed the mutant.
    #[strum(to_string = "killed", serialize = "ok_killed")]
    #[serde(rename = "ok_killed")]
    Killed,
    /// The tests passed on the mutant: a coverage gap.
    #[strum(to_string = "survived", serialize = "bad_survived")]
    #[serde(rename = "bad_survived")]
    Survived,
    /// The test run was killed after ten baselines.
    #[strum(to_string = "timeout", serialize = "bad_timeout")]
    #[serde(rename = "bad_timeout")]
    Timeout,
    /// Caught, but suspiciously slowly; often a nearly-infinite loop.
    #[strum(to_string = "suspicious", serialize = "ok_suspicious")]
    #[serde(rename = "ok_suspicious")]
    Suspicious,
    /// A hook opted this mutant out.
    Skipped,
}

/// Per-run configuration handed to each worker.
///
/// `test_command` may be rewritten by the pre-mutant hook; it is reset to
/// `default_test_command` after every mutant.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub options: Options,
    pub test_command: String,
    pub default_test_command: String,
    pub baseline_time_elapsed: f64,
    pub tests_hash: String,
    /// Total mutants in this run; a single-mutant run bypasses the cache.
    pub total: usize,
}

impl RunConfig {
    pub fn new(options: Options, baseline_time_elapsed: f64, tests_hash: String) -> RunConfig {
        let test_command = options.runner.clone();
        RunConfig {
            options,
            default_test_command: test_command.clone(),
            test_command,
            baseline_time_elapsed,
            tests_hash,
            total: 0,
        }
    }

    fn test_timeout(&self) -> Duration {
        Duration::from_secs_f64((self.baseline_time_elapsed * TIMEOUT_MULTIPLIER).max(1.0))
    }
}

/// One unit of work for a worker: a mutant plus its cached status.
#[derive(Debug)]
pub struct MutantJob {
    pub mutant: Mutant,
    pub cached_status: MutantStatus,
    pub config: RunConfig,
}

/// Runs mutants; the spawner is injected so tests can stub the subprocess
/// layer.
pub struct Tester<'a, S: ProcessSpawner + ?Sized> {
    spawner: &'a S,
}

impl<'a, S: ProcessSpawner + ?Sized> Tester<'a, S> {
    pub fn new(spawner: &'a S) -> Self {
        Tester { spawner }
    }

    /// Test one mutant and return its status.
    ///
    /// Errors inside the test run are captured as statuses; an `Err` from
    /// here means the run as a whole should stop (e.g. interrupted).
    pub fn run_mutation(
        &self,
        job: &mut MutantJob,
        test_lock: &Mutex<()>,
        callback: &mut dyn FnMut(&str),
    ) -> Result<MutantStatus> {
        if job.cached_status != MutantStatus::Untested && job.config.total != 1 {
            return Ok(job.cached_status);
        }

        match run_pre_mutant(&job.config.options.hooks, &job.mutant) {
            Ok(HookVerdict::Skip) => return Ok(MutantStatus::Skipped),
            Ok(HookVerdict::Proceed { runner_override }) => {
                if let Some(runner) = runner_override {
                    debug!(%runner, "hook rewrote the test command");
                    job.config.test_command = runner;
                }
            }
            Err(err) => {
                warn!(?err, "pre-mutant hook failed; skipping mutant");
                return Ok(MutantStatus::Skipped);
            }
        }
        if let Some(command) = &job.config.options.pre_mutation {
            self.stream_command(command, &job.config, callback);
        }

        let status = (|| -> Result<MutantStatus> {
            let _live = materialize(&job.mutant, test_lock)?;
            self.execute_tests(&mut job.config, callback)
        })();
        // Whatever happened, the guard restored the file; now put the
        // command back and run the post hook.
        job.config.test_command = job.config.default_test_command.clone();
        if let Some(command) = &job.config.options.post_mutation {
            self.stream_command(command, &job.config, callback);
        }
        if let Err(err) = run_post_mutant(&job.config.options.hooks, &job.mutant) {
            warn!(?err, "post-mutant hook failed");
        }
        status
    }

    /// Run the tests once (twice under `--rerun-all` when a hook narrowed
    /// the command and the mutant survived), then classify.
    fn execute_tests(
        &self,
        config: &mut RunConfig,
        callback: &mut dyn FnMut(&str),
    ) -> Result<MutantStatus> {
        let start = Instant::now();
        let mut outcome = self.tests_pass(config, callback)?;
        if let TestOutcome::Finished { survived: true } = outcome {
            if config.rerun_wanted() {
                // Rerun the whole suite to be sure the mutant cannot be
                // killed by tests outside the narrowed command.
                config.test_command = config.default_test_command.clone();
                outcome = self.tests_pass(config, callback)?;
            }
        }
        Ok(classify(
            outcome,
            start.elapsed().as_secs_f64(),
            config.options.test_time_base,
            config.baseline_time_elapsed,
            config.options.test_time_multiplier,
        ))
    }

    /// Run the test command once.
    fn tests_pass(
        &self,
        config: &RunConfig,
        callback: &mut dyn FnMut(&str),
    ) -> Result<TestOutcome> {
        let timeout = config.test_timeout();
        match self
            .spawner
            .run(&config.test_command, Some(timeout), callback)?
        {
            ExitKind::Timeout => Ok(TestOutcome::TimedOut),
            ExitKind::Exited(code) => Ok(TestOutcome::Finished {
                survived: survived_from_code(code, config.options.testmon),
            }),
        }
    }

    /// Run a pre/post-mutation shell command, streaming its output unless
    /// output is swallowed. These commands are user environment setup;
    /// their failure is logged, not fatal.
    fn stream_command(&self, command: &str, config: &RunConfig, callback: &mut dyn FnMut(&str)) {
        let mut sink = |line: &str| {
            if !config.options.swallow_output {
                callback(line);
            }
        };
        match self.spawner.run(command, None, &mut sink) {
            Ok(ExitKind::Exited(0)) => (),
            Ok(result) => warn!(%command, ?result, "mutation command did not succeed"),
            Err(err) => warn!(%command, ?err, "mutation command failed to run"),
        }
    }
}

impl RunConfig {
    fn rerun_wanted(&self) -> bool {
        self.options.rerun_all && self.test_command != self.default_test_command
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestOutcome {
    Finished { survived: bool },
    TimedOut,
}

/// Exit codes meaning the tests failed, i.e. the mutant was noticed:
/// 1 and 2 from most harnesses, 101 from cargo and libtest. Zero and
/// everything else (harness trouble, missing binaries) mean the suite did
/// not object.
fn survived_from_code(code: i32, testmon: bool) -> bool {
    if testmon && code == TESTMON_NOTHING_TO_RUN {
        return true;
    }
    !matches!(code, 1 | 2 | 101)
}

/// Map a finished run to a status using the baseline timing model.
fn classify(
    outcome: TestOutcome,
    elapsed: f64,
    test_time_base: f64,
    baseline_time_elapsed: f64,
    test_time_multiplier: f64,
) -> MutantStatus {
    match outcome {
        TestOutcome::TimedOut => MutantStatus::Timeout,
        TestOutcome::Finished { survived } => {
            if !survived && elapsed > test_time_base + baseline_time_elapsed * test_time_multiplier
            {
                MutantStatus::Suspicious
            } else if survived {
                MutantStatus::Survived
            } else {
                MutantStatus::Killed
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use camino::Utf8Path;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::MutationKind;
    use crate::mutant::MutantId;
    use crate::source::SourceFile;
    use crate::span::Span;

    /// A spawner that returns scripted exit codes and counts runs.
    struct ScriptedSpawner {
        codes: Vec<ExitKind>,
        runs: AtomicUsize,
        commands: Mutex<Vec<String>>,
    }

    impl ScriptedSpawner {
        fn new(codes: Vec<ExitKind>) -> Self {
            ScriptedSpawner {
                codes,
                runs: AtomicUsize::new(0),
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProcessSpawner for ScriptedSpawner {
        fn run(
            &self,
            command: &str,
            _timeout: Option<Duration>,
            callback: &mut dyn FnMut(&str),
        ) -> Result<ExitKind> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            self.commands.lock().unwrap().push(command.to_owned());
            callback("test output line");
            Ok(self.codes[n.min(self.codes.len() - 1)])
        }
    }

    fn job_in(dir: &Utf8Path, total: usize) -> MutantJob {
        let path = dir.join("lib.rs");
        fs::write(&path, "fn lt(a: u32, b: u32) -> bool {\n    a < b\n}\n").unwrap();
        let source_file = SourceFile::load(&path).unwrap();
        let mutant = Mutant {
            source_file,
            id: MutantId {
                line_text: "    a < b".to_owned(),
                index: 0,
                line_number: 1,
            },
            span: Span::between((2, 7), (2, 8)),
            kind: MutationKind::Operator,
            replacement: "<=".to_owned(),
        };
        let mut config = RunConfig::new(Options::for_tests(), 0.5, "hash".to_owned());
        config.total = total;
        MutantJob {
            mutant,
            cached_status: MutantStatus::Untested,
            config,
        }
    }

    #[test]
    fn failing_tests_kill_the_mutant_and_restore_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut job = job_in(dir, 10);
        let spawner = ScriptedSpawner::new(vec![ExitKind::Exited(1)]);
        let lock = Mutex::new(());
        let status = Tester::new(&spawner)
            .run_mutation(&mut job, &lock, &mut |_| {})
            .unwrap();
        assert_eq!(status, MutantStatus::Killed);
        assert_eq!(
            fs::read_to_string(dir.join("lib.rs")).unwrap(),
            "fn lt(a: u32, b: u32) -> bool {\n    a < b\n}\n"
        );
    }

    #[test]
    fn passing_tests_mean_survival() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut job = job_in(dir, 10);
        let spawner = ScriptedSpawner::new(vec![ExitKind::Exited(0)]);
        let lock = Mutex::new(());
        let status = Tester::new(&spawner)
            .run_mutation(&mut job, &lock, &mut |_| {})
            .unwrap();
        assert_eq!(status, MutantStatus::Survived);
    }

    #[test]
    fn timeout_is_its_own_status() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut job = job_in(dir, 10);
        let spawner = ScriptedSpawner::new(vec![ExitKind::Timeout]);
        let lock = Mutex::new(());
        let status = Tester::new(&spawner)
            .run_mutation(&mut job, &lock, &mut |_| {})
            .unwrap();
        assert_eq!(status, MutantStatus::Timeout);
    }

    #[test]
    fn cached_status_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut job = job_in(dir, 10);
        job.cached_status = MutantStatus::Killed;
        let spawner = ScriptedSpawner::new(vec![ExitKind::Exited(0)]);
        let lock = Mutex::new(());
        let status = Tester::new(&spawner)
            .run_mutation(&mut job, &lock, &mut |_| {})
            .unwrap();
        assert_eq!(status, MutantStatus::Killed);
        assert_eq!(spawner.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_mutant_run_ignores_the_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut job = job_in(dir, 1);
        job.cached_status = MutantStatus::Killed;
        let spawner = ScriptedSpawner::new(vec![ExitKind::Exited(0)]);
        let lock = Mutex::new(());
        let status = Tester::new(&spawner)
            .run_mutation(&mut job, &lock, &mut |_| {})
            .unwrap();
        assert_eq!(status, MutantStatus::Survived);
        assert_eq!(spawner.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rerun_all_retests_with_the_default_command() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut job = job_in(dir, 10);
        job.config.options.rerun_all = true;
        job.config.options.hooks.pre_mutant =
            Some("echo 'runner: cargo test -p narrowed'".to_owned());
        // narrowed run survives, full rerun kills
        let spawner = ScriptedSpawner::new(vec![ExitKind::Exited(0), ExitKind::Exited(1)]);
        let lock = Mutex::new(());
        let status = Tester::new(&spawner)
            .run_mutation(&mut job, &lock, &mut |_| {})
            .unwrap();
        assert_eq!(status, MutantStatus::Killed);
        let commands = spawner.commands.lock().unwrap().clone();
        assert_eq!(
            *commands,
            ["cargo test -p narrowed", job.config.default_test_command.as_str()]
        );
        // command is reset for the next mutant
        assert_eq!(job.config.test_command, job.config.default_test_command);
    }

    #[test]
    fn hook_skip_means_skipped_without_testing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut job = job_in(dir, 10);
        job.config.options.hooks.pre_mutant = Some("exit 3".to_owned());
        let spawner = ScriptedSpawner::new(vec![ExitKind::Exited(0)]);
        let lock = Mutex::new(());
        let status = Tester::new(&spawner)
            .run_mutation(&mut job, &lock, &mut |_| {})
            .unwrap();
        assert_eq!(status, MutantStatus::Skipped);
        assert_eq!(spawner.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn survival_from_exit_codes() {
        assert!(!survived_from_code(1, false));
        assert!(!survived_from_code(2, false));
        assert!(!survived_from_code(101, false)); // cargo test failure
        assert!(survived_from_code(0, false));
        assert!(survived_from_code(64, false)); // harness usage trouble
        assert!(survived_from_code(5, true));
        assert!(survived_from_code(5, false)); // 5 is not a failure code
    }

    #[test]
    fn classification_thresholds() {
        let finished = |survived| TestOutcome::Finished { survived };
        // killed, fast
        assert_eq!(classify(finished(false), 1.0, 0.0, 1.0, 2.0), MutantStatus::Killed);
        // killed, but slower than base + baseline * multiplier
        assert_eq!(
            classify(finished(false), 2.5, 0.0, 1.0, 2.0),
            MutantStatus::Suspicious
        );
        // the base term shifts the threshold
        assert_eq!(
            classify(finished(false), 2.5, 1.0, 1.0, 2.0),
            MutantStatus::Killed
        );
        // survivors are never suspicious
        assert_eq!(
            classify(finished(true), 100.0, 0.0, 1.0, 2.0),
            MutantStatus::Survived
        );
        assert_eq!(classify(TestOutcome::TimedOut, 0.1, 0.0, 1.0, 2.0), MutantStatus::Timeout);
    }

    #[test]
    fn status_names_parse_both_spellings() {
        assert_eq!("killed".parse::<MutantStatus>().unwrap(), MutantStatus::Killed);
        assert_eq!(
            "ok_killed".parse::<MutantStatus>().unwrap(),
            MutantStatus::Killed
        );
        assert_eq!(
            "survived".parse::<MutantStatus>().unwrap(),
            MutantStatus::Survived
        );
        assert_eq!(
            "bad_timeout".parse::<MutantStatus>().unwrap(),
            MutantStatus::Timeout
        );
    }
}
