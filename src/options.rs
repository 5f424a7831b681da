// Copyright 2023 - 2025 The faultline authors

//! Options for a mutation-testing run, merged from command-line arguments
//! and the config file. Command-line values win, then config values, then
//! defaults.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{anyhow, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use globset::{Glob, GlobSet, GlobSetBuilder};
use itertools::Itertools;
use strum::IntoEnumIterator;

use crate::catalog::{default_name_synonyms, MutationKind, DEFAULT_SKIP_CALLS};
use crate::config::{ConfigFile, HooksConfig};

pub const DEFAULT_RUNNER: &str = "cargo test";
pub const DEFAULT_TESTS_DIR: &str = "tests/:test/";
pub const DEFAULT_TEST_PROCESSES: usize = 4;

/// A bad flag combination or value; exits with the usage code.
#[derive(Debug)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

fn usage_error(message: impl Into<String>) -> anyhow::Error {
    anyhow!(UsageError(message.into()))
}

/// Flags of the `run` command; also consulted by `apply` and `show`.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Nothing to mutate everything; a mutant primary key to test exactly
    /// one cached mutant; or a path to mutate only that file.
    pub argument: Option<String>,

    /// Paths holding the code to mutate, separated by commas or colons.
    #[arg(long)]
    pub paths_to_mutate: Option<String>,

    /// Directories holding tests, separated by commas or colons.
    #[arg(long)]
    pub tests_dir: Option<String>,

    /// The command that runs the test suite.
    #[arg(long)]
    pub runner: Option<String>,

    /// Only mutate lines covered according to lcov.info.
    #[arg(long)]
    pub use_coverage: bool,

    /// Only mutate lines added by this unified diff.
    #[arg(long)]
    pub use_patch_file: Option<Utf8PathBuf>,

    /// Comma-separated mutation kinds to enable, all others disabled.
    #[arg(long)]
    pub enable_mutation_types: Option<String>,

    /// Comma-separated mutation kinds to disable.
    #[arg(long)]
    pub disable_mutation_types: Option<String>,

    /// Shell command run before each mutant is tested.
    #[arg(long)]
    pub pre_mutation: Option<String>,

    /// Shell command run after each mutant is tested.
    #[arg(long)]
    pub post_mutation: Option<String>,

    /// Constant term of the suspicious-runtime threshold, in seconds.
    #[arg(long)]
    pub test_time_base: Option<f64>,

    /// Baseline multiplier of the suspicious-runtime threshold.
    #[arg(long)]
    pub test_time_multiplier: Option<f64>,

    /// Call-site names whose calls are never mutated, comma-separated.
    #[arg(long)]
    pub skip_calls: Option<String>,

    /// Name-mutation swap table as comma-separated old=new pairs.
    #[arg(long)]
    pub name_synonyms: Option<String>,

    /// Glob patterns for paths that are never mutated, comma-separated.
    #[arg(long)]
    pub paths_to_exclude: Option<String>,

    /// Number of parallel test workers.
    #[arg(long)]
    pub test_processes: Option<usize>,

    /// Plain words instead of emoji in the progress legend.
    #[arg(long)]
    pub simple_output: bool,

    /// Don't print the progress line.
    #[arg(long)]
    pub no_progress: bool,

    /// CI mode: never fail the build because of surviving mutants.
    #[arg(long)]
    pub ci: bool,

    /// When a hook narrowed the test command and the mutant survived,
    /// rerun the full suite before believing it.
    #[arg(long)]
    pub rerun_all: bool,

    /// Turn off output capture: echo the test command's output.
    #[arg(long, short = 's')]
    pub swallow_output: bool,

    /// Keep the `.bak` copies of mutated files when the run finishes.
    #[arg(long)]
    pub backup: bool,

    /// The runner understands testmon-style "no tests to run" exit 5.
    #[arg(long)]
    pub testmon: bool,
}

/// Merged, validated options; immutable for the rest of the run.
#[derive(Clone, Debug)]
pub struct Options {
    pub runner: String,
    pub paths_to_mutate: Vec<Utf8PathBuf>,
    pub tests_dirs: Vec<Utf8PathBuf>,
    pub exclude: GlobSet,
    pub mutation_kinds: BTreeSet<MutationKind>,
    pub skip_calls: Vec<String>,
    pub name_synonyms: Vec<(String, String)>,
    pub use_coverage: bool,
    pub use_patch_file: Option<Utf8PathBuf>,
    pub pre_mutation: Option<String>,
    pub post_mutation: Option<String>,
    pub test_time_base: f64,
    pub test_time_multiplier: f64,
    pub test_processes: usize,
    pub simple_output: bool,
    pub no_progress: bool,
    pub ci: bool,
    pub rerun_all: bool,
    /// Capture test output rather than echoing it; on unless `-s` was
    /// given (the flag name is historic).
    pub swallow_output: bool,
    pub backup: bool,
    pub testmon: bool,
    pub hooks: HooksConfig,
}

impl Options {
    pub fn new(args: &RunArgs, config: &ConfigFile) -> Result<Options> {
        if args.use_coverage && args.use_patch_file.is_some() {
            return Err(usage_error(
                "you can't combine --use-coverage and --use-patch-file",
            ));
        }
        if args.enable_mutation_types.is_some() && args.disable_mutation_types.is_some() {
            return Err(usage_error(
                "you can't combine --enable-mutation-types and --disable-mutation-types",
            ));
        }

        let enable = args
            .enable_mutation_types
            .clone()
            .or_else(|| config.enable_mutation_types.clone());
        let disable = args
            .disable_mutation_types
            .clone()
            .or_else(|| config.disable_mutation_types.clone());
        let mutation_kinds = mutation_kind_set(enable.as_deref(), disable.as_deref())?;

        let paths_to_mutate = match args
            .paths_to_mutate
            .clone()
            .or_else(|| config.paths_to_mutate.clone())
        {
            Some(paths) => split_paths(&paths).ok_or_else(|| {
                usage_error(format!("none of the paths to mutate exist: {paths:?}"))
            })?,
            None => crate::source::guess_paths_to_mutate()?,
        };

        let tests_dir = args
            .tests_dir
            .clone()
            .or_else(|| config.tests_dir.clone())
            .unwrap_or_else(|| DEFAULT_TESTS_DIR.to_owned());
        let tests_dirs = split_paths(&tests_dir).unwrap_or_default();

        let exclude_patterns = args
            .paths_to_exclude
            .clone()
            .or_else(|| config.paths_to_exclude.clone());
        let exclude = build_exclude_set(exclude_patterns.as_deref())?;

        let mut skip_calls: Vec<String> = DEFAULT_SKIP_CALLS
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        if let Some(extra) = args.skip_calls.clone().or_else(|| config.skip_calls.clone()) {
            skip_calls.extend(split_list(&extra));
        }

        let name_synonyms = match args
            .name_synonyms
            .clone()
            .or_else(|| config.name_synonyms.clone())
        {
            Some(pairs) => parse_name_synonyms(&pairs)?,
            None => default_name_synonyms(),
        };

        Ok(Options {
            runner: args
                .runner
                .clone()
                .or_else(|| config.runner.clone())
                .unwrap_or_else(|| DEFAULT_RUNNER.to_owned()),
            paths_to_mutate,
            tests_dirs,
            exclude,
            mutation_kinds,
            skip_calls,
            name_synonyms,
            use_coverage: args.use_coverage || config.use_coverage,
            use_patch_file: args
                .use_patch_file
                .clone()
                .or_else(|| config.use_patch_file.clone().map(Utf8PathBuf::from)),
            pre_mutation: args
                .pre_mutation
                .clone()
                .or_else(|| config.pre_mutation.clone()),
            post_mutation: args
                .post_mutation
                .clone()
                .or_else(|| config.post_mutation.clone()),
            test_time_base: args
                .test_time_base
                .or(config.test_time_base)
                .unwrap_or(0.0),
            test_time_multiplier: args
                .test_time_multiplier
                .or(config.test_time_multiplier)
                .unwrap_or(2.0),
            test_processes: args
                .test_processes
                .or(config.test_processes)
                .unwrap_or(DEFAULT_TEST_PROCESSES)
                .max(1),
            simple_output: args.simple_output || config.simple_output,
            no_progress: args.no_progress || config.no_progress,
            ci: args.ci || config.ci,
            rerun_all: args.rerun_all || config.rerun_all,
            swallow_output: !(args.swallow_output || config.swallow_output),
            backup: args.backup,
            testmon: args.testmon || config.testmon,
            hooks: config.hooks.clone(),
        })
    }

    /// Options for commands that only read the cache and regenerate
    /// mutants (`apply`, `show`, `junitxml`): no paths are guessed and
    /// every mutation kind is enabled so any cached record can be
    /// re-derived.
    pub fn for_reports(config: &ConfigFile) -> Result<Options> {
        let mut args = RunArgs::default();
        args.paths_to_mutate = Some(".".to_owned());
        let mut options = Options::new(&args, config)?;
        options.mutation_kinds = MutationKind::all();
        Ok(options)
    }

    #[cfg(test)]
    pub fn for_tests() -> Options {
        Options {
            runner: DEFAULT_RUNNER.to_owned(),
            paths_to_mutate: vec![Utf8PathBuf::from("src")],
            tests_dirs: vec![Utf8PathBuf::from("tests")],
            exclude: GlobSet::empty(),
            mutation_kinds: MutationKind::all(),
            skip_calls: DEFAULT_SKIP_CALLS.iter().map(|s| (*s).to_owned()).collect(),
            name_synonyms: default_name_synonyms(),
            use_coverage: false,
            use_patch_file: None,
            pre_mutation: None,
            post_mutation: None,
            test_time_base: 0.0,
            test_time_multiplier: 2.0,
            test_processes: DEFAULT_TEST_PROCESSES,
            simple_output: false,
            no_progress: true,
            ci: false,
            rerun_all: false,
            swallow_output: true,
            backup: false,
            testmon: false,
            hooks: HooksConfig::default(),
        }
    }
}

/// The enabled kind set from the enable/disable flags.
fn mutation_kind_set(
    enable: Option<&str>,
    disable: Option<&str>,
) -> Result<BTreeSet<MutationKind>> {
    let parse_list = |list: &str| -> Result<BTreeSet<MutationKind>> {
        let mut kinds = BTreeSet::new();
        let mut invalid = Vec::new();
        for name in split_list(list) {
            match name.parse::<MutationKind>() {
                Ok(kind) => {
                    kinds.insert(kind);
                }
                Err(_) => invalid.push(name),
            }
        }
        if invalid.is_empty() {
            Ok(kinds)
        } else {
            Err(usage_error(format!(
                "not valid mutation types: {}. Valid mutation types are: {}",
                invalid.iter().sorted().join(", "),
                MutationKind::iter().map(|k| k.to_string()).join(", "),
            )))
        }
    };
    match (enable, disable) {
        (Some(enable), None) => parse_list(enable),
        (None, Some(disable)) => {
            let disabled = parse_list(disable)?;
            Ok(MutationKind::all()
                .difference(&disabled)
                .copied()
                .collect())
        }
        (None, None) => Ok(MutationKind::all()),
        (Some(_), Some(_)) => unreachable!("checked by Options::new"),
    }
}

/// Split a comma- or colon-separated path list, keeping the separator that
/// yields at least one existing path.
pub fn split_paths(paths: &str) -> Option<Vec<Utf8PathBuf>> {
    for sep in [',', ':'] {
        let found: Vec<Utf8PathBuf> = paths
            .split(sep)
            .map(|p| p.trim().trim_end_matches('/'))
            .filter(|p| !p.is_empty() && Utf8Path::new(p).exists())
            .map(Utf8PathBuf::from)
            .collect();
        if !found.is_empty() {
            return Some(found);
        }
    }
    None
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_name_synonyms(pairs: &str) -> Result<Vec<(String, String)>> {
    split_list(pairs)
        .into_iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(old, new)| (old.trim().to_owned(), new.trim().to_owned()))
                .ok_or_else(|| {
                    usage_error(format!("--name-synonyms entries are old=new pairs: {pair:?}"))
                })
        })
        .collect()
}

fn build_exclude_set(patterns: Option<&str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    if let Some(patterns) = patterns {
        for pattern in split_list(patterns) {
            builder.add(Glob::new(&pattern)?);
            if !pattern.starts_with("**") {
                builder.add(Glob::new(&format!("**/{pattern}"))?);
            }
        }
    }
    Ok(builder.build()?)
}
