// Copyright 2023 - 2025 The faultline authors

//! `faultline`: inject small faults into Rust code and check that your
//! tests notice.

mod apply;
mod baseline;
mod cache;
mod catalog;
mod config;
mod coverage;
mod exit_code;
mod hooks;
mod interrupt;
mod mutant;
mod options;
mod process;
mod progress;
mod report;
mod scheduler;
mod source;
mod span;
mod tester;
mod visit;

use std::fs;
use std::process::exit;
use std::sync::Arc;

use anyhow::anyhow;
pub use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::baseline::{hash_of_tests, time_test_suite};
use crate::cache::Cache;
use crate::config::ConfigFile;
use crate::coverage::{gate_for, read_coverage_data, read_patch_data, CoveredLines, COVERAGE_FILENAME};
use crate::mutant::Mutant;
use crate::options::{Options, RunArgs, UsageError};
use crate::process::SubprocessSpawner;
use crate::progress::{OutputLegend, Progress};
use crate::source::{source_files, SourceFile};
use crate::tester::RunConfig;
use crate::visit::walk_file;

/// Inject small faults into Rust code and check that your tests notice.
#[derive(Parser, Debug)]
#[command(name = "faultline", version, about, max_term_width = 100)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run mutation tests.
    Run(RunArgs),
    /// Rewrite a file in place with the given mutant.
    Apply {
        /// Cache id of the mutant to apply.
        pk: u64,
        /// Keep a .bak copy of the original file.
        #[arg(long)]
        backup: bool,
    },
    /// Print surviving, timed-out and suspicious mutants grouped by file.
    Results,
    /// Print the ids of mutants with the given status.
    ResultIds {
        /// killed, survived, timeout, suspicious, skipped or untested.
        status: String,
    },
    /// Show the diff of one mutant, all mutants, or one file's mutants.
    Show {
        /// A mutant id, `all`, or a file path.
        what: Option<String>,
    },
    /// Print a JUnit XML report of the last run.
    Junitxml,
    /// Write an HTML report with one row per file.
    Html {
        /// Where to write the report.
        #[arg(long, default_value = "html")]
        directory: Utf8PathBuf,
    },
    /// Print the version and exit.
    Version,
}

fn main() {
    let args = Args::parse();
    interrupt::install_handler();
    let _log_guard = init_tracing();
    match run_command(args) {
        Ok(code) => exit(code),
        Err(err) => {
            if let Some(usage) = err.downcast_ref::<UsageError>() {
                eprintln!("error: {usage}");
                exit(exit_code::USAGE);
            }
            error!("{err:#}");
            eprintln!("error: {err:#}");
            exit(exit_code::EXCEPTION);
        }
    }
}

fn run_command(args: Args) -> Result<i32> {
    match args.command {
        Command::Run(run_args) => run_main(&run_args),
        Command::Apply { pk, backup } => {
            let options = Options::for_reports(&ConfigFile::read()?)?;
            let mut cache = Cache::open(Utf8Path::new("."))?;
            let (filename, record) = {
                let (filename, record) = report::find_record(&cache, pk)?;
                (filename.to_owned(), record.clone())
            };
            let source_file = SourceFile::load(Utf8Path::new(&filename))?;
            cache.refresh_line_numbers(&source_file);
            let (_, record) = report::find_record(&cache, record.pk)?;
            let mutant = report::mutant_for_record(record, &filename, &options)?;
            apply::apply_in_place(&mutant, backup)?;
            println!("applied mutant {pk} to {filename}");
            Ok(exit_code::SUCCESS)
        }
        Command::Results => {
            let cache = Cache::open(Utf8Path::new("."))?;
            report::print_results(&cache)?;
            Ok(exit_code::SUCCESS)
        }
        Command::ResultIds { status } => {
            let cache = Cache::open(Utf8Path::new("."))?;
            let ids = report::result_ids(&cache, &status)
                .map_err(|err| anyhow!(UsageError(err.to_string())))?;
            println!("{ids}");
            Ok(exit_code::SUCCESS)
        }
        Command::Show { what } => {
            let options = Options::for_reports(&ConfigFile::read()?)?;
            let cache = Cache::open(Utf8Path::new("."))?;
            report::show(&cache, &options, what.as_deref())?;
            Ok(exit_code::SUCCESS)
        }
        Command::Junitxml => {
            let options = Options::for_reports(&ConfigFile::read()?)?;
            let cache = Cache::open(Utf8Path::new("."))?;
            print!("{}", report::junitxml(&cache, &options)?);
            Ok(exit_code::SUCCESS)
        }
        Command::Html { directory } => {
            let cache = Cache::open(Utf8Path::new("."))?;
            report::write_html_report(&cache, &directory)?;
            println!("wrote {}", directory.join("index.html"));
            Ok(exit_code::SUCCESS)
        }
        Command::Version => {
            println!("faultline version {}", env!("CARGO_PKG_VERSION"));
            Ok(exit_code::SUCCESS)
        }
    }
}

/// The `run` command.
fn run_main(args: &RunArgs) -> Result<i32> {
    let config_file = ConfigFile::read()?;
    let options = Options::new(args, &config_file)?;
    if options.tests_dirs.is_empty() {
        return Err(anyhow!(UsageError(
            "no test folders found; run where there is a \"tests\" or \"test\" folder, \
             or pass --tests-dir"
                .into()
        )));
    }
    if options.use_coverage && !Utf8Path::new(COVERAGE_FILENAME).exists() {
        return Err(anyhow!(UsageError(format!(
            "no {COVERAGE_FILENAME} file found; generate coverage data to use this feature"
        ))));
    }

    // Keep a cargo-based runner from poisoning its incremental state as
    // the sources flip back and forth under it.
    std::env::set_var("CARGO_INCREMENTAL", "0");

    let tests_hash = hash_of_tests(&options.tests_dirs)?;
    let mut cache = Cache::open(Utf8Path::new("."))?;
    print_banner(&options);
    hooks::run_init(&options.hooks)?;

    let spawner = Arc::new(SubprocessSpawner::default());
    let baseline_time_elapsed =
        time_test_suite(spawner.as_ref(), &mut cache, &options, &tests_hash)?;

    let covered: Option<CoveredLines> = if options.use_coverage {
        Some(read_coverage_data(Utf8Path::new(COVERAGE_FILENAME))?)
    } else if let Some(patch_path) = &options.use_patch_file {
        Some(read_patch_data(patch_path)?)
    } else {
        None
    };

    let (mutations_by_file, parse_failures) =
        discover_mutants(args, &options, &mut cache, covered.as_ref())?;
    let total: usize = mutations_by_file.iter().map(|(_, m)| m.len()).sum();
    let mut run_config = RunConfig::new(options.clone(), baseline_time_elapsed, tests_hash);
    run_config.total = total;

    println!();
    println!("2. Checking mutants");
    let mut progress = Progress::new(total, options.simple_output, options.no_progress);
    let run_result = scheduler::run_mutation_tests(
        &run_config,
        &mut progress,
        &mutations_by_file,
        &mut cache,
        spawner,
    );
    println!();

    let mut exception = parse_failures > 0;
    if let Err(err) = run_result {
        error!("{err:#}");
        eprintln!("error: {err:#}");
        exception = true;
    }
    Ok(progress.exit_code(exception, options.ci))
}

/// Work out what to mutate from the run argument, walk the files, and
/// register everything with the cache.
///
/// Unparseable files are reported and skipped; the count of such failures
/// is returned so the exit code can carry the exception bit.
fn discover_mutants(
    args: &RunArgs,
    options: &Options,
    cache: &mut Cache,
    covered: Option<&CoveredLines>,
) -> Result<(Vec<(String, Vec<Mutant>)>, usize)> {
    // A numeric argument means exactly one cached mutant.
    let mut single_target = None;
    let files: Vec<Utf8PathBuf> = match &args.argument {
        None => source_files(&options.paths_to_mutate, &options.tests_dirs, &options.exclude)?,
        Some(argument) => {
            if let Ok(pk) = argument.parse::<u64>() {
                let (filename, record) = report::find_record(cache, pk)?;
                let filename = Utf8PathBuf::from(filename);
                single_target = Some(record.id.clone());
                vec![filename]
            } else {
                let path = Utf8PathBuf::from(argument);
                if !path.exists() {
                    return Err(anyhow!(UsageError(format!(
                        "the run argument must be a mutant id or a path to a file: {argument:?}"
                    ))));
                }
                vec![path]
            }
        }
    };

    apply::recover_stale_backups(&files)?;

    let mut mutations_by_file = Vec::new();
    let mut parse_failures = 0;
    for path in &files {
        let source_file = match SourceFile::load(path) {
            Ok(source_file) => source_file,
            Err(err) => {
                eprintln!("error: {err:#}");
                parse_failures += 1;
                continue;
            }
        };
        cache.refresh_line_numbers(&source_file);
        let gate = gate_for(covered, &source_file.path_slashes());
        let mut mutants = match walk_file(&source_file, options, gate) {
            Ok(mutants) => mutants,
            Err(err) => {
                eprintln!("error: {err:#}");
                parse_failures += 1;
                continue;
            }
        };
        if let Some(target) = &single_target {
            mutants.retain(|m| m.id.matches(target));
        }
        if mutants.is_empty() {
            continue;
        }
        cache.register_mutants(&mutants)?;
        mutations_by_file.push((source_file.path_slashes(), mutants));
    }
    Ok((mutations_by_file, parse_failures))
}

fn print_banner(options: &Options) {
    let legend = OutputLegend::new(options.simple_output);
    println!(
        "\n- Mutation testing starting -\n\n\
         These are the steps:\n\
         1. A full test suite run will be made to make sure we\n   \
            can run the tests successfully and we know how long\n   \
            it takes (to detect infinite loops for example)\n\
         2. Mutants will be generated and checked\n\n\
         Results are stored in {cache}.\n\
         Print found mutants with `faultline results`.\n\n\
         Legend for output:\n\
         {killed} Killed mutants.   The goal is for everything to end up in this bucket.\n\
         {timeout} Timeout.          Test suite took 10 times as long as the baseline so were killed.\n\
         {suspicious} Suspicious.       Tests took a long time, but not long enough to be fatal.\n\
         {survived} Survived.         This means your tests need to be expanded.\n\
         {skipped} Skipped.          Skipped.",
        cache = cache::CACHE_FILENAME,
        killed = legend.killed,
        timeout = legend.timeout,
        suspicious = legend.suspicious,
        survived = legend.survived,
        skipped = legend.skipped,
    );
}

/// Log to `.faultline/debug.log`, filtered by `FAULTLINE_TRACE`.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let dir = Utf8Path::new(".faultline");
    fs::create_dir_all(dir).ok()?;
    let appender = tracing_appender::rolling::never(dir, "debug.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_env("FAULTLINE_TRACE")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}
