// Copyright 2023 - 2025 The faultline authors

//! User hooks: shell commands run around the baseline and around each
//! mutant.
//!
//! The per-mutant hook learns which mutant is up from `FAULTLINE_*`
//! environment variables. It can skip the mutant by exiting with
//! [HOOK_SKIP_CODE] — skipping is a verdict, not an error — and can
//! rewrite the test command for this mutant by printing
//! `runner: <command>`.

use std::process::Command;

use anyhow::{bail, Context};
use tracing::debug;

use crate::config::HooksConfig;
use crate::mutant::Mutant;
use crate::Result;

/// Exit code from the pre-mutant hook that skips the current mutant.
pub const HOOK_SKIP_CODE: i32 = 3;

const RUNNER_PREFIX: &str = "runner:";

/// What the pre-mutant hook decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookVerdict {
    /// Test the mutant, optionally with a different test command.
    Proceed { runner_override: Option<String> },
    /// Don't test this mutant; record it as skipped.
    Skip,
}

/// Run the init hook, if configured. Failure is fatal: a broken hook
/// would taint every result.
pub fn run_init(hooks: &HooksConfig) -> Result<()> {
    let Some(command) = &hooks.init else {
        return Ok(());
    };
    debug!(%command, "run init hook");
    let status = shell(command)
        .status()
        .with_context(|| format!("spawn init hook {command:?}"))?;
    if !status.success() {
        bail!("init hook {command:?} failed with {status}");
    }
    Ok(())
}

/// Run the pre-mutant hook for `mutant`, if configured.
pub fn run_pre_mutant(hooks: &HooksConfig, mutant: &Mutant) -> Result<HookVerdict> {
    let Some(command) = &hooks.pre_mutant else {
        return Ok(HookVerdict::Proceed {
            runner_override: None,
        });
    };
    debug!(%command, mutant = mutant.name(), "run pre-mutant hook");
    let output = shell(command)
        .env("FAULTLINE_FILE", mutant.source_file.path.as_str())
        .env("FAULTLINE_LINE", mutant.id.line_number.to_string())
        .env("FAULTLINE_LINE_TEXT", &mutant.id.line_text)
        .env("FAULTLINE_INDEX", mutant.id.index.to_string())
        .output()
        .with_context(|| format!("spawn pre-mutant hook {command:?}"))?;
    match output.status.code() {
        Some(0) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let runner_override = stdout
                .lines()
                .find_map(|line| line.strip_prefix(RUNNER_PREFIX))
                .map(|runner| runner.trim().to_owned());
            Ok(HookVerdict::Proceed { runner_override })
        }
        Some(HOOK_SKIP_CODE) => Ok(HookVerdict::Skip),
        _ => bail!(
            "pre-mutant hook {command:?} failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim(),
        ),
    }
}

/// Run the post-mutant hook, if configured. Failures are logged by the
/// caller but do not change the mutant's status.
pub fn run_post_mutant(hooks: &HooksConfig, mutant: &Mutant) -> Result<()> {
    let Some(command) = &hooks.post_mutant else {
        return Ok(());
    };
    debug!(%command, mutant = mutant.name(), "run post-mutant hook");
    let status = shell(command)
        .env("FAULTLINE_FILE", mutant.source_file.path.as_str())
        .env("FAULTLINE_LINE", mutant.id.line_number.to_string())
        .status()
        .with_context(|| format!("spawn post-mutant hook {command:?}"))?;
    if !status.success() {
        bail!("post-mutant hook {command:?} failed with {status}");
    }
    Ok(())
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
