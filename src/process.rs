// Copyright 2023 - 2025 The faultline authors

//! Spawn the user's test command, stream its merged output, and enforce a
//! hard timeout.
//!
//! On Unix the command runs as its own process group so that grandchild
//! test binaries are killed along with it. A watchdog thread kills the
//! group when the timeout expires or the run is interrupted.
//!
//! There are two spawn paths: commands containing shell syntax go through
//! `sh -c`; plain commands are split into argv and exec'd directly.

use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use subprocess::{ExitStatus, Popen, PopenConfig, Redirection};
use tracing::{debug, trace, warn};

use crate::interrupt::check_interrupted;
use crate::Result;

/// How often the watchdog looks at the clock and the interrupt flag.
const WATCHDOG_POLL: Duration = Duration::from_millis(50);

/// How one test-command run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The command exited by itself with this code; negative for signals.
    Exited(i32),
    /// The command was killed by the timeout.
    Timeout,
}

/// Something that can run a test command. The real implementation spawns
/// subprocesses; tests substitute stubs.
pub trait ProcessSpawner: Send + Sync {
    /// Run `command`, feeding each output line to `callback`, killing the
    /// command if it outlives `timeout`.
    fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
        callback: &mut dyn FnMut(&str),
    ) -> Result<ExitKind>;
}

/// The real spawner.
#[derive(Debug, Default)]
pub struct SubprocessSpawner {
    /// Extra environment for the child, on top of the current environment.
    pub env: Vec<(String, String)>,
}

impl ProcessSpawner for SubprocessSpawner {
    fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
        callback: &mut dyn FnMut(&str),
    ) -> Result<ExitKind> {
        let argv = command_argv(command);
        debug!(?argv, ?timeout, "spawn");
        let mut env = PopenConfig::current_env();
        env.extend(
            self.env
                .iter()
                .map(|(k, v)| (k.clone().into(), v.clone().into())),
        );
        let mut child = Popen::create(
            &argv,
            PopenConfig {
                stdin: Redirection::None,
                stdout: Redirection::Pipe,
                stderr: Redirection::Merge,
                env: Some(env),
                ..setpgid_on_unix()
            },
        )
        .with_context(|| format!("failed to spawn {command:?}"))?;

        let stdout = child.stdout.take().expect("stdout is piped");
        let child = Arc::new(Mutex::new(child));
        let done = Arc::new(AtomicBool::new(false));
        let timed_out = Arc::new(AtomicBool::new(false));
        let interrupted = Arc::new(AtomicBool::new(false));
        let watchdog = thread::spawn({
            let child = Arc::clone(&child);
            let done = Arc::clone(&done);
            let timed_out = Arc::clone(&timed_out);
            let interrupted = Arc::clone(&interrupted);
            let start = Instant::now();
            move || {
                while !done.load(Ordering::SeqCst) {
                    if timeout.is_some_and(|t| start.elapsed() > t) {
                        timed_out.store(true, Ordering::SeqCst);
                        kill_child(&child);
                        return;
                    }
                    if check_interrupted().is_err() {
                        interrupted.store(true, Ordering::SeqCst);
                        kill_child(&child);
                        return;
                    }
                    thread::sleep(WATCHDOG_POLL);
                }
            }
        });

        // Drain output until the pipe closes: the child exited or was
        // killed by the watchdog.
        for line in BufReader::new(stdout).lines() {
            match line {
                Ok(line) => callback(&line),
                Err(err) => {
                    trace!(?err, "error reading child output");
                    break;
                }
            }
        }

        done.store(true, Ordering::SeqCst);
        let status = child
            .lock()
            .expect("child mutex")
            .wait()
            .context("wait for child")?;
        watchdog.join().expect("join watchdog");

        if interrupted.load(Ordering::SeqCst) {
            check_interrupted()?;
        }
        if timed_out.load(Ordering::SeqCst) {
            debug!(%command, "timed out");
            return Ok(ExitKind::Timeout);
        }
        let code = match status {
            ExitStatus::Exited(code) => i32::try_from(code).unwrap_or(i32::MAX),
            ExitStatus::Signaled(sig) => -i32::from(sig),
            ExitStatus::Other(code) => code,
            ExitStatus::Undetermined => {
                return Err(anyhow!("could not determine exit status of {command:?}"))
            }
        };
        trace!(%command, code, "exited");
        Ok(ExitKind::Exited(code))
    }
}

/// The argv for a command string: through the shell when it needs one,
/// split directly when it doesn't.
fn command_argv(command: &str) -> Vec<String> {
    if needs_shell(command) {
        #[cfg(unix)]
        return vec!["/bin/sh".into(), "-c".into(), command.into()];
        #[cfg(not(unix))]
        return vec!["cmd".into(), "/C".into(), command.into()];
    }
    command.split_whitespace().map(str::to_owned).collect()
}

fn needs_shell(command: &str) -> bool {
    command
        .chars()
        .any(|c| "|&;<>()$`\\\"'!*?[]{}~#".contains(c))
}

fn kill_child(child: &Mutex<Popen>) {
    let mut child = match child.lock() {
        Ok(child) => child,
        Err(poisoned) => poisoned.into_inner(),
    };
    if child.poll().is_some() {
        return; // already gone
    }
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        if let Some(pid) = child.pid() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            match killpg(pid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => return,
                Err(errno) => warn!(%errno, "failed to kill process group"),
            }
        }
    }
    if let Err(err) = child.kill() {
        // most likely we raced and it's already gone
        warn!(?err, "failed to kill child");
    }
}

#[cfg(unix)]
fn setpgid_on_unix() -> PopenConfig {
    PopenConfig {
        setpgid: true,
        ..Default::default()
    }
}

#[cfg(not(unix))]
fn setpgid_on_unix() -> PopenConfig {
    Default::default()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn plain_commands_skip_the_shell() {
        assert_eq!(command_argv("cargo test --quiet"), ["cargo", "test", "--quiet"]);
    }

    #[test]
    fn shell_syntax_goes_through_the_shell() {
        let argv = command_argv("cargo test 2>&1 | tee log");
        assert_eq!(argv[..2], ["/bin/sh".to_owned(), "-c".to_owned()]);
        assert_eq!(argv[2], "cargo test 2>&1 | tee log");
    }

    #[test]
    fn run_streams_output_and_reports_exit() {
        let spawner = SubprocessSpawner::default();
        let mut lines = Vec::new();
        let status = spawner
            .run("echo one && echo two", None, &mut |line| {
                lines.push(line.to_owned());
            })
            .unwrap();
        assert_eq!(status, ExitKind::Exited(0));
        assert_eq!(lines, ["one", "two"]);
    }

    #[test]
    fn run_reports_nonzero_exit() {
        let spawner = SubprocessSpawner::default();
        let status = spawner.run("sh -c \"exit 3\"", None, &mut |_| {}).unwrap();
        assert_eq!(status, ExitKind::Exited(3));
    }

    #[test]
    fn run_kills_on_timeout() {
        let spawner = SubprocessSpawner::default();
        let start = Instant::now();
        let status = spawner
            .run("sleep 30", Some(Duration::from_millis(200)), &mut |_| {})
            .unwrap();
        assert_eq!(status, ExitKind::Timeout);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn extra_env_reaches_the_child() {
        let spawner = SubprocessSpawner {
            env: vec![("FAULTLINE_PROBE".to_owned(), "42".to_owned())],
        };
        let mut lines = Vec::new();
        spawner
            .run("echo $FAULTLINE_PROBE", None, &mut |line| {
                lines.push(line.to_owned())
            })
            .unwrap();
        assert_eq!(lines, ["42"]);
    }
}
