// Copyright 2023 - 2025 The faultline authors

//! Run counters, the one-line progress display, and the final exit code.

use std::io::Write;

use console::style;

use crate::exit_code;
use crate::tester::MutantStatus;

/// Per-status markers shown in the progress line and the run banner.
#[derive(Debug, Clone)]
pub struct OutputLegend {
    pub killed: &'static str,
    pub timeout: &'static str,
    pub suspicious: &'static str,
    pub survived: &'static str,
    pub skipped: &'static str,
}

impl OutputLegend {
    pub fn new(simple_output: bool) -> OutputLegend {
        if simple_output {
            OutputLegend {
                killed: "KILLED",
                timeout: "TIMEOUT",
                suspicious: "SUSPICIOUS",
                survived: "SURVIVED",
                skipped: "SKIPPED",
            }
        } else {
            OutputLegend {
                killed: "🎉",
                timeout: "⏰",
                suspicious: "🤔",
                survived: "🙁",
                skipped: "🔇",
            }
        }
    }
}

/// Counters for a run, updated only on the main drain thread.
#[derive(Debug)]
pub struct Progress {
    pub total: usize,
    pub registered: usize,
    pub killed: usize,
    pub survived: usize,
    pub timeout: usize,
    pub suspicious: usize,
    pub skipped: usize,
    legend: OutputLegend,
    no_progress: bool,
}

impl Progress {
    pub fn new(total: usize, simple_output: bool, no_progress: bool) -> Progress {
        Progress {
            total,
            registered: 0,
            killed: 0,
            survived: 0,
            timeout: 0,
            suspicious: 0,
            skipped: 0,
            legend: OutputLegend::new(simple_output),
            no_progress,
        }
    }

    pub fn register(&mut self, status: MutantStatus) {
        self.registered += 1;
        match status {
            MutantStatus::Killed => self.killed += 1,
            MutantStatus::Survived => self.survived += 1,
            MutantStatus::Timeout => self.timeout += 1,
            MutantStatus::Suspicious => self.suspicious += 1,
            MutantStatus::Skipped | MutantStatus::Untested => self.skipped += 1,
        }
        self.print();
    }

    /// The one human-readable status line.
    pub fn render(&self) -> String {
        format!(
            "{}/{}  {} {}  {} {}  {} {}  {} {}  {} {}",
            self.registered,
            self.total,
            self.legend.killed,
            self.killed,
            self.legend.timeout,
            self.timeout,
            self.legend.suspicious,
            self.suspicious,
            self.legend.survived,
            style(self.survived).red(),
            self.legend.skipped,
            self.skipped,
        )
    }

    /// Rewrite the progress line in place.
    pub fn print(&self) {
        if self.no_progress {
            return;
        }
        print!("\r{}", self.render());
        let _ = std::io::stdout().flush();
    }

    /// The run exit code: OR of the outcome bits, plus the exception bit.
    /// In CI mode only the exception bit is reported.
    pub fn exit_code(&self, exception: bool, ci: bool) -> i32 {
        let mut code = exit_code::SUCCESS;
        if exception {
            code |= exit_code::EXCEPTION;
        }
        if ci {
            return code;
        }
        if self.survived > 0 {
            code |= exit_code::SURVIVED_BIT;
        }
        if self.timeout > 0 {
            code |= exit_code::TIMEOUT_BIT;
        }
        if self.suspicious > 0 {
            code |= exit_code::SUSPICIOUS_BIT;
        }
        code
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn progress_with(statuses: &[MutantStatus]) -> Progress {
        let mut progress = Progress::new(statuses.len(), true, true);
        for status in statuses {
            progress.register(*status);
        }
        progress
    }

    #[test]
    fn all_killed_exits_zero() {
        let progress = progress_with(&[MutantStatus::Killed, MutantStatus::Killed]);
        assert_eq!(progress.exit_code(false, false), 0);
    }

    #[test]
    fn outcome_bits_are_ored() {
        let progress = progress_with(&[MutantStatus::Survived]);
        assert_eq!(progress.exit_code(false, false), 2);

        let progress = progress_with(&[MutantStatus::Survived, MutantStatus::Timeout]);
        assert_eq!(progress.exit_code(false, false), 6);

        let progress = progress_with(&[
            MutantStatus::Survived,
            MutantStatus::Timeout,
            MutantStatus::Suspicious,
        ]);
        assert_eq!(progress.exit_code(false, false), 14);
        assert_eq!(progress.exit_code(true, false), 15);
    }

    #[test]
    fn ci_mode_reports_only_exceptions() {
        let progress = progress_with(&[MutantStatus::Survived, MutantStatus::Timeout]);
        assert_eq!(progress.exit_code(false, true), 0);
        assert_eq!(progress.exit_code(true, true), 1);
    }

    #[test]
    fn render_counts() {
        let progress = progress_with(&[
            MutantStatus::Killed,
            MutantStatus::Killed,
            MutantStatus::Survived,
            MutantStatus::Skipped,
        ]);
        assert_eq!(
            progress.render(),
            "4/4  KILLED 2  TIMEOUT 0  SUSPICIOUS 0  SURVIVED 1  SKIPPED 1"
        );
    }
}
