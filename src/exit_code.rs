// Copyright 2023 - 2025 The faultline authors

//! Exit codes, assigned so automation can tell apart the outcomes it
//! cares about.
//!
//! A finished run exits with the bitwise OR of the outcome bits; usage
//! errors exit with [USAGE] before any mutants are tested.

/// Everything worked and every mutant was caught.
pub const SUCCESS: i32 = 0;

/// Set when an exception interrupted the run.
pub const EXCEPTION: i32 = 1;

/// Wrong arguments or config.
pub const USAGE: i32 = 2;

/// Set when at least one mutant survived.
pub const SURVIVED_BIT: i32 = 2;

/// Set when at least one mutant timed out.
pub const TIMEOUT_BIT: i32 = 4;

/// Set when at least one mutant was suspiciously slow.
pub const SUSPICIOUS_BIT: i32 = 8;
