// Copyright 2023 - 2025 The faultline authors

//! The `faultline.toml` configuration file.
//!
//! Keys are the `run` flag names with underscores. Values here fill in for
//! flags that were not given on the command line.

use std::fs::read_to_string;

use anyhow::Context;
use camino::Utf8Path;
use serde::Deserialize;

use crate::Result;

pub const CONFIG_FILENAME: &str = "faultline.toml";

/// Configuration read from a config file.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub paths_to_mutate: Option<String>,
    pub tests_dir: Option<String>,
    pub runner: Option<String>,
    pub use_coverage: bool,
    pub use_patch_file: Option<String>,
    pub enable_mutation_types: Option<String>,
    pub disable_mutation_types: Option<String>,
    pub pre_mutation: Option<String>,
    pub post_mutation: Option<String>,
    pub test_time_base: Option<f64>,
    pub test_time_multiplier: Option<f64>,
    pub skip_calls: Option<String>,
    pub name_synonyms: Option<String>,
    pub paths_to_exclude: Option<String>,
    pub test_processes: Option<usize>,
    pub simple_output: bool,
    pub no_progress: bool,
    pub ci: bool,
    pub rerun_all: bool,
    pub swallow_output: bool,
    pub testmon: bool,
    pub hooks: HooksConfig,
}

/// Shell hooks, run at well-defined points of a run.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HooksConfig {
    /// Run once before the baseline.
    pub init: Option<String>,
    /// Run before each mutant, with the mutant described in its
    /// environment; may skip the mutant or rewrite the runner.
    pub pre_mutant: Option<String>,
    /// Run after each mutant.
    pub post_mutant: Option<String>,
}

impl ConfigFile {
    pub fn read_file(path: &Utf8Path) -> Result<ConfigFile> {
        let toml = read_to_string(path).with_context(|| format!("read config {path:?}"))?;
        ConfigFile::from_str(&toml).with_context(|| format!("parse config {path:?}"))
    }

    fn from_str(toml: &str) -> Result<ConfigFile> {
        toml::de::from_str(toml).map_err(Into::into)
    }

    /// Read `faultline.toml` from the working directory, or an empty
    /// default when it doesn't exist.
    pub fn read() -> Result<ConfigFile> {
        let path = Utf8Path::new(CONFIG_FILENAME);
        if path.exists() {
            ConfigFile::read_file(path)
        } else {
            Ok(ConfigFile::default())
        }
    }
}

#[cfg(test)]
mod test {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_config_is_default() {
        assert_eq!(ConfigFile::from_str("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn flag_keys_parse() {
        let config = ConfigFile::from_str(indoc! {r#"
            runner = "cargo test --release"
            paths_to_mutate = "src,lib"
            test_time_multiplier = 3.5
            rerun_all = true

            [hooks]
            pre_mutant = "./hooks/pre.sh"
        "#})
        .unwrap();
        assert_eq!(config.runner.as_deref(), Some("cargo test --release"));
        assert_eq!(config.test_time_multiplier, Some(3.5));
        assert!(config.rerun_all);
        assert_eq!(config.hooks.pre_mutant.as_deref(), Some("./hooks/pre.sh"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ConfigFile::from_str("runers = \"typo\"").unwrap_err();
        assert!(err.to_string().contains("unknown field"), "{err}");
    }
}
