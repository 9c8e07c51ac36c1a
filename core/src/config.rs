use std::path::{Path, PathBuf};
use std::result::Result as StdResult;

use anyhow::Context as _;
use serde::Deserialize;

use crate::options::CleanupPolicy;

/// Contents of `marks.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarksConfig {
    #[serde(skip)]
    pub source_config_file: Option<PathBuf>,
    pub run: RunConfig,
    pub marking: MarkingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub temp_prefix: String,
    pub cleanup: CleanupPolicy,
    /// Fixture directory, relative to the directory of `marks.toml`.
    pub tests_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkingConfig {
    pub processes: usize,
    pub shell: PathBuf,
    pub compile: Option<String>,
    pub results_file: String,
    pub log_file: String,
    pub overall_results_json: String,
    pub overall_results_csv: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            temp_prefix: crate::options::Options::DEFAULT_TEMP_PREFIX.to_owned(),
            cleanup: CleanupPolicy::default(),
            tests_dir: None,
        }
    }
}

impl Default for MarkingConfig {
    fn default() -> Self {
        Self {
            processes: 4,
            shell: "/bin/sh".into(),
            compile: None,
            results_file: "results.json".to_owned(),
            log_file: "marking.log".to_owned(),
            overall_results_json: "overall_results.json".to_owned(),
            overall_results_csv: "marking_results.csv".to_owned(),
        }
    }
}

impl MarksConfig {
    pub const FILENAME: &str = "marks.toml";

    pub fn from_toml(s: &str) -> StdResult<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(filepath: PathBuf) -> anyhow::Result<Self> {
        let toml = fsutil::read_to_string(&filepath).context("Cannot read a file")?;
        let mut cfg = Self::from_toml(&toml)
            .with_context(|| format!("Invalid config TOML: {:?}", filepath))?;
        cfg.source_config_file = Some(filepath);
        Ok(cfg)
    }

    /// `run.tests_dir` made absolute against the config file's directory.
    pub fn tests_dir(&self) -> Option<PathBuf> {
        let dir = self.run.tests_dir.as_ref()?;
        let base = self
            .source_config_file
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or_else(|| Path::new(""));
        Some(base.join(dir))
    }

    /// Loads the nearest `marks.toml` in `cur_dir` or its ancestors, or the defaults when none exists.
    pub fn from_file_finding_in_ancestors(cur_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        match fsutil::find_in_ancestors(cur_dir, Self::FILENAME) {
            Some(filepath) => {
                log::info!("Using config file {:?}", filepath);
                Self::from_toml_file(filepath)
            }
            None => Ok(Self::default()),
        }
    }
}
