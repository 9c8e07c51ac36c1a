use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// What assertions do during a run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Compare live output against expectations.
    #[default]
    Normal,
    /// Overwrite fixtures with live output.
    Update,
    /// Capture live output next to the scratch files, then compare.
    Save,
    /// Describe what would run; never start a process.
    Explain,
}

/// When the scratch directory is deleted after a run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CleanupPolicy {
    Always,
    /// Keep it when a test did not pass or the run was interrupted.
    #[default]
    OnSuccess,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub mode: Mode,
    pub verbose: bool,
    pub show_diff: bool,
    pub silent: bool,
    pub cleanup: CleanupPolicy,
    pub assume_yes: bool,
    pub working_dir: PathBuf,
    /// Where fixtures live when they are not in `<working_dir>/tests`.
    pub tests_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub temp_prefix: String,
    pub submission: Option<String>,
    pub custom: BTreeMap<String, String>,
}

impl Options {
    pub const DEFAULT_TEMP_PREFIX: &str = "testres";

    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Normal,
            verbose: false,
            show_diff: false,
            silent: false,
            cleanup: CleanupPolicy::default(),
            assume_yes: false,
            working_dir: working_dir.into(),
            tests_dir: None,
            temp_dir: None,
            temp_prefix: Self::DEFAULT_TEMP_PREFIX.to_owned(),
            submission: None,
            custom: BTreeMap::new(),
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_explain(&self) -> bool {
        self.mode == Mode::Explain
    }

    pub fn is_update(&self) -> bool {
        self.mode == Mode::Update
    }

    /// Directory tests run in: the scratch dir once it exists, the working dir before.
    pub fn scratch_dir(&self) -> &Path {
        self.temp_dir.as_deref().unwrap_or(&self.working_dir)
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.tests_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.join("tests"))
    }

    /// Resolves a test-relative path against the scratch directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.scratch_dir().join(path)
        }
    }

    /// Value of a custom `-o name=value` option.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.custom.get(name).map(String::as_str)
    }

    /// Adds custom options given as `name` or `name=value` (a bare name means `true`).
    /// Options already present are kept.
    pub fn add_custom_options<I, S>(&mut self, opts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for opt in opts {
            let (name, value) = match opt.as_ref().split_once('=') {
                Some((name, value)) => (name, value),
                None => (opt.as_ref(), "true"),
            };
            self.custom
                .entry(name.to_owned())
                .or_insert_with(|| value.to_owned());
        }
    }

    /// Custom options back in `name=value` form, for handing to a worker process.
    pub fn custom_option_args(&self) -> Vec<String> {
        self.custom
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}
