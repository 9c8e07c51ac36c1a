pub mod explain;
pub mod mark;
pub mod test;
pub mod update;

use std::path::PathBuf;

use anyhow::Context as _;
use marks_core::{CleanupPolicy, Loader, MarksConfig, Options, Registry, TestResult, TestSuite};

use crate::util;

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct GlobalArgs {
    #[command(subcommand)]
    pub subcmd: Subcommand,

    /// Directory holding the test fixtures [default: current directory]
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Run tests and report each outcome
    #[command(alias("t"))]
    Test(test::Args),

    /// Describe what tests run and check, without running anything
    #[command(alias("e"))]
    Explain(explain::Args),

    /// Rewrite expected output files with the output of the tests
    Update(update::Args),

    /// Run tests and award marks, for one submission or a directory of them
    #[command(alias("m"))]
    Mark(mark::Args),
}

pub type SubcmdResult = anyhow::Result<()>;

impl GlobalArgs {
    pub async fn exec_subcmd(&self, registry: &Registry) -> SubcmdResult {
        use Subcommand::*;
        match &self.subcmd {
            Test(args) => test::exec(args, self, registry).await,
            Explain(args) => explain::exec(args, self, registry).await,
            Update(args) => update::exec(args, self, registry).await,
            Mark(args) => mark::exec(args, self, registry).await,
        }
    }

    pub fn working_dir(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) => util::absolute(dir),
            None => util::current_dir(),
        }
    }
}

/// Test selection and custom options shared by every subcommand.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CommonArgs {
    /// Tests to run: `module`, `module.Class`, `Class.method`, a suite name or a pattern
    #[arg(value_name = "TEST")]
    pub tests: Vec<String>,

    /// Custom option for the tests, `name=value` or just `name`
    #[arg(short = 'o', long = "option", value_name = "NAME[=VALUE]")]
    pub options: Vec<String>,

    /// Directory holding the fixtures [default: from marks.toml, else <working dir>/tests]
    #[arg(long, value_name = "DIR")]
    pub tests_dir: Option<PathBuf>,
}

/// Why a run ends with a non-zero status even though nothing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Exit {
    #[error("interrupted")]
    Interrupted,

    #[error("some tests did not pass")]
    Unsuccessful,
}

impl Exit {
    pub fn code(self) -> i32 {
        match self {
            Exit::Interrupted => 128 + libc::SIGINT,
            Exit::Unsuccessful => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum ArgCleanup {
    Always,
    OnSuccess,
    Never,
}

impl From<ArgCleanup> for CleanupPolicy {
    fn from(value: ArgCleanup) -> Self {
        use ArgCleanup::*;
        match value {
            Always => CleanupPolicy::Always,
            OnSuccess => CleanupPolicy::OnSuccess,
            Never => CleanupPolicy::Never,
        }
    }
}

/// Config file values first, then the command line.
pub fn prepare(global: &GlobalArgs, common: &CommonArgs) -> anyhow::Result<(MarksConfig, Options)> {
    let working_dir = global.working_dir();
    let cfg = MarksConfig::from_file_finding_in_ancestors(&working_dir)?;
    let mut options = Options::new(working_dir);
    options.temp_prefix = cfg.run.temp_prefix.clone();
    options.cleanup = cfg.run.cleanup;
    options.tests_dir = match &common.tests_dir {
        Some(dir) => Some(util::absolute(dir)),
        None => cfg.tests_dir(),
    };
    options.add_custom_options(&common.options);
    log::debug!("Options: {:?}", options);
    Ok((cfg, options))
}

pub fn load(registry: &Registry, tests: &[String]) -> anyhow::Result<TestSuite> {
    let suite = Loader::new(registry)
        .load(tests)
        .context("Failed to load tests")?;
    log::info!("Loaded {} tests", suite.count());
    Ok(suite)
}

/// Maps a finished run to the process exit status.
pub fn finish(result: &TestResult, require_success: bool) -> SubcmdResult {
    if result.interrupted() {
        return Err(Exit::Interrupted.into());
    }
    if require_success && !result.was_successful() {
        return Err(Exit::Unsuccessful.into());
    }
    Ok(())
}
