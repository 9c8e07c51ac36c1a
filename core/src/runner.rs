use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use rand::{distributions::Alphanumeric, Rng as _};

use crate::{
    error::Result,
    interrupt::Interrupt,
    marks::MarkScheme,
    options::{CleanupPolicy, Mode, Options},
    report::{ExplainReporter, Printed, Reporter, UpdateReporter},
    result::TestResult,
    style::Console,
    suite::TestSuite,
};

pub const CONFIRMATION_MESSAGE: &str = "
Please confirm that you want to update the output files in this test suite.

NOTE: THIS PROCESS WILL MODIFY EXISTING FILES.
      PLEASE ENSURE YOU HAVE A BACKUP BEFORE PROCEEDING.
";

const SCRATCH_SUFFIX_LEN: usize = 6;
const SCRATCH_ATTEMPTS: usize = 100;

fn create_scratch_dir(parent: &Path, prefix: &str) -> Result<PathBuf> {
    for _ in 0..SCRATCH_ATTEMPTS {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SCRATCH_SUFFIX_LEN)
            .map(char::from)
            .collect();
        let dir = parent.join(format!("{}{}", prefix, suffix));
        if dir.exists() {
            continue;
        }
        fsutil::mkdir(&dir)?;
        return Ok(dir);
    }
    anyhow::bail!(
        "Cannot find a free scratch directory name in {}",
        parent.display()
    )
}

fn percent(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}

fn fraction(mark: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        mark / total
    }
}

/// Runs a suite inside a scratch directory and reports the outcome.
#[derive(Debug)]
pub struct Runner {
    options: Options,
    console: Console,
    interrupt: Interrupt,
}

impl Runner {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            console: Console::stdout(),
            interrupt: Interrupt::default(),
        }
    }

    pub fn console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Creates `<working_dir>/<prefix>XXXXXX`. Explain mode uses the working dir as is.
    pub fn setup_environment(&mut self) -> Result<()> {
        let working_dir = self.options.working_dir.clone();
        if self.options.is_explain() {
            self.options.temp_dir = Some(working_dir);
            return Ok(());
        }
        let silent = self.options.silent;
        if !silent {
            self.console.println("Setting up environment...");
        }
        let dir = create_scratch_dir(&working_dir, &self.options.temp_prefix)
            .context("Failed to set up the test environment")?;
        log::info!("Scratch directory: {}", dir.display());
        if !silent && self.options.cleanup == CleanupPolicy::Never {
            self.console
                .println(format!("Test output in {}", dir.display()));
            self.console
                .println("Remember to clean up your test result folders.\n");
        }
        self.options.temp_dir = Some(dir);
        Ok(())
    }

    /// Removes the scratch directory as the cleanup policy says.
    /// `successful` is false when a test did not pass or the run was interrupted.
    pub fn tear_down_environment(&mut self, successful: bool) -> Result<()> {
        if self.options.is_explain() {
            self.options.temp_dir = None;
            return Ok(());
        }
        if !self.options.silent {
            self.console.println("Tearing down environment...");
        }
        let Some(dir) = self.options.temp_dir.take() else {
            return Ok(());
        };
        let remove = match self.options.cleanup {
            CleanupPolicy::Always => true,
            CleanupPolicy::OnSuccess => successful,
            CleanupPolicy::Never => false,
        };
        if remove {
            log::info!("Removing scratch directory {}", dir.display());
            fsutil::remove_dir_all(&dir)?;
        } else if self.options.cleanup == CleanupPolicy::OnSuccess && !self.options.silent {
            self.console
                .println(format!("Test output kept in {}", dir.display()));
        }
        Ok(())
    }

    fn reporter(&self) -> Box<dyn Reporter> {
        match self.options.mode {
            Mode::Explain => Box::<ExplainReporter>::default(),
            Mode::Update => Box::new(UpdateReporter),
            Mode::Normal | Mode::Save => Box::new(Printed {
                verbose: self.options.verbose,
                silent: self.options.silent,
            }),
        }
    }

    pub async fn run(&mut self, suite: &TestSuite) -> Result<TestResult> {
        self.execute(suite, false).await
    }

    /// Like [`Runner::run`], then prints the mark table unless silent.
    pub async fn run_marking(&mut self, suite: &TestSuite) -> Result<TestResult> {
        self.execute(suite, true).await
    }

    /// Asks before rewriting fixtures; `None` when the operator declined.
    pub async fn run_update(&mut self, suite: &TestSuite) -> Result<Option<TestResult>> {
        if !self.confirm_update()? {
            log::info!("Update declined");
            return Ok(None);
        }
        self.options.mode = Mode::Update;
        self.execute(suite, false).await.map(Some)
    }

    pub fn confirm_update(&self) -> Result<bool> {
        self.console.println(CONFIRMATION_MESSAGE);
        if self.options.assume_yes {
            return Ok(true);
        }
        let confirmed = dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("Are you sure you want to update the files? (y/N)")
            .default(false)
            .show_default(false)
            .interact()
            .context("Failed to read the confirmation")?;
        Ok(confirmed)
    }

    async fn execute(&mut self, suite: &TestSuite, marking: bool) -> Result<TestResult> {
        let scheme: MarkScheme = suite.mark_scheme().context("Invalid marks in test suite")?;
        self.setup_environment()?;

        let options = Arc::new(self.options.clone());
        let mut result = TestResult::new(options, scheme, self.reporter(), self.console.clone());
        result.start_run();

        let interrupt = self.interrupt.clone();
        let interrupted = tokio::select! {
            _ = suite.run(&mut result) => false,
            _ = interrupt.wait() => true,
        };
        if interrupted {
            log::warn!("Interrupted after {} tests", result.tests_run());
            result.set_interrupted();
        }
        result.stop_run();

        if marking && !self.options.silent {
            self.print_marks(&result);
        }
        let successful = result.was_successful() && !result.interrupted();
        self.tear_down_environment(successful)?;
        Ok(result)
    }

    /// `Category / Passed / Mark` table with a `Total` row.
    pub fn print_marks(&self, result: &TestResult) {
        if self.options.verbose {
            self.console.println("");
        }
        self.console.println("Marking Results");
        self.console
            .println(format!("{:30}{:15}{}", "Category", "Passed", "Mark"));
        let (marks, totals) = result.marks();
        for (category, report) in &marks {
            let name = if category.is_empty() {
                "(uncategorised)"
            } else {
                category.as_str()
            };
            let total = report.possible();
            self.console.println(format!(
                "{:30}{:15}{:.2}/{:.2} ({})",
                name,
                format!("{}/{}", report.passed, report.tests.len()),
                report.mark,
                total,
                percent(fraction(report.mark, total)),
            ));
        }
        self.console.println(format!(
            "\n{:30}{:15}{:.2}/{:.2} ({})",
            "Total",
            format!("{}/{}", totals.passed, totals.test_count),
            totals.received_marks,
            totals.total_marks,
            percent(fraction(totals.received_marks, totals.total_marks)),
        ));
    }
}
