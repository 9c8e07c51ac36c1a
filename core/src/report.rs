use colored::Color;

use crate::{result::Outcome, style::Console, suite::TestInfo};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tests_run: usize,
    pub successes: usize,
    pub errors: usize,
    pub failures: usize,
    pub skipped: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ran {} tests: {} success, {} errors, {} failures, {} skipped",
            self.tests_run, self.successes, self.errors, self.failures, self.skipped
        )
    }
}

/// How a run is presented while it happens.
pub trait Reporter: Send {
    fn start_run(&mut self, _console: &Console) {}

    fn start_test(&mut self, _console: &Console, _info: &TestInfo) {}

    /// The deciding outcome of a test.
    fn add_outcome(
        &mut self,
        _console: &Console,
        _info: &TestInfo,
        _outcome: Outcome,
        _message: Option<&str>,
    ) {
    }

    /// A problem raised after the test's outcome was already decided.
    fn add_extra(&mut self, _console: &Console, _info: &TestInfo, _outcome: Outcome, _message: &str) {}

    fn stop_test(&mut self, _console: &Console, _info: &TestInfo) {}

    fn stop_run(&mut self, _console: &Console, _summary: &RunSummary) {}
}

/// Prints nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Reporter for Silent {}

/// `id ... OK|FAIL|ERROR|SKIP` lines and a closing summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Printed {
    pub verbose: bool,
    pub silent: bool,
}

impl Reporter for Printed {
    fn start_run(&mut self, console: &Console) {
        if !self.silent {
            console.println("Running tests\n");
        }
    }

    fn start_test(&mut self, console: &Console, info: &TestInfo) {
        if self.verbose {
            console.print(format!("{:60}", info.id));
        }
    }

    fn add_outcome(
        &mut self,
        console: &Console,
        _info: &TestInfo,
        outcome: Outcome,
        message: Option<&str>,
    ) {
        if !self.verbose {
            return;
        }
        console.println(console.outcome_label(outcome));
        if let Some(msg) = message {
            console.println(format!("\t{}", msg));
        }
    }

    fn add_extra(&mut self, console: &Console, _info: &TestInfo, outcome: Outcome, message: &str) {
        if self.verbose {
            console.println(format!("\t{} (after outcome) {}", console.outcome_label(outcome), message));
        }
    }

    fn stop_run(&mut self, console: &Console, summary: &RunSummary) {
        if self.verbose {
            console.println("");
            console.println("-".repeat(70));
            console.println(summary);
        }
    }
}

/// Headers for update mode; assertions print what they rewrote.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateReporter;

impl Reporter for UpdateReporter {
    fn start_run(&mut self, console: &Console) {
        console.println("Updating tests\n");
    }

    fn start_test(&mut self, console: &Console, info: &TestInfo) {
        console.println(console.bold(&format!("==> {}:", info.id)));
    }

    fn add_outcome(
        &mut self,
        console: &Console,
        _info: &TestInfo,
        outcome: Outcome,
        message: Option<&str>,
    ) {
        if outcome.passed() {
            return;
        }
        console.println(format!(
            "\t{}\t{}",
            console.outcome_label(outcome),
            message.unwrap_or_default()
        ));
    }

    fn stop_test(&mut self, console: &Console, _info: &TestInfo) {
        console.println("");
    }
}

/// Banner, per-test header and doc text; the test primitives print the rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainReporter {
    explained: usize,
}

impl Reporter for ExplainReporter {
    fn start_run(&mut self, console: &Console) {
        console.println("Showing explanation for tests");
        console.println(console.bold(&console.paint(
            "NOTE: THIS IS AN EXPLANATION ONLY. NO TESTS ARE RUN.",
            Color::Yellow,
        )));
        console.println("To replicate a test, all given commands must be executed.\n");
    }

    fn start_test(&mut self, console: &Console, info: &TestInfo) {
        self.explained += 1;
        console.println(console.bold(&console.paint(&format!("==> {}:", info.id), Color::Green)));
        if let Some(doc) = info.doc.as_deref().filter(|d| !d.is_empty()) {
            console.println(console.bold("About the test:"));
            console.println(doc);
        }
        console.println(console.bold("What the test runs and checks:"));
    }

    fn add_outcome(
        &mut self,
        console: &Console,
        _info: &TestInfo,
        outcome: Outcome,
        message: Option<&str>,
    ) {
        if outcome == Outcome::Error {
            console.println(format!(
                "\t{}\t{}",
                console.outcome_label(outcome),
                message.unwrap_or_default()
            ));
        }
    }

    fn stop_test(&mut self, console: &Console, _info: &TestInfo) {
        console.println("");
    }

    fn stop_run(&mut self, console: &Console, _summary: &RunSummary) {
        console.println(format!("Explained {} tests.", self.explained));
        console.println(console.bold(&console.paint(
            "NOTE: THIS IS AN EXPLANATION ONLY. NO TESTS WERE RUN.",
            Color::Yellow,
        )));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn info(id: &str, doc: Option<&str>) -> TestInfo {
        TestInfo {
            id: id.to_owned(),
            module: String::new(),
            class: "A".to_owned(),
            method: "test".to_owned(),
            doc: doc.map(str::to_owned),
            marks: None,
            ignore_result: false,
        }
    }

    #[test]
    fn printed_verbose_lines() {
        let console = Console::buffer();
        let mut r = Printed {
            verbose: true,
            silent: false,
        };
        let t = info("A.test_usage", None);
        r.start_run(&console);
        r.start_test(&console, &t);
        r.add_outcome(&console, &t, Outcome::Failure, Some("stdout mismatch"));
        r.stop_test(&console, &t);
        r.stop_run(
            &console,
            &RunSummary {
                tests_run: 1,
                failures: 1,
                ..Default::default()
            },
        );
        let want = format!(
            "Running tests\n\n{:60}FAIL\n\tstdout mismatch\n\n{}\nRan 1 tests: 0 success, 0 errors, 1 failures, 0 skipped\n",
            "A.test_usage",
            "-".repeat(70)
        );
        assert_eq!(console.contents(), want);
    }

    #[test]
    fn printed_quiet_and_silent() {
        let console = Console::buffer();
        let t = info("A.t", None);
        let mut quiet = Printed::default();
        quiet.start_run(&console);
        quiet.start_test(&console, &t);
        quiet.add_outcome(&console, &t, Outcome::Success, None);
        quiet.stop_run(&console, &RunSummary::default());
        assert_eq!(console.contents(), "Running tests\n\n");

        let console = Console::buffer();
        let mut silent = Printed {
            verbose: false,
            silent: true,
        };
        silent.start_run(&console);
        assert_eq!(console.contents(), "");
    }

    #[test]
    fn explain_banner_and_doc() {
        let console = Console::buffer();
        let mut r = ExplainReporter::default();
        let t = info("A.test_usage", Some("Check the usage message."));
        r.start_run(&console);
        r.start_test(&console, &t);
        r.stop_test(&console, &t);
        r.stop_run(&console, &RunSummary::default());
        let out = console.contents();
        assert!(out.starts_with("Showing explanation for tests\nNOTE: THIS IS AN EXPLANATION ONLY. NO TESTS ARE RUN.\n"));
        assert!(out.contains("==> A.test_usage:\nAbout the test:\nCheck the usage message.\nWhat the test runs and checks:\n"));
        assert!(out.ends_with("Explained 1 tests.\nNOTE: THIS IS AN EXPLANATION ONLY. NO TESTS WERE RUN.\n"));
    }

    #[test]
    fn update_headers() {
        let console = Console::buffer();
        let mut r = UpdateReporter;
        let t = info("A.test_usage", None);
        r.start_run(&console);
        r.start_test(&console, &t);
        r.stop_test(&console, &t);
        assert_eq!(console.contents(), "Updating tests\n\n==> A.test_usage:\n\n");
    }
}
