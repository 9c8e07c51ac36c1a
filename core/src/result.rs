use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    marks::{CategoryReport, MarkScheme, MarkSheet, Totals},
    options::Options,
    report::{Reporter, RunSummary},
    style::Console,
    suite::TestInfo,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Success,
    /// An assertion was not met.
    Failure,
    /// Unexpected error or panic in setup, body or teardown.
    Error,
    /// Not run because its module or class setup failed.
    Skipped,
}

impl Outcome {
    pub fn passed(self) -> bool {
        self == Outcome::Success
    }
}

/// One entry in the failure, error or skip listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub test: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultLists {
    pub failures: Vec<String>,
    pub errors: Vec<String>,
    pub successes: Vec<String>,
    #[serde(default)]
    pub skipped: Vec<String>,
}

/// Serializable snapshot of a finished run; the content of `results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub tests: BTreeMap<String, Outcome>,
    pub results: ResultLists,
    pub marks: BTreeMap<String, CategoryReport>,
    pub totals: Totals,
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Setup {
    Module(String),
    Class(String),
}

/// Accumulates outcomes of a run and forwards them to a [`Reporter`].
pub struct TestResult {
    options: Arc<Options>,
    console: Console,
    reporter: Box<dyn Reporter>,
    failures: Vec<Problem>,
    errors: Vec<Problem>,
    successes: Vec<String>,
    skipped: Vec<Problem>,
    outcomes: BTreeMap<String, Outcome>,
    details: BTreeMap<String, serde_json::Value>,
    setups: Vec<(Setup, bool)>,
    tests_run: usize,
    interrupted: bool,
    sheet: MarkSheet,
    marks: Option<(BTreeMap<String, CategoryReport>, Totals)>,
}

impl std::fmt::Debug for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<TestResult run={} successes={} errors={} failures={} skipped={}>",
            self.tests_run,
            self.successes.len(),
            self.errors.len(),
            self.failures.len(),
            self.skipped.len()
        )
    }
}

impl TestResult {
    pub fn new(
        options: Arc<Options>,
        scheme: MarkScheme,
        reporter: Box<dyn Reporter>,
        console: Console,
    ) -> Self {
        Self {
            options,
            console,
            reporter,
            failures: Vec::new(),
            errors: Vec::new(),
            successes: Vec::new(),
            skipped: Vec::new(),
            outcomes: BTreeMap::new(),
            details: BTreeMap::new(),
            setups: Vec::new(),
            tests_run: 0,
            interrupted: false,
            sheet: MarkSheet::new(scheme),
            marks: None,
        }
    }

    pub fn options(&self) -> &Arc<Options> {
        &self.options
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn start_run(&mut self) {
        self.reporter.start_run(&self.console);
    }

    /// Computes the marks and prints the closing summary.
    pub fn stop_run(&mut self) {
        self.marks = Some(self.sheet.report());
        let summary = self.summary();
        self.reporter.stop_run(&self.console, &summary);
    }

    pub fn start_test(&mut self, info: &TestInfo) {
        self.tests_run += 1;
        self.reporter.start_test(&self.console, info);
    }

    pub fn stop_test(&mut self, info: &TestInfo) {
        self.reporter.stop_test(&self.console, info);
    }

    /// The first outcome for a test decides it; later ones only land in the listings.
    fn decide(&mut self, info: &TestInfo, outcome: Outcome, message: Option<&str>) -> bool {
        if self.outcomes.contains_key(&info.id) {
            self.reporter
                .add_extra(&self.console, info, outcome, message.unwrap_or_default());
            return false;
        }
        self.outcomes.insert(info.id.clone(), outcome);
        self.sheet.record(&info.id, outcome);
        self.reporter.add_outcome(&self.console, info, outcome, message);
        true
    }

    pub fn add_success(&mut self, info: &TestInfo) {
        if self.decide(info, Outcome::Success, None) {
            self.successes.push(info.id.clone());
        }
    }

    pub fn add_failure(&mut self, info: &TestInfo, message: &str) {
        self.decide(info, Outcome::Failure, Some(message));
        self.failures.push(Problem {
            test: info.id.clone(),
            message: message.to_owned(),
        });
    }

    pub fn add_error(&mut self, info: &TestInfo, message: &str) {
        self.decide(info, Outcome::Error, Some(message));
        self.errors.push(Problem {
            test: info.id.clone(),
            message: message.to_owned(),
        });
    }

    pub fn add_skip(&mut self, info: &TestInfo, reason: &str) {
        if self.decide(info, Outcome::Skipped, Some(reason)) {
            self.skipped.push(Problem {
                test: info.id.clone(),
                message: reason.to_owned(),
            });
        }
    }

    pub fn add_detail(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.details.insert(name.into(), value);
    }

    pub fn update_details(&mut self, details: BTreeMap<String, serde_json::Value>) {
        self.details.extend(details);
    }

    pub fn add_module_setup(&mut self, module: &str, success: bool) {
        self.setups.push((Setup::Module(module.to_owned()), success));
    }

    pub fn module_setup_run(&self, module: &str) -> bool {
        self.setup_state(&Setup::Module(module.to_owned())).is_some()
    }

    pub fn module_setup_failed(&self, module: &str) -> bool {
        self.setup_state(&Setup::Module(module.to_owned())) == Some(false)
    }

    pub fn add_class_setup(&mut self, class: &str, success: bool) {
        self.setups.push((Setup::Class(class.to_owned()), success));
    }

    pub fn class_setup_run(&self, class: &str) -> bool {
        self.setup_state(&Setup::Class(class.to_owned())).is_some()
    }

    pub fn class_setup_failed(&self, class: &str) -> bool {
        self.setup_state(&Setup::Class(class.to_owned())) == Some(false)
    }

    fn setup_state(&self, key: &Setup) -> Option<bool> {
        self.setups
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, success)| *success)
    }

    /// Modules whose setup was attempted, in the order they were first touched.
    pub fn touched_modules(&self) -> Vec<&str> {
        self.setups
            .iter()
            .filter_map(|(k, _)| match k {
                Setup::Module(name) => Some(name.as_str()),
                Setup::Class(_) => None,
            })
            .collect()
    }

    /// Classes whose setup was attempted, in the order they were first touched.
    pub fn touched_classes(&self) -> Vec<&str> {
        self.setups
            .iter()
            .filter_map(|(k, _)| match k {
                Setup::Class(name) => Some(name.as_str()),
                Setup::Module(_) => None,
            })
            .collect()
    }

    pub fn set_interrupted(&mut self) {
        self.interrupted = true;
    }

    /// Whether the operator cancelled the run.
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    pub fn outcome(&self, test_id: &str) -> Option<Outcome> {
        self.outcomes.get(test_id).copied()
    }

    pub fn outcomes(&self) -> &BTreeMap<String, Outcome> {
        &self.outcomes
    }

    pub fn failures(&self) -> &[Problem] {
        &self.failures
    }

    pub fn errors(&self) -> &[Problem] {
        &self.errors
    }

    pub fn successes(&self) -> &[String] {
        &self.successes
    }

    pub fn skipped(&self) -> &[Problem] {
        &self.skipped
    }

    pub fn details(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.details
    }

    /// True when every recorded test passed.
    pub fn was_successful(&self) -> bool {
        self.outcomes.values().all(|o| o.passed())
    }

    pub fn summary(&self) -> RunSummary {
        let count = |outcome| self.outcomes.values().filter(|&&o| o == outcome).count();
        RunSummary {
            tests_run: self.tests_run,
            successes: count(Outcome::Success),
            errors: count(Outcome::Error),
            failures: count(Outcome::Failure),
            skipped: count(Outcome::Skipped),
        }
    }

    /// Per-category marks and totals; computed at the end of the run.
    pub fn marks(&self) -> (BTreeMap<String, CategoryReport>, Totals) {
        match &self.marks {
            Some(marks) => marks.clone(),
            None => self.sheet.report(),
        }
    }

    pub fn export(&self) -> ResultDocument {
        let (marks, totals) = self.marks();
        let ids = |problems: &[Problem]| -> Vec<String> {
            problems.iter().map(|p| p.test.clone()).collect()
        };
        ResultDocument {
            tests: self.outcomes.clone(),
            results: ResultLists {
                failures: ids(&self.failures),
                errors: ids(&self.errors),
                successes: self.successes.clone(),
                skipped: ids(&self.skipped),
            },
            marks,
            totals,
            details: self.details.clone(),
            submission: self.options.submission.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{marks::Marks, report::Silent};
    use maplit::btreemap;

    fn info(id: &str, marks: Option<Marks>) -> TestInfo {
        TestInfo {
            id: id.to_owned(),
            module: String::new(),
            class: "T".to_owned(),
            method: id.trim_start_matches("T.").to_owned(),
            doc: None,
            marks,
            ignore_result: false,
        }
    }

    fn result_for(infos: &[TestInfo]) -> TestResult {
        let scheme =
            MarkScheme::from_tests(infos.iter().map(|i| (i.id.as_str(), i.marks.as_ref())))
                .unwrap();
        let mut opts = Options::new("/w");
        opts.submission = Some("s1".to_owned());
        TestResult::new(
            Arc::new(opts),
            scheme,
            Box::new(Silent),
            Console::buffer(),
        )
    }

    #[test]
    fn first_problem_decides_outcome() {
        let a = info("T.a", Some(Marks::pool("c", 2.0)));
        let b = info("T.b", Some(Marks::pool("c", 2.0)));
        let mut r = result_for(&[a.clone(), b.clone()]);
        r.start_run();
        r.start_test(&a);
        r.add_failure(&a, "stdout mismatch");
        r.add_error(&a, "teardown blew up");
        r.stop_test(&a);
        r.start_test(&b);
        r.add_success(&b);
        r.stop_test(&b);
        r.stop_run();

        assert_eq!(r.outcome("T.a"), Some(Outcome::Failure));
        assert_eq!(r.failures().len(), 1);
        assert_eq!(r.errors().len(), 1);
        assert_eq!(r.errors()[0].message, "teardown blew up");

        let summary = r.summary();
        assert_eq!(summary.tests_run, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.successes, 1);

        let (marks, totals) = r.marks();
        assert_eq!(marks["c"].tests.len(), 2);
        assert_eq!(marks["c"].mark, 1.0);
        assert_eq!(totals.test_count, 2);
        assert!(!r.was_successful());
    }

    #[test]
    fn setup_tracking_keeps_touch_order() {
        let mut r = result_for(&[]);
        r.add_module_setup("m2", true);
        r.add_class_setup("m2.B", false);
        r.add_module_setup("m1", false);
        r.add_class_setup("m2.A", true);

        assert!(r.module_setup_run("m1"));
        assert!(r.module_setup_failed("m1"));
        assert!(!r.module_setup_failed("m2"));
        assert!(!r.module_setup_run("m3"));
        assert!(!r.module_setup_failed("m3"));
        assert!(r.class_setup_failed("m2.B"));
        assert!(!r.class_setup_failed("m2.A"));
        assert_eq!(r.touched_modules(), vec!["m2", "m1"]);
        assert_eq!(r.touched_classes(), vec!["m2.B", "m2.A"]);
    }

    #[test]
    fn export_document_shape() {
        let a = info("T.a", Some(Marks::per_test("play", 1.5)));
        let b = info("T.b", Some(Marks::per_test("play", 1.0)));
        let c = info("T.c", None);
        let mut r = result_for(&[a.clone(), b.clone(), c.clone()]);
        r.start_run();
        for t in [&a, &b, &c] {
            r.start_test(t);
        }
        r.add_success(&a);
        r.add_error(&b, "boom");
        r.add_skip(&c, "class setup failed");
        r.update_details(btreemap! { "lines".to_owned() => serde_json::json!(42) });
        r.stop_run();

        let doc = r.export();
        assert_eq!(
            doc.tests,
            btreemap! {
                "T.a".to_owned() => Outcome::Success,
                "T.b".to_owned() => Outcome::Error,
                "T.c".to_owned() => Outcome::Skipped,
            }
        );
        assert_eq!(doc.results.successes, vec!["T.a"]);
        assert_eq!(doc.results.errors, vec!["T.b"]);
        assert_eq!(doc.results.skipped, vec!["T.c"]);
        assert_eq!(doc.totals.received_marks, 1.5);
        assert_eq!(doc.totals.total_marks, 2.5);
        assert_eq!(doc.totals.test_count, 3);
        assert_eq!(doc.submission.as_deref(), Some("s1"));

        let json = dbg!(serde_json::to_value(&doc)).unwrap();
        assert_eq!(json["tests"]["T.b"], "error");
        assert_eq!(json["details"]["lines"], 42);
        assert_eq!(json["marks"]["play"]["passed"], 1);
        let back: ResultDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }
}
