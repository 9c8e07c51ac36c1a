use std::{
    any::Any,
    collections::BTreeMap,
    future::Future,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures::FutureExt as _;

use crate::{
    diff,
    error::{anyhow, CaseError, CaseResult},
    options::{Mode, Options},
    process::{self, ManagedProcess, ProcessMode, SpawnSpec, Stream},
    result::TestResult,
    signal::describe_signal,
    style::{safe_repr, Console},
    suite::{ClassRunner, ClassState, TestInfo},
};

/// Handle to a process started by the current test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proc(usize);

impl Proc {
    pub fn index(self) -> usize {
        self.0
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

async fn guarded<F: Future<Output = CaseResult>>(fut: F) -> CaseResult {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => Err(CaseError::Error(anyhow!(
            "panicked: {}",
            panic_message(&*panic)
        ))),
    }
}

/// One test's processes, details and assertions.
///
/// Every assertion returns `Err(CaseError::Failure(..))` when its expectation is
/// not met, so a test body reads as a chain of `?`.
pub struct TestCase {
    info: Arc<TestInfo>,
    options: Arc<Options>,
    console: Console,
    timeout: Option<Duration>,
    processes: Vec<ManagedProcess>,
    details: BTreeMap<String, serde_json::Value>,
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.info.id)
            .field("timeout", &self.timeout)
            .field("processes", &self.processes)
            .finish()
    }
}

impl TestCase {
    pub fn new(
        info: Arc<TestInfo>,
        options: Arc<Options>,
        console: Console,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            info,
            options,
            console,
            timeout,
            processes: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &TestInfo {
        &self.info
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Value of a custom `-o name=value` option.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.option(name)
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn mode(&self) -> Mode {
        self.options.mode
    }

    /// Resolves a test-relative path against the scratch directory.
    pub fn path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.options.resolve(path)
    }

    pub fn details(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.details
    }

    /// Starts `argv` with the class timeout and a piped stdin.
    pub fn process<I>(&mut self, argv: I) -> CaseResult<Proc>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.spawn(argv, None, None)
    }

    /// Starts `argv` reading its stdin from `input`.
    pub fn process_with_input<I>(&mut self, argv: I, input: impl AsRef<Path>) -> CaseResult<Proc>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.spawn(argv, Some(input.as_ref()), None)
    }

    /// Starts `argv`. `timeout` overrides the class timeout.
    pub fn spawn<I>(
        &mut self,
        argv: I,
        stdin_file: Option<&Path>,
        timeout: Option<Duration>,
    ) -> CaseResult<Proc>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let index = self.processes.len();
        let mode = if self.options.is_explain() {
            ProcessMode::Explain
        } else {
            match timeout.or(self.timeout) {
                Some(t) => ProcessMode::TimeoutBound(t),
                None => ProcessMode::Normal,
            }
        };
        let spec = SpawnSpec {
            index,
            argv: argv.into_iter().map(Into::into).collect(),
            stdin_file: stdin_file.map(Path::to_owned),
            mode,
            cwd: self.options.scratch_dir().to_owned(),
            output_prefix: self.info.id.clone(),
        };
        let proc = ManagedProcess::spawn(spec, self.console.clone())?;
        self.processes.push(proc);
        Ok(Proc(index))
    }

    pub fn process_ref(&self, p: Proc) -> &ManagedProcess {
        &self.processes[p.0]
    }

    pub fn process_mut(&mut self, p: Proc) -> &mut ManagedProcess {
        &mut self.processes[p.0]
    }

    pub async fn send(&mut self, p: Proc, data: impl AsRef<[u8]>) -> CaseResult {
        Ok(self.process_mut(p).send(data).await?)
    }

    pub fn finish_input(&mut self, p: Proc) {
        self.process_mut(p).finish_input();
    }

    pub fn kill(&mut self, p: Proc) {
        self.process_mut(p).kill();
    }

    pub fn send_signal(&mut self, p: Proc, sig: i32) -> CaseResult {
        Ok(self.process_mut(p).send_signal(sig)?)
    }

    pub fn send_signal_group(&mut self, p: Proc, sig: i32) -> CaseResult {
        Ok(self.process_mut(p).send_signal_group(sig)?)
    }

    pub async fn child_pids(&mut self, p: Proc) -> Vec<libc::pid_t> {
        self.process_ref(p).child_pids().await
    }

    /// Sends `sig` to an arbitrary process, e.g. one found with [`TestCase::child_pids`].
    pub fn signal_process(&mut self, pid: libc::pid_t, sig: i32) -> CaseResult {
        if self.options.is_explain() {
            self.console.println(self.console.bold(&format!(
                "Send signal {} to a process (determined at runtime)",
                describe_signal(sig)
            )));
            return Ok(());
        }
        match process::signal_pid(pid, sig) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::debug!("kill({}, {}): {}", pid, sig, e);
                self.fail(format!("Failed to send signal {} process {}", sig, pid))
            }
        }
    }

    /// Pauses the test; skipped when explaining.
    pub async fn delay(&self, secs: f64) {
        if !self.options.is_explain() && secs > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }
    }

    /// Records an annotation merged into the run's details.
    pub fn add_detail(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.details.insert(name.into(), value.into());
    }

    /// Fails immediately, except when updating fixtures.
    pub fn fail(&self, msg: impl Into<String>) -> CaseResult {
        if self.options.is_update() {
            return Ok(());
        }
        Err(CaseError::failure(msg))
    }

    pub async fn assert_stdout(&mut self, p: Proc, text: &str) -> CaseResult {
        self.assert_output(p, Stream::Stdout, text).await
    }

    pub async fn assert_stderr(&mut self, p: Proc, text: &str) -> CaseResult {
        self.assert_output(p, Stream::Stderr, text).await
    }

    pub async fn assert_stdout_matches_file(&mut self, p: Proc, path: impl AsRef<Path>) -> CaseResult {
        self.assert_output_matches_file(p, Stream::Stdout, path.as_ref())
            .await
    }

    pub async fn assert_stderr_matches_file(&mut self, p: Proc, path: impl AsRef<Path>) -> CaseResult {
        self.assert_output_matches_file(p, Stream::Stderr, path.as_ref())
            .await
    }

    /// Expects the next output on `stream` to be exactly `text`; empty `text` expects end of file.
    pub async fn assert_output(&mut self, p: Proc, stream: Stream, text: &str) -> CaseResult {
        match self.options.mode {
            Mode::Explain => {
                if text.is_empty() {
                    self.console.println(self.console.bold(&format!(
                        "Expect end of file (Process {} [{}])",
                        p.0, stream
                    )));
                } else {
                    self.console.println(format!(
                        "{}{}",
                        self.console.bold(&format!(
                            "Expect output (Process {} [{}]): ",
                            p.0, stream
                        )),
                        safe_repr(text)
                    ));
                }
                Ok(())
            }
            Mode::Update => {
                self.console
                    .println(format!("\tCheck assert_{}({})", stream, safe_repr(text)));
                Ok(())
            }
            Mode::Normal | Mode::Save => {
                if self.process_mut(p).expect_line(stream, text).await {
                    Ok(())
                } else {
                    self.mismatch(p, format!("{} mismatch", stream), true)
                }
            }
        }
    }

    /// Expects the rest of `stream` to equal the fixture at `path`.
    pub async fn assert_output_matches_file(&mut self, p: Proc, stream: Stream, path: &Path) -> CaseResult {
        let outfile = self.process_ref(p).output_filename(stream);
        if self.options.is_explain() {
            self.console.println(self.console.bold(&format!(
                "Compare {} from Process {}:",
                stream, p.0
            )));
            self.console
                .println(format!("\tdiff {} {}", outfile, path.display()));
            return Ok(());
        }

        let fixture = self.path(path);
        let saved = self.path(&outfile);
        let mode = self.options.mode;
        if matches!(mode, Mode::Update | Mode::Save) {
            let target = if mode == Mode::Update { &fixture } else { &saved };
            let captured = self.process_mut(p).read_rest(stream).await;
            fsutil::write_with_mkdir(target, captured)?;
        }
        if mode == Mode::Update {
            let name = match stream {
                Stream::Stdout => "output",
                Stream::Stderr => "error",
            };
            self.console.println(format!(
                "\tstandard {} file updated: {}",
                name,
                path.display()
            ));
            return Ok(());
        }

        let msg = format!("{} mismatch", stream);
        let problem = if mode == Mode::Save {
            compare_files(&saved, &fixture, msg, self.options.show_diff)?
        } else if self.options.show_diff {
            self.verbose_compare(p, stream, &fixture, &outfile, msg)
                .await?
        } else if self.process_mut(p).expect_file(stream, &fixture).await? {
            None
        } else {
            Some(msg)
        };
        match problem {
            Some(msg) => self.mismatch(p, msg, true),
            None => Ok(()),
        }
    }

    /// Reads the stream and the fixture line by line and stops at the first difference.
    async fn verbose_compare(
        &mut self,
        p: Proc,
        stream: Stream,
        fixture: &Path,
        stream_name: &str,
        msg: String,
    ) -> CaseResult<Option<String>> {
        if !fixture.exists() {
            return Ok(Some(format!("file missing: {}", fixture.display())));
        }
        let expected = fsutil::read(fixture)?;
        let mut expected_lines = expected.split_inclusive(|&b| b == b'\n');
        let mut got_history = Vec::new();
        let mut want_history = Vec::new();
        let proc = self.process_mut(p);
        loop {
            let got = proc.read_line(stream).await;
            let want = expected_lines.next().unwrap_or_default();
            if !got.is_empty() {
                got_history.push(String::from_utf8_lossy(&got).into_owned());
            }
            if !want.is_empty() {
                want_history.push(String::from_utf8_lossy(want).into_owned());
            }
            if got != want {
                let diff = diff::unified_diff(
                    &got_history,
                    &want_history,
                    stream_name,
                    &fixture.display().to_string(),
                );
                return Ok(Some(format!(
                    "{}\nDiff leading to failure [truncated]:\n{}",
                    msg, diff
                )));
            }
            if want.is_empty() {
                return Ok(None);
            }
        }
    }

    pub async fn assert_exit_status(&mut self, p: Proc, status: i32) -> CaseResult {
        if self.options.is_explain() {
            self.console.println(format!(
                "{}{}",
                self.console
                    .bold(&format!("Expect exit status (Process {}): ", p.0)),
                status
            ));
            return Ok(());
        }
        let got = self.process_mut(p).wait_exit_status().await?;
        if got == status {
            return Ok(());
        }
        self.mismatch(
            p,
            format!("exit status mismatch: expected {}, got {}", status, got),
            true,
        )
    }

    /// Expects the process to be terminated by any signal.
    pub async fn assert_signalled(&mut self, p: Proc) -> CaseResult {
        if self.options.is_explain() {
            self.console.println(self.console.bold(&format!(
                "Expect Process {} to receive signal",
                p.0
            )));
            return Ok(());
        }
        let termination = self.process_mut(p).wait().await?;
        if termination.signal().is_some() {
            return Ok(());
        }
        self.mismatch(p, "program did not receive signal".to_owned(), false)
    }

    /// Expects the process to be terminated by `sig`.
    pub async fn assert_signal(&mut self, p: Proc, sig: i32) -> CaseResult {
        if self.options.is_explain() {
            self.console.println(format!(
                "{}{}",
                self.console
                    .bold(&format!("Expect signal (Process {}): ", p.0)),
                describe_signal(sig)
            ));
            return Ok(());
        }
        let termination = self.process_mut(p).wait().await?;
        match termination.signal() {
            Some(got) if got == sig => Ok(()),
            got => {
                let got = got.map_or_else(|| "none".to_owned(), describe_signal);
                self.mismatch(
                    p,
                    format!(
                        "signal mismatch: expected {}, got {}",
                        describe_signal(sig),
                        got
                    ),
                    false,
                )
            }
        }
    }

    pub async fn assert_files_equal(&mut self, file1: impl AsRef<Path>, file2: impl AsRef<Path>) -> CaseResult {
        let (file1, file2) = (file1.as_ref(), file2.as_ref());
        if self.options.is_explain() {
            self.console
                .println(self.console.bold("Check files are the same:"));
            self.console.println(format!(
                "\tdiff {} {}",
                file1.display(),
                file2.display()
            ));
            return Ok(());
        }
        let msg = "file mismatch: contents do not exactly match".to_owned();
        match compare_files(&self.path(file1), &self.path(file2), msg, self.options.show_diff)? {
            Some(msg) => self.fail(msg),
            None => Ok(()),
        }
    }

    /// Turns a failed expectation into a failure, noting timeouts and stray signals.
    fn mismatch(&mut self, p: Proc, mut msg: String, check_signal: bool) -> CaseResult {
        if self.options.is_update() {
            return Ok(());
        }
        let proc = self.process_mut(p);
        if check_signal && !proc.killed_by_harness() {
            if let Some(sig) = proc.poll_signal() {
                msg.push_str(&format!(
                    "\nProcess received unexpected signal: {}",
                    describe_signal(sig)
                ));
            }
        }
        if proc.timed_out() {
            msg = "Timeout occurred".to_owned();
        }
        proc.kill();
        Err(CaseError::Failure(msg))
    }

    fn cleanup_processes(&mut self) {
        if !self.options.is_explain() {
            for proc in &mut self.processes {
                proc.kill();
            }
        }
        self.processes.clear();
    }

    /// Runs setup, body and teardown and reports the outcome.
    /// The first problem decides the outcome; later ones are listed as extra entries.
    pub(crate) async fn run(
        &mut self,
        class: &dyn ClassRunner,
        state: &ClassState,
        method: usize,
        result: &mut TestResult,
    ) {
        let info = self.info.clone();
        let ignored = info.ignore_result;
        if !ignored {
            result.start_test(&info);
        }

        let mut problems = Vec::new();
        match guarded(class.setup(state, self)).await {
            Err(e) => problems.push(e),
            Ok(()) => {
                if let Err(e) = guarded(class.body(state, method, self)).await {
                    problems.push(e);
                }
                if let Err(e) = guarded(class.tear_down(state, self)).await {
                    problems.push(e);
                }
            }
        }
        self.cleanup_processes();
        result.update_details(std::mem::take(&mut self.details));

        if ignored {
            for problem in &problems {
                log::info!("Ignored test {}: {}", info.id, problem.message());
            }
            return;
        }
        if problems.is_empty() {
            result.add_success(&info);
        }
        for problem in &problems {
            if problem.is_failure() {
                result.add_failure(&info, &problem.message());
            } else {
                result.add_error(&info, &problem.message());
            }
        }
        result.stop_test(&info);
    }
}

/// `None` when both files hold the same bytes, otherwise the failure message.
fn compare_files(file1: &Path, file2: &Path, msg: String, show_diff: bool) -> CaseResult<Option<String>> {
    for file in [file1, file2] {
        if !file.exists() {
            return Ok(Some(format!("file missing: {}", file.display())));
        }
    }
    if fsutil::same_contents(file1, file2)? {
        return Ok(None);
    }
    if !show_diff {
        return Ok(Some(msg));
    }
    let (a, b) = (fsutil::read(file1)?, fsutil::read(file2)?);
    let (a, b) = (String::from_utf8_lossy(&a), String::from_utf8_lossy(&b));
    let diff = diff::unified_diff(
        &diff::split_lines(&a),
        &diff::split_lines(&b),
        &file1.display().to_string(),
        &file2.display().to_string(),
    );
    Ok(Some(format!("{}\nDiff leading to failure:\n{}", msg, diff)))
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    fn case_in(dir: &Path, mode: Mode, timeout: Option<Duration>) -> TestCase {
        let mut opts = Options::new(dir).mode(mode);
        opts.temp_dir = Some(dir.to_owned());
        let info = TestInfo {
            id: "ass.Tests.test_x".to_owned(),
            module: "ass".to_owned(),
            class: "Tests".to_owned(),
            method: "test_x".to_owned(),
            doc: None,
            marks: None,
            ignore_result: false,
        };
        TestCase::new(Arc::new(info), Arc::new(opts), Console::buffer(), timeout)
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()]
    }

    fn failure(res: CaseResult) -> String {
        match res {
            Err(CaseError::Failure(msg)) => msg,
            other => panic!("expected a failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn literal_output_and_exit_status() {
        let dir = TempDir::new().unwrap();
        let mut t = case_in(dir.path(), Mode::Normal, None);
        let p = t.process(sh("printf 'hello\\nworld\\n'; exit 3")).unwrap();
        t.assert_stdout(p, "hello\n").await.unwrap();
        t.assert_stdout(p, "world\n").await.unwrap();
        t.assert_stdout(p, "").await.unwrap();
        t.assert_exit_status(p, 3).await.unwrap();

        let p = t.process(sh("echo nope")).unwrap();
        assert_eq!(p.index(), 1);
        assert_eq!(failure(t.assert_stdout(p, "yes\n").await), "stdout mismatch");
        let p = t.process(sh("exit 1")).unwrap();
        assert_eq!(
            failure(t.assert_exit_status(p, 0).await),
            "exit status mismatch: expected 0, got 1"
        );
    }

    #[tokio::test]
    async fn fixture_comparison() {
        let dir = TempDir::new().unwrap();
        fsutil::write_with_mkdir(dir.path().join("tests/usage.out"), "Usage: prog file\n").unwrap();
        let mut t = case_in(dir.path(), Mode::Normal, None);

        let p = t.process(sh("echo 'Usage: prog file'")).unwrap();
        t.assert_stdout_matches_file(p, "tests/usage.out").await.unwrap();

        let p = t.process(sh("echo 'Usage: prog'")).unwrap();
        let msg = failure(t.assert_stdout_matches_file(p, "tests/usage.out").await);
        assert!(msg.contains("stdout mismatch"), "{}", msg);

        let p = t.process(sh("echo 'Usage: prog file' >&2")).unwrap();
        t.assert_stderr_matches_file(p, "tests/usage.out").await.unwrap();
    }

    #[tokio::test]
    async fn show_diff_carries_unified_diff() {
        let dir = TempDir::new().unwrap();
        fsutil::write_with_mkdir(dir.path().join("want.out"), "a\nb\nc\n").unwrap();
        let mut opts = Options::new(dir.path());
        opts.show_diff = true;
        let mut t = case_in(dir.path(), Mode::Normal, None);
        t.options = Arc::new(opts);

        let p = t.process(sh("printf 'a\\nB\\nc\\n'")).unwrap();
        let msg = dbg!(failure(t.assert_stdout_matches_file(p, "want.out").await));
        assert!(msg.starts_with("stdout mismatch\nDiff leading to failure [truncated]:\n"));
        assert!(msg.contains("-B\n"));
        assert!(msg.contains("+b\n"));

        let p = t.process(sh("true")).unwrap();
        let msg = failure(t.assert_stdout_matches_file(p, "missing.out").await);
        assert!(msg.starts_with("file missing: "), "{}", msg);
    }

    #[tokio::test]
    async fn timeout_turns_into_timeout_message() {
        let dir = TempDir::new().unwrap();
        let mut t = case_in(dir.path(), Mode::Normal, Some(Duration::from_millis(200)));
        let p = t.process(sh("sleep 5; echo late")).unwrap();
        assert_eq!(failure(t.assert_stdout(p, "late\n").await), "Timeout occurred");
        assert!(t.process_ref(p).timed_out());
    }

    #[tokio::test]
    async fn unexpected_signal_is_noted() {
        let dir = TempDir::new().unwrap();
        let mut t = case_in(dir.path(), Mode::Normal, None);
        let p = t.process(sh("kill -SEGV $$")).unwrap();
        let msg = failure(t.assert_exit_status(p, 0).await);
        assert_eq!(
            msg,
            "exit status mismatch: expected 0, got -11\nProcess received unexpected signal: SIGSEGV (11)"
        );

        let p = t.process(sh("kill -TERM $$")).unwrap();
        t.assert_signal(p, libc::SIGTERM).await.unwrap();
        let p = t.process(sh("kill -TERM $$")).unwrap();
        assert_eq!(
            failure(t.assert_signal(p, libc::SIGINT).await),
            "signal mismatch: expected SIGINT (2), got SIGTERM (15)"
        );
        let p = t.process(sh("exit 0")).unwrap();
        assert_eq!(
            failure(t.assert_signalled(p).await),
            "program did not receive signal"
        );
    }

    #[tokio::test]
    async fn children_are_signalled_by_pid() {
        let dir = TempDir::new().unwrap();
        let mut t = case_in(dir.path(), Mode::Normal, Some(Duration::from_secs(5)));
        let p = t
            .process(sh("sleep 5 & echo started; wait $!; echo \"child $?\""))
            .unwrap();
        t.assert_stdout(p, "started\n").await.unwrap();
        let pids = t.child_pids(p).await;
        assert_eq!(pids.len(), 1, "{:?}", pids);
        assert_ne!(Some(pids[0]), t.process_ref(p).pid());
        t.signal_process(pids[0], libc::SIGTERM).unwrap();
        t.assert_stdout(p, "child 143\n").await.unwrap();
        t.assert_exit_status(p, 0).await.unwrap();
    }

    #[tokio::test]
    async fn update_rewrites_fixture_and_never_fails() {
        let dir = TempDir::new().unwrap();
        let mut t = case_in(dir.path(), Mode::Update, None);
        let p = t.process(sh("echo fresh; echo oops >&2; exit 4")).unwrap();
        t.assert_stdout_matches_file(p, "tests/fresh.out").await.unwrap();
        t.assert_stderr(p, "something else\n").await.unwrap();
        t.assert_exit_status(p, 0).await.unwrap();
        t.fail("never").unwrap();

        assert_eq!(
            fsutil::read_to_string(dir.path().join("tests/fresh.out")).unwrap(),
            "fresh\n"
        );
        let out = t.console().contents();
        assert!(out.contains("\tstandard output file updated: tests/fresh.out\n"));
        assert!(out.contains("\tCheck assert_stderr(\"something else\\n\")\n"));
    }

    #[tokio::test]
    async fn save_mode_keeps_captured_output() {
        let dir = TempDir::new().unwrap();
        fsutil::write(dir.path().join("want.out"), "saved\n").unwrap();
        let mut t = case_in(dir.path(), Mode::Save, None);
        let p = t.process(sh("echo saved")).unwrap();
        t.assert_stdout_matches_file(p, "want.out").await.unwrap();
        assert_eq!(
            fsutil::read_to_string(dir.path().join("ass.Tests.test_x.0.out")).unwrap(),
            "saved\n"
        );
    }

    #[tokio::test]
    async fn explain_prints_instead_of_running() {
        let dir = TempDir::new().unwrap();
        let mut t = case_in(dir.path(), Mode::Explain, None);
        let p = t
            .process_with_input(["./prog", "a b", ""], "tests/in.txt")
            .unwrap();
        t.send(p, "move 1\n").await.unwrap();
        t.finish_input(p);
        t.assert_stdout_matches_file(p, "tests/usage.out").await.unwrap();
        t.assert_stdout(p, "").await.unwrap();
        t.assert_exit_status(p, 1).await.unwrap();
        t.assert_files_equal("a.txt", "b.txt").await.unwrap();
        t.delay(30.0).await;
        assert_eq!(t.process_ref(p).pid(), None);

        let want = "\
Start Process 0:
\t./prog \"a b\" \"\" < tests/in.txt > ass.Tests.test_x.0.out 2> ass.Tests.test_x.0.err
Send input to Process 0: \"move 1\\n\"
Finish input to Process 0 (ie. Ctrl+D)
Compare stdout from Process 0:
\tdiff ass.Tests.test_x.0.out tests/usage.out
Expect end of file (Process 0 [stdout])
Expect exit status (Process 0): 1
Check files are the same:
\tdiff a.txt b.txt
";
        assert_eq!(t.console().contents(), want);
    }

    #[tokio::test]
    async fn files_equal_and_missing() {
        let dir = TempDir::new().unwrap();
        fsutil::write(dir.path().join("a"), "x\n").unwrap();
        fsutil::write(dir.path().join("b"), "x\n").unwrap();
        fsutil::write(dir.path().join("c"), "y\n").unwrap();
        let mut t = case_in(dir.path(), Mode::Normal, None);
        t.assert_files_equal("a", "b").await.unwrap();
        assert_eq!(
            failure(t.assert_files_equal("a", "c").await),
            "file mismatch: contents do not exactly match"
        );
        let msg = failure(t.assert_files_equal("a", "nope").await);
        assert!(msg.starts_with("file missing: ") && msg.ends_with("nope"));
    }

    #[test]
    fn panic_messages() {
        let p: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*p), "boom");
        let p: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*p), "bang");
    }
}
