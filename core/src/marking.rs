use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::{
    process::{Child, Command},
    sync::Semaphore,
    task::JoinSet,
};

use crate::{
    config::MarkingConfig,
    error::Result,
    interrupt::Interrupt,
    options::{CleanupPolicy, Options},
    process,
    result::ResultDocument,
    runner::Runner,
    style::Console,
    suite::TestSuite,
};

fn submission_name(dir: &Path) -> String {
    dir.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

async fn compile(dir: &Path, shell: &Path, cmd: &str) -> Result<()> {
    log::info!("Compiling in {}: {}", dir.display(), cmd);
    let status = Command::new(shell)
        .arg("-c")
        .arg(cmd)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("Failed to run compile command `{}`", cmd))?;
    if !status.success() {
        log::warn!(
            "Compile command `{}` failed in {} ({})",
            cmd,
            dir.display(),
            status
        );
    }
    Ok(())
}

/// Marks the submission in `dir` and writes its results file there.
pub async fn mark_submission(
    dir: &Path,
    suite: &TestSuite,
    options: &Options,
    cfg: &MarkingConfig,
    console: Console,
) -> Result<ResultDocument> {
    let submission = submission_name(dir);
    console.println(format!("-> Start marking submission: {}", submission));

    let mut options = options.clone();
    options.silent = true;
    options.cleanup = CleanupPolicy::Always;
    options.submission = Some(submission.clone());
    options.working_dir = dir.to_owned();

    if let Some(cmd) = &cfg.compile {
        compile(dir, &cfg.shell, cmd).await?;
    }

    let result = Runner::new(options)
        .console(console.clone())
        .run_marking(suite)
        .await
        .with_context(|| format!("Failed to mark submission {}", submission))?;
    let doc = result.export();
    fsutil::write_json_pretty_with_mkdir(dir.join(&cfg.results_file), &doc)?;

    console.println(format!(
        "-> Finished marking submission: {} ({})",
        submission, doc.totals.received_marks
    ));
    Ok(doc)
}

/// How long an interrupted worker gets to tear down its processes before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Everything one worker needs, owned so it can move into a task.
#[derive(Debug, Clone)]
struct Job {
    submission: String,
    dir: PathBuf,
    program: PathBuf,
    args: Vec<String>,
    results_file: String,
    log_file: String,
}

impl Job {
    /// `Ok(None)` when the interrupt stopped the worker before it finished.
    async fn run(self, interrupt: Interrupt, grace: Duration) -> Result<Option<ResultDocument>> {
        let results = self.dir.join(&self.results_file);
        if results.exists() {
            fsutil::remove_file(&results)?;
        }
        let log_path = self.dir.join(&self.log_file);
        let log = std::fs::File::create(&log_path)
            .with_context(|| format!("Cannot create log file {:?}", log_path))?;
        let log_err = log.try_clone()?;

        log::debug!("Starting worker for {}", self.submission);
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .kill_on_drop(true);
        process::own_process_group(&mut cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start worker {:?}", self.program))?;
        let pid = child.id().map_or(0, |id| id as libc::pid_t);

        let status = tokio::select! {
            biased;
            _ = interrupt.wait() => {
                stop_worker(&mut child, pid, grace).await;
                return Ok(None);
            }
            status = child.wait() => status
                .with_context(|| format!("Failed to wait for worker {:?}", self.program))?,
        };
        if !status.success() {
            log::warn!("Worker for {} exited with {}", self.submission, status);
        }

        let doc: ResultDocument = fsutil::read_json_with_deserialize(&results)
            .with_context(|| format!("No results for submission {} (see {:?})", self.submission, log_path))?;
        Ok(Some(doc))
    }
}

/// SIGINT to the worker's group so it can kill the programs it started, then SIGKILL
/// to every group in the worker's tree once `grace` is over.
async fn stop_worker(child: &mut Child, pid: libc::pid_t, grace: Duration) {
    if pid <= 0 {
        return;
    }
    // the worker's programs run in groups of their own and are gone from the tree once it exits
    let mut groups = process::descendant_groups(pid).await;
    groups.insert(pid);
    if let Err(e) = process::signal_pid(-pid, libc::SIGINT) {
        log::debug!("SIGINT to worker group {}: {}", pid, e);
    }
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        log::warn!("Worker {} still running after {:?}, killing it", pid, grace);
    }
    for pgid in groups {
        if let Err(e) = process::signal_pid(-pgid, libc::SIGKILL) {
            log::debug!("SIGKILL to group {}: {}", pgid, e);
        }
    }
    if let Err(e) = child.kill().await {
        log::debug!("Reaping worker {}: {}", pid, e);
    }
}

/// What a batch run produced.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Sorted by submission.
    pub documents: Vec<ResultDocument>,
    pub failed: Vec<String>,
    pub interrupted: bool,
}

/// Marks every submission under a directory, one worker process each.
#[derive(Debug, Clone)]
pub struct BatchMarker {
    directory: PathBuf,
    program: PathBuf,
    args: Vec<String>,
    config: MarkingConfig,
    console: Console,
    interrupt: Interrupt,
    grace: Duration,
}

impl BatchMarker {
    /// `program args..` is started once per submission, inside the submission directory.
    pub fn new(
        directory: impl Into<PathBuf>,
        program: impl Into<PathBuf>,
        args: Vec<String>,
        config: MarkingConfig,
    ) -> Self {
        Self {
            directory: directory.into(),
            program: program.into(),
            args,
            config,
            console: Console::stdout(),
            interrupt: Interrupt::default(),
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn processes(mut self, processes: usize) -> Self {
        self.config.processes = processes;
        self
    }

    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Submission directories, sorted.
    pub fn submissions(&self) -> Result<Vec<PathBuf>> {
        Ok(fsutil::list_subdirs(&self.directory)?
            .into_iter()
            .map(|name| self.directory.join(name))
            .collect())
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.console.is_color() {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::default_bar()
            .template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .map(|s| s.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(len as u64).with_style(style)
    }

    /// Marks every submission. On interrupt no new worker starts, running workers are
    /// stopped, and what finished before is still aggregated.
    pub async fn run(&self) -> Result<BatchSummary> {
        let submissions = self.submissions()?;
        let total = submissions.len();
        self.console
            .println(format!("Starting marking: {} submissions", total));

        let semaphore = Arc::new(Semaphore::new(self.config.processes.max(1)));
        let mut jobs = JoinSet::new();
        for dir in submissions {
            let job = Job {
                submission: submission_name(&dir),
                dir,
                program: self.program.clone(),
                args: self.args.clone(),
                results_file: self.config.results_file.clone(),
                log_file: self.config.log_file.clone(),
            };
            let semaphore = semaphore.clone();
            let interrupt = self.interrupt.clone();
            let grace = self.grace;
            jobs.spawn(async move {
                let submission = job.submission.clone();
                let res = tokio::select! {
                    biased;
                    _ = interrupt.wait() => Ok(None),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(_permit) => job.run(interrupt.clone(), grace).await,
                        Err(e) => Err(e.into()),
                    },
                };
                (submission, res)
            });
        }

        let bar = self.progress_bar(total);
        let interrupt = self.interrupt.clone();
        let cancel = interrupt.wait();
        tokio::pin!(cancel);

        let mut summary = BatchSummary::default();
        let mut marked = 0;
        loop {
            tokio::select! {
                joined = jobs.join_next() => {
                    let Some(joined) = joined else { break };
                    let (submission, res) = match joined {
                        Ok(x) => x,
                        Err(e) => {
                            log::error!("Marking task failed: {}", e);
                            continue;
                        }
                    };
                    match res {
                        Ok(Some(doc)) => summary.documents.push(doc),
                        Ok(None) => {
                            log::info!("Marking {} stopped", submission);
                            continue;
                        }
                        Err(e) => {
                            log::error!("Marking {} failed: {:#}", submission, e);
                            summary.failed.push(submission);
                        }
                    }
                    marked += 1;
                    bar.inc(1);
                    bar.suspend(|| {
                        self.console.println(format!(
                            "Marked {}/{} ({:.2}%)",
                            marked,
                            total,
                            marked as f64 * 100.0 / total as f64
                        ))
                    });
                }
                _ = &mut cancel, if !summary.interrupted => {
                    log::warn!("Interrupted, stopping outstanding workers");
                    summary.interrupted = true;
                }
            }
        }
        bar.finish_and_clear();

        summary
            .documents
            .sort_by(|a, b| a.submission.cmp(&b.submission));
        summary.failed.sort();
        self.write_aggregate(&summary.documents)?;
        Ok(summary)
    }

    fn write_aggregate(&self, documents: &[ResultDocument]) -> Result<()> {
        let json = self.directory.join(&self.config.overall_results_json);
        fsutil::write_json_with_mkdir(&json, &documents)?;
        log::info!("Wrote {:?}", json);
        if !documents.is_empty() {
            let csv = self.directory.join(&self.config.overall_results_csv);
            fsutil::write_with_mkdir(&csv, render_csv(documents))?;
            log::info!("Wrote {:?}", csv);
        }
        Ok(())
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}

fn csv_row<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut row = fields
        .into_iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    row.push_str("\r\n");
    row
}

/// `submission, <test ids>, <detail keys>, mark`, one row per document in submission order.
/// Columns are the union over all documents; missing cells are empty.
pub fn render_csv(documents: &[ResultDocument]) -> String {
    let tests: BTreeSet<&str> = documents
        .iter()
        .flat_map(|d| d.tests.keys().map(String::as_str))
        .collect();
    let details: BTreeSet<&str> = documents
        .iter()
        .flat_map(|d| d.details.keys().map(String::as_str))
        .collect();

    let mut out = csv_row(
        std::iter::once("submission")
            .chain(tests.iter().copied())
            .chain(details.iter().copied())
            .chain(std::iter::once("mark")),
    );

    let mut sorted: Vec<&ResultDocument> = documents.iter().collect();
    sorted.sort_by(|a, b| a.submission.cmp(&b.submission));
    for doc in sorted {
        let mut row = vec![doc.submission.clone().unwrap_or_default()];
        row.extend(
            tests
                .iter()
                .map(|t| doc.tests.get(*t).map(|o| o.to_string()).unwrap_or_default()),
        );
        row.extend(details.iter().map(|k| match doc.details.get(*k) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::new(),
        }));
        row.push(doc.totals.received_marks.to_string());
        out.push_str(&csv_row(row));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        marks::Totals,
        result::{Outcome, ResultLists},
    };
    use maplit::btreemap;
    use tempfile::TempDir;

    fn doc(submission: &str, tests: &[(&str, Outcome)], mark: f64) -> ResultDocument {
        ResultDocument {
            tests: tests.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            results: ResultLists::default(),
            marks: Default::default(),
            totals: Totals {
                received_marks: mark,
                ..Default::default()
            },
            details: Default::default(),
            submission: Some(submission.to_owned()),
        }
    }

    #[test]
    fn csv_uses_column_union_and_quotes() {
        let mut b = doc("s2", &[("T.a", Outcome::Failure)], 0.0);
        b.details = btreemap! {
            "comment".to_owned() => serde_json::json!("said \"hi\", left"),
            "lines".to_owned() => serde_json::json!(12),
        };
        let a = doc(
            "s1",
            &[("T.a", Outcome::Success), ("T.b", Outcome::Skipped)],
            1.5,
        );
        let csv = render_csv(&[b, a]);
        let want = "\
submission,T.a,T.b,comment,lines,mark\r
s1,success,skipped,,,1.5\r
s2,failure,,\"said \"\"hi\"\", left\",12,0\r
";
        assert_eq!(csv, want);
    }

    #[tokio::test]
    async fn batch_collects_worker_results() {
        let root = TempDir::new().unwrap();
        for name in ["bob", "alice", "broken"] {
            fsutil::mkdir(root.path().join(name)).unwrap();
        }
        fsutil::write(root.path().join("alice/results.json"), "stale").unwrap();
        fsutil::write(root.path().join("not_a_dir"), "").unwrap();

        let script = r#"name=$(basename "$PWD")
echo "marking $name"
[ "$name" = broken ] && exit 1
printf '{"tests":{"T.a":"success"},"results":{"failures":[],"errors":[],"successes":["T.a"]},"marks":{},"totals":{"passed":1,"test_count":1,"received_marks":2.0,"total_marks":2.0},"details":{},"submission":"%s"}' "$name" > results.json"#;
        let console = Console::buffer();
        let marker = BatchMarker::new(
            root.path(),
            "sh",
            vec!["-c".to_owned(), script.to_owned()],
            MarkingConfig::default(),
        )
        .processes(2)
        .console(console.clone());

        let summary = marker.run().await.unwrap();
        let names: Vec<_> = summary
            .documents
            .iter()
            .map(|d| d.submission.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(summary.failed, vec!["broken"]);
        assert!(!summary.interrupted);

        let out = console.contents();
        assert!(out.starts_with("Starting marking: 3 submissions\n"));
        assert!(out.contains("Marked 3/3 (100.00%)"));
        assert_eq!(
            fsutil::read_to_string(root.path().join("broken/marking.log")).unwrap(),
            "marking broken\n"
        );

        let overall: Vec<ResultDocument> =
            fsutil::read_json_with_deserialize(root.path().join("overall_results.json")).unwrap();
        assert_eq!(overall.len(), 2);
        let csv = fsutil::read_to_string(root.path().join("marking_results.csv")).unwrap();
        assert_eq!(csv, "submission,T.a,mark\r\nalice,success,2\r\nbob,success,2\r\n");
    }
}
