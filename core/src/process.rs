use std::{
    collections::BTreeSet,
    future::Future,
    io,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, Command},
    sync::mpsc,
    time::Instant,
};

use crate::{
    signal::describe_signal,
    style::{safe_repr, Console},
};

/// Number of sends explain mode prints per process before summarising the rest.
const EXPLAIN_SEND_LIMIT: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Normal,
    /// Every blocking read or wait is bounded by `spawn time + timeout`.
    TimeoutBound(Duration),
    /// No OS process; each primitive prints what it would do.
    Explain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn extension(self) -> &'static str {
        match self {
            Stream::Stdout => "out",
            Stream::Stderr => "err",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signalled(i32),
}

impl Termination {
    fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(sig)) => Self::Signalled(sig),
            (None, None) => Self::Exited(-1),
        }
    }

    /// Exit code, or the negated signal number.
    pub fn exit_status(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signalled(sig) => -sig,
        }
    }

    pub fn signal(self) -> Option<i32> {
        match self {
            Self::Exited(_) => None,
            Self::Signalled(sig) => Some(sig),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Empty command line for process {0}")]
    EmptyArgv(usize),

    #[error("Cannot open input file {path:?} for process {index}: {source}")]
    InputFile {
        index: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to spawn process {index} ({program}): {source}")]
    Spawn {
        index: usize,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Input to process {0} is already finished")]
    StdinClosed(usize),

    #[error("Cannot send signal {signal} to process {index}: {source}")]
    Signal {
        index: usize,
        signal: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error communicating with process {0}: {1}")]
    Io(usize, #[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Arguments for [`ManagedProcess::spawn`].
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub index: usize,
    pub argv: Vec<String>,
    pub stdin_file: Option<PathBuf>,
    pub mode: ProcessMode,
    pub cwd: PathBuf,
    /// Prefix for captured output files, `<prefix>.<index>.out|.err`.
    pub output_prefix: String,
}

struct LineQueue {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    eof: bool,
}

impl LineQueue {
    fn pump<R>(index: usize, stream: Stream, reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            loop {
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to read {} of process {}: {}", stream, index, e);
                        break;
                    }
                }
            }
        });
        Self { rx, eof: false }
    }
}

struct Live {
    child: Child,
    pid: libc::pid_t,
    stdin: Option<ChildStdin>,
    stdout: LineQueue,
    stderr: LineQueue,
    deadline: Option<Instant>,
    termination: Option<Termination>,
    timed_out: bool,
    killed: bool,
}

impl Live {
    fn queue(&mut self, stream: Stream) -> &mut LineQueue {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }

    fn kill_group(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        self.stdin = None;
        // the group id stays reserved while any member is alive
        if let Err(e) = signal_pid(-self.pid, libc::SIGKILL) {
            log::debug!("SIGKILL to group {}: {}", self.pid, e);
        }
        if self.termination.is_none() {
            if let Err(e) = self.child.start_kill() {
                log::debug!("start_kill on pid {}: {}", self.pid, e);
            }
        }
    }

    fn expire(&mut self, index: usize) {
        if !self.timed_out {
            log::debug!("Process {} (pid {}) hit its timeout", index, self.pid);
        }
        self.timed_out = true;
        self.kill_group();
    }
}

async fn bounded<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// A child process owned by one test.
///
/// Each process runs in its own process group. Dropping a process that was never
/// reaped kills the whole group.
pub struct ManagedProcess {
    index: usize,
    argv: Vec<String>,
    stdin_file: Option<PathBuf>,
    output_prefix: String,
    console: Console,
    live: Option<Live>,
    killed_by_harness: bool,
    sends: usize,
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("index", &self.index)
            .field("argv", &self.argv)
            .field("pid", &self.pid())
            .field("termination", &self.termination())
            .field("timed_out", &self.timed_out())
            .finish()
    }
}

impl ManagedProcess {
    pub fn spawn(spec: SpawnSpec, console: Console) -> Result<Self> {
        let SpawnSpec {
            index,
            argv,
            stdin_file,
            mode,
            cwd,
            output_prefix,
        } = spec;

        if argv.is_empty() {
            return Err(ProcessError::EmptyArgv(index));
        }

        let mut proc = Self {
            index,
            argv,
            stdin_file,
            output_prefix,
            console,
            live: None,
            killed_by_harness: false,
            sends: 0,
        };

        let timeout = match mode {
            ProcessMode::Explain => {
                proc.explain_start();
                return Ok(proc);
            }
            ProcessMode::Normal => None,
            ProcessMode::TimeoutBound(timeout) => Some(timeout),
        };

        let stdin = match &proc.stdin_file {
            Some(path) => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    cwd.join(path)
                };
                let file = std::fs::File::open(&path).map_err(|source| {
                    ProcessError::InputFile {
                        index,
                        path: path.clone(),
                        source,
                    }
                })?;
                Stdio::from(file)
            }
            None => Stdio::piped(),
        };

        let mut cmd = Command::new(&proc.argv[0]);
        cmd.args(&proc.argv[1..])
            .current_dir(&cwd)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            index,
            program: proc.argv[0].clone(),
            source,
        })?;

        let spawned_at = Instant::now();
        let pid = child.id().map_or(0, |id| id as libc::pid_t);
        log::debug!("Spawned process {} (pid {}): {:?}", index, pid, proc.argv);

        let stdout = child
            .stdout
            .take()
            .map(|r| LineQueue::pump(index, Stream::Stdout, r))
            .ok_or_else(|| ProcessError::Io(index, io::ErrorKind::BrokenPipe.into()))?;
        let stderr = child
            .stderr
            .take()
            .map(|r| LineQueue::pump(index, Stream::Stderr, r))
            .ok_or_else(|| ProcessError::Io(index, io::ErrorKind::BrokenPipe.into()))?;

        proc.live = Some(Live {
            stdin: child.stdin.take(),
            child,
            pid,
            stdout,
            stderr,
            deadline: timeout.map(|t| spawned_at + t),
            termination: None,
            timed_out: false,
            killed: false,
        });
        Ok(proc)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn stdin_file(&self) -> Option<&Path> {
        self.stdin_file.as_deref()
    }

    pub fn is_explain(&self) -> bool {
        self.live.is_none()
    }

    pub fn pid(&self) -> Option<libc::pid_t> {
        self.live.as_ref().map(|live| live.pid)
    }

    pub fn termination(&self) -> Option<Termination> {
        self.live.as_ref().and_then(|live| live.termination)
    }

    pub fn timed_out(&self) -> bool {
        self.live.as_ref().map_or(false, |live| live.timed_out)
    }

    /// Whether the harness itself sent the fatal SIGKILL (explicit kill or timeout).
    pub fn killed_by_harness(&self) -> bool {
        self.killed_by_harness || self.timed_out()
    }

    /// Name of the file that captures `stream` in save mode, e.g. `mod.Class.test.0.out`.
    pub fn output_filename(&self, stream: Stream) -> String {
        format!(
            "{}.{}.{}",
            self.output_prefix,
            self.index,
            stream.extension()
        )
    }

    fn explain_start(&self) {
        let argv = self
            .argv
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                    format!("{:?}", arg)
                } else {
                    arg.escape_debug().to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        let input = match &self.stdin_file {
            Some(path) => format!(" < {}", path.display()),
            None => String::new(),
        };
        self.console
            .println(self.console.bold(&format!("Start Process {}:", self.index)));
        self.console.println(format!(
            "\t{}{} > {} 2> {}",
            argv,
            input,
            self.output_filename(Stream::Stdout),
            self.output_filename(Stream::Stderr),
        ));
    }

    /// Writes `data` to stdin. A child that already exited is not an error.
    pub async fn send(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let data = data.as_ref();
        let index = self.index;
        let Some(live) = self.live.as_mut() else {
            if self.sends < EXPLAIN_SEND_LIMIT {
                self.console.println(format!(
                    "{}{}",
                    self.console
                        .bold(&format!("Send input to Process {}: ", index)),
                    safe_repr(&String::from_utf8_lossy(data))
                ));
            } else if self.sends == EXPLAIN_SEND_LIMIT {
                self.console.println(self.console.bold(&format!(
                    "Further input sent to Process {} - see test case for details",
                    index
                )));
            }
            self.sends += 1;
            return Ok(());
        };
        self.sends += 1;

        let deadline = live.deadline;
        let Some(stdin) = live.stdin.as_mut() else {
            return Err(ProcessError::StdinClosed(index));
        };
        let res = bounded(deadline, async {
            stdin.write_all(data).await?;
            stdin.flush().await
        })
        .await;
        match res {
            None => {
                live.expire(index);
                Ok(())
            }
            Some(Ok(())) => {
                log::debug!("Sent {} bytes to process {}", data.len(), index);
                Ok(())
            }
            Some(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                log::debug!("Process {} no longer reads its input: {}", index, e);
                Ok(())
            }
            Some(Err(e)) => Err(ProcessError::Io(index, e)),
        }
    }

    /// Closes stdin so the child sees end of file.
    pub fn finish_input(&mut self) {
        match self.live.as_mut() {
            Some(live) => {
                live.stdin = None;
            }
            None => {
                self.console.println(self.console.bold(&format!(
                    "Finish input to Process {} (ie. Ctrl+D)",
                    self.index
                )));
            }
        }
    }

    /// Next newline-terminated chunk of `stream`. Empty at end of file.
    pub async fn read_line(&mut self, stream: Stream) -> Vec<u8> {
        let index = self.index;
        let Some(live) = self.live.as_mut() else {
            return Vec::new();
        };
        if live.timed_out {
            let queue = live.queue(stream);
            return queue.rx.try_recv().unwrap_or_default();
        }
        let deadline = live.deadline;
        let queue = live.queue(stream);
        if queue.eof {
            return Vec::new();
        }
        match bounded(deadline, queue.rx.recv()).await {
            Some(Some(line)) => line,
            Some(None) => {
                queue.eof = true;
                Vec::new()
            }
            None => {
                live.expire(index);
                live.queue(stream).rx.try_recv().unwrap_or_default()
            }
        }
    }

    /// Everything left on `stream`, up to end of file or the deadline.
    pub async fn read_rest(&mut self, stream: Stream) -> Vec<u8> {
        let mut rest = Vec::new();
        loop {
            let line = self.read_line(stream).await;
            if line.is_empty() {
                return rest;
            }
            rest.extend_from_slice(&line);
        }
    }

    /// Reads whole lines until at least `text.len()` bytes arrived and compares them with `text`.
    /// An empty `text` expects end of file.
    pub async fn expect_line(&mut self, stream: Stream, text: &str) -> bool {
        let want = text.as_bytes();
        if want.is_empty() {
            return self.read_line(stream).await.is_empty();
        }
        let mut got = Vec::new();
        while got.len() < want.len() {
            let line = self.read_line(stream).await;
            if line.is_empty() {
                break;
            }
            got.extend_from_slice(&line);
        }
        got == want
    }

    /// Whether the rest of `stream` equals the contents of `path`.
    /// Reading stops at the first line that diverges.
    pub async fn expect_file(&mut self, stream: Stream, path: impl AsRef<Path>) -> fsutil::Result<bool> {
        let want = fsutil::read(path)?;
        let mut got = Vec::new();
        while got.len() < want.len() {
            let line = self.read_line(stream).await;
            if line.is_empty() {
                return Ok(false);
            }
            got.extend_from_slice(&line);
            if !want.starts_with(&got) {
                return Ok(false);
            }
        }
        Ok(self.read_line(stream).await.is_empty())
    }

    /// Waits for the child to terminate. A timeout kills the group and reports how it died.
    pub async fn wait(&mut self) -> Result<Termination> {
        let index = self.index;
        let Some(live) = self.live.as_mut() else {
            return Ok(Termination::Exited(0));
        };
        if let Some(t) = live.termination {
            return Ok(t);
        }
        let status = match bounded(live.deadline, live.child.wait()).await {
            Some(res) => res,
            None => {
                live.expire(index);
                live.child.wait().await
            }
        }
        .map_err(|e| ProcessError::Io(index, e))?;

        let termination = Termination::from_status(status);
        log::debug!("Process {} terminated: {:?}", index, termination);
        live.termination = Some(termination);
        Ok(termination)
    }

    /// Exit code, or `-signal` when the child was killed by a signal.
    pub async fn wait_exit_status(&mut self) -> Result<i32> {
        Ok(self.wait().await?.exit_status())
    }

    /// Signal that terminated the child, if it already terminated that way. Never blocks.
    pub fn poll_signal(&mut self) -> Option<i32> {
        let live = self.live.as_mut()?;
        if live.termination.is_none() {
            match live.child.try_wait() {
                Ok(Some(status)) => live.termination = Some(Termination::from_status(status)),
                Ok(None) => return None,
                Err(e) => {
                    log::debug!("try_wait on process {}: {}", self.index, e);
                    return None;
                }
            }
        }
        live.termination.and_then(Termination::signal)
    }

    /// SIGKILL to the child and its process group. Safe to call any number of times.
    pub fn kill(&mut self) {
        match self.live.as_mut() {
            Some(live) => {
                if !live.killed {
                    if live.termination.is_none() {
                        self.killed_by_harness = true;
                    }
                    log::debug!("Killing process {} (pid {})", self.index, live.pid);
                    live.kill_group();
                }
            }
            None => {
                self.console.println(format!(
                    "{} (send SIGKILL to process group)",
                    self.console.bold(&format!("Kill Process {}", self.index))
                ));
            }
        }
    }

    /// Delivers `sig` to the child only.
    pub fn send_signal(&mut self, sig: i32) -> Result<()> {
        let Some(live) = self.live.as_ref() else {
            self.console.println(format!(
                "{}{}",
                self.console
                    .bold(&format!("Send signal to Process {}: ", self.index)),
                describe_signal(sig)
            ));
            return Ok(());
        };
        self.deliver(live.pid, sig)
    }

    /// Delivers `sig` to the child's whole process group.
    pub fn send_signal_group(&mut self, sig: i32) -> Result<()> {
        let Some(live) = self.live.as_ref() else {
            self.console.println(format!(
                "{}{}",
                self.console.bold(&format!(
                    "Send signal to Process {} (incl. children): ",
                    self.index
                )),
                describe_signal(sig)
            ));
            return Ok(());
        };
        self.deliver(-live.pid, sig)
    }

    fn deliver(&self, pid: libc::pid_t, sig: i32) -> Result<()> {
        log::debug!("Sending {} to pid {}", describe_signal(sig), pid);
        signal_pid(pid, sig).map_err(|source| ProcessError::Signal {
            index: self.index,
            signal: describe_signal(sig),
            source,
        })
    }

    /// Ids of the child's direct children. Best effort: empty when they cannot be listed.
    pub async fn child_pids(&self) -> Vec<libc::pid_t> {
        match self.live.as_ref() {
            Some(live) => list_child_pids(live.pid).await,
            None => {
                self.console.println(self.console.bold(&format!(
                    "Get IDs of child processes of Process {}",
                    self.index
                )));
                Vec::new()
            }
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if let Some(live) = self.live.as_mut() {
            if live.termination.is_none() {
                live.kill_group();
            }
        }
    }
}

/// Makes the spawned child the leader of a new process group.
pub(crate) fn own_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Process groups of every descendant of `pid`, never the caller's own group.
pub(crate) async fn descendant_groups(pid: libc::pid_t) -> BTreeSet<libc::pid_t> {
    let own = unsafe { libc::getpgrp() };
    let mut groups = BTreeSet::new();
    let mut parents = vec![pid];
    while let Some(parent) = parents.pop() {
        for child in list_child_pids(parent).await {
            let pgid = unsafe { libc::getpgid(child) };
            if pgid > 0 && pgid != own {
                groups.insert(pgid);
            }
            parents.push(child);
        }
    }
    groups
}

/// `kill(2)` with a negative `pid` addressing a process group.
pub fn signal_pid(pid: libc::pid_t, sig: i32) -> io::Result<()> {
    let ret = unsafe { libc::kill(pid, sig) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
async fn list_child_pids(parent: libc::pid_t) -> Vec<libc::pid_t> {
    let entries = match fsutil::read_dir("/proc") {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("{}", e);
            return Vec::new();
        }
    };
    let mut pids: Vec<libc::pid_t> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<libc::pid_t>().ok())
        .filter(|&pid| parent_of(pid) == Some(parent))
        .collect();
    pids.sort_unstable();
    pids
}

/// Parent pid from `/proc/<pid>/stat`. The command name may contain spaces, so parse after the last `)`.
#[cfg(target_os = "linux")]
fn parent_of(pid: libc::pid_t) -> Option<libc::pid_t> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
async fn list_child_pids(parent: libc::pid_t) -> Vec<libc::pid_t> {
    let output = match Command::new("pgrep")
        .args(["-P", &parent.to_string()])
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            log::debug!("Failed to run pgrep: {}", e);
            return Vec::new();
        }
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}
