//! External command invocation.
//!
//! `CommandRunner` is the seam between the convergence engine and the
//! operating system. `SystemRunner` spawns real processes; `ScriptedRunner`
//! records invocations and replays queued responses for tests.

use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    io::{self, Read},
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread,
    time::{Duration, Instant},
};

use itertools::Itertools;
use wait_timeout::ChildExt;

use crate::{Error, Result};

/// Bytes kept from each of stdout and stderr. The rest is read and discarded.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// How long to keep collecting output after the command has exited.
///
/// A background descendant can hold a pipe open indefinitely.
const PIPE_GRACE: Duration = Duration::from_secs(2);

/// One external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Identity to run as, when different from the current one.
    pub run_as: Option<String>,
}

impl Invocation {
    /// Create an invocation running as the current identity.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            run_as: None,
        }
    }

    /// Run this invocation as `user`.
    #[must_use]
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = std::iter::once(&self.program).chain(&self.args).join(" ");
        f.write_str(&line)
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a command that exited 0 and printed `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Output of a command that exited with `code`.
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Runs external commands synchronously.
pub trait CommandRunner {
    /// Run `invocation` to completion.
    ///
    /// # Errors
    ///
    /// Returns an invocation error when the command could not be run at all.
    /// A command that runs and exits non-zero is not an error here.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

// ═══════════════════════════════════════════════════════════════════════════
// SYSTEM RUNNER
// ═══════════════════════════════════════════════════════════════════════════

/// Production runner backed by `std::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
    escalate_with: Vec<String>,
}

impl SystemRunner {
    /// Create a runner with no timeout that never escalates.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: None,
            escalate_with: Vec::new(),
        }
    }

    /// Kill commands that run longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Prefix used to run commands as another identity, e.g. `sudo -n`.
    ///
    /// The prefix is followed by `-u <user>` and the command itself. An empty
    /// prefix runs every command as the current identity.
    #[must_use]
    pub fn with_escalation(mut self, prefix: &str) -> Self {
        self.escalate_with = prefix.split_whitespace().map(String::from).collect();
        self
    }

    fn argv(&self, invocation: &Invocation) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(user) = &invocation.run_as {
            if !self.escalate_with.is_empty() {
                argv.extend(self.escalate_with.iter().cloned());
                argv.push("-u".to_string());
                argv.push(user.clone());
            }
        }
        argv.push(invocation.program.clone());
        argv.extend(invocation.args.iter().cloned());
        argv
    }

    fn wait(&self, child: &mut Child, invocation: &Invocation) -> Result<ExitStatus> {
        let fail = |e: io::Error| Error::invocation_failed(invocation.to_string(), e.to_string());

        // A timeout too large to schedule is no deadline at all.
        let timeout = self
            .timeout
            .filter(|timeout| Instant::now().checked_add(*timeout).is_some());
        let Some(timeout) = timeout else {
            return child.wait().map_err(fail);
        };

        if let Some(status) = child.wait_timeout(timeout).map_err(fail)? {
            return Ok(status);
        }

        // Reaping can only fail if the child is already gone.
        let _ = child.kill();
        let _ = child.wait();
        Err(Error::InvocationTimeout {
            command: invocation.to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let argv = self.argv(invocation);
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::invocation_failed(
                invocation.to_string(),
                "empty command line",
            ));
        };

        tracing::debug!(command = %invocation, "running command");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::invocation_failed(invocation.to_string(), e.to_string()))?;

        // Drain both pipes while waiting so a chatty child cannot block on a
        // full pipe buffer.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = self.wait(&mut child, invocation)?;

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: stdout.map(|rx| collect(&rx, PIPE_GRACE)).unwrap_or_default(),
            stderr: stderr.map(|rx| collect(&rx, PIPE_GRACE)).unwrap_or_default(),
        })
    }
}

/// Read `pipe` on a detached thread, streaming captured chunks back.
fn spawn_reader(pipe: impl Read + Send + 'static) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || read_bounded(pipe, MAX_CAPTURE_BYTES, &tx));
    rx
}

/// Forward the first `limit` bytes of `pipe` and discard the rest.
///
/// Stops at end of file, on a read error, or once the receiver is gone.
fn read_bounded(mut pipe: impl Read, limit: usize, tx: &Sender<Vec<u8>>) {
    let mut chunk = [0_u8; 8192];
    let mut captured = 0_usize;
    loop {
        let read = match pipe.read(&mut chunk) {
            Ok(0) => return,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return,
        };
        let keep = read.min(limit.saturating_sub(captured));
        if keep == 0 {
            continue;
        }
        captured = captured.saturating_add(keep);
        let bytes = chunk.get(..keep).map(<[u8]>::to_vec).unwrap_or_default();
        if tx.send(bytes).is_err() {
            return;
        }
    }
}

/// Gather chunks until the reader finishes or `grace` runs out.
fn collect(rx: &Receiver<Vec<u8>>, grace: Duration) -> String {
    let started = Instant::now();
    let mut buf = Vec::new();
    loop {
        match rx.recv_timeout(grace.saturating_sub(started.elapsed())) {
            Ok(bytes) => buf.extend(bytes),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("output pipe still open after exit, keeping partial output");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════
// SCRIPTED RUNNER
// ═══════════════════════════════════════════════════════════════════════════

/// Test double that records invocations and replays queued responses.
///
/// Responses are consumed in order regardless of the command. Once the queue
/// is empty every invocation succeeds with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: RefCell<VecDeque<Result<CommandOutput>>>,
    invocations: RefCell<Vec<Invocation>>,
}

impl ScriptedRunner {
    /// Create a runner with an empty response queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runner that replays `responses` in order.
    #[must_use]
    pub fn with_responses(responses: Vec<Result<CommandOutput>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            invocations: RefCell::new(Vec::new()),
        }
    }

    /// Queue one more response.
    pub fn push(&self, response: Result<CommandOutput>) {
        self.responses.borrow_mut().push_back(response);
    }

    /// Every invocation received so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Every invocation rendered as a command line.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Number of invocations with `verb` among their arguments.
    #[must_use]
    pub fn count_verb(&self, verb: &str) -> usize {
        self.invocations
            .borrow()
            .iter()
            .filter(|inv| inv.args.iter().any(|arg| arg == verb))
            .count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.invocations.borrow_mut().push(invocation.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::ok("")))
    }
}
