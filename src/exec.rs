// src/exec.rs

//! Subprocess execution with timeout and cancellation
//!
//! Package manager invocations and recipe steps both go through a
//! [`CommandRunner`]. The system implementation:
//!
//! - Nullifies stdin so interactive prompts cannot hang a run
//! - Drains stdout/stderr on background threads so large output cannot
//!   block the child
//! - Polls the child, killing it when the timeout elapses or the run's
//!   [`CancelToken`] fires
//!
//! Each child leads its own process group, so a kill also reaches whatever
//! it forked (`apt-get` running `dpkg`, a shell script running its commands).

use crate::error::{Error, Result};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How often a running child is checked for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long to wait for buffered output once a child has been killed
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Shared cancellation flag for one reconciliation run
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`Error::Cancelled`] once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early (with an error) on cancellation
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// A command to execute
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program and arguments joined for log and error messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr, for error reports and signature matching
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.trim().to_string(),
            (false, true) => self.stdout.trim().to_string(),
            (false, false) => format!("{}\n{}", self.stdout.trim(), self.stderr.trim()),
        }
    }

    /// Turn a non-zero exit into [`Error::CommandFailed`]
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(Error::CommandFailed {
            command: spec.display(),
            code: describe_code(self.code),
            output: self.combined(),
        })
    }
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "termination by signal".to_string(),
    }
}

/// Executes commands on behalf of adapters and recipe steps
pub trait CommandRunner: Send + Sync {
    /// Run to completion; a non-zero exit is not an error at this level
    fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput>;

    /// Run and fail on non-zero exit
    fn run_checked(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput> {
        self.run(spec, cancel)?.check(spec)
    }
}

/// Runs commands on the local host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput> {
        cancel.check()?;
        debug!("Running: {}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::InitError(format!("Failed to spawn {}: {}", spec.program, e)))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_for(&mut child, spec, cancel);
        // After a kill, a descendant that left the group may still hold the pipes
        let grace = status.is_err().then_some(KILL_GRACE);
        let stdout = collect(stdout, grace);
        let stderr = collect(stderr, grace);
        let status = status?;

        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            debug!("[{}] {}", spec.program, line);
        }
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            warn!("[{}] {}", spec.program, line);
        }

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn wait_for(
    child: &mut Child,
    spec: &CommandSpec,
    cancel: &CancelToken,
) -> Result<std::process::ExitStatus> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            warn!("Killing {} after cancellation", spec.display());
            kill(child);
            return Err(Error::Cancelled);
        }
        if let Some(limit) = spec.timeout {
            if started.elapsed() >= limit {
                kill(child);
                return Err(Error::Timeout {
                    command: spec.display(),
                    limit,
                });
            }
        }
    }
}

/// Kill the child's whole process group, then reap the child
fn kill(child: &mut Child) {
    if let Ok(pid) = i32::try_from(child.id()) {
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<String>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        rx
    })
}

/// Output read from a pipe, waiting at most `grace` when given
fn collect(output: Option<Receiver<String>>, grace: Option<Duration>) -> String {
    let Some(rx) = output else {
        return String::new();
    };
    match grace {
        Some(limit) => rx.recv_timeout(limit).unwrap_or_default(),
        None => rx.recv().unwrap_or_default(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_command_captures_output() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2"]);
        let output = SystemRunner.run(&spec, &CancelToken::new()).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.combined(), "hello\noops");
    }

    #[test]
    fn test_failure_becomes_command_failed() {
        let spec = CommandSpec::new("sh").args(["-c", "echo broken >&2; exit 3"]);
        let err = SystemRunner.run_checked(&spec, &CancelToken::new()).unwrap_err();
        match err {
            Error::CommandFailed { code, output, .. } => {
                assert_eq!(code, "exit code 3");
                assert_eq!(output, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let spec = CommandSpec::new("sleep")
            .arg("10")
            .timeout(Some(Duration::from_millis(300)));
        let started = Instant::now();
        let err = SystemRunner.run(&spec, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_kills_forked_children() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "sleep 8; echo done"])
            .timeout(Some(Duration::from_millis(300)));
        let started = Instant::now();
        let err = SystemRunner.run(&spec, &CancelToken::new()).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
        assert_eq!(err.to_string(), "sh -c sleep 8; echo done timed out after 300ms");
    }

    #[test]
    fn test_cancel_kills_running_command() {
        let cancel = CancelToken::new();
        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(300));
                cancel.cancel();
            })
        };

        let spec = CommandSpec::new("sh").args(["-c", "sleep 8; echo done"]);
        let started = Instant::now();
        let err = SystemRunner.run(&spec, &cancel).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, Error::Cancelled), "{err}");
        assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
    }

    #[test]
    fn test_cancelled_token_refuses_to_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = SystemRunner
            .run(&CommandSpec::new("true"), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_env_and_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo $GREETING; pwd"])
            .env("GREETING", "hi")
            .current_dir(dir.path());
        let output = SystemRunner.run_checked(&spec, &CancelToken::new()).unwrap();
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines[0], "hi");
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(std::path::Path::new(lines[1]).canonicalize().unwrap(), expected);
    }
}
