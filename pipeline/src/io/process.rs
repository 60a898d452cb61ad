//! Child processes with a hard timeout and bounded output capture.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How to run a command.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub timeout: Duration,
    /// Bytes of stdout/stderr kept in memory; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn truncated_notice(&self, label: &str) -> String {
        let mut notice = String::new();
        if self.stdout_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if self.stderr_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        notice
    }
}

/// Kills and reaps the child on drop unless it was already waited for.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(ExitStatus, bool)> {
        let waited = self.child.wait_timeout(timeout).context("wait for command")?;
        let outcome = match waited {
            Some(status) => (status, false),
            None => {
                warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
                self.child.kill().context("kill command")?;
                (self.child.wait().context("wait command after kill")?, true)
            }
        };
        self.reaped = true;
        Ok(outcome)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Run a command to completion or until `request.timeout`, whichever is first.
///
/// Output is read on separate threads while the child runs so full pipes
/// cannot deadlock it. On every exit path, including errors after spawn, the
/// child is killed if still running and reaped.
#[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
pub fn run_command(mut cmd: Command, request: &CommandRequest) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let mut guard = ChildGuard {
        child,
        reaped: false,
    };

    let stdout = guard
        .child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = guard
        .child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = request.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    let (status, timed_out) = guard.wait_with_timeout(request.timeout)?;

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        keep_within_limit(&mut buf, &mut truncated, &chunk[..n], limit);
    }

    Ok((buf, truncated))
}

fn keep_within_limit(buf: &mut Vec<u8>, truncated: &mut usize, data: &[u8], limit: usize) {
    let remaining = limit.saturating_sub(buf.len());
    let keep = data.len().min(remaining);
    buf.extend_from_slice(&data[..keep]);
    *truncated += data.len() - keep;
}
