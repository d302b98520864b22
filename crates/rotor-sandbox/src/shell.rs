//! Terminal commands -- run an already-validated command with a time limit.
//!
//! Commands are spawned through `sh -c` in the workspace root with stdin
//! closed.  Stdout and stderr are captured and each truncated to the
//! configured byte limit.
//!
//! Each command runs in its own process group.  On timeout the whole group
//! gets SIGTERM and, after a short grace period, SIGKILL.  When the caller's
//! future is dropped (cancellation), or the command returns while processes
//! it started are still running, the group is killed outright.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, warn};

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::error::{Result, ToolError};

/// Time between SIGTERM and SIGKILL when a timed-out command is stopped.
const KILL_GRACE: Duration = Duration::from_millis(200);

/// Spawns shell commands inside the workspace.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    working_dir: PathBuf,
    max_output_bytes: usize,
}

impl ShellRunner {
    pub fn new(working_dir: impl Into<PathBuf>, max_output_bytes: usize) -> Self {
        Self {
            working_dir: working_dir.into(),
            max_output_bytes,
        }
    }

    /// Run `command` and return its combined output.
    ///
    /// A zero exit status yields `Ok`; any other status is
    /// [`ToolError::ExecutionFailed`] carrying the exit code and output.
    pub async fn run(&self, command: &str, timeout: Duration) -> Result<String> {
        debug!(
            command,
            working_dir = %self.working_dir.display(),
            timeout_ms = timeout.as_millis() as u64,
            "executing shell command"
        );

        let mut process = tokio::process::Command::new("sh");
        process
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);

        let child = process
            .spawn()
            .map_err(|e| ToolError::failed(format!("failed to spawn process: {e}")))?;
        let group = ProcessGroup::new(child.id());

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolError::failed(format!("process error: {e}"))),
            Err(_) => {
                warn!(command, timeout_ms = timeout.as_millis() as u64, "command timed out");
                group.terminate().await;
                return Err(ToolError::Timeout {
                    what: format!("command `{command}`"),
                    after: timeout,
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let (stdout, stdout_truncated) = truncate_output(&output.stdout, self.max_output_bytes);
        let (stderr, stderr_truncated) = truncate_output(&output.stderr, self.max_output_bytes);
        debug!(exit_code, stdout_truncated, stderr_truncated, "command completed");

        let text = render_output(&stdout, &stderr);
        if output.status.success() {
            Ok(text)
        } else {
            Err(ToolError::failed(format!("exit code {exit_code}\n{text}")))
        }
    }
}

/// The process group a command runs in.  Dropping it sends SIGKILL to
/// whatever is left in the group.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { pgid: leader }
    }

    /// SIGTERM, a grace period, then SIGKILL.
    async fn terminate(mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        signal_group(pgid, GroupSignal::Terminate);
        tokio::time::sleep(KILL_GRACE).await;
        signal_group(pgid, GroupSignal::Kill);
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            signal_group(pgid, GroupSignal::Kill);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: GroupSignal) {
    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => debug!(pgid, ?signal, "signalled process group"),
        // The group is already gone.
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pgid, ?signal, error = %e, "failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _signal: GroupSignal) {}

fn render_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim_end();
    let stderr = stderr.trim_end();
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => "(no output)".to_owned(),
        (false, true) => stdout.to_owned(),
        (true, false) => format!("[stderr]\n{stderr}"),
        (false, false) => format!("{stdout}\n[stderr]\n{stderr}"),
    }
}

/// Truncate raw output to `limit` bytes, converting to a lossy UTF-8 string.
/// Returns `(output_string, was_truncated)`.
fn truncate_output(raw: &[u8], limit: usize) -> (String, bool) {
    if raw.len() <= limit {
        (String::from_utf8_lossy(raw).into_owned(), false)
    } else {
        let mut s = String::from_utf8_lossy(&raw[..limit]).into_owned();
        s.push_str(&format!("\n... [output truncated at {limit} bytes]"));
        (s, true)
    }
}
