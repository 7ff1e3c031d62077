//! Shell tool runner — executes one argv with a scrubbed environment and a
//! hard wall-clock bound.
//!
//! ```text
//! run(["ls", "-la"]) → spawn (own process group, credential removed from env)
//!     → concurrently: wait(child) | drain stdout | drain stderr
//!     → timeout?  kill process group → reap → CommandResult { ok: false, exit_code: -1 }
//!     → exited?   drain for up to DRAIN_GRACE → CommandResult { exit_code: status }
//! ```
//!
//! Execution failures never surface as `Err`: they are data inside the
//! [`CommandResult`]. The only error is an empty command, which is rejected
//! before anything is spawned.
//!
//! The result follows the command itself, not its pipes. A background
//! descendant that inherited stdout (`sleep 10 & echo done`) gets
//! [`DRAIN_GRACE`] after the leader exits, then the group is killed.
//!
//! The process group is only signalled while it is known to be occupied:
//! before the leader is reaped, or afterwards while something still holds the
//! output pipes. A caller disconnect (the request future being dropped
//! mid-run) tears the tree down through the same guard.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use voxshell_core::types::{CommandRequest, CommandResult, ShellConfig};

const READ_CHUNK: usize = 8 * 1024;

/// How long output is still collected after the command itself has exited.
pub const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("missing command")]
    EmptyCommand,
}

/// Cloneable handle; the config is shared read-only across requests.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    config: Arc<ShellConfig>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(ShellConfig::default())
    }
}

impl ShellRunner {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Run `request` to completion or timeout.
    pub async fn run(&self, request: &CommandRequest) -> Result<CommandResult, ShellError> {
        let (program, args) = request.split().ok_or(ShellError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(self.execute(program, cmd).await)
    }

    async fn execute(&self, program: &str, mut cmd: Command) -> CommandResult {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for name in &self.config.scrubbed_env {
            cmd.env_remove(name);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program, "failed to start tool command: {e}");
                return CommandResult::failed_to_start(e);
            }
        };
        let mut tree = ProcessTree::new(child.id());
        debug!(program, pid = ?child.id(), "tool command spawned");

        let cap = self.config.max_output_bytes;
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // The drains borrow the buffers; they are dropped at the end of this
        // block so whatever was captured so far can be moved into the result.
        let waited = {
            let drains = async {
                tokio::join!(
                    capture(stdout_pipe.as_mut(), &mut stdout, cap, "stdout"),
                    capture(stderr_pipe.as_mut(), &mut stderr, cap, "stderr"),
                );
            };
            tokio::pin!(drains);
            let mut drained = false;

            let wait = async {
                loop {
                    tokio::select! {
                        status = child.wait() => break status,
                        () = &mut drains, if !drained => drained = true,
                    }
                }
            };
            let outcome = tokio::time::timeout(self.config.timeout, wait).await;
            match outcome {
                Ok(status) => {
                    if !drained {
                        drained = tokio::time::timeout(DRAIN_GRACE, &mut drains)
                            .await
                            .is_ok();
                    }
                    Some((status, drained))
                }
                Err(_) => None,
            }
        };

        let result = match waited {
            Some((status, drained)) => {
                if drained {
                    // Leader reaped and every pipe closed: nothing is known to
                    // be left in the group.
                    tree.release();
                } else {
                    debug!(program, "output still held open after exit, killing process group");
                    tree.kill();
                }
                match status {
                    Ok(status) => match status.code() {
                        Some(code) => CommandResult::exited(stdout, stderr, code),
                        None => abnormal_exit(stdout, stderr, status),
                    },
                    Err(e) => CommandResult::abnormal(stdout, stderr, format!("wait failed: {e}")),
                }
            }
            None => {
                warn!(
                    program,
                    timeout_secs = self.config.timeout.as_secs_f64(),
                    "tool command timed out, killing process group"
                );
                // The leader is still unreaped here, so the group id cannot
                // have been recycled.
                tree.kill();
                let _ = child.start_kill();
                if let Err(e) = child.wait().await {
                    warn!(program, "failed to reap timed-out command: {e}");
                }
                CommandResult::timed_out(stdout, stderr, self.config.timeout)
            }
        };

        info!(
            program,
            ok = result.ok,
            exit_code = result.exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "tool command finished"
        );
        result
    }
}

#[cfg(unix)]
fn abnormal_exit(stdout: Vec<u8>, stderr: Vec<u8>, status: std::process::ExitStatus) -> CommandResult {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => CommandResult::signaled(stdout, stderr, signal),
        None => CommandResult::abnormal(stdout, stderr, status.to_string()),
    }
}

#[cfg(not(unix))]
fn abnormal_exit(stdout: Vec<u8>, stderr: Vec<u8>, status: std::process::ExitStatus) -> CommandResult {
    CommandResult::abnormal(stdout, stderr, status.to_string())
}

/// Read `reader` to EOF, keeping at most `cap` bytes in `sink`. The surplus is
/// read and dropped so the child never stalls on a full pipe.
async fn capture<R>(reader: Option<&mut R>, sink: &mut Vec<u8>, cap: usize, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut chunk = [0u8; READ_CHUNK];
    let mut dropped = 0usize;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let keep = n.min(cap.saturating_sub(sink.len()));
                sink.extend_from_slice(&chunk[..keep]);
                dropped += n - keep;
            }
            Err(e) => {
                warn!(stream, "tool output read failed: {e}");
                break;
            }
        }
    }
    if dropped > 0 {
        warn!(stream, cap, dropped, "tool output truncated");
    }
}

/// Owns the command's process group and kills it on drop, unless released.
struct ProcessTree {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl ProcessTree {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    /// Forget the group without signalling it. Used once the leader has been
    /// reaped and nothing is known to remain, since the id may then be reused.
    fn release(&mut self) {
        self.pgid = None;
    }

    /// Kill the group once; later calls and the drop are no-ops.
    #[cfg(unix)]
    fn kill(&mut self) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pgid) = self.pgid.take() {
            // ESRCH once the group is empty is expected.
            if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                debug!(pgid, "killpg: {e}");
            }
        }
    }

    // Without process groups, kill_on_drop on the child is all there is.
    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessTree {
    fn drop(&mut self) {
        self.kill();
    }
}
