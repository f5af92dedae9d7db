//! Supervised execution of external tool commands.
//!
//! Every invocation runs as the leader of its own process group so a timeout
//! can take down the whole tree the tool spawned, not just the direct child.
//! On timeout the group receives SIGTERM, then SIGKILL once the grace period
//! runs out.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use tf_core::error::describe_duration;
use tf_core::{Error, Result};

/// Default time between SIGTERM and SIGKILL.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long the output pipes may stay open after the tool itself exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Wall-clock time from spawn to exit.
    pub elapsed: Duration,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use std::path::PathBuf;
/// use std::time::Duration;
/// use tf_av::ToolCommand;
///
/// # async fn example() -> tf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-i").arg("/tmp/ffmpeg_api/input.wav")
///     .arg("-filter:a").arg("loudnorm")
///     .arg("/tmp/ffmpeg_api/normalized.wav")
///     .timeout(Some(Duration::from_secs(600)))
///     .execute()
///     .await?;
/// println!("{}", output.stderr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    grace_period: Duration,
}

impl ToolCommand {
    /// Create a new, unbounded command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the wall-clock bound. `None` waits for as long as the tool runs.
    pub fn timeout(&mut self, d: Option<Duration>) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Set the time a timed-out group gets between SIGTERM and SIGKILL.
    pub fn grace_period(&mut self, d: Duration) -> &mut Self {
        self.grace_period = d;
        self
    }

    /// Short tool name used in errors and log fields.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// The command line as it would be typed into a shell.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().map(|a| quote(a)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Execute the command, capturing stdout and stderr in full.
    ///
    /// # Errors
    ///
    /// - [`Error::Spawn`] if the process cannot be started or waited on. The
    ///   process group is killed before returning.
    /// - [`Error::Execution`] if the process exits with a non-zero status;
    ///   carries the exit code and both streams.
    /// - [`Error::Timeout`] if the configured bound elapses. By the time this
    ///   is returned the whole process group has been terminated.
    pub async fn execute(&self) -> Result<ToolOutput> {
        let tool = self.tool_name();
        tracing::info!(tool = %tool, timeout = ?self.timeout, "Running {}", self.command_line());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(&tool, format!("failed to spawn: {e}")))?;

        // Killed on drop until disarmed, so a cancelled worker leaves nothing behind.
        let mut group = ProcessGroup::new(child.id());

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    self.terminate(&mut child, &group, &tool).await;
                    let (stdout, stderr) = drain(stdout, stderr, &group).await;
                    group.disarm();
                    tracing::warn!(
                        tool = %tool,
                        stdout = %stdout,
                        stderr = %stderr,
                        "Timed out after {}; process group terminated",
                        describe_duration(&limit)
                    );
                    return Err(Error::Timeout {
                        tool,
                        timeout: limit,
                    });
                }
            },
            None => child.wait().await,
        };

        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                group.signal(GroupSignal::Kill);
                let _ = child.start_kill();
                return Err(Error::spawn(
                    &tool,
                    format!("I/O error waiting for process: {e}"),
                ));
            }
        };

        let (stdout, stderr) = drain(stdout, stderr, &group).await;
        group.disarm();
        let elapsed = started.elapsed();

        if !status.success() {
            tracing::warn!(
                tool = %tool,
                code = ?status.code(),
                stdout = %stdout,
                stderr = %stderr,
                "Tool exited with {status}"
            );
            return Err(Error::Execution {
                tool,
                code: status.code(),
                stdout,
                stderr,
            });
        }

        tracing::debug!(tool = %tool, elapsed_ms = elapsed.as_millis() as u64, "Tool finished");
        Ok(ToolOutput {
            status,
            stdout,
            stderr,
            elapsed,
        })
    }

    /// Two-phase stop of a timed-out group. Returns once the leader is reaped.
    async fn terminate(&self, child: &mut Child, group: &ProcessGroup, tool: &str) {
        group.signal(GroupSignal::Terminate);

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(_) => tracing::info!(tool, "Process group exited after SIGTERM"),
            Err(_) => {
                tracing::warn!(
                    tool,
                    "Still running {} after SIGTERM; sending SIGKILL",
                    describe_duration(&self.grace_period)
                );
                group.signal(GroupSignal::Kill);
                let _ = child.start_kill();
                if let Err(e) = child.wait().await {
                    tracing::warn!(tool, "Failed to reap killed process: {e}");
                }
            }
        }

        // Descendants that ignored SIGTERM may outlive the leader.
        group.signal(GroupSignal::Kill);
    }
}

fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '\'') {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

// ---------------------------------------------------------------------------
// Output capture
// ---------------------------------------------------------------------------

fn spawn_reader<P>(pipe: Option<P>) -> JoinHandle<Vec<u8>>
where
    P: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                tracing::debug!("Error reading tool output: {e}");
            }
        }
        buf
    })
}

/// Collect both streams. If something still holds the pipes open after the
/// tool exited, the group is killed so the readers see EOF.
async fn drain(
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
    group: &ProcessGroup,
) -> (String, String) {
    let both = async {
        let out = stdout.await.unwrap_or_default();
        let err = stderr.await.unwrap_or_default();
        (out, err)
    };
    tokio::pin!(both);

    let (out, err) = match tokio::time::timeout(DRAIN_TIMEOUT, &mut both).await {
        Ok(pair) => pair,
        Err(_) => {
            tracing::warn!("Output pipes still open after exit; killing leftover processes");
            group.signal(GroupSignal::Kill);
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut both).await {
                Ok(pair) => pair,
                Err(_) => {
                    tracing::warn!("Giving up on tool output; a process escaped its group");
                    (Vec::new(), Vec::new())
                }
            }
        }
    };

    (
        String::from_utf8_lossy(&out).to_string(),
        String::from_utf8_lossy(&err).to_string(),
    )
}

// ---------------------------------------------------------------------------
// Process group signalling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// The child's process group. SIGKILLed on drop unless disarmed.
struct ProcessGroup {
    pgid: Option<u32>,
    armed: bool,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid,
            armed: true,
        }
    }

    fn signal(&self, sig: GroupSignal) {
        if let Some(pgid) = self.pgid {
            send_group_signal(pgid, sig);
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.armed {
            self.signal(GroupSignal::Kill);
        }
    }
}

#[cfg(unix)]
fn send_group_signal(pgid: u32, sig: GroupSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    let signal = match sig {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(raw), signal) {
        // ESRCH: the group is already gone.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid, ?signal, "Failed to signal process group: {e}"),
    }
}

#[cfg(not(unix))]
fn send_group_signal(_pgid: u32, _sig: GroupSignal) {}
