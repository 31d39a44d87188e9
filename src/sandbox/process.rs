//! Child process spawning with captured output and timeouts.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::provider::ExecResult;

/// Default timeout for single commands.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for scripts.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default timeout for package installation.
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Exit code reported for a process killed after its timeout (128 + SIGKILL).
pub const TIMEOUT_EXIT_CODE: i32 = 137;

/// How long to keep draining pipes after the child exits normally.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// How long to keep draining pipes after the child was killed.
const KILLED_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Execution settings shared by the built-in providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecSettings {
    /// Default timeout for `exec`, in seconds.
    pub exec_timeout_secs: Option<u64>,
    /// Default timeout for `run_script`, in seconds.
    pub script_timeout_secs: Option<u64>,
    /// Timeout for package installation, in seconds.
    pub install_timeout_secs: Option<u64>,
    /// PATH used to look up interpreters and tools instead of the process PATH.
    pub search_path: Option<String>,
}

impl ExecSettings {
    pub fn exec_timeout(&self) -> Duration {
        self.exec_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXEC_TIMEOUT)
    }

    pub fn script_timeout(&self) -> Duration {
        self.script_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SCRIPT_TIMEOUT)
    }

    pub fn install_timeout(&self) -> Duration {
        self.install_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INSTALL_TIMEOUT)
    }
}

/// A fully resolved process invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl ProcessSpec {
    /// Creates a spec for `program` with the given timeout.
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            timeout,
        }
    }

    /// Sets the arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the working directory.
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Sets environment overrides.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// Builds the command line for a shell fragment plus quoted arguments.
///
/// Arguments are quoted for the shell picked by [`shell_invocation`]: POSIX
/// rules for `sh`, [`quote_for_cmd`] for `cmd`.
pub fn command_line(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        if cfg!(windows) {
            line.push_str(&quote_for_cmd(arg));
        } else {
            line.push_str(&shell_words::quote(arg));
        }
    }
    line
}

/// Quotes one argument for `cmd /C` using the MSVC argv rules.
///
/// Inside quotes cmd leaves `&`, `|`, `<` and `>` alone, but `%VAR%` is
/// still expanded.
pub fn quote_for_cmd(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && !arg
            .chars()
            .any(|c| c.is_whitespace() || "\"&|<>^()%!,;=".contains(c));
    if plain {
        return Cow::Borrowed(arg);
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(std::iter::repeat('\\').take(backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes * 2));
    out.push('"');
    Cow::Owned(out)
}

/// Returns the host shell and the arguments that make it run `line`.
pub fn shell_invocation(line: String) -> (PathBuf, Vec<String>) {
    if cfg!(windows) {
        (PathBuf::from("cmd"), vec!["/C".to_string(), line])
    } else {
        (PathBuf::from("sh"), vec!["-c".to_string(), line])
    }
}

/// Spawns the process and waits for it, capturing stdout and stderr.
///
/// Never fails: spawn errors come back as a result with exit code 1 and the
/// error in stderr. On timeout the child is killed and a note is appended to
/// stderr.
pub async fn run_captured(spec: ProcessSpec) -> ExecResult {
    let start = Instant::now();

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    // Lead a fresh process group so a timeout can take down everything the
    // shell started.
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(program = ?spec.program, cwd = ?spec.cwd, error = %e, "failed to spawn process");
            let reason = match &spec.cwd {
                Some(cwd) if !cwd.is_dir() => {
                    format!("working directory '{}' does not exist", cwd.display())
                }
                _ => e.to_string(),
            };
            return ExecResult::failure(
                format!("failed to spawn {}: {}", spec.program.display(), reason),
                start.elapsed(),
            );
        }
    };

    let stdout = Accumulator::default();
    let stderr = Accumulator::default();
    let stdout_task = child.stdout.take().map(|s| stdout.drain(s));
    let stderr_task = child.stderr.take().map(|s| stderr.drain(s));

    let mut timed_out = false;
    let mut wait_error = None;
    let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            wait_error = Some(e);
            None
        }
        Err(_) => {
            timed_out = true;
            tracing::warn!(
                program = ?spec.program,
                timeout_ms = spec.timeout.as_millis() as u64,
                "process timed out, killing"
            );
            kill_tree(&mut child);
            child.wait().await.ok()
        }
    };

    let grace = if timed_out {
        KILLED_DRAIN_GRACE
    } else {
        DRAIN_GRACE
    };
    finish(stdout_task, grace).await;
    finish(stderr_task, grace).await;

    let mut stderr = stderr.take();
    if let Some(e) = wait_error {
        push_note(&mut stderr, &format!("failed to wait for process: {}", e));
    }
    if timed_out {
        push_note(
            &mut stderr,
            &format!(
                "process timed out after {} ms and was killed",
                spec.timeout.as_millis()
            ),
        );
    }

    let exit_code = match status {
        _ if timed_out => TIMEOUT_EXIT_CODE,
        Some(status) => exit_code(status),
        None => 1,
    };

    ExecResult {
        stdout: stdout.take(),
        stderr,
        exit_code,
        duration: start.elapsed(),
        timed_out,
    }
}

/// Kills the child together with every process it started.
fn kill_tree(child: &mut Child) {
    if kill_process_group(child) {
        return;
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "failed to signal timed-out process");
    }
}

/// Sends SIGKILL to the child's process group. The child was spawned as the
/// group leader, so the group id is its pid.
#[cfg(unix)]
fn kill_process_group(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: killpg only sends a signal. The child has not been reaped yet,
    // so the group id still belongs to it.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc == -1 {
        tracing::debug!(
            error = %std::io::Error::last_os_error(),
            "failed to signal process group"
        );
        return false;
    }
    true
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) -> bool {
    false
}

/// Maps an exit status to a numeric code, using 128 + signal for killed processes.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

fn push_note(stderr: &mut String, note: &str) {
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str("[sandbox] ");
    stderr.push_str(note);
    stderr.push('\n');
}

async fn finish(task: Option<JoinHandle<()>>, grace: Duration) {
    let Some(mut task) = task else {
        return;
    };
    if tokio::time::timeout(grace, &mut task).await.is_err() {
        // A grandchild still holds the pipe open; keep what was read so far.
        task.abort();
    }
}

/// Output buffer filled incrementally by a reader task.
#[derive(Clone, Default)]
struct Accumulator(Arc<Mutex<Vec<u8>>>);

impl Accumulator {
    fn drain<R>(&self, mut reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = self.0.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        tracing::debug!(error = %e, "error reading process output");
                        break;
                    }
                }
            }
        })
    }

    fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.0.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
