use crate::config::{Confinement, SandboxConfig};
use crate::error::ExecError;
use crate::protocol::{self, SandboxResult};
use std::io::{self, Read};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
#[cfg(not(target_os = "linux"))]
use wait_timeout::ChildExt;

/// How long pipes may stay open after the runner exits before the
/// invocation is treated as hung.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Everything needed to launch one confined runner process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxInvocation {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    policy_path: Option<PathBuf>,
}

impl SandboxInvocation {
    pub fn new(config: &SandboxConfig, script_path: &Path) -> Self {
        let script = script_path.display().to_string();
        let runner = config.runner_bin.display().to_string();

        match &config.confinement {
            Confinement::Jailed => {
                let mut args = vec![
                    "--config".to_string(),
                    config.policy_path.display().to_string(),
                ];
                for entry in &config.jail_env {
                    args.push("--env".to_string());
                    args.push(entry.clone());
                }
                args.push("--".to_string());
                args.push(runner);
                args.push(script);

                Self {
                    program: config.jail_bin.clone(),
                    args,
                    timeout: config.timeout,
                    policy_path: Some(config.policy_path.clone()),
                }
            }
            #[cfg(feature = "unconfined")]
            Confinement::Unconfined => Self {
                program: runner,
                args: vec![script],
                timeout: config.timeout,
                policy_path: None,
            },
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn policy_path(&self) -> Option<&Path> {
        self.policy_path.as_deref()
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        // Own process group so a timeout can take down anything the script forks.
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Run the sandbox runner against a staged script and classify the outcome.
///
/// Blocks the calling thread for at most the configured timeout plus the time
/// it takes to reap the killed process group. Exactly one process is spawned;
/// failures are never retried.
pub fn invoke(config: &SandboxConfig, script_path: &Path) -> Result<SandboxResult, ExecError> {
    let invocation = SandboxInvocation::new(config, script_path);
    if invocation.policy_path().is_none() {
        warn!("executing script without confinement wrapper");
    }
    run(&invocation, config.max_output_bytes)
}

fn run(invocation: &SandboxInvocation, output_limit: usize) -> Result<SandboxResult, ExecError> {
    debug!(command = %invocation.command_line(), "spawning sandbox");

    let start = Instant::now();
    let deadline = start + invocation.timeout();

    let mut child = invocation.command().spawn().map_err(|err| {
        error!(program = %invocation.program(), error = %err, "failed to spawn sandbox");
        ExecError::environment(format!(
            "Failed to spawn '{}': {}",
            invocation.program(),
            err
        ))
    })?;

    let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => {
            terminate(&mut child);
            return Err(ExecError::internal("sandbox pipes were not captured"));
        }
    };
    let streams = StreamCollector::spawn(stdout, stderr, output_limit);

    let status = match wait_for_exit(&mut child, invocation.timeout()) {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate(&mut child);
            info!(
                timeout_ms = invocation.timeout().as_millis() as u64,
                "sandbox exceeded time limit"
            );
            return Err(ExecError::time_limit());
        }
        Err(err) => {
            terminate(&mut child);
            return Err(ExecError::internal(format!(
                "Failed to wait for sandbox: {}",
                err
            )));
        }
    };

    let Some(logs) = streams.collect(deadline + OUTPUT_GRACE) else {
        info!("sandbox output still open at deadline");
        return Err(ExecError::time_limit());
    };
    let logs = logs.map_err(|err| {
        ExecError::internal(format!("Failed to read sandbox output: {}", err))
    })?;

    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    debug!(
        exit_code = ?status.code(),
        duration_ms,
        stdout_bytes = logs.stdout.len(),
        stderr_bytes = logs.stderr.len(),
        "sandbox exited"
    );

    classify(status, logs, output_limit)
}

fn classify(
    status: ExitStatus,
    logs: CommandLogs,
    output_limit: usize,
) -> Result<SandboxResult, ExecError> {
    if !status.success() {
        warn!(
            exit_code = ?status.code(),
            stderr = %protocol::truncate(&logs.stderr, 2048),
            "sandbox exited with failure"
        );
        return Err(protocol::classify_failure(&logs.stderr));
    }

    if logs.stdout_truncated {
        return Err(ExecError::script(format!(
            "Script output exceeded the {} byte limit",
            output_limit
        )));
    }

    protocol::parse_envelope(&logs.stdout).map_err(|err| {
        error!(
            error = %err,
            detail = err.detail().unwrap_or_default(),
            "sandbox violated output protocol"
        );
        err
    })
}

/// Poll interval while waiting for the runner to exit.
#[cfg(target_os = "linux")]
const EXIT_POLL: Duration = Duration::from_millis(5);

/// Wait up to `timeout` for the child to exit, then kill whatever it left
/// running in its process group and reap it. `None` on timeout, with the
/// child still running.
///
/// The group is signalled while the exited leader is still a zombie: its pid
/// stays allocated until reaped, so the group id cannot have been recycled
/// by another invocation.
#[cfg(target_os = "linux")]
fn wait_for_exit(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if has_exited(child)? {
            kill_process_group(child);
            return child.wait().map(Some);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL.min(deadline - now));
    }
}

/// Whether the child has exited, without reaping it.
#[cfg(target_os = "linux")]
fn has_exited(child: &Child) -> io::Result<bool> {
    // SAFETY: siginfo_t is plain data; all-zero is a valid value and lets a
    // zero si_pid mean "no state change" under WNOHANG.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    // SAFETY: `info` is a valid, writable siginfo_t and the pid is our own
    // unreaped child.
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            child.id() as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: waitid filled `info` for a child state change, or left it zeroed.
    Ok(unsafe { info.si_pid() } != 0)
}

/// Elsewhere the leader is reaped first, so the straggler kill is best effort.
#[cfg(not(target_os = "linux"))]
fn wait_for_exit(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let status = child.wait_timeout(timeout)?;
    if status.is_some() {
        kill_process_group(child);
    }
    Ok(status)
}

fn terminate(child: &mut Child) {
    kill_process_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions; the group id is the
    // pid of a child we spawned as its own group leader.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

#[derive(Debug, Clone, Default)]
struct CommandLogs {
    stdout: String,
    stderr: String,
    stdout_truncated: bool,
}

#[derive(Debug)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Drains both pipes on their own threads so neither can fill up and stall
/// the child, while the caller waits with a deadline.
struct StreamCollector {
    stdout: Receiver<io::Result<Captured>>,
    stderr: Receiver<io::Result<Captured>>,
}

impl StreamCollector {
    fn spawn(stdout: ChildStdout, stderr: ChildStderr, limit: usize) -> Self {
        Self {
            stdout: drain(stdout, limit, read_capped),
            stderr: drain(stderr, limit, read_tail),
        }
    }

    /// `None` when the deadline passes before both pipes reach EOF.
    fn collect(self, deadline: Instant) -> Option<io::Result<CommandLogs>> {
        let stdout = receive(&self.stdout, deadline)?;
        let stderr = receive(&self.stderr, deadline)?;

        Some(stdout.and_then(|stdout| {
            let stderr = stderr?;
            Ok(CommandLogs {
                stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
                stdout_truncated: stdout.truncated,
            })
        }))
    }
}

fn receive(
    rx: &Receiver<io::Result<Captured>>,
    deadline: Instant,
) -> Option<io::Result<Captured>> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(result) => Some(result),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "output reader exited without a result",
        ))),
    }
}

fn drain<R: Read + Send + 'static>(
    mut pipe: R,
    limit: usize,
    read: fn(&mut R, usize) -> io::Result<Captured>,
) -> Receiver<io::Result<Captured>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = read(&mut pipe, limit);
        let _ = tx.send(result);
    });
    rx
}

fn read_capped<R: Read>(pipe: &mut R, limit: usize) -> io::Result<Captured> {
    let mut bytes = Vec::new();
    pipe.by_ref()
        .take(limit as u64 + 1)
        .read_to_end(&mut bytes)?;

    let truncated = bytes.len() > limit;
    if truncated {
        bytes.truncate(limit);
        // Keep draining so the child never blocks on a full pipe.
        io::copy(pipe, &mut io::sink())?;
    }

    Ok(Captured { bytes, truncated })
}

/// Keeps the last `limit` bytes. Used for stderr, whose final line is the
/// summary surfaced to the caller.
fn read_tail<R: Read>(pipe: &mut R, limit: usize) -> io::Result<Captured> {
    let mut bytes = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        let read = match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        bytes.extend_from_slice(&chunk[..read]);
        // Trim in batches so the buffer never grows past twice the limit.
        if bytes.len() > limit.saturating_mul(2) {
            bytes.drain(..bytes.len() - limit);
            truncated = true;
        }
    }

    if bytes.len() > limit {
        bytes.drain(..bytes.len() - limit);
        truncated = true;
    }

    Ok(Captured { bytes, truncated })
}
