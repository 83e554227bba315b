//! One supervised child process: its lifecycle, its output, and its
//! published status.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::output::{OutputBuffer, OutputWriter};
use crate::error::JobError;

/// Exit code sentinel published before the child's real exit status is
/// observed (spawn failure, or a supervision failure that never learned
/// a code).
pub const NO_EXIT_CODE: i64 = -1;

/// A job's lifecycle state. Monotone along
/// `Pending -> Running -> {Complete | Error}`; `Pending` may also go
/// directly to `Error` if spawning fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl JobStatus {
    /// The wire representation used on the RPC surface (spec.md §6).
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

struct JobState {
    status: JobStatus,
    exit_code: i64,
    error: String,
    pid: Option<u32>,
}

/// One supervised child process plus its metadata and captured output.
pub struct Job {
    id: String,
    client_id: String,
    command: String,
    args: Vec<String>,
    output: OutputBuffer,
    state: RwLock<JobState>,
    started: AtomicBool,
}

impl Job {
    /// Construct a new job in the `Pending` state. Fails only if the
    /// backing `OutputBuffer` cannot be created.
    pub fn new(client_id: String, command: String, args: Vec<String>) -> Result<Self, JobError> {
        let output = OutputBuffer::create()?;
        Ok(Job {
            id: Uuid::new_v4().to_string(),
            client_id,
            command,
            args,
            output,
            state: RwLock::new(JobState {
                status: JobStatus::Pending,
                exit_code: NO_EXIT_CODE,
                error: String::new(),
                pid: None,
            }),
            started: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn status(&self) -> JobStatus {
        self.state.read().expect("job state lock poisoned").status
    }

    /// Populated only once `status` has advanced past `Running`.
    pub fn exit_code(&self) -> i64 {
        self.state.read().expect("job state lock poisoned").exit_code
    }

    /// Populated only once `status` is `Error`.
    pub fn error(&self) -> String {
        self.state
            .read()
            .expect("job state lock poisoned")
            .error
            .clone()
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// Spawn the child and drive it to completion. Blocking; callers
    /// run this on a dedicated thread so `Exec` can return immediately.
    /// Idempotent: a second call is a no-op.
    pub fn start(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(job_id = %self.id, error = %err, "spawn failed");
                self.finish_error(format!("spawn failed: {err}"), None);
                return;
            }
        };

        let pid = child.id();
        {
            let mut state = self.state.write().expect("job state lock poisoned");
            state.status = JobStatus::Running;
            state.pid = Some(pid);
        }
        info!(job_id = %self.id, pid, command = %self.command, "job running");

        let writer = match self.output.open_writer() {
            Ok(w) => Arc::new(Mutex::new(w)),
            Err(err) => {
                warn!(job_id = %self.id, error = %err.to_string(), "failed to open output writer");
                let _ = child.kill();
                let _ = child.wait();
                self.finish_error(format!("failed to open output buffer: {err}"), None);
                return;
            }
        };

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(spawn_drain(stdout, "stdout", writer.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(spawn_drain(stderr, "stderr", writer.clone()));
        }

        let exit = wait_child(&mut child);

        let mut drain_errors = Vec::new();
        for drain in drains {
            match drain.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => drain_errors.push(err),
                Err(panic) => {
                    error!(job_id = %self.id, ?panic, "drain thread panicked");
                    drain_errors.push("drain thread panicked".to_string());
                }
            }
        }

        writer.lock().expect("output writer lock poisoned").close();

        match exit {
            Ok(code) if drain_errors.is_empty() => {
                let mut state = self.state.write().expect("job state lock poisoned");
                state.status = JobStatus::Complete;
                state.exit_code = code;
                debug!(job_id = %self.id, exit_code = code, "job complete");
            }
            Ok(code) => {
                let message = drain_errors.join("; ");
                warn!(job_id = %self.id, error = %message, "supervision failure draining output");
                self.finish_error(message, Some(code));
            }
            Err(err) => {
                let message = if drain_errors.is_empty() {
                    err
                } else {
                    format!("{err}; {}", drain_errors.join("; "))
                };
                warn!(job_id = %self.id, error = %message, "supervision failure");
                self.finish_error(message, None);
            }
        }
    }

    /// Publish a terminal `Error` status. `exit_code` is set only when
    /// the child's real exit code is known (e.g. it exited but output
    /// draining failed); otherwise the `NO_EXIT_CODE` sentinel stands.
    fn finish_error(&self, message: String, exit_code: Option<i64>) {
        let mut state = self.state.write().expect("job state lock poisoned");
        state.status = JobStatus::Error;
        state.error = message;
        if let Some(code) = exit_code {
            state.exit_code = code;
        }
    }

    /// Send SIGINT (or platform equivalent). Requires `Running`.
    pub fn interrupt(&self) -> Result<(), JobError> {
        self.signal(Signal::Interrupt)
    }

    /// Send SIGKILL (or platform equivalent). Requires `Running`.
    pub fn kill(&self) -> Result<(), JobError> {
        self.signal(Signal::Kill)
    }

    fn signal(&self, signal: Signal) -> Result<(), JobError> {
        let pid = {
            let state = self.state.read().expect("job state lock poisoned");
            if state.status != JobStatus::Running {
                return Err(JobError::InvalidState);
            }
            state.pid.ok_or(JobError::InvalidState)?
        };
        send_signal(pid, signal).map_err(|e| JobError::Signal(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn force_id_for_test(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Interrupt,
    Kill,
}

fn wait_child(child: &mut Child) -> Result<i64, String> {
    match child.wait() {
        Ok(status) => Ok(exit_code_of(status)),
        Err(err) => Err(format!("wait failed: {err}")),
    }
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i64 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        code as i64
    } else if let Some(signal) = status.signal() {
        // Conventional shell-style encoding for death-by-signal.
        128 + signal as i64
    } else {
        NO_EXIT_CODE
    }
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i64 {
    status.code().map(|c| c as i64).unwrap_or(NO_EXIT_CODE)
}

/// Drain one pipe into the shared output writer until EOF or failure.
/// The returned `JoinHandle` carries the outcome back to `start()` so a
/// mid-job storage or pipe failure is folded into the job's terminal
/// status instead of silently truncating its output (spec.md §4.1,
/// §4.2's "supervision failure" row).
fn spawn_drain<R>(
    mut pipe: R,
    label: &'static str,
    writer: Arc<Mutex<OutputWriter>>,
) -> std::thread::JoinHandle<Result<(), String>>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    let mut w = writer.lock().expect("output writer lock poisoned");
                    if let Err(err) = w.append(&buf[..n]) {
                        warn!(label, error = %err.to_string(), "output append failed");
                        return Err(format!("{label} append failed: {err}"));
                    }
                }
                Err(err) => {
                    warn!(label, error = %err, "pipe read failed");
                    return Err(format!("{label} read failed: {err}"));
                }
            }
        }
    })
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> std::io::Result<()> {
    let signum = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) is safe to call with any pid and a valid signal number.
    let ret = unsafe { libc::kill(pid as libc::pid_t, signum) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(windows)]
fn send_signal(pid: u32, _signal: Signal) -> std::io::Result<()> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, false, pid)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let result = TerminateProcess(handle, 1);
        let _ = CloseHandle(handle);
        result.map_err(|e| std::io::Error::other(e.to_string()))
    }
}

#[cfg(not(any(unix, windows)))]
fn send_signal(_pid: u32, _signal: Signal) -> std::io::Result<()> {
    Err(std::io::Error::other("signalling not supported on this platform"))
}
