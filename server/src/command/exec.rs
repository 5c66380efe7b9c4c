//! Process execution for one command
//!
//! An [`Execution`] owns one child process. It runs the argv literally (no
//! shell), captures stdout and stderr line by line, and records pid, start
//! time, stop time, exit code and error text in a [`Snapshot`] that can be
//! read at any time without blocking on the process.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rce_shared::state_machine::derive_state;
use rce_shared::{now_ns, State, EXIT_CODE_UNSET};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

/// Live view of an execution, copied out under the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub pid: i64,
    /// Unix nanoseconds, zero until the process is launched
    pub start_time: i64,
    /// Unix nanoseconds, zero until the process exited and its output drained
    pub stop_time: i64,
    pub exit_code: i64,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub error: String,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            pid: 0,
            start_time: 0,
            stop_time: 0,
            exit_code: EXIT_CODE_UNSET,
            stdout: Vec::new(),
            stderr: Vec::new(),
            error: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Output {
    Stdout,
    Stderr,
}

struct ExecInner {
    path: String,
    args: Vec<String>,
    snapshot: Mutex<Snapshot>,
    launched: AtomicBool,
    done: watch::Sender<bool>,
    terminate: Notify,
}

impl ExecInner {
    fn update<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> T {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut snapshot)
    }
}

/// One process execution. Cheap to clone; clones share the same process.
#[derive(Clone)]
pub struct Execution {
    inner: Arc<ExecInner>,
}

impl Execution {
    /// Prepare an execution of `path` with `args`. Nothing runs until [`start`](Self::start).
    pub fn new(path: impl Into<String>, args: Vec<String>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(ExecInner {
                path: path.into(),
                args,
                snapshot: Mutex::new(Snapshot::default()),
                launched: AtomicBool::new(false),
                done,
                terminate: Notify::new(),
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Launch the process on the current tokio runtime and return immediately.
    /// Calling it again is a no-op.
    ///
    /// Fails without launching anything when called outside a runtime.
    pub fn start(&self) -> Result<(), TryCurrentError> {
        let runtime = Handle::try_current()?;
        if self.inner.launched.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        runtime.spawn(run(self.inner.clone()));
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.update(|s| s.clone())
    }

    /// Current lifecycle state, without copying the captured output
    pub fn state(&self) -> State {
        self.inner
            .update(|s| derive_state(s.start_time, s.stop_time, s.exit_code))
    }

    /// True once the process exited (or failed to launch) and its output is drained
    pub fn is_done(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// Resolve once the execution is done. Any number of callers may wait.
    pub async fn done(&self) {
        let mut rx = self.inner.done.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Ask the process to terminate (SIGTERM on unix)
    ///
    /// A no-op unless the process is running: before launch and after exit
    /// nothing is signalled.
    pub fn terminate(&self) {
        let running = self.inner.update(|s| s.start_time > 0 && s.stop_time == 0);
        if running && !self.is_done() {
            self.inner.terminate.notify_one();
        }
    }
}

async fn run(inner: Arc<ExecInner>) {
    let mut command = Command::new(&inner.path);
    command
        .args(&inner.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(path = %inner.path, error = %e, "failed to launch command");
            let now = now_ns();
            inner.update(|s| {
                s.start_time = now;
                s.stop_time = now;
                s.exit_code = EXIT_CODE_UNSET;
                s.error = format!("{}: {}", inner.path, e);
            });
            inner.done.send_replace(true);
            return;
        }
    };

    let pid = child.id().map_or(0, i64::from);
    inner.update(|s| {
        s.pid = pid;
        s.start_time = now_ns();
    });
    debug!(path = %inner.path, pid, "command launched");

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(collect_lines(stdout, inner.clone(), Output::Stdout)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(collect_lines(stderr, inner.clone(), Output::Stderr)));
    }

    let result = loop {
        tokio::select! {
            result = child.wait() => break result,
            _ = inner.terminate.notified() => send_terminate(&mut child),
        }
    };

    // Stop time is only recorded once all output has been captured
    futures::future::join_all(readers).await;

    let stop_time = now_ns();
    inner.update(|s| {
        match result {
            Ok(status) => {
                s.exit_code = exit_code(status);
                if let Some(reason) = signal_reason(status) {
                    s.error = reason;
                }
            }
            Err(e) => {
                s.exit_code = EXIT_CODE_UNSET;
                s.error = e.to_string();
            }
        }
        s.stop_time = stop_time.max(s.start_time + 1);
    });
    inner.done.send_replace(true);
    debug!(path = %inner.path, pid, "command finished");
}

async fn collect_lines<R: AsyncRead + Unpin>(stream: R, inner: Arc<ExecInner>, output: Output) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.ends_with(b"\n") {
                    buf.pop();
                    if buf.ends_with(b"\r") {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                inner.update(|s| match output {
                    Output::Stdout => s.stdout.push(line),
                    Output::Stderr => s.stderr.push(line),
                });
            }
            Err(e) => {
                warn!(path = %inner.path, ?output, error = %e, "output capture stopped");
                break;
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i64 {
    status.code().map_or(EXIT_CODE_UNSET, i64::from)
}

#[cfg(unix)]
fn signal_reason(status: ExitStatus) -> Option<String> {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|sig| match Signal::try_from(sig) {
        Ok(signal) => format!("terminated by {signal:?}"),
        Err(_) => format!("terminated by signal {sig}"),
    })
}

#[cfg(not(unix))]
fn signal_reason(_status: ExitStatus) -> Option<String> {
    None
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // id() is None once the child has been reaped, then there is nothing to signal
    let Some(pid) = child.id() else {
        return;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "failed to send SIGTERM"),
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to kill command");
    }
}
