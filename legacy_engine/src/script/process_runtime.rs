//! External-process runtime.
//!
//! Runs `program args... <module source>` as a child process. The snapshot
//! document goes to stdin, the response document is read from stdout, and
//! every stderr line becomes a log line. The child gets an empty environment
//! apart from `PATH`.
//!
//! On unix the child leads its own process group. The whole group is killed
//! once the deadline passes, and again after a normal exit so that nothing a
//! module forked outlives the invocation.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::{RawOutput, RuntimeError, ScriptRuntime};
use crate::hooks::ModuleSpec;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Extra time allowed for the output pipes to drain after the child exits.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRuntime {
    program: String,
    args: Vec<String>,
}

impl ProcessRuntime {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn spawn(&self, module: &ModuleSpec) -> Result<Child, RuntimeError> {
        let mut command = ProcessCommand::new(&self.program);
        command
            .args(&self.args)
            .arg(&module.source)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        own_process_group(&mut command);
        command
            .spawn()
            .map_err(|e| RuntimeError::Io(format!("spawning '{}': {e}", self.program)))
    }
}

impl ScriptRuntime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    fn invoke(
        &self,
        module: &ModuleSpec,
        snapshot_doc: &str,
        _event: &str,
        deadline: Instant,
    ) -> Result<RawOutput, RuntimeError> {
        if !module.source.is_file() {
            return Err(RuntimeError::SourceUnavailable {
                path: module.source.clone(),
                message: "no such file".to_string(),
            });
        }
        let mut child = self.spawn(module)?;

        // Feed stdin from its own thread so a child that never reads cannot block us.
        if let Some(mut stdin) = child.stdin.take() {
            let doc = snapshot_doc.to_string();
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(doc.as_bytes()) {
                    debug!("child closed stdin early: {e}");
                }
            });
        }
        let stdout = child.stdout.take().map(|mut out| {
            read_in_background(move || {
                let mut buf = String::new();
                out.read_to_string(&mut buf).map(|_| buf)
            })
        });
        let stderr = child
            .stderr
            .take()
            .map(|err| read_in_background(move || BufReader::new(err).lines().map_while(Result::ok).collect::<Vec<_>>()));

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!("killing module '{}' past its deadline", module.id);
                    kill_group(&child);
                    if let Err(e) = child.kill() {
                        warn!("failed to kill module '{}': {e}", module.id);
                    }
                    let _ = child.wait();
                    return Err(RuntimeError::Timeout);
                },
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(RuntimeError::Io(format!("waiting for child: {e}"))),
            }
        };
        // Anything the module left running would hold the pipes open.
        kill_group(&child);

        let drain_until = deadline.max(Instant::now()) + DRAIN_GRACE;
        let stdout = match stdout {
            Some(rx) => match receive_until(&rx, drain_until) {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(RuntimeError::Io(format!("reading stdout: {e}"))),
                None => {
                    warn!("module '{}' exited but its stdout never closed", module.id);
                    return Err(RuntimeError::Timeout);
                },
            },
            None => String::new(),
        };
        let log = stderr.and_then(|rx| receive_until(&rx, drain_until)).unwrap_or_default();

        if !status.success() {
            let detail = log.last().cloned().unwrap_or_else(|| status.to_string());
            return Err(RuntimeError::Script(format!("exited with {status}: {detail}")));
        }
        Ok(RawOutput { stdout, log })
    }
}

fn read_in_background<T, F>(read: F) -> Receiver<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read());
    });
    rx
}

/// `None` if nothing arrived by `until` or the reader died.
fn receive_until<T>(rx: &Receiver<T>, until: Instant) -> Option<T> {
    rx.recv_timeout(until.saturating_duration_since(Instant::now())).ok()
}

#[cfg(unix)]
fn own_process_group(command: &mut ProcessCommand) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut ProcessCommand) {}

/// SIGKILL every process left in the child's group.
#[cfg(unix)]
fn kill_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) only signals; the group was created for this child by `own_process_group`.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        debug!("killed process group {pgid}");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}
