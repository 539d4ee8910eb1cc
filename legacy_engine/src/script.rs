//! Script execution.
//!
//! A [`ScriptRuntime`] turns `(module, snapshot document)` into a response
//! document. The [`ScriptExecutor`] wraps every invocation in a worker thread
//! with a hard deadline so that no module failure, hang or panic can reach
//! the host. Whatever happens, the caller gets a [`ModuleOutcome`].

pub mod process_runtime;
pub mod rhai_runtime;

pub use process_runtime::ProcessRuntime;
pub use rhai_runtime::RhaiRuntime;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use crate::command::Command;
use crate::hooks::ModuleSpec;
use crate::snapshot::parse_response;

/// What a runtime hands back from one successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// The response document.
    pub stdout: String,
    /// Console lines the module produced.
    pub log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("deadline exceeded")]
    Timeout,
    #[error("cannot read module source '{path}': {message}")]
    SourceUnavailable { path: PathBuf, message: String },
    #[error("{0}")]
    Script(String),
    #[error("runtime failure: {0}")]
    Io(String),
}

/// Text in, text out. Implementations must not touch engine state.
pub trait ScriptRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `module` against `snapshot_doc` and return its response document.
    ///
    /// `deadline` is advisory; the executor enforces the hard limit.
    ///
    /// # Errors
    /// - any [`RuntimeError`]; the executor maps it to a [`ModuleError`]
    fn invoke(
        &self,
        module: &ModuleSpec,
        snapshot_doc: &str,
        event: &str,
        deadline: Instant,
    ) -> Result<RawOutput, RuntimeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("malformed output: {0}")]
    MalformedOutput(String),
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Result of one module invocation. `commands` is empty whenever `error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOutcome {
    pub module_id: String,
    pub commands: Vec<Command>,
    pub log: Vec<String>,
    pub error: Option<ModuleError>,
    pub schema_version: Option<u32>,
    pub elapsed: Duration,
}

impl ModuleOutcome {
    fn failed(module_id: &str, error: ModuleError, log: Vec<String>, elapsed: Duration) -> Self {
        Self {
            module_id: module_id.to_string(),
            commands: Vec::new(),
            log,
            error: Some(error),
            schema_version: None,
            elapsed,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs modules one at a time behind a hard timeout.
#[derive(Clone)]
pub struct ScriptExecutor {
    runtime: Arc<dyn ScriptRuntime>,
    default_timeout: Duration,
    kill_grace: Duration,
}

impl std::fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("runtime", &self.runtime.name())
            .field("default_timeout", &self.default_timeout)
            .field("kill_grace", &self.kill_grace)
            .finish()
    }
}

impl ScriptExecutor {
    pub fn new(runtime: Arc<dyn ScriptRuntime>, default_timeout: Duration, kill_grace: Duration) -> Self {
        Self {
            runtime,
            default_timeout,
            kill_grace,
        }
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    /// Timeout for `module`: its own setting, or the executor default.
    pub fn timeout_for(&self, module: &ModuleSpec) -> Duration {
        module.timeout_ms.map_or(self.default_timeout, Duration::from_millis)
    }

    /// Invoke `module` and collect everything it produced. Never fails.
    pub fn run(&self, module: &ModuleSpec, snapshot_doc: &str, event: &str) -> ModuleOutcome {
        let timeout = self.timeout_for(module);
        let started = Instant::now();
        let deadline = started + timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        let (tx, rx) = mpsc::channel();
        let runtime = Arc::clone(&self.runtime);
        let worker_module = module.clone();
        let doc = snapshot_doc.to_string();
        let worker_event = event.to_string();
        let spawned = thread::Builder::new()
            .name(format!("module-{}", module.id))
            .spawn(move || {
                let result = runtime.invoke(&worker_module, &doc, &worker_event, deadline);
                // The receiver is gone if the host already gave up on us.
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return ModuleOutcome::failed(
                &module.id,
                ModuleError::Runtime(format!("spawning worker: {e}")),
                Vec::new(),
                started.elapsed(),
            );
        }

        let received = rx.recv_timeout(timeout + self.kill_grace);
        let elapsed = started.elapsed();
        let outcome = match received {
            Ok(Ok(raw)) => match parse_response(&raw.stdout) {
                Ok(response) => ModuleOutcome {
                    module_id: module.id.clone(),
                    commands: response.commands,
                    log: raw.log,
                    error: None,
                    schema_version: Some(response.schema_version),
                    elapsed,
                },
                Err(e) => ModuleOutcome::failed(&module.id, ModuleError::MalformedOutput(e.to_string()), raw.log, elapsed),
            },
            Ok(Err(RuntimeError::Timeout)) | Err(RecvTimeoutError::Timeout) => {
                ModuleOutcome::failed(&module.id, ModuleError::Timeout(timeout_ms), Vec::new(), elapsed)
            },
            Ok(Err(RuntimeError::SourceUnavailable { path, message })) => ModuleOutcome::failed(
                &module.id,
                ModuleError::SourceUnavailable(format!("{}: {message}", path.display())),
                Vec::new(),
                elapsed,
            ),
            Ok(Err(e @ (RuntimeError::Script(_) | RuntimeError::Io(_)))) => {
                ModuleOutcome::failed(&module.id, ModuleError::Runtime(e.to_string()), Vec::new(), elapsed)
            },
            Err(RecvTimeoutError::Disconnected) => ModuleOutcome::failed(
                &module.id,
                ModuleError::Runtime("runtime panicked".to_string()),
                Vec::new(),
                elapsed,
            ),
        };

        match &outcome.error {
            None => debug!(
                "module '{}' returned {} command(s) in {:?}",
                module.id,
                outcome.commands.len(),
                elapsed
            ),
            Some(err) => warn!("module '{}' failed on {event}: {err}", module.id),
        }
        outcome
    }
}
