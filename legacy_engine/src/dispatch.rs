//! Trigger dispatch.
//!
//! [`ScriptHost::fire`] runs every module bound to an event, one after the
//! other, against live state:
//!
//! ```text
//! Idle -> Capturing -> Executing(module) -> Applying(module) -> ... -> Idle
//! ```
//!
//! Each module receives a fresh snapshot, so it sees every batch committed
//! earlier in the same chain. A failing module is recorded and skipped; a
//! failed capture abandons the rest of the chain.

use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::hooks::{HookBinding, HookRegistry};
use crate::merge::ResolvedDataset;
use crate::script::{ModuleError, ScriptExecutor};
use crate::snapshot::{CommitError, ModuleResponse, SNAPSHOT_SCHEMA_VERSION, StateSnapshotBridge, TriggerContext};
use crate::state::{EmittedEvent, EngineState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPhase {
    Idle,
    Capturing { module: String },
    Executing { module: String },
    Applying { module: String },
}

/// Why one module in a chain produced no state change.
#[derive(Debug, Error)]
pub enum ModuleFailure {
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error("batch rejected: {0}")]
    Commit(#[from] CommitError),
}

#[derive(Debug)]
pub struct ModuleReport {
    pub module_id: String,
    pub priority: i64,
    /// Commands committed to state.
    pub applied: usize,
    pub log: Vec<String>,
    pub failure: Option<ModuleFailure>,
    pub elapsed: Duration,
}

impl ModuleReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug)]
pub struct TriggerReport {
    pub event: String,
    pub modules: Vec<ModuleReport>,
    /// Events raised by scripts during this chain, in commit order.
    pub emitted: Vec<EmittedEvent>,
    /// Set when a capture failure stopped the chain early.
    pub aborted: Option<String>,
}

impl TriggerReport {
    fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            modules: Vec::new(),
            emitted: Vec::new(),
            aborted: None,
        }
    }

    /// Ids of modules in the order they ran.
    pub fn module_order(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.module_id.as_str()).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules.iter().filter(|m| !m.succeeded())
    }
}

/// Everything needed to run hook chains: bindings, a runtime and the bridge.
#[derive(Debug)]
pub struct ScriptHost {
    registry: HookRegistry,
    executor: ScriptExecutor,
    bridge: StateSnapshotBridge,
    phase: TriggerPhase,
}

impl ScriptHost {
    pub fn new(registry: HookRegistry, executor: ScriptExecutor, bridge: StateSnapshotBridge) -> Self {
        Self {
            registry,
            executor,
            bridge,
            phase: TriggerPhase::Idle,
        }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut HookRegistry {
        &mut self.registry
    }

    pub fn phase(&self) -> &TriggerPhase {
        &self.phase
    }

    /// Run the hook chain for `event`.
    ///
    /// Always returns to [`TriggerPhase::Idle`]. Emitted events are drained
    /// from `state` into the report; the caller decides whether to fire them.
    pub fn fire(
        &mut self,
        state: &mut EngineState,
        event: &str,
        payload: Value,
        dataset: Option<&ResolvedDataset>,
    ) -> TriggerReport {
        let mut report = TriggerReport::new(event);
        let bindings = self.registry.bindings_for(event);
        if bindings.is_empty() {
            debug!("no modules bound to {event}");
            return report;
        }
        info!("firing {event} ({} module(s))", bindings.len());
        let trigger = TriggerContext::new(event, payload);

        for binding in &bindings {
            match self.run_binding(binding, &trigger, state, dataset) {
                Ok(module_report) => report.modules.push(module_report),
                Err(reason) => {
                    warn!("{event}: capture failed before '{}': {reason}", binding.module_id);
                    report.aborted = Some(reason);
                    break;
                },
            }
        }

        transition(&mut self.phase, TriggerPhase::Idle);
        report.emitted = state.drain_emitted();
        report
    }

    /// Capture, execute and apply one binding. `Err` only when capture fails.
    fn run_binding(
        &mut self,
        binding: &HookBinding,
        trigger: &TriggerContext,
        state: &mut EngineState,
        dataset: Option<&ResolvedDataset>,
    ) -> Result<ModuleReport, String> {
        let module_id = binding.module_id.clone();
        let mut report = ModuleReport {
            module_id: module_id.clone(),
            priority: binding.priority,
            applied: 0,
            log: Vec::new(),
            failure: None,
            elapsed: Duration::ZERO,
        };

        transition(&mut self.phase, TriggerPhase::Capturing { module: module_id.clone() });
        let captured = self.bridge.capture(state, trigger).map_err(|e| e.to_string())?;

        transition(&mut self.phase, TriggerPhase::Executing { module: module_id.clone() });
        let Some(module) = self.registry.module(&module_id) else {
            report.failure = Some(ModuleError::SourceUnavailable(format!("module '{module_id}' is not declared")).into());
            return Ok(report);
        };
        let outcome = self.executor.run(module, &captured.document, &trigger.event);
        report.log = outcome.log;
        report.elapsed = outcome.elapsed;
        if let Some(error) = outcome.error {
            report.failure = Some(error.into());
            return Ok(report);
        }

        transition(&mut self.phase, TriggerPhase::Applying { module: module_id.clone() });
        let response = ModuleResponse {
            schema_version: outcome.schema_version.unwrap_or(SNAPSHOT_SCHEMA_VERSION),
            commands: outcome.commands,
        };
        match self
            .bridge
            .commit(state, &captured.header, &module_id, &trigger.event, &response, dataset)
        {
            Ok(result) => report.applied = result.applied,
            Err(e) => {
                warn!("'{module_id}' on {}: {e}", trigger.event);
                report.failure = Some(e.into());
            },
        }
        Ok(report)
    }
}

fn transition(phase: &mut TriggerPhase, next: TriggerPhase) {
    debug!("trigger phase {phase:?} -> {next:?}");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::ModuleSpec;
    use crate::script::{RawOutput, RuntimeError, ScriptRuntime};
    use std::sync::Arc;
    use std::time::Instant;

    /// Runtime whose "source" is the response document itself.
    struct Echo;

    impl ScriptRuntime for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn invoke(&self, module: &ModuleSpec, _: &str, _: &str, _: Instant) -> Result<RawOutput, RuntimeError> {
            let body = module.source.to_string_lossy().to_string();
            if body == "fail" {
                return Err(RuntimeError::Script("boom".into()));
            }
            Ok(RawOutput {
                stdout: body,
                log: Vec::new(),
            })
        }
    }

    fn host(modules: &[(&str, i64, &str)]) -> ScriptHost {
        let mut registry = HookRegistry::new();
        for (id, priority, body) in modules {
            registry.register(HookBinding::new("on_battle_end", *id, *priority));
            registry.add_module(ModuleSpec {
                id: (*id).to_string(),
                source: (*body).into(),
                timeout_ms: None,
            });
        }
        let executor = ScriptExecutor::new(Arc::new(Echo), Duration::from_secs(1), Duration::from_millis(100));
        ScriptHost::new(registry, executor, StateSnapshotBridge::default())
    }

    const GOLD: &str =
        r#"{"schemaVersion":1,"commands":[{"kind":"incrementCounter","targetPath":"player.gold","payload":5}]}"#;

    #[test]
    fn failing_module_does_not_stop_the_chain() {
        let mut host = host(&[("first", 10, "fail"), ("second", 5, GOLD)]);
        let mut state = EngineState::default();
        let report = host.fire(&mut state, "on_battle_end", Value::Null, None);
        assert_eq!(report.module_order(), vec!["first", "second"]);
        assert!(matches!(report.modules[0].failure, Some(ModuleFailure::Module(ModuleError::Runtime(_)))));
        assert_eq!(report.modules[1].applied, 1);
        assert_eq!(state.player.gold, 105);
        assert_eq!(host.phase(), &TriggerPhase::Idle);
    }

    #[test]
    fn rejected_batch_is_reported_and_skipped() {
        let bad = r#"{"schemaVersion":1,"commands":[{"kind":"setField","targetPath":"player.name","payload":"x"}]}"#;
        let mut host = host(&[("bad", 2, bad), ("good", 1, GOLD)]);
        let mut state = EngineState::default();
        let report = host.fire(&mut state, "on_battle_end", Value::Null, None);
        assert!(matches!(
            report.modules[0].failure,
            Some(ModuleFailure::Commit(CommitError::Validation(_)))
        ));
        assert_eq!(state.generation, 1);
        assert_eq!(state.player.gold, 105);
    }

    #[test]
    fn undeclared_module_is_a_source_error() {
        let mut host = host(&[]);
        host.registry_mut().register(HookBinding::new("on_battle_end", "ghost", 0));
        let report = host.fire(&mut EngineState::default(), "on_battle_end", Value::Null, None);
        assert!(matches!(
            report.modules[0].failure,
            Some(ModuleFailure::Module(ModuleError::SourceUnavailable(_)))
        ));
    }

    #[test]
    fn capture_failure_aborts_chain() {
        let mut host = host(&[]);
        host.registry_mut().register(HookBinding::new("Bad Event", "m", 0));
        let mut state = EngineState::default();
        let before = state.clone();
        let report = host.fire(&mut state, "Bad Event", Value::Null, None);
        assert!(report.aborted.is_some());
        assert!(report.modules.is_empty());
        assert_eq!(state, before);
        assert_eq!(host.phase(), &TriggerPhase::Idle);
    }

    #[test]
    fn emitted_events_are_drained_into_report() {
        let emit = r#"{"schemaVersion":1,"commands":[{"kind":"emitEvent","targetPath":"loot_dropped","payload":{"gold":3}}]}"#;
        let mut host = host(&[("emitter", 0, emit)]);
        let mut state = EngineState::default();
        let report = host.fire(&mut state, "on_battle_end", Value::Null, None);
        assert_eq!(report.emitted.len(), 1);
        assert_eq!(report.emitted[0].name, "loot_dropped");
        assert!(state.emitted_events.is_empty());
    }

    #[test]
    fn unbound_event_is_a_no_op() {
        let mut host = host(&[("m", 0, GOLD)]);
        let mut state = EngineState::default();
        let report = host.fire(&mut state, "on_area_entered", Value::Null, None);
        assert!(report.modules.is_empty());
        assert_eq!(state.generation, 0);
    }
}
