//! Embedded Rhai runtime.
//!
//! A fresh [`Engine`] is built for every invocation, so nothing a script does
//! survives into the next one. Scripts get no filesystem, module imports or
//! `eval`, and run under operation, depth and size limits. They see three
//! variables and a small command API:
//!
//! ```rhai
//! // snapshot, event, payload are in scope
//! if snapshot.player.level >= 5 {
//!     add_to_list("player.activeBuffs", #{ name: "Veteran", duration: 3, modifiers: #{ attack: 2 } });
//! }
//! increment_counter("player.statistics.level_ups", 1);
//! emit_event("veteran_reached", #{ level: snapshot.player.level });
//!
//! // values kept across invocations live under `scriptData`
//! if !retrieve_data("achievements", []).contains("veteran") {
//!     append_data("achievements", "veteran");
//! }
//! ```
//!
//! Each write call appends one command to the module's response document.
//! `retrieve_data` reads the snapshot, so it does not see writes queued
//! earlier in the same invocation.

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use std::time::Instant;

use rhai::module_resolvers::DummyModuleResolver;
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope};
use serde_json::Value;

use super::{RawOutput, RuntimeError, ScriptRuntime};
use crate::command::{Command, CommandKind};
use crate::hooks::ModuleSpec;
use crate::snapshot::ModuleResponse;

/// Sandbox limits applied to every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhaiLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for RhaiLimits {
    fn default() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_levels: 32,
            max_string_size: 64 * 1024,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

#[derive(Default)]
struct SharedState {
    commands: Vec<Command>,
    logs: Vec<String>,
}

type Shared = Rc<RefCell<SharedState>>;

#[derive(Debug, Clone, Default)]
pub struct RhaiRuntime {
    limits: RhaiLimits,
}

impl RhaiRuntime {
    pub fn new(limits: RhaiLimits) -> Self {
        Self { limits }
    }

    fn build_engine(&self, shared: &Shared, deadline: Instant) -> Engine {
        let mut engine = Engine::new();
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_levels);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.set_max_array_size(self.limits.max_array_size);
        engine.set_max_map_size(self.limits.max_map_size);

        engine.on_progress(move |ops| {
            if ops % 1024 == 0 && Instant::now() >= deadline {
                Some(Dynamic::from("timeout"))
            } else {
                None
            }
        });

        let logs = Rc::clone(shared);
        engine.on_print(move |text: &str| logs.borrow_mut().logs.push(text.to_string()));
        let logs = Rc::clone(shared);
        engine.on_debug(move |text: &str, _source: Option<&str>, pos: Position| {
            logs.borrow_mut().logs.push(format!("[debug {pos}] {text}"));
        });

        register_api(&mut engine, shared);
        engine
    }
}

fn push(shared: &Shared, kind: CommandKind, path: &str, payload: Value) {
    shared.borrow_mut().commands.push(Command::new(kind, path, payload));
}

fn to_json(value: &Dynamic) -> Result<Value, Box<EvalAltResult>> {
    from_dynamic::<Value>(value)
}

fn data_path(key: &str) -> String {
    format!("scriptData.{key}")
}

/// `retrieve_data(key, default)` over the snapshot's `scriptData` section.
fn register_script_data(engine: &mut Engine, stored: Map) {
    engine.register_fn("retrieve_data", move |key: &str, default: Dynamic| {
        stored.get(key).cloned().unwrap_or(default)
    });
}

fn register_api(engine: &mut Engine, shared: &Shared) {
    let s = Rc::clone(shared);
    engine.register_fn("set_field", move |path: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
        push(&s, CommandKind::SetField, path, to_json(&value)?);
        Ok(())
    });
    let s = Rc::clone(shared);
    engine.register_fn("add_to_list", move |path: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
        push(&s, CommandKind::AddToList, path, to_json(&value)?);
        Ok(())
    });
    let s = Rc::clone(shared);
    engine.register_fn("remove_from_list", move |path: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
        push(&s, CommandKind::RemoveFromList, path, to_json(&value)?);
        Ok(())
    });
    let s = Rc::clone(shared);
    engine.register_fn("increment_counter", move |path: &str, amount: i64| {
        push(&s, CommandKind::IncrementCounter, path, Value::from(amount));
    });
    let s = Rc::clone(shared);
    engine.register_fn("hire_companion", move |id: &str| {
        push(&s, CommandKind::AddToList, "player.companions", Value::from(id));
    });
    let s = Rc::clone(shared);
    engine.register_fn("dismiss_companion", move |id: &str| {
        push(&s, CommandKind::RemoveFromList, "player.companions", Value::from(id));
    });
    let s = Rc::clone(shared);
    engine.register_fn("store_data", move |key: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
        push(&s, CommandKind::SetField, &data_path(key), to_json(&value)?);
        Ok(())
    });
    let s = Rc::clone(shared);
    engine.register_fn("append_data", move |key: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
        push(&s, CommandKind::AddToList, &data_path(key), to_json(&value)?);
        Ok(())
    });
    let s = Rc::clone(shared);
    engine.register_fn("clear_data", move |key: &str| {
        push(&s, CommandKind::RemoveFromList, &data_path(key), Value::Null);
    });
    let s = Rc::clone(shared);
    engine.register_fn("emit_event", move |name: &str| {
        push(&s, CommandKind::EmitEvent, name, Value::Null);
    });
    let s = Rc::clone(shared);
    engine.register_fn("emit_event", move |name: &str, payload: Dynamic| -> Result<(), Box<EvalAltResult>> {
        push(&s, CommandKind::EmitEvent, name, to_json(&payload)?);
        Ok(())
    });
}

impl ScriptRuntime for RhaiRuntime {
    fn name(&self) -> &'static str {
        "rhai"
    }

    fn invoke(
        &self,
        module: &ModuleSpec,
        snapshot_doc: &str,
        event: &str,
        deadline: Instant,
    ) -> Result<RawOutput, RuntimeError> {
        let source = fs::read_to_string(&module.source).map_err(|e| RuntimeError::SourceUnavailable {
            path: module.source.clone(),
            message: e.to_string(),
        })?;
        let snapshot: Value =
            serde_json::from_str(snapshot_doc).map_err(|e| RuntimeError::Io(format!("snapshot is not JSON: {e}")))?;
        let payload = snapshot.pointer("/trigger/payload").cloned().unwrap_or(Value::Null);

        let stored = match snapshot.get("scriptData") {
            Some(data) => to_dynamic(data)
                .map_err(|e| RuntimeError::Io(e.to_string()))?
                .try_cast::<Map>()
                .unwrap_or_default(),
            None => Map::new(),
        };

        let shared: Shared = Rc::new(RefCell::new(SharedState::default()));
        let mut engine = self.build_engine(&shared, deadline);
        register_script_data(&mut engine, stored);

        let mut scope = Scope::new();
        let snapshot = to_dynamic(&snapshot).map_err(|e| RuntimeError::Io(e.to_string()))?;
        let payload = to_dynamic(&payload).map_err(|e| RuntimeError::Io(e.to_string()))?;
        scope.push_constant("snapshot", snapshot);
        scope.push_constant("event", event.to_string());
        scope.push_constant("payload", payload);

        let ast = engine
            .compile(&source)
            .map_err(|e| RuntimeError::Script(format!("{}: {e}", module.source.display())))?;
        if let Err(err) = engine.run_ast_with_scope(&mut scope, &ast) {
            return Err(match *err {
                EvalAltResult::ErrorTerminated(..) => RuntimeError::Timeout,
                other => RuntimeError::Script(other.to_string()),
            });
        }

        let state = shared.take();
        let response = ModuleResponse::new(state.commands);
        let stdout = serde_json::to_string(&response).map_err(|e| RuntimeError::Io(e.to_string()))?;
        Ok(RawOutput {
            stdout,
            log: state.logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::parse_response;
    use serde_json::json;
    use std::time::Duration;

    fn module(dir: &tempfile::TempDir, body: &str) -> ModuleSpec {
        let path = dir.path().join("m.rhai");
        fs::write(&path, body).expect("write");
        ModuleSpec {
            id: "m".into(),
            source: path,
            timeout_ms: None,
        }
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    const DOC: &str = r#"{"player":{"level":4,"gold":10},"scriptData":{"kills":3,"badges":["scout"]},"trigger":{"event":"on_player_levelup","payload":{"level":5}}}"#;

    #[test]
    fn api_calls_become_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = module(
            &dir,
            r#"
            set_field("player.hp", snapshot.player.gold * 2);
            add_to_list("player.inventory", "potion");
            remove_from_list("player.inventory", "rock");
            increment_counter("player.statistics.level_ups", 1);
            emit_event("ping");
            emit_event("levelled", #{ level: payload.level, who: event });
            print("done");
            "#,
        );
        let raw = RhaiRuntime::default().invoke(&spec, DOC, "on_player_levelup", soon()).expect("runs");
        let response = parse_response(&raw.stdout).expect("response");
        let kinds: Vec<_> = response.commands.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["setField", "addToList", "removeFromList", "incrementCounter", "emitEvent", "emitEvent"]
        );
        assert_eq!(response.commands[0].payload, json!(20));
        assert_eq!(response.commands[5].payload, json!({"level": 5, "who": "on_player_levelup"}));
        assert_eq!(raw.log, vec!["done".to_string()]);
    }

    #[test]
    fn script_data_and_companion_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = module(
            &dir,
            r#"
            store_data("kills", retrieve_data("kills", 0) + 1);
            if !retrieve_data("badges", []).contains("veteran") {
                append_data("badges", "veteran");
            }
            store_data("first_seen", retrieve_data("first_seen", "never"));
            clear_data("stale");
            hire_companion("mira");
            dismiss_companion("sir_aldric");
            "#,
        );
        let raw = RhaiRuntime::default().invoke(&spec, DOC, "on_player_levelup", soon()).expect("runs");
        let commands = parse_response(&raw.stdout).expect("response").commands;
        let summary: Vec<(String, String, Value)> = commands
            .into_iter()
            .map(|c| (c.kind, c.target_path, c.payload))
            .collect();
        let expected: Vec<(String, String, Value)> = vec![
            ("setField".into(), "scriptData.kills".into(), json!(4)),
            ("addToList".into(), "scriptData.badges".into(), json!("veteran")),
            ("setField".into(), "scriptData.first_seen".into(), json!("never")),
            ("removeFromList".into(), "scriptData.stale".into(), Value::Null),
            ("addToList".into(), "player.companions".into(), json!("mira")),
            ("removeFromList".into(), "player.companions".into(), json!("sir_aldric")),
        ];
        assert_eq!(summary, expected);
    }

    #[test]
    fn thrown_errors_are_script_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = module(&dir, r#"set_field("player.hp", 1); throw "nope";"#);
        let err = RhaiRuntime::default().invoke(&spec, DOC, "e", soon()).expect_err("throws");
        assert!(matches!(err, RuntimeError::Script(msg) if msg.contains("nope")));
    }

    #[test]
    fn syntax_errors_are_script_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = module(&dir, "let x = ;");
        assert!(matches!(
            RhaiRuntime::default().invoke(&spec, DOC, "e", soon()),
            Err(RuntimeError::Script(_))
        ));
    }

    #[test]
    fn eval_is_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = module(&dir, r#"eval("40 + 2");"#);
        assert!(RhaiRuntime::default().invoke(&spec, DOC, "e", soon()).is_err());
    }

    #[test]
    fn infinite_loop_hits_deadline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = module(&dir, "let n = 0; loop { n = 1; }");
        let runtime = RhaiRuntime::new(RhaiLimits {
            max_operations: u64::MAX,
            ..RhaiLimits::default()
        });
        let err = runtime
            .invoke(&spec, DOC, "e", Instant::now() + Duration::from_millis(50))
            .expect_err("deadline");
        assert_eq!(err, RuntimeError::Timeout);
    }

    #[test]
    fn operation_limit_stops_runaway_scripts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = module(&dir, "let x = 0; loop { x += 1; }");
        let runtime = RhaiRuntime::new(RhaiLimits {
            max_operations: 10_000,
            ..RhaiLimits::default()
        });
        assert!(matches!(runtime.invoke(&spec, DOC, "e", soon()), Err(RuntimeError::Script(_))));
    }

    #[test]
    fn missing_source_is_reported() {
        let spec = ModuleSpec {
            id: "ghost".into(),
            source: "/definitely/not/here.rhai".into(),
            timeout_ms: None,
        };
        assert!(matches!(
            RhaiRuntime::default().invoke(&spec, DOC, "e", soon()),
            Err(RuntimeError::SourceUnavailable { .. })
        ));
    }
}
