//! State snapshot bridge.
//!
//! Turns the scripting-relevant part of [`EngineState`] into a versioned JSON
//! document before a module runs, and turns the module's response document
//! back into commands afterwards. The runtime only ever sees text; the host
//! keeps the authoritative state.
//!
//! Snapshot document (camelCase keys):
//!
//! ```json
//! {"schemaVersion":1,"snapshotId":"…","generation":3,"timestamp":1700000000000,
//!  "trigger":{"event":"on_player_levelup","payload":{"level":5}},
//!  "player":{…},"location":{…},"enemy":null,"missions":{…},"scriptData":{…},
//!  "activityLog":[…]}
//! ```
//!
//! Response document:
//!
//! ```json
//! {"schemaVersion":1,"commands":[{"kind":"setField","targetPath":"player.hp","payload":80}]}
//! ```

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::apply::{ApplyContext, ApplyResult, CommandApplier, CommandValidationError};
use crate::command::{Command, is_valid_event_name};
use crate::merge::ResolvedDataset;
use crate::state::{ActivityLogEntry, CombatTarget, EngineState, LocationState, MissionState, PlayerState};

/// Version of both the snapshot and the response document formats.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// The event being fired and the data it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl TriggerContext {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub schema_version: u32,
    pub snapshot_id: String,
    pub generation: u64,
    /// Unix milliseconds at capture.
    pub timestamp: i64,
    pub trigger: TriggerContext,
    pub player: PlayerState,
    pub location: LocationState,
    pub enemy: Option<CombatTarget>,
    pub missions: MissionState,
    #[serde(default)]
    pub script_data: BTreeMap<String, Value>,
    pub activity_log: Vec<ActivityLogEntry>,
}

/// What the host remembers about a snapshot while its module runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub snapshot_id: String,
    pub generation: u64,
}

/// A serialized snapshot ready to hand to a runtime.
#[derive(Debug, Clone)]
pub struct CapturedSnapshot {
    pub header: SnapshotHeader,
    pub document: String,
}

/// A module's parsed response document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleResponse {
    pub schema_version: u32,
    #[serde(default)]
    pub commands: Vec<Command>,
}

impl ModuleResponse {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            commands,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("'{0}' is not a valid event name")]
    InvalidEvent(String),
    #[error("system clock is out of range")]
    Clock,
    #[error("serializing snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("module produced no output")]
    Empty,
    #[error("malformed response document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitError {
    #[error("response schema version {found} does not match {expected}")]
    SchemaVersionMismatch { expected: u32, found: u32 },
    #[error("snapshot generation {snapshot} is stale (live generation is {live})")]
    StaleSnapshot { snapshot: u64, live: u64 },
    #[error("snapshot '{0}' has already been applied")]
    AlreadyApplied(String),
    #[error(transparent)]
    Validation(#[from] CommandValidationError),
}

/// Capture and commit half of the scripting protocol.
#[derive(Debug, Clone)]
pub struct StateSnapshotBridge {
    activity_window: usize,
    applier: CommandApplier,
}

impl Default for StateSnapshotBridge {
    fn default() -> Self {
        Self::new(100)
    }
}

impl StateSnapshotBridge {
    /// `activity_window` bounds how many trailing log entries each snapshot carries.
    pub fn new(activity_window: usize) -> Self {
        Self {
            activity_window,
            applier: CommandApplier,
        }
    }

    /// Take a fresh, owned snapshot of `state`.
    ///
    /// # Errors
    /// - if `trigger.event` is not a well-formed event name
    /// - if the clock or serialization fails
    pub fn snapshot(&self, state: &EngineState, trigger: &TriggerContext) -> Result<StateSnapshot, CaptureError> {
        if !is_valid_event_name(&trigger.event) {
            return Err(CaptureError::InvalidEvent(trigger.event.clone()));
        }
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let timestamp = i64::try_from(millis).map_err(|_| CaptureError::Clock)?;
        Ok(StateSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            snapshot_id: Uuid::new_v4().to_string(),
            generation: state.generation,
            timestamp,
            trigger: trigger.clone(),
            player: state.player.clone(),
            location: state.location.clone(),
            enemy: state.combat_target.clone(),
            missions: state.missions.clone(),
            script_data: state.script_data.clone(),
            activity_log: state.activity_tail(self.activity_window).to_vec(),
        })
    }

    /// Snapshot `state` and serialize it for a runtime.
    ///
    /// # Errors
    /// - see [`StateSnapshotBridge::snapshot`]
    pub fn capture(&self, state: &EngineState, trigger: &TriggerContext) -> Result<CapturedSnapshot, CaptureError> {
        let snapshot = self.snapshot(state, trigger)?;
        let document = serialize(&snapshot)?;
        debug!(
            "captured snapshot {} at generation {} ({} bytes)",
            snapshot.snapshot_id,
            snapshot.generation,
            document.len()
        );
        Ok(CapturedSnapshot {
            header: SnapshotHeader {
                snapshot_id: snapshot.snapshot_id,
                generation: snapshot.generation,
            },
            document,
        })
    }

    /// Apply a module's response against the live state it was captured from.
    ///
    /// # Errors
    /// - [`CommitError::SchemaVersionMismatch`], [`CommitError::AlreadyApplied`] or
    ///   [`CommitError::StaleSnapshot`] if the batch must be re-captured
    /// - [`CommitError::Validation`] if any command is rejected; `state` is unchanged
    pub fn commit(
        &self,
        state: &mut EngineState,
        header: &SnapshotHeader,
        module_id: &str,
        event: &str,
        response: &ModuleResponse,
        dataset: Option<&ResolvedDataset>,
    ) -> Result<ApplyResult, CommitError> {
        if response.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(CommitError::SchemaVersionMismatch {
                expected: SNAPSHOT_SCHEMA_VERSION,
                found: response.schema_version,
            });
        }
        if state.has_applied(&header.snapshot_id) {
            warn!("rejecting replay of snapshot {} from '{module_id}'", header.snapshot_id);
            return Err(CommitError::AlreadyApplied(header.snapshot_id.clone()));
        }
        if header.generation != state.generation {
            return Err(CommitError::StaleSnapshot {
                snapshot: header.generation,
                live: state.generation,
            });
        }
        let ctx = ApplyContext {
            snapshot_id: &header.snapshot_id,
            module_id,
            event,
            dataset,
        };
        Ok(self.applier.apply(&response.commands, state, &ctx)?)
    }
}

/// # Errors
/// - only if serde fails, which the snapshot types do not trigger
pub fn serialize(snapshot: &StateSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(snapshot)
}

/// # Errors
/// - if `doc` is not a valid snapshot document
pub fn parse(doc: &str) -> Result<StateSnapshot, serde_json::Error> {
    serde_json::from_str(doc)
}

/// Parse a module's response document.
///
/// # Errors
/// - [`ResponseError::Empty`] if `doc` is blank
/// - [`ResponseError::Json`] if it is not a response document
pub fn parse_response(doc: &str) -> Result<ModuleResponse, ResponseError> {
    let trimmed = doc.trim();
    if trimmed.is_empty() {
        return Err(ResponseError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use serde_json::json;

    fn trigger() -> TriggerContext {
        TriggerContext::new("on_player_levelup", json!({"level": 2}))
    }

    #[test]
    fn capture_is_a_detached_copy() {
        let bridge = StateSnapshotBridge::default();
        let mut state = EngineState::default();
        let captured = bridge.capture(&state, &trigger()).expect("capture");
        state.player.gold = 9_999;
        let snapshot = parse(&captured.document).expect("parse");
        assert_eq!(snapshot.player.gold, 100);
        assert_eq!(snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert_eq!(snapshot.trigger.payload, json!({"level": 2}));
        assert_eq!(snapshot.snapshot_id, captured.header.snapshot_id);
    }

    #[test]
    fn document_uses_external_field_names() {
        let bridge = StateSnapshotBridge::default();
        let doc: Value = serde_json::from_str(
            &bridge
                .capture(&EngineState::default(), &trigger())
                .expect("capture")
                .document,
        )
        .expect("json");
        for key in ["schemaVersion", "snapshotId", "generation", "timestamp", "trigger", "player", "location", "enemy", "missions", "activityLog"] {
            assert!(doc.get(key).is_some(), "{key}");
        }
        assert_eq!(doc["enemy"], Value::Null);
    }

    #[test]
    fn snapshot_ids_are_unique() {
        let bridge = StateSnapshotBridge::default();
        let state = EngineState::default();
        let a = bridge.capture(&state, &trigger()).expect("a");
        let b = bridge.capture(&state, &trigger()).expect("b");
        assert_ne!(a.header.snapshot_id, b.header.snapshot_id);
    }

    #[test]
    fn activity_log_is_windowed() {
        let bridge = StateSnapshotBridge::new(1);
        let mut state = EngineState::default();
        for n in 0..3 {
            let captured = bridge.capture(&state, &trigger()).expect("capture");
            let response = ModuleResponse::new(vec![Command::new(CommandKind::IncrementCounter, "player.gold", n)]);
            bridge
                .commit(&mut state, &captured.header, "m", "on_player_levelup", &response, None)
                .expect("commit");
        }
        let snapshot = bridge.snapshot(&state, &trigger()).expect("snapshot");
        assert_eq!(snapshot.activity_log.len(), 1);
        assert_eq!(snapshot.activity_log[0].seq, 3);
    }

    #[test]
    fn invalid_event_fails_capture() {
        let bridge = StateSnapshotBridge::default();
        let err = bridge
            .capture(&EngineState::default(), &TriggerContext::new("Level Up!", Value::Null))
            .expect_err("bad event");
        assert!(matches!(err, CaptureError::InvalidEvent(_)));
    }

    #[test]
    fn commit_rejects_wrong_schema_version() {
        let bridge = StateSnapshotBridge::default();
        let mut state = EngineState::default();
        let captured = bridge.capture(&state, &trigger()).expect("capture");
        let response = ModuleResponse {
            schema_version: 2,
            commands: vec![],
        };
        assert_eq!(
            bridge.commit(&mut state, &captured.header, "m", "on_player_levelup", &response, None),
            Err(CommitError::SchemaVersionMismatch { expected: 1, found: 2 })
        );
    }

    #[test]
    fn commit_rejects_stale_and_replayed_batches() {
        let bridge = StateSnapshotBridge::default();
        let mut state = EngineState::default();
        let first = bridge.capture(&state, &trigger()).expect("first");
        let second = bridge.capture(&state, &trigger()).expect("second");
        let response = ModuleResponse::new(vec![Command::new(CommandKind::IncrementCounter, "player.gold", 10)]);

        bridge
            .commit(&mut state, &first.header, "m", "on_player_levelup", &response, None)
            .expect("commit");
        assert_eq!(
            bridge.commit(&mut state, &first.header, "m", "on_player_levelup", &response, None),
            Err(CommitError::AlreadyApplied(first.header.snapshot_id.clone()))
        );
        assert_eq!(
            bridge.commit(&mut state, &second.header, "m", "on_player_levelup", &response, None),
            Err(CommitError::StaleSnapshot { snapshot: 0, live: 1 })
        );
        assert_eq!(state.player.gold, 110);
    }

    #[test]
    fn response_parsing() {
        let response = parse_response(
            r#"{"schemaVersion":1,"commands":[{"kind":"setField","targetPath":"player.hp","payload":80}]}"#,
        )
        .expect("parse");
        assert_eq!(response.commands.len(), 1);
        assert!(matches!(parse_response("   "), Err(ResponseError::Empty)));
        assert!(matches!(parse_response("not json"), Err(ResponseError::Json(_))));
        assert!(matches!(parse_response(r#"{"commands":[]}"#), Err(ResponseError::Json(_))));
    }
}
