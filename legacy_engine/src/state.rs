//! Authoritative live game state.
//!
//! [`EngineState`] is owned by the host and only ever handed by reference to
//! the snapshot bridge and the command applier. Scripts never see it directly.
//! Every number is an `i64` so the snapshot document round-trips exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBuff {
    pub name: String,
    pub duration: i64,
    #[serde(default)]
    pub modifiers: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub name: String,
    pub class: String,
    pub level: i64,
    pub experience: i64,
    pub hp: i64,
    pub max_hp: i64,
    pub mp: i64,
    pub max_mp: i64,
    pub attack: i64,
    pub defense: i64,
    pub speed: i64,
    pub gold: i64,
    pub inventory: Vec<String>,
    pub companions: Vec<String>,
    pub active_buffs: Vec<ActiveBuff>,
    /// Free-form counters kept by scripts and the game (`enemies_killed`, ...).
    pub statistics: BTreeMap<String, i64>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            name: "Hero".to_string(),
            class: "Warrior".to_string(),
            level: 1,
            experience: 0,
            hp: 100,
            max_hp: 100,
            mp: 50,
            max_mp: 50,
            attack: 10,
            defense: 5,
            speed: 10,
            gold: 100,
            inventory: Vec::new(),
            companions: Vec::new(),
            active_buffs: Vec::new(),
            statistics: BTreeMap::new(),
        }
    }
}

impl PlayerState {
    pub fn buff(&self, name: &str) -> Option<&ActiveBuff> {
        self.active_buffs.iter().find(|buff| buff.name == name)
    }

    pub fn statistic(&self, name: &str) -> i64 {
        self.statistics.get(name).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationState {
    pub current_area: String,
    pub visited: Vec<String>,
}

/// The enemy currently being fought, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatTarget {
    pub id: String,
    pub name: String,
    pub hp: i64,
    pub max_hp: i64,
    pub attack: i64,
    pub defense: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionState {
    pub active: Vec<String>,
    pub progress: BTreeMap<String, i64>,
    pub completed: Vec<String>,
}

/// Record of one accepted script command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub seq: u64,
    pub snapshot_id: String,
    pub module_id: String,
    pub event: String,
    pub command: Command,
}

/// An event raised by a script through `emitEvent`, waiting for the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmittedEvent {
    pub name: String,
    pub payload: Value,
    pub module_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub player: PlayerState,
    pub location: LocationState,
    pub combat_target: Option<CombatTarget>,
    pub missions: MissionState,
    /// Values scripts keep between invocations, keyed by name.
    #[serde(default)]
    pub script_data: BTreeMap<String, Value>,
    pub activity_log: Vec<ActivityLogEntry>,
    /// Bumped once per committed command batch.
    pub generation: u64,
    #[serde(default)]
    pub emitted_events: Vec<EmittedEvent>,
}

impl EngineState {
    pub fn new(player: PlayerState, start_area: impl Into<String>) -> Self {
        let start_area = start_area.into();
        Self {
            player,
            location: LocationState {
                visited: vec![start_area.clone()],
                current_area: start_area,
            },
            ..Self::default()
        }
    }

    /// The last `window` activity log entries, oldest first.
    pub fn activity_tail(&self, window: usize) -> &[ActivityLogEntry] {
        let start = self.activity_log.len().saturating_sub(window);
        &self.activity_log[start..]
    }

    /// True if any logged command came from the snapshot `snapshot_id`.
    pub fn has_applied(&self, snapshot_id: &str) -> bool {
        self.activity_log.iter().any(|entry| entry.snapshot_id == snapshot_id)
    }

    pub fn next_seq(&self) -> u64 {
        self.activity_log.last().map_or(1, |entry| entry.seq + 1)
    }

    pub fn script_value(&self, key: &str) -> Option<&Value> {
        self.script_data.get(key)
    }

    /// Hand queued script events to the caller, leaving the queue empty.
    pub fn drain_emitted(&mut self) -> Vec<EmittedEvent> {
        std::mem::take(&mut self.emitted_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;

    fn entry(seq: u64, snapshot: &str) -> ActivityLogEntry {
        ActivityLogEntry {
            seq,
            snapshot_id: snapshot.into(),
            module_id: "m".into(),
            event: "on_battle_end".into(),
            command: Command::new(CommandKind::IncrementCounter, "player.gold", 1),
        }
    }

    #[test]
    fn new_state_has_visited_start_area() {
        let state = EngineState::new(PlayerState::default(), "starting_village");
        assert_eq!(state.location.current_area, "starting_village");
        assert_eq!(state.location.visited, vec!["starting_village".to_string()]);
        assert_eq!(state.generation, 0);
        assert_eq!(state.next_seq(), 1);
    }

    #[test]
    fn activity_tail_is_bounded() {
        let mut state = EngineState::default();
        state.activity_log = (1..=5).map(|n| entry(n, "s")).collect();
        assert_eq!(state.activity_tail(2).iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(state.activity_tail(50).len(), 5);
        assert_eq!(state.next_seq(), 6);
    }

    #[test]
    fn applied_snapshots_are_found() {
        let mut state = EngineState::default();
        state.activity_log.push(entry(1, "abc"));
        assert!(state.has_applied("abc"));
        assert!(!state.has_applied("def"));
    }

    #[test]
    fn snapshot_fields_use_camel_case() {
        let json = serde_json::to_value(PlayerState::default()).expect("json");
        assert!(json.get("maxHp").is_some());
        assert!(json.get("activeBuffs").is_some());
        assert!(json.get("max_hp").is_none());
    }
}
