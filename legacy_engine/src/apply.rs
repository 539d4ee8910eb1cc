//! Command applier.
//!
//! Applies one module's command list to [`EngineState`] as a single batch.
//! Every command is validated first; the survivors are then applied to a
//! draft copy which replaces the live state only if every step succeeded.
//! On any error the live state is left exactly as it was.

use legacy_data::FileKind;
use log::{debug, info};
use serde_json::Value;
use thiserror::Error;

use crate::command::{Command, CommandKind, Stat, TargetPath, is_valid_event_name};
use crate::merge::ResolvedDataset;
use crate::state::{ActiveBuff, ActivityLogEntry, EmittedEvent, EngineState, PlayerState};

/// Most companions a player can have hired at once.
pub const MAX_COMPANIONS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandValidationError {
    #[error("command {index}: unknown kind '{kind}'")]
    UnknownKind { index: usize, kind: String },
    #[error("command {index}: path '{path}' is not writable by scripts")]
    PathNotAllowed { index: usize, path: String },
    #[error("command {index}: {kind} cannot be used on '{path}'")]
    KindNotAllowed {
        index: usize,
        kind: CommandKind,
        path: String,
    },
    #[error("command {index}: invalid payload for '{path}': {reason}")]
    InvalidPayload { index: usize, path: String, reason: String },
    #[error("command {index}: unknown {what} '{id}'")]
    UnknownReference {
        index: usize,
        what: &'static str,
        id: String,
    },
    #[error("command {index} could not be applied: {reason}")]
    Application { index: usize, reason: String },
}

/// Who is applying a batch, and against which content.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext<'a> {
    pub snapshot_id: &'a str,
    pub module_id: &'a str,
    pub event: &'a str,
    /// When supplied, area, mission and companion ids are checked against it.
    pub dataset: Option<&'a ResolvedDataset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyResult {
    pub applied: usize,
    pub emitted: usize,
    pub generation: u64,
}

/// A command that passed validation, ready to run against a draft.
#[derive(Debug)]
enum Op {
    Set(TargetPath, i64),
    Increment(TargetPath, i64),
    AddItem(String),
    RemoveItem(String),
    Hire(String),
    Dismiss(String),
    AddBuff(ActiveBuff),
    RemoveBuff(String),
    MoveTo(String),
    AddMission(String),
    RemoveMission(String),
    CompleteMission(String),
    StoreData(String, Value),
    AppendData(String, Value),
    ClearData(String),
    Emit(String, Value),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandApplier;

impl CommandApplier {
    /// Validate and apply `commands` to `state` atomically.
    ///
    /// # Errors
    /// - [`CommandValidationError`] for the first command that fails; `state` is unchanged
    pub fn apply(
        &self,
        commands: &[Command],
        state: &mut EngineState,
        ctx: &ApplyContext<'_>,
    ) -> Result<ApplyResult, CommandValidationError> {
        if commands.is_empty() {
            return Ok(ApplyResult {
                applied: 0,
                emitted: 0,
                generation: state.generation,
            });
        }

        let ops = commands
            .iter()
            .enumerate()
            .map(|(index, cmd)| validate(index, cmd, ctx.dataset))
            .collect::<Result<Vec<_>, _>>()?;

        let mut draft = state.clone();
        let mut emitted = 0;
        for (index, (op, cmd)) in ops.into_iter().zip(commands).enumerate() {
            debug!("└─ command: {cmd} from '{}'", ctx.module_id);
            if matches!(op, Op::Emit(..)) {
                emitted += 1;
            }
            run(op, &mut draft, ctx.module_id).map_err(|reason| CommandValidationError::Application { index, reason })?;
            let seq = draft.next_seq();
            draft.activity_log.push(ActivityLogEntry {
                seq,
                snapshot_id: ctx.snapshot_id.to_string(),
                module_id: ctx.module_id.to_string(),
                event: ctx.event.to_string(),
                command: cmd.clone(),
            });
        }
        draft.generation += 1;
        *state = draft;

        info!(
            "applied {} command(s) from '{}' on {} (generation {})",
            commands.len(),
            ctx.module_id,
            ctx.event,
            state.generation
        );
        Ok(ApplyResult {
            applied: commands.len(),
            emitted,
            generation: state.generation,
        })
    }
}

fn validate(index: usize, cmd: &Command, dataset: Option<&ResolvedDataset>) -> Result<Op, CommandValidationError> {
    let kind = cmd.parsed_kind().map_err(|_| CommandValidationError::UnknownKind {
        index,
        kind: cmd.kind.clone(),
    })?;
    let path = cmd.target_path.as_str();
    let invalid = |reason: &str| CommandValidationError::InvalidPayload {
        index,
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if kind == CommandKind::EmitEvent {
        if !is_valid_event_name(path) {
            return Err(CommandValidationError::PathNotAllowed {
                index,
                path: path.to_string(),
            });
        }
        return Ok(Op::Emit(path.to_string(), cmd.payload.clone()));
    }

    let target = TargetPath::parse(path).ok_or_else(|| CommandValidationError::PathNotAllowed {
        index,
        path: path.to_string(),
    })?;
    if !target.accepts(kind) {
        return Err(CommandValidationError::KindNotAllowed {
            index,
            kind,
            path: path.to_string(),
        });
    }

    let require_known = |what: &'static str, file: FileKind, id: &str| match dataset {
        Some(ds) if !ds.contains(file, id) => Err(CommandValidationError::UnknownReference {
            index,
            what,
            id: id.to_string(),
        }),
        _ => Ok(()),
    };

    let op = match target {
        TargetPath::PlayerStat(_) | TargetPath::Statistic(_) | TargetPath::MissionProgress(_) => {
            let amount = cmd.payload.as_i64().ok_or_else(|| invalid("expected an integer"))?;
            if let TargetPath::MissionProgress(id) = &target {
                require_known("mission", FileKind::Missions, id)?;
            }
            if kind == CommandKind::IncrementCounter {
                Op::Increment(target, amount)
            } else {
                Op::Set(target, amount)
            }
        },
        TargetPath::Inventory => {
            let item = non_empty_str(&cmd.payload).ok_or_else(|| invalid("expected an item id"))?;
            if kind == CommandKind::AddToList {
                Op::AddItem(item)
            } else {
                Op::RemoveItem(item)
            }
        },
        TargetPath::Companions => {
            let companion = non_empty_str(&cmd.payload).ok_or_else(|| invalid("expected a companion id"))?;
            if kind == CommandKind::AddToList {
                require_known("companion", FileKind::Companions, &companion)?;
                Op::Hire(companion)
            } else {
                Op::Dismiss(companion)
            }
        },
        TargetPath::ScriptData(key) => match kind {
            CommandKind::SetField => Op::StoreData(key, cmd.payload.clone()),
            CommandKind::AddToList => Op::AppendData(key, cmd.payload.clone()),
            _ => Op::ClearData(key),
        },
        TargetPath::ActiveBuffs if kind == CommandKind::AddToList => {
            let buff: ActiveBuff = serde_json::from_value(cmd.payload.clone())
                .map_err(|e| invalid(&format!("expected a buff object: {e}")))?;
            if buff.name.trim().is_empty() {
                return Err(invalid("buff name is empty"));
            }
            Op::AddBuff(buff)
        },
        TargetPath::ActiveBuffs => {
            let name = non_empty_str(&cmd.payload).ok_or_else(|| invalid("expected a buff name"))?;
            Op::RemoveBuff(name)
        },
        TargetPath::CurrentArea => {
            let area = non_empty_str(&cmd.payload).ok_or_else(|| invalid("expected an area id"))?;
            require_known("area", FileKind::Areas, &area)?;
            Op::MoveTo(area)
        },
        TargetPath::ActiveMissions | TargetPath::CompletedMissions => {
            let mission = non_empty_str(&cmd.payload).ok_or_else(|| invalid("expected a mission id"))?;
            require_known("mission", FileKind::Missions, &mission)?;
            match (&target, kind) {
                (TargetPath::CompletedMissions, _) => Op::CompleteMission(mission),
                (_, CommandKind::AddToList) => Op::AddMission(mission),
                _ => Op::RemoveMission(mission),
            }
        },
    };
    Ok(op)
}

fn non_empty_str(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.trim().is_empty()).map(str::to_string)
}

fn run(op: Op, state: &mut EngineState, module_id: &str) -> Result<(), String> {
    match op {
        Op::Set(target, value) => write_number(state, &target, |_| Ok(value)),
        Op::Increment(target, amount) => write_number(state, &target, |current| {
            current
                .checked_add(amount)
                .ok_or_else(|| format!("counter overflow adding {amount} to {current}"))
        }),
        Op::AddItem(item) => {
            state.player.inventory.push(item);
            Ok(())
        },
        Op::RemoveItem(item) => remove_first(&mut state.player.inventory, &item, "inventory"),
        Op::Hire(id) => {
            if state.player.companions.contains(&id) {
                return Err(format!("companion '{id}' is already hired"));
            }
            if state.player.companions.len() >= MAX_COMPANIONS {
                return Err(format!("party is full ({MAX_COMPANIONS} companions)"));
            }
            state.player.companions.push(id);
            Ok(())
        },
        Op::Dismiss(id) => remove_first(&mut state.player.companions, &id, "companions"),
        Op::AddBuff(buff) => {
            if state.player.buff(&buff.name).is_some() {
                return Err(format!("buff '{}' is already active", buff.name));
            }
            state.player.active_buffs.push(buff);
            Ok(())
        },
        Op::RemoveBuff(name) => {
            let before = state.player.active_buffs.len();
            state.player.active_buffs.retain(|buff| buff.name != name);
            if state.player.active_buffs.len() == before {
                Err(format!("buff '{name}' is not active"))
            } else {
                Ok(())
            }
        },
        Op::MoveTo(area) => {
            if !state.location.visited.contains(&area) {
                state.location.visited.push(area.clone());
            }
            state.location.current_area = area;
            Ok(())
        },
        Op::AddMission(id) => {
            if state.missions.completed.contains(&id) {
                return Err(format!("mission '{id}' is already completed"));
            }
            if !state.missions.active.contains(&id) {
                state.missions.active.push(id);
            }
            Ok(())
        },
        Op::RemoveMission(id) => remove_first(&mut state.missions.active, &id, "missions.active"),
        Op::CompleteMission(id) => {
            state.missions.active.retain(|active| *active != id);
            if !state.missions.completed.contains(&id) {
                state.missions.completed.push(id);
            }
            Ok(())
        },
        Op::StoreData(key, value) => {
            state.script_data.insert(key, value);
            Ok(())
        },
        Op::AppendData(key, value) => match state.script_data.entry(key).or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(items) => {
                items.push(value);
                Ok(())
            },
            _ => Err("script data entry is not a list".to_string()),
        },
        Op::ClearData(key) => {
            state.script_data.remove(&key);
            Ok(())
        },
        Op::Emit(name, payload) => {
            state.emitted_events.push(EmittedEvent {
                name,
                payload,
                module_id: module_id.to_string(),
            });
            Ok(())
        },
    }
}

fn remove_first(list: &mut Vec<String>, value: &str, what: &str) -> Result<(), String> {
    let idx = list
        .iter()
        .position(|entry| entry == value)
        .ok_or_else(|| format!("'{value}' is not in {what}"))?;
    list.remove(idx);
    Ok(())
}

/// Compute a new value from the current one, then store it with clamping.
fn write_number(
    state: &mut EngineState,
    target: &TargetPath,
    next: impl FnOnce(i64) -> Result<i64, String>,
) -> Result<(), String> {
    match target {
        TargetPath::PlayerStat(stat) => {
            let value = next(stat_value(&state.player, *stat))?;
            set_stat(&mut state.player, *stat, value);
        },
        TargetPath::Statistic(name) => {
            let value = next(state.player.statistic(name))?;
            state.player.statistics.insert(name.clone(), value);
        },
        TargetPath::MissionProgress(id) => {
            let value = next(state.missions.progress.get(id).copied().unwrap_or_default())?;
            state.missions.progress.insert(id.clone(), value.max(0));
        },
        _ => return Err(format!("{target:?} is not numeric")),
    }
    Ok(())
}

fn stat_value(player: &PlayerState, stat: Stat) -> i64 {
    match stat {
        Stat::Hp => player.hp,
        Stat::MaxHp => player.max_hp,
        Stat::Mp => player.mp,
        Stat::MaxMp => player.max_mp,
        Stat::Attack => player.attack,
        Stat::Defense => player.defense,
        Stat::Speed => player.speed,
        Stat::Gold => player.gold,
        Stat::Level => player.level,
        Stat::Experience => player.experience,
    }
}

/// Store a stat, clamping it to its legal range.
fn set_stat(player: &mut PlayerState, stat: Stat, value: i64) {
    match stat {
        Stat::Hp => player.hp = value.clamp(0, player.max_hp.max(0)),
        Stat::Mp => player.mp = value.clamp(0, player.max_mp.max(0)),
        Stat::MaxHp => {
            player.max_hp = value.max(0);
            player.hp = player.hp.min(player.max_hp);
        },
        Stat::MaxMp => {
            player.max_mp = value.max(0);
            player.mp = player.mp.min(player.max_mp);
        },
        Stat::Level => player.level = value.max(1),
        Stat::Attack => player.attack = value.max(0),
        Stat::Defense => player.defense = value.max(0),
        Stat::Speed => player.speed = value.max(0),
        Stat::Gold => player.gold = value.max(0),
        Stat::Experience => player.experience = value.max(0),
    }
}
