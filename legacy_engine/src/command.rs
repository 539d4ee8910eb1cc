//! Script command vocabulary.
//!
//! A [`Command`] is one requested mutation in a module's response document.
//! The `kind` stays a plain string on the wire so an unknown kind fails
//! validation of its own batch instead of the whole document parse.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static SEGMENT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_\-]{0,63}$").ok());
static EVENT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").ok());

/// True if `segment` may be used as a dynamic path component (statistic name, mission id).
pub fn is_valid_segment(segment: &str) -> bool {
    SEGMENT_RE.as_ref().is_some_and(|re| re.is_match(segment))
}

/// True if `name` is a well-formed event name (`on_player_levelup`, `treasure_found`).
pub fn is_valid_event_name(name: &str) -> bool {
    EVENT_RE.as_ref().is_some_and(|re| re.is_match(name))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub kind: String,
    pub target_path: String,
    #[serde(default)]
    pub payload: Value,
}

impl Command {
    pub fn new(kind: CommandKind, target_path: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            target_path: target_path.into(),
            payload: payload.into(),
        }
    }

    /// # Errors
    /// - if `kind` is not part of the command vocabulary
    pub fn parsed_kind(&self) -> Result<CommandKind, UnknownKind> {
        self.kind.parse()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.target_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetField,
    AddToList,
    RemoveFromList,
    IncrementCounter,
    EmitEvent,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        CommandKind::SetField,
        CommandKind::AddToList,
        CommandKind::RemoveFromList,
        CommandKind::IncrementCounter,
        CommandKind::EmitEvent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::SetField => "setField",
            CommandKind::AddToList => "addToList",
            CommandKind::RemoveFromList => "removeFromList",
            CommandKind::IncrementCounter => "incrementCounter",
            CommandKind::EmitEvent => "emitEvent",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for CommandKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Scalar player stats scripts may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Hp,
    MaxHp,
    Mp,
    MaxMp,
    Attack,
    Defense,
    Speed,
    Gold,
    Level,
    Experience,
}

impl Stat {
    fn from_segment(segment: &str) -> Option<Stat> {
        let stat = match segment {
            "hp" => Stat::Hp,
            "maxHp" => Stat::MaxHp,
            "mp" => Stat::Mp,
            "maxMp" => Stat::MaxMp,
            "attack" => Stat::Attack,
            "defense" => Stat::Defense,
            "speed" => Stat::Speed,
            "gold" => Stat::Gold,
            "level" => Stat::Level,
            "experience" => Stat::Experience,
            _ => return None,
        };
        Some(stat)
    }
}

/// The allow-listed regions of engine state a command may address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPath {
    PlayerStat(Stat),
    Statistic(String),
    Inventory,
    Companions,
    ActiveBuffs,
    CurrentArea,
    ActiveMissions,
    MissionProgress(String),
    CompletedMissions,
    /// One entry of `scriptData`; holds any JSON value.
    ScriptData(String),
}

impl TargetPath {
    /// Resolve a dotted path, or `None` if it is outside the allow-list.
    pub fn parse(path: &str) -> Option<TargetPath> {
        let segments: Vec<&str> = path.split('.').collect();
        match segments.as_slice() {
            ["player", "statistics", name] if is_valid_segment(name) => Some(TargetPath::Statistic((*name).to_string())),
            ["player", "inventory"] => Some(TargetPath::Inventory),
            ["player", "companions"] => Some(TargetPath::Companions),
            ["player", "activeBuffs"] => Some(TargetPath::ActiveBuffs),
            ["player", stat] => Stat::from_segment(stat).map(TargetPath::PlayerStat),
            ["location", "currentArea"] => Some(TargetPath::CurrentArea),
            ["missions", "active"] => Some(TargetPath::ActiveMissions),
            ["missions", "progress", id] if is_valid_segment(id) => Some(TargetPath::MissionProgress((*id).to_string())),
            ["missions", "completed"] => Some(TargetPath::CompletedMissions),
            ["scriptData", key] if is_valid_segment(key) => Some(TargetPath::ScriptData((*key).to_string())),
            _ => None,
        }
    }

    /// Whether `kind` may operate on this region.
    pub fn accepts(&self, kind: CommandKind) -> bool {
        use CommandKind::{AddToList, IncrementCounter, RemoveFromList, SetField};
        match self {
            TargetPath::PlayerStat(_) | TargetPath::Statistic(_) | TargetPath::MissionProgress(_) => {
                matches!(kind, SetField | IncrementCounter)
            },
            TargetPath::Inventory | TargetPath::Companions | TargetPath::ActiveBuffs | TargetPath::ActiveMissions => {
                matches!(kind, AddToList | RemoveFromList)
            },
            TargetPath::ScriptData(_) => matches!(kind, SetField | AddToList | RemoveFromList),
            TargetPath::CurrentArea => kind == SetField,
            TargetPath::CompletedMissions => kind == AddToList,
        }
    }
}
