use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable identifier used for packages, modules and content entries.
pub type Id = String;

/// Typed data files a content package may contribute.
///
/// Each kind maps to exactly one file name inside a package directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Areas,
    Enemies,
    Items,
    Missions,
    Bosses,
    Companions,
    Classes,
    Spells,
    Effects,
    Crafting,
    Dungeons,
    Dialogues,
    Cutscenes,
    WeeklyChallenges,
    Housing,
    Shops,
    Weather,
    Times,
}

impl FileKind {
    pub const ALL: [FileKind; 18] = [
        FileKind::Areas,
        FileKind::Enemies,
        FileKind::Items,
        FileKind::Missions,
        FileKind::Bosses,
        FileKind::Companions,
        FileKind::Classes,
        FileKind::Spells,
        FileKind::Effects,
        FileKind::Crafting,
        FileKind::Dungeons,
        FileKind::Dialogues,
        FileKind::Cutscenes,
        FileKind::WeeklyChallenges,
        FileKind::Housing,
        FileKind::Shops,
        FileKind::Weather,
        FileKind::Times,
    ];

    /// File name this kind is stored under in a package directory.
    pub fn file_name(self) -> &'static str {
        match self {
            FileKind::Areas => "areas.json",
            FileKind::Enemies => "enemies.json",
            FileKind::Items => "items.json",
            FileKind::Missions => "missions.json",
            FileKind::Bosses => "bosses.json",
            FileKind::Companions => "companions.json",
            FileKind::Classes => "classes.json",
            FileKind::Spells => "spells.json",
            FileKind::Effects => "effects.json",
            FileKind::Crafting => "crafting.json",
            FileKind::Dungeons => "dungeons.json",
            FileKind::Dialogues => "dialogues.json",
            FileKind::Cutscenes => "cutscenes.json",
            FileKind::WeeklyChallenges => "weekly_challenges.json",
            FileKind::Housing => "housing.json",
            FileKind::Shops => "shops.json",
            FileKind::Weather => "weather.json",
            FileKind::Times => "times.json",
        }
    }

    /// Look up the kind stored under `name`, if it is a recognized data file.
    pub fn from_file_name(name: &str) -> Option<FileKind> {
        FileKind::ALL.into_iter().find(|kind| kind.file_name() == name)
    }

    /// Merge strategy for the top-level fields of this kind's document.
    pub fn schema(self) -> MergeSchema {
        match self {
            FileKind::Dungeons => MergeSchema {
                default: MergeRule::ReplaceByKey,
                fields: &[
                    ("dungeons", MergeRule::AppendUnique { key_field: "id" }),
                    ("challenge_templates", MergeRule::DeepMergeMap),
                    ("chest_templates", MergeRule::DeepMergeMap),
                ],
            },
            FileKind::WeeklyChallenges => MergeSchema {
                default: MergeRule::ReplaceByKey,
                fields: &[("challenges", MergeRule::AppendUnique { key_field: "id" })],
            },
            _ => MergeSchema {
                default: MergeRule::ReplaceByKey,
                fields: &[],
            },
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// How a later layer's value for a field combines with an earlier layer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// The field is one entry; a later layer's entry with the same key wins outright.
    ReplaceByKey,
    /// The field is an array of objects identified by `key_field`; entries are appended
    /// and a key contributed twice is a conflict.
    AppendUnique { key_field: &'static str },
    /// The field is a nested map merged key-by-key; terminal values are replaced.
    DeepMergeMap,
}

/// Per-field merge rules for one [`FileKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSchema {
    pub default: MergeRule,
    pub fields: &'static [(&'static str, MergeRule)],
}

impl MergeSchema {
    pub fn rule_for(&self, field: &str) -> MergeRule {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map_or(self.default, |(_, rule)| *rule)
    }
}

fn default_true() -> bool {
    true
}

/// Contents of a package's `mod.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package id; the folder name is used when omitted.
    #[serde(default)]
    pub id: Option<Id>,
    pub version: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PackageManifest {
    /// The id this package is known by, falling back to the directory it was found in.
    pub fn resolved_id(&self, folder_name: &str) -> Id {
        match &self.id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => folder_name.to_string(),
        }
    }
}

/// Top-level hook manifest: which modules react to which lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookManifestDef {
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<HookEntryDef>>,
    #[serde(default)]
    pub modules: BTreeMap<Id, ModuleDef>,
}

/// One `(module, priority)` binding under an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookEntryDef {
    pub module: Id,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Optional per-module settings in the hook manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDef {
    /// Script path relative to the manifest directory. Defaults to `<module>.rhai`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Lifecycle events the engine fires out of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    OnBattleStart,
    OnBattleEnd,
    OnPlayerLevelup,
    OnItemAcquired,
    OnCompanionHired,
    OnMissionComplete,
    OnBuffApplied,
    OnAreaEntered,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 8] = [
        LifecycleEvent::OnBattleStart,
        LifecycleEvent::OnBattleEnd,
        LifecycleEvent::OnPlayerLevelup,
        LifecycleEvent::OnItemAcquired,
        LifecycleEvent::OnCompanionHired,
        LifecycleEvent::OnMissionComplete,
        LifecycleEvent::OnBuffApplied,
        LifecycleEvent::OnAreaEntered,
    ];

    pub fn as_key(self) -> &'static str {
        match self {
            LifecycleEvent::OnBattleStart => "on_battle_start",
            LifecycleEvent::OnBattleEnd => "on_battle_end",
            LifecycleEvent::OnPlayerLevelup => "on_player_levelup",
            LifecycleEvent::OnItemAcquired => "on_item_acquired",
            LifecycleEvent::OnCompanionHired => "on_companion_hired",
            LifecycleEvent::OnMissionComplete => "on_mission_complete",
            LifecycleEvent::OnBuffApplied => "on_buff_applied",
            LifecycleEvent::OnAreaEntered => "on_area_entered",
        }
    }

    pub fn from_key(key: &str) -> Option<LifecycleEvent> {
        LifecycleEvent::ALL.into_iter().find(|ev| ev.as_key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_names_round_trip() {
        for kind in FileKind::ALL {
            assert_eq!(FileKind::from_file_name(kind.file_name()), Some(kind));
        }
        assert_eq!(FileKind::from_file_name("mod.json"), None);
    }

    #[test]
    fn dungeon_schema_mixes_rules() {
        let schema = FileKind::Dungeons.schema();
        assert_eq!(
            schema.rule_for("dungeons"),
            MergeRule::AppendUnique { key_field: "id" }
        );
        assert_eq!(schema.rule_for("challenge_templates"), MergeRule::DeepMergeMap);
        assert_eq!(schema.rule_for("anything_else"), MergeRule::ReplaceByKey);
        assert_eq!(FileKind::Enemies.schema().rule_for("goblin"), MergeRule::ReplaceByKey);
    }

    #[test]
    fn manifest_id_falls_back_to_folder() {
        let manifest = PackageManifest {
            id: None,
            version: "1.0".into(),
            enabled: true,
            name: None,
            author: None,
            description: None,
        };
        assert_eq!(manifest.resolved_id("cool_mod"), "cool_mod");
        let named = PackageManifest {
            id: Some("named".into()),
            ..manifest
        };
        assert_eq!(named.resolved_id("cool_mod"), "named");
    }

    #[test]
    fn lifecycle_keys_round_trip() {
        for ev in LifecycleEvent::ALL {
            assert_eq!(LifecycleEvent::from_key(ev.as_key()), Some(ev));
        }
        assert!(LifecycleEvent::from_key("on_tea_time").is_none());
    }
}
