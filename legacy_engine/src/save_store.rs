//! Save-game persistence.
//!
//! The engine hands a complete [`SaveGame`] blob to a [`SaveStore`] and gets
//! the same blob back; what happens in between is the store's business.
//! [`FileSaveStore`] writes one RON file per slot, named
//! `<slot>-legacy-<version>.ron`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::LEGACY_VERSION;
use crate::merge::LayerInfo;
use crate::state::EngineState;

/// Everything needed to resume a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveGame {
    /// Engine version that wrote the save.
    pub version: String,
    /// Content layers active when the game was saved.
    pub layers: Vec<LayerInfo>,
    pub state: EngineState,
}

impl SaveGame {
    pub fn new(state: EngineState, layers: Vec<LayerInfo>) -> Self {
        Self {
            version: LEGACY_VERSION.to_string(),
            layers,
            state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSlot {
    pub slot: String,
    pub version: String,
    pub path: Option<PathBuf>,
    pub modified: Option<SystemTime>,
}

pub trait SaveStore {
    /// # Errors
    /// - if the blob cannot be serialized or stored
    fn write(&mut self, slot: &str, game: &SaveGame) -> Result<()>;

    /// # Errors
    /// - if the slot does not exist or cannot be decoded
    fn read(&self, slot: &str) -> Result<SaveGame>;

    /// # Errors
    /// - if the store cannot be enumerated
    fn slots(&self) -> Result<Vec<SaveSlot>>;
}

/// RON files in one directory.
#[derive(Debug, Clone)]
pub struct FileSaveStore {
    dir: PathBuf,
}

impl FileSaveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, slot: &str, version: &str) -> PathBuf {
        self.dir.join(format!("{}-legacy-{version}.ron", sanitize_slug(slot)))
    }
}

impl SaveStore for FileSaveStore {
    fn write(&mut self, slot: &str, game: &SaveGame) -> Result<()> {
        let text = ron::ser::to_string_pretty(game, ron::ser::PrettyConfig::default())
            .context("error converting game state to 'ron' format")?;
        fs::create_dir_all(&self.dir).with_context(|| format!("creating save folder '{}'", self.dir.display()))?;
        let path = self.path_for(slot, &game.version);
        let staging = staging_path(&path);
        fs::write(&staging, text).with_context(|| format!("writing save file '{}'", staging.display()))?;
        fs::rename(&staging, &path).with_context(|| format!("moving save into place at '{}'", path.display()))?;

        // A slot holds one save; drop copies written by other versions.
        for old in self.slots()?.into_iter().filter(|s| s.slot == sanitize_slug(slot)) {
            if let Some(old_path) = old.path.filter(|p| *p != path) {
                if let Err(e) = fs::remove_file(&old_path) {
                    warn!("could not remove superseded save '{}': {e}", old_path.display());
                }
            }
        }
        info!("game saved to '{}'", path.display());
        Ok(())
    }

    fn read(&self, slot: &str) -> Result<SaveGame> {
        let wanted = sanitize_slug(slot);
        let found = self
            .slots()?
            .into_iter()
            .find(|s| s.slot == wanted)
            .and_then(|s| s.path)
            .ok_or_else(|| anyhow!("no saved game in slot '{wanted}'"))?;
        let raw = fs::read_to_string(&found).with_context(|| format!("reading save file {}", found.display()))?;
        let game: SaveGame = ron::from_str(&raw).with_context(|| format!("parsing save file {}", found.display()))?;
        if game.version != LEGACY_VERSION {
            warn!(
                "save '{wanted}' was written by version {} (running {LEGACY_VERSION})",
                game.version
            );
        }
        Ok(game)
    }

    fn slots(&self) -> Result<Vec<SaveSlot>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut slots = Vec::new();
        for entry in fs::read_dir(&self.dir).with_context(|| format!("reading {}", self.dir.display()))? {
            let entry = entry.with_context(|| format!("enumerating {}", self.dir.display()))?;
            if let Some(slot) = slot_from_entry(&entry) {
                slots.push(slot);
            }
        }
        slots.sort_by(|a, b| a.slot.cmp(&b.slot).then(a.version.cmp(&b.version)));
        Ok(slots)
    }
}

/// Sibling of `path` that slot listing ignores.
fn staging_path(path: &Path) -> PathBuf {
    path.with_extension("ron.tmp")
}

fn slot_from_entry(entry: &fs::DirEntry) -> Option<SaveSlot> {
    let path = entry.path();
    if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("ron") {
        return None;
    }
    let stem = path.file_stem().and_then(|stem| stem.to_str())?;
    let (slot, version) = stem.rsplit_once("-legacy-")?;
    if slot.is_empty() {
        return None;
    }
    let modified = entry.metadata().ok().and_then(|meta| meta.modified().ok());
    Some(SaveSlot {
        slot: slot.to_string(),
        version: version.to_string(),
        path: Some(path),
        modified,
    })
}

/// Saves held in memory; for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemorySaveStore {
    games: BTreeMap<String, SaveGame>,
}

impl MemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SaveStore for MemorySaveStore {
    fn write(&mut self, slot: &str, game: &SaveGame) -> Result<()> {
        self.games.insert(sanitize_slug(slot), game.clone());
        Ok(())
    }

    fn read(&self, slot: &str) -> Result<SaveGame> {
        let wanted = sanitize_slug(slot);
        self.games
            .get(&wanted)
            .cloned()
            .ok_or_else(|| anyhow!("no saved game in slot '{wanted}'"))
    }

    fn slots(&self) -> Result<Vec<SaveSlot>> {
        Ok(self
            .games
            .iter()
            .map(|(slot, game)| SaveSlot {
                slot: slot.clone(),
                version: game.version.clone(),
                path: None,
                modified: None,
            })
            .collect())
    }
}

/// Normalize a user-provided slot name into a filesystem-safe slug.
pub fn sanitize_slug(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in trimmed.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(ch.to_ascii_lowercase());
            pending_dash = false;
        } else if ch == '_' {
            if !slug.is_empty() {
                slug.push(ch);
            }
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() { "autosave".to_string() } else { slug }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandKind};
    use crate::state::{ActivityLogEntry, PlayerState};
    use tempfile::tempdir;

    fn game() -> SaveGame {
        let mut state = EngineState::new(PlayerState::default(), "starting_village");
        state.player.statistics.insert("enemies_killed".into(), 4);
        state.activity_log.push(ActivityLogEntry {
            seq: 1,
            snapshot_id: "s".into(),
            module_id: "stat_tracker".into(),
            event: "on_battle_end".into(),
            command: Command::new(CommandKind::IncrementCounter, "player.statistics.enemies_killed", 1),
        });
        state.generation = 1;
        SaveGame::new(
            state,
            vec![LayerInfo {
                id: "base".into(),
                version: "1.0".into(),
            }],
        )
    }

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(sanitize_slug("My Save #1"), "my-save-1");
        assert_eq!(sanitize_slug("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_slug("   "), "autosave");
        assert_eq!(sanitize_slug("slot_2"), "slot_2");
    }

    #[test]
    fn file_store_round_trips() -> Result<()> {
        let dir = tempdir()?;
        let mut store = FileSaveStore::new(dir.path().join("saved_games"));
        let original = game();
        store.write("Morning Run", &original)?;
        let slots = store.slots()?;
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].slot, "morning-run");
        assert_eq!(slots[0].version, LEGACY_VERSION);
        assert_eq!(store.read("morning run")?, original);
        Ok(())
    }

    #[test]
    fn rewriting_a_slot_replaces_it() -> Result<()> {
        let dir = tempdir()?;
        let mut store = FileSaveStore::new(dir.path());
        let mut old = game();
        old.version = "0.1.0".into();
        store.write("a", &old)?;
        store.write("a", &game())?;
        let slots = store.slots()?;
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].version, LEGACY_VERSION);
        Ok(())
    }

    #[test]
    fn failed_write_keeps_the_previous_save() -> Result<()> {
        let dir = tempdir()?;
        let mut store = FileSaveStore::new(dir.path());
        let mut old = game();
        old.version = "0.1.0".into();
        store.write("keep", &old)?;
        // Block the staging file so the new save cannot be written.
        fs::create_dir_all(staging_path(&store.path_for("keep", LEGACY_VERSION)))?;

        assert!(store.write("keep", &game()).is_err());
        let slots = store.slots()?;
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].version, "0.1.0");
        assert_eq!(store.read("keep")?, old);
        Ok(())
    }

    #[test]
    fn unrelated_files_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("notes.txt"), "ignore me")?;
        fs::write(dir.path().join("odd.ron"), "()")?;
        let store = FileSaveStore::new(dir.path());
        assert!(store.slots()?.is_empty());
        assert!(store.read("anything").is_err());
        Ok(())
    }

    #[test]
    fn memory_store_round_trips() -> Result<()> {
        let mut store = MemorySaveStore::new();
        store.write("quick", &game())?;
        assert_eq!(store.read("quick")?, game());
        assert_eq!(store.slots()?.len(), 1);
        assert!(store.read("other").is_err());
        Ok(())
    }
}
