//! Player loading helpers.
//!
//! The starting character is described in `player.toml`. This module reads
//! the file and converts the raw representation into a fresh [`EngineState`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use log::info;
use serde::Deserialize;

use crate::state::{EngineState, PlayerState};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
/// Serialized starting character, used for staged loading from TOML.
pub struct RawPlayer {
    pub name: String,
    pub class: String,
    /// Area the game begins in.
    pub start_area: String,
    pub level: i64,
    pub max_hp: i64,
    pub max_mp: i64,
    pub attack: i64,
    pub defense: i64,
    pub speed: i64,
    pub gold: i64,
    pub inventory: Vec<String>,
    pub companions: Vec<String>,
    pub statistics: BTreeMap<String, i64>,
    /// Missions active at game start.
    pub missions: Vec<String>,
}

impl Default for RawPlayer {
    fn default() -> Self {
        let player = PlayerState::default();
        Self {
            name: player.name,
            class: player.class,
            start_area: "starting_village".to_string(),
            level: player.level,
            max_hp: player.max_hp,
            max_mp: player.max_mp,
            attack: player.attack,
            defense: player.defense,
            speed: player.speed,
            gold: player.gold,
            inventory: Vec::new(),
            companions: Vec::new(),
            statistics: BTreeMap::new(),
            missions: Vec::new(),
        }
    }
}

impl RawPlayer {
    /// Converts the raw player into a new-game state at full health and mana.
    ///
    /// # Errors
    /// - if the start area is blank or a stat is out of range
    pub fn to_state(&self) -> Result<EngineState> {
        if self.start_area.trim().is_empty() {
            bail!("player start_area must not be empty");
        }
        if self.level < 1 || self.max_hp < 1 || self.max_mp < 0 {
            bail!(
                "player stats out of range (level {}, max_hp {}, max_mp {})",
                self.level,
                self.max_hp,
                self.max_mp
            );
        }
        let player = PlayerState {
            name: self.name.clone(),
            class: self.class.clone(),
            level: self.level,
            experience: 0,
            hp: self.max_hp,
            max_hp: self.max_hp,
            mp: self.max_mp,
            max_mp: self.max_mp,
            attack: self.attack.max(0),
            defense: self.defense.max(0),
            speed: self.speed.max(0),
            gold: self.gold.max(0),
            inventory: self.inventory.clone(),
            companions: self.companions.clone(),
            active_buffs: Vec::new(),
            statistics: self.statistics.clone(),
        };
        let mut state = EngineState::new(player, self.start_area.clone());
        state.missions.active.clone_from(&self.missions);
        Ok(state)
    }
}

/// Load player data from file
/// # Errors
/// - if unable to read the player.toml file or unable to parse it
pub fn load_player(toml_path: &Path) -> Result<RawPlayer> {
    let player_file =
        fs::read_to_string(toml_path).with_context(|| format!("reading player data from '{}'", toml_path.display()))?;
    let raw_player: RawPlayer =
        toml::from_str(&player_file).with_context(|| format!("parsing player data from '{}'", toml_path.display()))?;
    Ok(raw_player)
}

/// Build the starting state from `player.toml`, or from defaults if the file is absent.
/// # Errors
/// - if the file exists but cannot be loaded, or describes an invalid player
pub fn build_initial_state(toml_path: &Path) -> Result<EngineState> {
    let raw = if toml_path.exists() {
        load_player(toml_path)?
    } else {
        info!("no player file at '{}'; using default character", toml_path.display());
        RawPlayer::default()
    };
    let state = raw.to_state().context("converting raw player to starting state")?;
    info!(
        "built starting state for {} the {} in '{}'",
        state.player.name, state.player.class, state.location.current_area
    );
    Ok(state)
}
