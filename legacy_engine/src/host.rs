//! Game host.
//!
//! [`GameHost`] owns everything mutable: the live [`EngineState`], the
//! swappable dataset, the settings, and (optionally) the script host. The
//! rest of the game talks to the engine through it.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde_json::Value;

use crate::data_paths::DataPaths;
use crate::dispatch::{ScriptHost, TriggerReport};
use crate::display::{Display, TerminalDisplay, Tone};
use crate::loader::build_dataset;
use crate::loader::packages::{PackageListing, list_packages};
use crate::loader::settings::{Settings, save_settings};
use crate::merge::{DatasetCell, ResolvedDataset};
use crate::save_store::{FileSaveStore, SaveGame, SaveSlot, SaveStore};
use crate::state::EngineState;

pub struct GameHost {
    paths: DataPaths,
    settings: Settings,
    dataset: DatasetCell,
    state: EngineState,
    scripting: Option<ScriptHost>,
    display: Box<dyn Display>,
    saves: Box<dyn SaveStore>,
}

impl GameHost {
    pub fn new(
        paths: DataPaths,
        settings: Settings,
        dataset: ResolvedDataset,
        state: EngineState,
        scripting: Option<ScriptHost>,
    ) -> Self {
        let saves = Box::new(FileSaveStore::new(paths.saves.clone()));
        Self {
            paths,
            settings,
            dataset: DatasetCell::new(dataset),
            state,
            scripting,
            display: Box::new(TerminalDisplay::default()),
            saves,
        }
    }

    #[must_use]
    pub fn with_display(mut self, display: Box<dyn Display>) -> Self {
        self.display = display;
        self
    }

    #[must_use]
    pub fn with_save_store(mut self, saves: Box<dyn SaveStore>) -> Self {
        self.saves = saves;
        self
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Direct access for the game's own (non-script) rules.
    pub fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    pub fn dataset(&self) -> Arc<ResolvedDataset> {
        self.dataset.current()
    }

    pub fn scripting(&self) -> Option<&ScriptHost> {
        self.scripting.as_ref()
    }

    pub fn scripting_mut(&mut self) -> Option<&mut ScriptHost> {
        self.scripting.as_mut()
    }

    pub fn display_mut(&mut self) -> &mut dyn Display {
        self.display.as_mut()
    }

    /// Fire `event` through the hook chain.
    ///
    /// Returns `None` when scripting is switched off. Module console output
    /// and failures are forwarded to the display.
    pub fn trigger(&mut self, event: &str, payload: Value) -> Option<TriggerReport> {
        let Some(scripting) = self.scripting.as_mut() else {
            debug!("scripting disabled; ignoring {event}");
            return None;
        };
        let dataset = self.dataset.current();
        let report = scripting.fire(&mut self.state, event, payload, Some(&dataset));

        for module in &report.modules {
            for line in &module.log {
                self.display
                    .write_toned(&format!("[{}] {line}", module.module_id), Tone::Script);
            }
            if let Some(failure) = &module.failure {
                self.display
                    .write_toned(&format!("[{}] failed: {failure}", module.module_id), Tone::Warning);
            }
        }
        if let Some(reason) = &report.aborted {
            self.display
                .write_toned(&format!("{event} aborted: {reason}"), Tone::Warning);
        }
        Some(report)
    }

    /// Re-read every package and swap in the merged result.
    ///
    /// On failure the current dataset stays active.
    ///
    /// # Errors
    /// - if loading or merging fails
    pub fn reload_content(&mut self) -> Result<()> {
        let dataset = build_dataset(&self.paths, &self.settings).context("reloading content")?;
        let layers = dataset.layers().len();
        self.dataset.swap(dataset);
        info!("content reloaded: {layers} layer(s) active");
        Ok(())
    }

    /// Every package in the mods directory with its load status.
    ///
    /// # Errors
    /// - if the mods directory cannot be read
    pub fn list_mods(&self) -> Result<Vec<PackageListing>> {
        list_packages(&self.paths.mods, &self.settings)
    }

    /// Enable or disable one mod, persist the choice and reload content.
    /// Returns `true` if the mod is now enabled.
    ///
    /// Nothing changes, in memory or on disk, unless the new content merges
    /// and the settings file is written.
    ///
    /// # Errors
    /// - if no such mod exists, the new content fails to merge, or settings cannot be saved
    pub fn toggle_mod(&mut self, id: &str) -> Result<bool> {
        let known = self
            .list_mods()?
            .iter()
            .any(|listing| listing.id.as_deref() == Some(id));
        if !known {
            bail!("no mod named '{id}'");
        }
        let mut candidate = self.settings.clone();
        let enabled = candidate.toggle_mod(id);
        self.adopt_settings(candidate)?;
        Ok(enabled)
    }

    /// Switch the whole mod system on or off. Returns the new state.
    ///
    /// # Errors
    /// - as for [`GameHost::toggle_mod`]
    pub fn toggle_mods_system(&mut self) -> Result<bool> {
        let mut candidate = self.settings.clone();
        let enabled = candidate.toggle_mods_system();
        self.adopt_settings(candidate)?;
        Ok(enabled)
    }

    fn adopt_settings(&mut self, candidate: Settings) -> Result<()> {
        let dataset = build_dataset(&self.paths, &candidate).context("reloading content with new settings")?;
        save_settings(&self.paths.settings, &candidate)?;
        let layers = dataset.layers().len();
        self.settings = candidate;
        self.dataset.swap(dataset);
        info!("settings changed: {layers} layer(s) active");
        Ok(())
    }

    /// # Errors
    /// - if the save store fails
    pub fn save_game(&mut self, slot: &str) -> Result<()> {
        let game = SaveGame::new(self.state.clone(), self.dataset.current().layers().to_vec());
        self.saves.write(slot, &game)
    }

    /// # Errors
    /// - if the save store cannot be listed
    pub fn save_slots(&self) -> Result<Vec<SaveSlot>> {
        self.saves.slots()
    }

    /// Replace the live state with a saved one.
    ///
    /// # Errors
    /// - if the slot cannot be read
    pub fn load_game(&mut self, slot: &str) -> Result<()> {
        let game = self.saves.read(slot)?;
        if game.layers != self.dataset.current().layers() {
            warn!("save '{slot}' was made with a different set of content packages");
        }
        self.state = game.state;
        info!("loaded save '{slot}' at generation {}", self.state.generation);
        Ok(())
    }
}
