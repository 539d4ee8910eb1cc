//! Engine and mod settings.
//!
//! Settings live in `settings.toml` at the data root. Loading never fails: a
//! missing or broken file falls back to defaults with a warning, the same way
//! the game would behave on a fresh install.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Which script runtime backs module invocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    #[default]
    Rhai,
    Process,
}

/// `[scripting]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingSettings {
    pub enabled: bool,
    /// Advisory per-module timeout used when a module does not set its own.
    pub default_timeout_ms: u64,
    /// Extra time the host waits past the timeout before abandoning an invocation.
    pub kill_grace_ms: u64,
    /// Number of trailing activity log entries included in each snapshot.
    pub activity_window: usize,
    pub runtime: RuntimeKind,
    /// Interpreter for the process runtime, e.g. `python3`.
    pub program: Option<String>,
    pub args: Vec<String>,
}

impl Default for ScriptingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout_ms: 500,
            kill_grace_ms: 250,
            activity_window: 100,
            runtime: RuntimeKind::Rhai,
            program: None,
            args: Vec::new(),
        }
    }
}

impl ScriptingSettings {
    /// Replaces a zero default timeout, which would fail every module, with the built-in one.
    pub fn sanitize(&mut self) {
        if self.default_timeout_ms == 0 {
            let fallback = Self::default().default_timeout_ms;
            warn!("scripting.default_timeout_ms must be greater than zero; using {fallback}");
            self.default_timeout_ms = fallback;
        }
    }
}

/// Complete settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master switch; when off only the base package loads.
    pub mods_enabled: bool,
    pub disabled_mods: BTreeSet<String>,
    /// Package ids loaded first, in this order. Anything unlisted follows, sorted by id.
    pub load_order: Vec<String>,
    pub language: String,
    pub scripting: ScriptingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mods_enabled: true,
            disabled_mods: BTreeSet::new(),
            load_order: Vec::new(),
            language: "en".to_string(),
            scripting: ScriptingSettings::default(),
        }
    }
}

impl Settings {
    pub fn is_mod_disabled(&self, id: &str) -> bool {
        self.disabled_mods.contains(id)
    }

    /// Flip one mod between enabled and disabled. Returns `true` if it is now enabled.
    pub fn toggle_mod(&mut self, id: &str) -> bool {
        if self.disabled_mods.remove(id) {
            info!("mod '{id}' enabled");
            true
        } else {
            self.disabled_mods.insert(id.to_string());
            info!("mod '{id}' disabled");
            false
        }
    }

    /// Flip the whole mod system. Returns the new state.
    pub fn toggle_mods_system(&mut self) -> bool {
        self.mods_enabled = !self.mods_enabled;
        info!(
            "mod system {}",
            if self.mods_enabled { "enabled" } else { "disabled" }
        );
        self.mods_enabled
    }
}

/// Loads settings from a TOML file, falling back to defaults on error.
///
/// # Logging
/// - `info!` on successful load
/// - `warn!` if the file exists but cannot be read or parsed
pub fn load_settings(toml_path: &Path) -> Settings {
    if !toml_path.exists() {
        info!("no settings at '{}'; using defaults", toml_path.display());
        return Settings::default();
    }
    match try_load_settings(toml_path) {
        Ok(mut settings) => {
            settings.scripting.sanitize();
            info!(
                "settings loaded from '{}' ({} mods disabled)",
                toml_path.display(),
                settings.disabled_mods.len()
            );
            settings
        },
        Err(e) => {
            warn!(
                "Could not load settings from '{}': {:#}. Using defaults.",
                toml_path.display(),
                e
            );
            Settings::default()
        },
    }
}

fn try_load_settings(toml_path: &Path) -> Result<Settings> {
    let text = fs::read_to_string(toml_path)
        .with_context(|| format!("reading settings from '{}'", toml_path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing settings from '{}'", toml_path.display()))
}

/// Write settings back to disk.
///
/// # Errors
/// - on serialization failure or file IO error
pub fn save_settings(toml_path: &Path, settings: &Settings) -> Result<()> {
    let text = toml::to_string_pretty(settings).context("serializing settings")?;
    if let Some(parent) = toml_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::write(toml_path, text).with_context(|| format!("writing settings to '{}'", toml_path.display()))?;
    info!("settings saved to '{}'", toml_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&dir.path().join("settings.toml"));
        assert_eq!(settings, Settings::default());
        assert!(settings.mods_enabled);
        assert_eq!(settings.scripting.runtime, RuntimeKind::Rhai);
    }

    #[test]
    fn broken_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(&path, "mods_enabled = \"yes please\"").expect("write");
        assert_eq!(load_settings(&path), Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "disabled_mods = [\"noisy\"]\nload_order = [\"b\", \"a\"]\n[scripting]\ndefault_timeout_ms = 50\n",
        )
        .expect("write");
        let settings = load_settings(&path);
        assert!(settings.is_mod_disabled("noisy"));
        assert_eq!(settings.load_order, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(settings.scripting.default_timeout_ms, 50);
        assert_eq!(settings.scripting.kill_grace_ms, 250);
        assert_eq!(settings.language, "en");
    }

    #[test]
    fn toggles_save_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        let mut settings = Settings::default();
        assert!(!settings.toggle_mod("extra_goblins"));
        assert!(!settings.toggle_mods_system());
        save_settings(&path, &settings).expect("save");

        let mut reloaded = load_settings(&path);
        assert_eq!(reloaded, settings);
        assert!(reloaded.toggle_mod("extra_goblins"));
        assert!(!reloaded.is_mod_disabled("extra_goblins"));
    }

    #[test]
    fn zero_default_timeout_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[scripting]\ndefault_timeout_ms = 0\nkill_grace_ms = 0\n").expect("write");
        let settings = load_settings(&path);
        assert_eq!(settings.scripting.default_timeout_ms, 500);
        assert_eq!(settings.scripting.kill_grace_ms, 0);
    }
}
