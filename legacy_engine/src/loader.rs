//! Loader utilities for building a [`GameHost`] from the data directory.
//!
//! Content packages are JSON, while settings, the hook manifest and the
//! starting player are TOML-backed. Anything that would leave the game in an
//! inconsistent state (a merge conflict, a bad hook manifest) stops startup.

pub mod hooks;
pub mod packages;
pub mod player;
pub mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::info;

use crate::content::ContentPackage;
use crate::data_paths::DataPaths;
use crate::dispatch::ScriptHost;
use crate::host::GameHost;
use crate::loader::hooks::load_hook_registry;
use crate::loader::packages::{discover_packages, load_base_package};
use crate::loader::player::build_initial_state;
use crate::loader::settings::{RuntimeKind, Settings, load_settings};
use crate::merge::{ResolvedDataset, merge};
use crate::script::{ProcessRuntime, RhaiRuntime, ScriptExecutor, ScriptRuntime};
use crate::snapshot::StateSnapshotBridge;

/// Base package followed by every enabled mod, in load order.
///
/// # Errors
/// - if the base package is missing or the mods directory cannot be read
pub fn load_layers(paths: &DataPaths, settings: &Settings) -> Result<Vec<ContentPackage>> {
    let base = load_base_package(&paths.base)?;
    let mods = discover_packages(&paths.mods, settings, &[base.id()])?;
    let mut layers = vec![base];
    layers.extend(mods);
    let order: Vec<&str> = layers.iter().map(ContentPackage::id).collect();
    info!("load order: {}", order.join(" -> "));
    Ok(layers)
}

/// Load and merge all content.
///
/// # Errors
/// - if loading fails or two packages collide on an append-only key
pub fn build_dataset(paths: &DataPaths, settings: &Settings) -> Result<ResolvedDataset> {
    let layers = load_layers(paths, settings)?;
    merge(&layers).context("while merging content packages")
}

/// Assemble the script host described by settings and the hook manifest.
///
/// Returns `None` when scripting is switched off.
///
/// # Errors
/// - if the hook manifest is invalid, or the process runtime has no program configured
pub fn build_script_host(paths: &DataPaths, settings: &Settings) -> Result<Option<ScriptHost>> {
    let mut scripting = settings.scripting.clone();
    scripting.sanitize();
    if !scripting.enabled {
        info!("scripting disabled in settings");
        return Ok(None);
    }
    let manifest = paths.hook_manifest();
    let registry = load_hook_registry(&manifest).context("while loading hook manifest")?;

    let runtime: Arc<dyn ScriptRuntime> = match scripting.runtime {
        RuntimeKind::Rhai => Arc::new(RhaiRuntime::default()),
        RuntimeKind::Process => {
            let Some(program) = scripting.program.as_deref().filter(|p| !p.trim().is_empty()) else {
                bail!("scripting.runtime = \"process\" requires scripting.program");
            };
            Arc::new(ProcessRuntime::new(program, scripting.args.clone()))
        },
    };
    info!(
        "script host ready: {} runtime, {} ms default timeout",
        runtime.name(),
        scripting.default_timeout_ms
    );
    let executor = ScriptExecutor::new(
        runtime,
        Duration::from_millis(scripting.default_timeout_ms),
        Duration::from_millis(scripting.kill_grace_ms),
    );
    let bridge = StateSnapshotBridge::new(scripting.activity_window);
    Ok(Some(ScriptHost::new(registry, executor, bridge)))
}

/// Build a ready-to-play host from the data directory at `paths`.
///
/// # Errors
/// Errors bubble up from file IO, merge conflicts, hook manifest validation,
/// or an invalid starting player.
pub fn load_host(paths: DataPaths) -> Result<GameHost> {
    let settings = load_settings(&paths.settings);
    let dataset = build_dataset(&paths, &settings)?;
    info!(
        "dataset ready: {} layer(s), {} enemies, {} areas",
        dataset.layers().len(),
        dataset.entry_count(legacy_data::FileKind::Enemies),
        dataset.entry_count(legacy_data::FileKind::Areas)
    );
    let scripting = build_script_host(&paths, &settings)?;
    let state = build_initial_state(&paths.player).context("while building starting state")?;
    Ok(GameHost::new(paths, settings, dataset, state, scripting))
}
