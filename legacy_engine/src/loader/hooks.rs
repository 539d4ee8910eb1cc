//! Hook manifest loading.
//!
//! Reads `hooks.toml` (or `hooks.json`) from the scripts directory into a
//! [`HookRegistry`]. Only modules named in the manifest are ever bound; the
//! scripts directory is never scanned.

use std::fs;
use std::path::{Path, PathBuf};

use legacy_data::{HookManifestDef, LifecycleEvent, ValidationError, validate_hook_manifest};
use log::{info, warn};
use thiserror::Error;

use crate::hooks::{HookBinding, HookRegistry, ModuleSpec};

/// Source file extension assumed when a module does not name its source.
pub const DEFAULT_MODULE_EXTENSION: &str = "rhai";

#[derive(Debug, Error)]
pub enum HookManifestError {
    #[error("reading hook manifest '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing hook manifest '{path}': {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid hook manifest '{path}':\n{}", format_errors(.errors))]
    Invalid {
        path: PathBuf,
        errors: Vec<ValidationError>,
    },
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n")
}

/// Parse a manifest; JSON if the file ends in `.json`, TOML otherwise.
///
/// # Errors
/// - if the file cannot be read or parsed
pub fn parse_hook_manifest(path: &Path) -> Result<HookManifestDef, HookManifestError> {
    let text = fs::read_to_string(path).map_err(|source| HookManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&text).map_err(|e| e.to_string())
    } else {
        toml::from_str(&text).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| HookManifestError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Build a registry from a parsed manifest. Relative sources resolve against `scripts_dir`.
pub fn build_registry(def: &HookManifestDef, scripts_dir: &Path) -> HookRegistry {
    let mut registry = HookRegistry::new();
    for (event, entries) in &def.hooks {
        if LifecycleEvent::from_key(event).is_none() {
            warn!("hook manifest binds unknown event '{event}'; it only runs if fired explicitly");
        }
        for entry in entries {
            let mut binding = HookBinding::new(event.as_str(), entry.module.as_str(), entry.priority);
            binding.enabled = entry.enabled;
            registry.register(binding);
            if registry.module(&entry.module).is_none() {
                registry.add_module(module_spec(def, &entry.module, scripts_dir));
            }
        }
    }
    registry
}

fn module_spec(def: &HookManifestDef, id: &str, scripts_dir: &Path) -> ModuleSpec {
    let declared = def.modules.get(id);
    let source = declared
        .and_then(|m| m.source.as_deref())
        .map_or_else(
            || scripts_dir.join(format!("{id}.{DEFAULT_MODULE_EXTENSION}")),
            |src| scripts_dir.join(src),
        );
    ModuleSpec {
        id: id.to_string(),
        source,
        timeout_ms: declared.and_then(|m| m.timeout_ms),
    }
}

/// Load, validate and build the hook registry at `path`.
///
/// A missing manifest yields an empty registry.
///
/// # Errors
/// - [`HookManifestError`] if the manifest is unreadable, unparsable or invalid
pub fn load_hook_registry(path: &Path) -> Result<HookRegistry, HookManifestError> {
    if !path.exists() {
        info!("no hook manifest at '{}'; no script modules bound", path.display());
        return Ok(HookRegistry::new());
    }
    let def = parse_hook_manifest(path)?;
    let errors = validate_hook_manifest(&def);
    if !errors.is_empty() {
        return Err(HookManifestError::Invalid {
            path: path.to_path_buf(),
            errors,
        });
    }
    let scripts_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let registry = build_registry(&def, scripts_dir);
    info!(
        "hook manifest '{}' loaded: {} binding(s) across {} event(s)",
        path.display(),
        registry.binding_count(),
        registry.events().len()
    );
    Ok(registry)
}
