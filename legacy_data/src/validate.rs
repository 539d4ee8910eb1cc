use std::collections::HashSet;
use std::fmt;

use crate::*;

/// Validation error for malformed values or references in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    DuplicateId { kind: &'static str, id: String },
    MissingReference { kind: &'static str, id: String, context: String },
    InvalidValue { context: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::DuplicateId { kind, id } => {
                write!(f, "duplicate {kind} id '{id}'")
            },
            ValidationError::MissingReference { kind, id, context } => {
                write!(f, "missing {kind} '{id}' ({context})")
            },
            ValidationError::InvalidValue { context } => {
                write!(f, "invalid value ({context})")
            },
        }
    }
}

impl std::error::Error for ValidationError {}

/// True if `id` is non-empty and made only of ASCII alphanumerics, `_` and `-`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

/// True if `version` is usable as a single folder name: ASCII alphanumerics,
/// `.`, `_`, `-` and `+`, not starting with a dot.
pub fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && !version.starts_with('.')
        && version
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | '+'))
}

/// Check a package manifest for values the loader cannot work with.
///
/// `folder_name` is used to resolve the package id when the manifest omits one.
pub fn validate_package_manifest(manifest: &PackageManifest, folder_name: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let id = manifest.resolved_id(folder_name);
    if !is_valid_id(&id) {
        errors.push(ValidationError::InvalidValue {
            context: format!("package id '{id}' must be alphanumeric with '_' or '-'"),
        });
    }
    if manifest.version.trim().is_empty() {
        errors.push(ValidationError::InvalidValue {
            context: format!("package '{id}' has an empty version"),
        });
    }
    errors
}

/// Validate bindings and module settings in a hook manifest.
///
/// ```
/// use legacy_data::{HookEntryDef, HookManifestDef, validate_hook_manifest};
///
/// let mut manifest = HookManifestDef::default();
/// manifest.hooks.insert(
///     "on_player_levelup".into(),
///     vec![HookEntryDef { module: "buff_granter".into(), priority: 100, enabled: true }],
/// );
/// assert!(validate_hook_manifest(&manifest).is_empty());
/// ```
pub fn validate_hook_manifest(manifest: &HookManifestDef) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut bound = HashSet::new();

    for (event, entries) in &manifest.hooks {
        if event.trim().is_empty() {
            errors.push(ValidationError::InvalidValue {
                context: "hook event name is empty".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for entry in entries {
            if !is_valid_id(&entry.module) {
                errors.push(ValidationError::InvalidValue {
                    context: format!("event '{event}' binds invalid module id '{}'", entry.module),
                });
                continue;
            }
            if !seen.insert(entry.module.as_str()) {
                errors.push(ValidationError::DuplicateId {
                    kind: "hook binding",
                    id: format!("{event}/{}", entry.module),
                });
            }
            bound.insert(entry.module.as_str());
        }
    }

    for (module, def) in &manifest.modules {
        if def.timeout_ms == Some(0) {
            errors.push(ValidationError::InvalidValue {
                context: format!("module '{module}' timeout_ms must be greater than zero"),
            });
        }
        if let Some(source) = &def.source
            && source.trim().is_empty()
        {
            errors.push(ValidationError::InvalidValue {
                context: format!("module '{module}' has an empty source path"),
            });
        }
        if !bound.contains(module.as_str()) {
            errors.push(ValidationError::MissingReference {
                kind: "hook binding",
                id: module.clone(),
                context: "module is declared but bound to no event".to_string(),
            });
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(module: &str, priority: i64) -> HookEntryDef {
        HookEntryDef {
            module: module.into(),
            priority,
            enabled: true,
        }
    }

    #[test]
    fn duplicate_binding_in_one_event_is_reported() {
        let mut manifest = HookManifestDef::default();
        manifest
            .hooks
            .insert("on_battle_end".into(), vec![entry("tracker", 1), entry("tracker", 5)]);
        let errors = validate_hook_manifest(&manifest);
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateId {
                kind: "hook binding",
                id: "on_battle_end/tracker".into()
            }]
        );
    }

    #[test]
    fn same_module_on_two_events_is_fine() {
        let mut manifest = HookManifestDef::default();
        manifest.hooks.insert("on_battle_end".into(), vec![entry("tracker", 1)]);
        manifest.hooks.insert("on_item_acquired".into(), vec![entry("tracker", 1)]);
        assert!(validate_hook_manifest(&manifest).is_empty());
    }

    #[test]
    fn unbound_module_and_zero_timeout_are_reported() {
        let mut manifest = HookManifestDef::default();
        manifest.modules.insert(
            "orphan".into(),
            ModuleDef {
                source: None,
                timeout_ms: Some(0),
            },
        );
        let errors = validate_hook_manifest(&manifest);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingReference { id, .. } if id == "orphan")));
    }

    #[test]
    fn bad_module_ids_are_rejected() {
        let mut manifest = HookManifestDef::default();
        manifest
            .hooks
            .insert("on_battle_end".into(), vec![entry("../escape", 1), entry("", 2)]);
        assert_eq!(validate_hook_manifest(&manifest).len(), 2);
    }

    #[test]
    fn package_manifest_needs_version_and_clean_id() {
        let manifest = PackageManifest {
            id: Some("bad id!".into()),
            version: " ".into(),
            enabled: true,
            name: None,
            author: None,
            description: None,
        };
        assert_eq!(validate_package_manifest(&manifest, "folder").len(), 2);

        let fine = PackageManifest {
            id: None,
            version: "1.2".into(),
            ..manifest
        };
        assert!(validate_package_manifest(&fine, "folder").is_empty());
    }

    #[test]
    fn version_names_stay_inside_one_folder() {
        for good in ["1.0", "2.1.3-beta", "1.0+build_7"] {
            assert!(is_valid_version(good), "{good}");
        }
        for bad in ["", ".", "..", "../etc", "1.0/2", "..\\x", ".hidden", "/abs"] {
            assert!(!is_valid_version(bad), "{bad}");
        }
    }
}
