//! Content packages.
//!
//! A [`ContentPackage`] is one frozen layer of game data: the base game or a
//! single mod. Packages are built once by the loader and never change
//! afterwards; the merger only ever reads them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use legacy_data::{FileKind, Id, MergeRule, PackageManifest};
use log::warn;
use serde_json::Value;

/// A data file that was found but left out of the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFile {
    pub kind: FileKind,
    pub reason: String,
}

/// One immutable, versioned layer of content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentPackage {
    id: Id,
    version: String,
    enabled: bool,
    manifest: Option<PackageManifest>,
    root: Option<PathBuf>,
    files: BTreeMap<FileKind, Value>,
    rejected: Vec<RejectedFile>,
}

impl ContentPackage {
    /// Build a package from parsed documents.
    ///
    /// Documents whose shape does not fit their kind's merge schema are dropped
    /// and recorded in [`ContentPackage::rejected`]; the rest of the package survives.
    pub fn from_documents(
        id: impl Into<Id>,
        version: impl Into<String>,
        documents: impl IntoIterator<Item = (FileKind, Value)>,
    ) -> Self {
        let mut package = Self {
            id: id.into(),
            version: version.into(),
            enabled: true,
            manifest: None,
            root: None,
            files: BTreeMap::new(),
            rejected: Vec::new(),
        };
        for (kind, doc) in documents {
            package.add_document(kind, doc);
        }
        package
    }

    pub(crate) fn from_manifest(manifest: PackageManifest, id: Id, root: &Path) -> Self {
        Self {
            id,
            version: manifest.version.clone(),
            enabled: manifest.enabled,
            manifest: Some(manifest),
            root: Some(root.to_path_buf()),
            files: BTreeMap::new(),
            rejected: Vec::new(),
        }
    }

    pub(crate) fn add_document(&mut self, kind: FileKind, doc: Value) {
        match check_shape(kind, &doc) {
            Ok(()) => {
                self.files.insert(kind, doc);
            },
            Err(reason) => {
                warn!("package '{}': excluding {kind}: {reason}", self.id);
                self.rejected.push(RejectedFile { kind, reason });
            },
        }
    }

    pub(crate) fn reject(&mut self, kind: FileKind, reason: String) {
        warn!("package '{}': excluding {kind}: {reason}", self.id);
        self.rejected.push(RejectedFile { kind, reason });
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn manifest(&self) -> Option<&PackageManifest> {
        self.manifest.as_ref()
    }

    /// Directory the package was loaded from, if it came from disk.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Kinds of data this package contributes.
    pub fn declared_files(&self) -> BTreeSet<FileKind> {
        self.files.keys().copied().collect()
    }

    pub fn document(&self, kind: FileKind) -> Option<&Value> {
        self.files.get(&kind)
    }

    pub fn documents(&self) -> impl Iterator<Item = (FileKind, &Value)> {
        self.files.iter().map(|(kind, doc)| (*kind, doc))
    }

    pub fn rejected(&self) -> &[RejectedFile] {
        &self.rejected
    }
}

/// Check that `doc` can be merged under `kind`'s schema.
///
/// # Errors
/// Returns a human-readable reason when the root is not an object, an
/// append-only field is not an array of keyed objects, or a deep-merge field
/// is not an object.
pub fn check_shape(kind: FileKind, doc: &Value) -> Result<(), String> {
    let Value::Object(root) = doc else {
        return Err("top-level value must be a JSON object".to_string());
    };
    let schema = kind.schema();
    for (field, value) in root {
        match schema.rule_for(field) {
            MergeRule::ReplaceByKey => {},
            MergeRule::DeepMergeMap => {
                if !value.is_object() {
                    return Err(format!("field '{field}' must be an object"));
                }
            },
            MergeRule::AppendUnique { key_field } => {
                let Value::Array(entries) = value else {
                    return Err(format!("field '{field}' must be an array"));
                };
                for (idx, entry) in entries.iter().enumerate() {
                    match entry.get(key_field) {
                        Some(Value::String(key)) if !key.is_empty() => {},
                        _ => {
                            return Err(format!(
                                "field '{field}' entry {idx} needs a non-empty string '{key_field}'"
                            ));
                        },
                    }
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_by_key_kinds_accept_any_object() {
        assert!(check_shape(FileKind::Enemies, &json!({"goblin": {"hp": 30}, "odd": 5})).is_ok());
        assert!(check_shape(FileKind::Enemies, &json!([1, 2, 3])).is_err());
    }

    #[test]
    fn append_fields_need_keyed_objects() {
        assert!(check_shape(FileKind::Dungeons, &json!({"dungeons": [{"id": "crypt"}]})).is_ok());
        assert!(check_shape(FileKind::Dungeons, &json!({"dungeons": {"id": "crypt"}})).is_err());
        assert!(check_shape(FileKind::Dungeons, &json!({"dungeons": [{"name": "crypt"}]})).is_err());
        assert!(check_shape(FileKind::WeeklyChallenges, &json!({"challenges": [{"id": ""}]})).is_err());
    }

    #[test]
    fn deep_merge_fields_need_objects() {
        assert!(check_shape(FileKind::Dungeons, &json!({"challenge_templates": []})).is_err());
    }

    #[test]
    fn bad_document_is_rejected_not_fatal() {
        let package = ContentPackage::from_documents(
            "m",
            "1.0",
            [
                (FileKind::Enemies, json!({"goblin": {"hp": 40}})),
                (FileKind::Dungeons, json!({"dungeons": "nope"})),
            ],
        );
        assert_eq!(package.declared_files(), BTreeSet::from([FileKind::Enemies]));
        assert_eq!(package.rejected().len(), 1);
        assert_eq!(package.rejected()[0].kind, FileKind::Dungeons);
    }
}
