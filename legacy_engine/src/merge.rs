//! Data merger.
//!
//! Folds an ordered list of [`ContentPackage`] layers into one
//! [`ResolvedDataset`]. Every top-level field of every document is combined
//! according to its kind's [`MergeRule`]:
//!
//! - `ReplaceByKey`: last writer wins, silently (override logged at debug)
//! - `AppendUnique`: arrays concatenate; an identifying key seen twice aborts the merge
//! - `DeepMergeMap`: nested objects merge key-by-key, leaves replaced
//!
//! Merging is a pure function of the layer list. Documents are held in
//! sorted-key maps so the canonical JSON form is byte-identical across runs.

use std::collections::{BTreeMap, HashMap};
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock};

use legacy_data::{FileKind, MergeRule};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::content::ContentPackage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("merge conflict in {file} field '{field}': key '{key}' supplied by both '{first}' and '{second}'")]
    Conflict {
        file: FileKind,
        field: String,
        key: String,
        first: String,
        second: String,
    },
}

/// A package that contributed to a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub id: String,
    pub version: String,
}

/// The merged view of all enabled content packages.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedDataset {
    layers: Vec<LayerInfo>,
    files: BTreeMap<FileKind, Value>,
    #[serde(skip)]
    provenance: BTreeMap<(FileKind, String), String>,
}

impl ResolvedDataset {
    /// Layers in the order they were applied.
    pub fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    pub fn document(&self, kind: FileKind) -> Option<&Value> {
        self.files.get(&kind)
    }

    /// Look up one top-level entry, e.g. `get(FileKind::Enemies, "goblin")`.
    pub fn get(&self, kind: FileKind, key: &str) -> Option<&Value> {
        self.files.get(&kind).and_then(|doc| doc.get(key))
    }

    pub fn contains(&self, kind: FileKind, key: &str) -> bool {
        self.get(kind, key).is_some()
    }

    /// Number of top-level entries for a kind.
    pub fn entry_count(&self, kind: FileKind) -> usize {
        self.files
            .get(&kind)
            .and_then(Value::as_object)
            .map_or(0, Map::len)
    }

    /// Package that supplied the winning value of a replace-by-key entry.
    pub fn source_of(&self, kind: FileKind, key: &str) -> Option<&str> {
        self.provenance.get(&(kind, key.to_string())).map(String::as_str)
    }

    /// Canonical serialized form; identical input layers give identical bytes.
    ///
    /// # Errors
    /// - only if serialization itself fails, which sorted string-keyed maps do not
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Merge `layers` in order, base first.
///
/// # Errors
/// - [`MergeError::Conflict`] if two layers (or one layer twice) contribute the
///   same key to an append-only collection
pub fn merge(layers: &[ContentPackage]) -> Result<ResolvedDataset, MergeError> {
    let mut files: BTreeMap<FileKind, Map<String, Value>> = BTreeMap::new();
    let mut provenance = BTreeMap::new();
    let mut append_owners: HashMap<(FileKind, String, String), String> = HashMap::new();

    for layer in layers {
        for (kind, doc) in layer.documents() {
            // Package construction guarantees object roots.
            let Value::Object(fields) = doc else { continue };
            let schema = kind.schema();
            let target = files.entry(kind).or_default();

            for (field, value) in fields {
                match schema.rule_for(field) {
                    MergeRule::ReplaceByKey => {
                        if let Some(previous) = provenance.insert((kind, field.clone()), layer.id().to_string()) {
                            debug!("{kind} '{field}': '{}' overrides '{previous}'", layer.id());
                        }
                        target.insert(field.clone(), value.clone());
                    },
                    MergeRule::DeepMergeMap => {
                        let slot = target
                            .entry(field.clone())
                            .or_insert_with(|| Value::Object(Map::new()));
                        deep_merge(slot, value);
                    },
                    MergeRule::AppendUnique { key_field } => {
                        let Value::Array(items) = target
                            .entry(field.clone())
                            .or_insert_with(|| Value::Array(Vec::new()))
                        else {
                            continue;
                        };
                        for entry in value.as_array().into_iter().flatten() {
                            let key = entry.get(key_field).and_then(Value::as_str).unwrap_or_default();
                            match append_owners.entry((kind, field.clone(), key.to_string())) {
                                Entry::Occupied(owner) => {
                                    return Err(MergeError::Conflict {
                                        file: kind,
                                        field: field.clone(),
                                        key: key.to_string(),
                                        first: owner.get().clone(),
                                        second: layer.id().to_string(),
                                    });
                                },
                                Entry::Vacant(slot) => {
                                    slot.insert(layer.id().to_string());
                                    items.push(entry.clone());
                                },
                            }
                        }
                    },
                }
            }
        }
    }

    let dataset = ResolvedDataset {
        layers: layers
            .iter()
            .map(|layer| LayerInfo {
                id: layer.id().to_string(),
                version: layer.version().to_string(),
            })
            .collect(),
        files: files.into_iter().map(|(kind, map)| (kind, Value::Object(map))).collect(),
        provenance,
    };
    info!(
        "merged {} layers into {} data files",
        dataset.layers.len(),
        dataset.files.len()
    );
    Ok(dataset)
}

/// Recursively fold `incoming` into `target`; non-object values replace outright.
fn deep_merge(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(new)) => {
            for (key, value) in new {
                match existing.get_mut(key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key.clone(), value.clone());
                    },
                }
            }
        },
        (slot, value) => *slot = value.clone(),
    }
}

/// Shared, swappable handle to the active dataset.
///
/// Readers take a cheap `Arc` clone; a reload builds a complete new dataset and
/// swaps the reference, so no reader ever sees a half-merged state.
#[derive(Debug, Default)]
pub struct DatasetCell {
    current: RwLock<Arc<ResolvedDataset>>,
}

impl DatasetCell {
    pub fn new(dataset: ResolvedDataset) -> Self {
        Self {
            current: RwLock::new(Arc::new(dataset)),
        }
    }

    pub fn current(&self) -> Arc<ResolvedDataset> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install a new dataset, returning the one it replaced.
    pub fn swap(&self, dataset: ResolvedDataset) -> Arc<ResolvedDataset> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(dataset))
    }
}
