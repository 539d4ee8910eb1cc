//! Content package discovery.
//!
//! Every subdirectory of the mods directory that holds a `mod.json` is a
//! candidate package. A package whose manifest is missing, unreadable or
//! invalid is left out entirely; a single bad data file only costs that file.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use legacy_data::{FileKind, PackageManifest, validate_package_manifest};
use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::LEGACY_VERSION;
use crate::content::ContentPackage;
use crate::loader::settings::Settings;

/// Manifest file expected in every package directory.
pub const MANIFEST_FILE: &str = "mod.json";

/// Id given to the base package when its directory has no manifest.
pub const BASE_PACKAGE_ID: &str = "base";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no {MANIFEST_FILE} in '{0}'")]
    Missing(PathBuf),
    #[error("reading manifest '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing manifest '{path}': {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid manifest '{path}': {details}")]
    Invalid { path: PathBuf, details: String },
}

/// Status line for one discovered package, whether or not it will load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageListing {
    pub folder: String,
    pub id: Option<String>,
    pub version: Option<String>,
    pub name: Option<String>,
    pub author: Option<String>,
    pub enabled: bool,
    /// Why the package will not load, if it won't.
    pub excluded: Option<String>,
}

/// Read and validate the manifest in `dir`.
///
/// # Errors
/// - if the manifest is missing, unreadable, not valid JSON, or fails validation
pub fn load_manifest(dir: &Path) -> Result<PackageManifest, ManifestError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(ManifestError::Missing(dir.to_path_buf()));
    }
    let text = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
        path: path.clone(),
        source,
    })?;
    let manifest: PackageManifest = serde_json::from_str(&text).map_err(|e| ManifestError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;
    let errors = validate_package_manifest(&manifest, &folder_name(dir));
    if !errors.is_empty() {
        let details = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
        return Err(ManifestError::Invalid { path, details });
    }
    Ok(manifest)
}

/// Load one package directory: manifest plus every recognized data file.
///
/// # Errors
/// - if the manifest cannot be loaded (see [`load_manifest`])
pub fn load_package(dir: &Path) -> Result<ContentPackage, ManifestError> {
    let manifest = load_manifest(dir)?;
    let id = manifest.resolved_id(&folder_name(dir));
    let mut package = ContentPackage::from_manifest(manifest, id, dir);
    read_documents(dir, &mut package);
    info!(
        "package '{}' v{} loaded from '{}' ({} files, {} rejected)",
        package.id(),
        package.version(),
        dir.display(),
        package.declared_files().len(),
        package.rejected().len()
    );
    Ok(package)
}

/// Load the base game package. A manifest is optional here.
///
/// # Errors
/// - if the base directory does not exist, or it has a manifest that is malformed
pub fn load_base_package(dir: &Path) -> Result<ContentPackage> {
    if !dir.is_dir() {
        anyhow::bail!("base content directory '{}' not found", dir.display());
    }
    if dir.join(MANIFEST_FILE).exists() {
        return load_package(dir).with_context(|| format!("loading base package from '{}'", dir.display()));
    }
    let manifest = PackageManifest {
        id: Some(BASE_PACKAGE_ID.to_string()),
        version: LEGACY_VERSION.to_string(),
        enabled: true,
        name: Some("Base game".to_string()),
        author: None,
        description: None,
    };
    let mut package = ContentPackage::from_manifest(manifest, BASE_PACKAGE_ID.to_string(), dir);
    read_documents(dir, &mut package);
    info!(
        "base package loaded from '{}' ({} files)",
        dir.display(),
        package.declared_files().len()
    );
    Ok(package)
}

/// Discover, filter and order the mod packages under `mods_dir`.
///
/// Returned packages are in load order and all enabled. A mod whose id is in
/// `loaded` (normally just the base package) is excluded.
///
/// # Errors
/// - if the mods directory exists but cannot be enumerated
pub fn discover_packages(mods_dir: &Path, settings: &Settings, loaded: &[&str]) -> Result<Vec<ContentPackage>> {
    if !settings.mods_enabled {
        info!("mod system disabled; skipping '{}'", mods_dir.display());
        return Ok(Vec::new());
    }

    let mut seen: HashSet<String> = loaded.iter().map(|id| (*id).to_string()).collect();
    let mut packages = Vec::new();
    for dir in package_dirs(mods_dir)? {
        let package = match load_package(&dir) {
            Ok(package) => package,
            Err(ManifestError::Missing(_)) => {
                debug!("'{}' has no manifest; not a package", dir.display());
                continue;
            },
            Err(e) => {
                warn!("excluding package: {e}");
                continue;
            },
        };
        if !package.enabled() {
            info!("package '{}' is disabled by its manifest", package.id());
            continue;
        }
        if settings.is_mod_disabled(package.id()) {
            info!("package '{}' is disabled in settings", package.id());
            continue;
        }
        if !seen.insert(package.id().to_string()) {
            warn!(
                "excluding '{}': package id '{}' already loaded",
                dir.display(),
                package.id()
            );
            continue;
        }
        packages.push(package);
    }

    Ok(order_packages(packages, &settings.load_order))
}

/// Sort packages into load order: ids named in `load_order` first, then the rest by id.
pub fn order_packages(packages: Vec<ContentPackage>, load_order: &[String]) -> Vec<ContentPackage> {
    let rank: BTreeMap<&str, usize> = load_order
        .iter()
        .enumerate()
        .map(|(idx, id)| (id.as_str(), idx))
        .collect();
    let mut packages = packages;
    packages.sort_by(|a, b| {
        let ra = rank.get(a.id()).copied().unwrap_or(usize::MAX);
        let rb = rank.get(b.id()).copied().unwrap_or(usize::MAX);
        ra.cmp(&rb).then_with(|| a.id().cmp(b.id()))
    });
    packages
}

/// Describe every package directory under `mods_dir` along with whether it will load.
///
/// # Errors
/// - if the mods directory exists but cannot be enumerated
pub fn list_packages(mods_dir: &Path, settings: &Settings) -> Result<Vec<PackageListing>> {
    let mut listings = Vec::new();
    for dir in package_dirs(mods_dir)? {
        let folder = folder_name(&dir);
        let listing = match load_manifest(&dir) {
            Ok(manifest) => {
                let id = manifest.resolved_id(&folder);
                let excluded = if !settings.mods_enabled {
                    Some("mod system disabled".to_string())
                } else if !manifest.enabled {
                    Some("disabled by manifest".to_string())
                } else if settings.is_mod_disabled(&id) {
                    Some("disabled in settings".to_string())
                } else {
                    None
                };
                PackageListing {
                    folder,
                    enabled: excluded.is_none(),
                    id: Some(id),
                    version: Some(manifest.version),
                    name: manifest.name,
                    author: manifest.author,
                    excluded,
                }
            },
            Err(ManifestError::Missing(_)) => continue,
            Err(e) => PackageListing {
                folder,
                id: None,
                version: None,
                name: None,
                author: None,
                enabled: false,
                excluded: Some(e.to_string()),
            },
        };
        listings.push(listing);
    }
    Ok(listings)
}

fn package_dirs(mods_dir: &Path) -> Result<Vec<PathBuf>> {
    if !mods_dir.is_dir() {
        debug!("mods directory '{}' not present", mods_dir.display());
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(mods_dir).with_context(|| format!("reading {}", mods_dir.display()))? {
        let entry = entry.with_context(|| format!("enumerating {}", mods_dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn read_documents(dir: &Path, package: &mut ContentPackage) {
    for kind in FileKind::ALL {
        let path = dir.join(kind.file_name());
        if !path.is_file() {
            continue;
        }
        let parsed = fs::read_to_string(&path)
            .map_err(|e| format!("reading '{}': {e}", path.display()))
            .and_then(|text| {
                serde_json::from_str::<Value>(&text).map_err(|e| format!("parsing '{}': {e}", path.display()))
            });
        match parsed {
            Ok(doc) => package.add_document(kind, doc),
            Err(reason) => package.reject(kind, reason),
        }
    }
}

fn folder_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_mod(root: &Path, folder: &str, manifest: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(MANIFEST_FILE), manifest).expect("manifest");
        for (name, body) in files {
            fs::write(dir.join(name), body).expect("data file");
        }
        dir
    }

    #[test]
    fn malformed_manifest_excludes_package() {
        let root = tempfile::tempdir().expect("tempdir");
        write_mod(root.path(), "broken", "{ not json", &[("enemies.json", "{}")]);
        write_mod(root.path(), "fine", r#"{"version": "1.0"}"#, &[]);
        let packages = discover_packages(root.path(), &Settings::default(), &[]).expect("discover");
        let ids: Vec<_> = packages.iter().map(ContentPackage::id).collect();
        assert_eq!(ids, vec!["fine"]);
    }

    #[test]
    fn malformed_file_excludes_only_that_file() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = write_mod(
            root.path(),
            "half",
            r#"{"id": "half", "version": "0.1"}"#,
            &[
                ("enemies.json", r#"{"goblin": {"hp": 40}}"#),
                ("items.json", "[oops"),
                ("notes.json", "{}"),
            ],
        );
        let package = load_package(&dir).expect("load");
        assert_eq!(package.declared_files().into_iter().collect::<Vec<_>>(), vec![FileKind::Enemies]);
        assert_eq!(package.rejected().len(), 1);
        assert_eq!(package.rejected()[0].kind, FileKind::Items);
    }

    #[test]
    fn disabled_packages_are_skipped() {
        let root = tempfile::tempdir().expect("tempdir");
        write_mod(root.path(), "off", r#"{"version": "1", "enabled": false}"#, &[]);
        write_mod(root.path(), "muted", r#"{"version": "1"}"#, &[]);
        write_mod(root.path(), "on", r#"{"version": "1"}"#, &[]);
        let mut settings = Settings::default();
        settings.toggle_mod("muted");
        let packages = discover_packages(root.path(), &settings, &[]).expect("discover");
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].id(), "on");

        settings.toggle_mods_system();
        assert!(discover_packages(root.path(), &settings, &[]).expect("discover").is_empty());
    }

    #[test]
    fn load_order_then_id_order() {
        let root = tempfile::tempdir().expect("tempdir");
        for folder in ["alpha", "bravo", "charlie", "delta"] {
            write_mod(root.path(), folder, r#"{"version": "1"}"#, &[]);
        }
        let settings = Settings {
            load_order: vec!["charlie".into(), "alpha".into()],
            ..Settings::default()
        };
        let packages = discover_packages(root.path(), &settings, &[]).expect("discover");
        let ids: Vec<_> = packages.iter().map(ContentPackage::id).collect();
        assert_eq!(ids, vec!["charlie", "alpha", "bravo", "delta"]);
    }

    #[test]
    fn duplicate_ids_keep_first_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        write_mod(root.path(), "a_copy", r#"{"id": "same", "version": "1"}"#, &[]);
        write_mod(root.path(), "b_copy", r#"{"id": "same", "version": "2"}"#, &[]);
        let packages = discover_packages(root.path(), &Settings::default(), &[]).expect("discover");
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].version(), "1");
    }

    #[test]
    fn mod_cannot_claim_a_loaded_id() {
        let root = tempfile::tempdir().expect("tempdir");
        write_mod(root.path(), "impostor", r#"{"id": "base", "version": "1"}"#, &[("enemies.json", r#"{"goblin": {"hp": 1}}"#)]);
        write_mod(root.path(), "honest", r#"{"version": "1"}"#, &[]);
        let packages = discover_packages(root.path(), &Settings::default(), &[BASE_PACKAGE_ID]).expect("discover");
        let ids: Vec<_> = packages.iter().map(ContentPackage::id).collect();
        assert_eq!(ids, vec!["honest"]);
    }

    #[test]
    fn base_without_manifest_gets_base_id() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::write(root.path().join("enemies.json"), r#"{"goblin": {"hp": 30}}"#).expect("write");
        let base = load_base_package(root.path()).expect("base");
        assert_eq!(base.id(), BASE_PACKAGE_ID);
        assert_eq!(base.version(), LEGACY_VERSION);
        assert!(base.document(FileKind::Enemies).is_some());
    }

    #[test]
    fn listing_reports_exclusions() {
        let root = tempfile::tempdir().expect("tempdir");
        write_mod(root.path(), "broken", "{", &[]);
        write_mod(root.path(), "ok", r#"{"version": "1", "name": "Okay Mod"}"#, &[]);
        let listings = list_packages(root.path(), &Settings::default()).expect("list");
        assert_eq!(listings.len(), 2);
        assert!(!listings[0].enabled);
        assert!(listings[0].excluded.is_some());
        assert_eq!(listings[1].name.as_deref(), Some("Okay Mod"));
        assert!(listings[1].enabled);
    }
}
