//! Versioned package lookup.
//!
//! A [`ContentRepository`] hands out packages by `(id, version)`. The
//! directory implementation expects one folder per version:
//! `<root>/<id>/<version>/mod.json` plus data files.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use legacy_data::{is_valid_id, is_valid_version};

use crate::content::ContentPackage;
use crate::loader::packages::{ManifestError, load_package};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("package '{id}' version '{version}' not found")]
    NotFound { id: String, version: String },
    #[error("'{dir}' holds '{found_id}' v{found_version}, not '{id}' v{version}")]
    Mismatch {
        dir: PathBuf,
        id: String,
        version: String,
        found_id: String,
        found_version: String,
    },
    #[error("invalid package {what} '{value}'")]
    InvalidName { what: &'static str, value: String },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("listing '{dir}': {source}")]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait ContentRepository {
    /// # Errors
    /// - if the package is unknown or cannot be loaded
    fn fetch(&self, id: &str, version: &str) -> Result<ContentPackage, RepositoryError>;

    /// Versions available for `id`, sorted.
    ///
    /// # Errors
    /// - if the repository cannot be listed
    fn versions(&self, id: &str) -> Result<Vec<String>, RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
}

impl DirectoryRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn check_id(id: &str) -> Result<(), RepositoryError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(RepositoryError::InvalidName {
            what: "id",
            value: id.to_string(),
        })
    }
}

impl ContentRepository for DirectoryRepository {
    fn fetch(&self, id: &str, version: &str) -> Result<ContentPackage, RepositoryError> {
        check_id(id)?;
        if !is_valid_version(version) {
            return Err(RepositoryError::InvalidName {
                what: "version",
                value: version.to_string(),
            });
        }
        let dir = self.root.join(id).join(version);
        if !dir.is_dir() {
            return Err(RepositoryError::NotFound {
                id: id.to_string(),
                version: version.to_string(),
            });
        }
        let package = load_package(&dir)?;
        // Folder name is the version, so the manifest id is what must agree.
        if package.version() != version || (package.id() != id && package.id() != version) {
            return Err(RepositoryError::Mismatch {
                dir,
                id: id.to_string(),
                version: version.to_string(),
                found_id: package.id().to_string(),
                found_version: package.version().to_string(),
            });
        }
        debug!("fetched '{id}' v{version} from '{}'", self.root.display());
        Ok(package)
    }

    fn versions(&self, id: &str) -> Result<Vec<String>, RepositoryError> {
        check_id(id)?;
        let dir = self.root.join(id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|source| RepositoryError::Io {
            dir: dir.clone(),
            source,
        })?;
        let mut versions: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| is_valid_version(name))
            .collect();
        versions.sort();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legacy_data::FileKind;

    fn write_version(root: &Path, id: &str, version: &str, manifest: &str) {
        let dir = root.join(id).join(version);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("mod.json"), manifest).expect("manifest");
        fs::write(dir.join("enemies.json"), r#"{"goblin": {"hp": 40}}"#).expect("data");
    }

    #[test]
    fn fetches_by_id_and_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_version(dir.path(), "goblins", "1.0", r#"{"id": "goblins", "version": "1.0"}"#);
        write_version(dir.path(), "goblins", "1.1", r#"{"id": "goblins", "version": "1.1"}"#);
        let repo = DirectoryRepository::new(dir.path());

        assert_eq!(repo.versions("goblins").expect("versions"), vec!["1.0", "1.1"]);
        let package = repo.fetch("goblins", "1.1").expect("fetch");
        assert_eq!(package.version(), "1.1");
        assert!(package.declared_files().contains(&FileKind::Enemies));
    }

    #[test]
    fn unknown_package_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = DirectoryRepository::new(dir.path());
        assert!(matches!(repo.fetch("nope", "1.0"), Err(RepositoryError::NotFound { .. })));
        assert!(repo.versions("nope").expect("versions").is_empty());
    }

    #[test]
    fn manifest_must_match_requested_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_version(dir.path(), "goblins", "2.0", r#"{"id": "goblins", "version": "1.9"}"#);
        let repo = DirectoryRepository::new(dir.path());
        assert!(matches!(repo.fetch("goblins", "2.0"), Err(RepositoryError::Mismatch { .. })));
    }

    #[test]
    fn names_cannot_escape_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("repo");
        fs::create_dir_all(&root).expect("mkdir");
        write_version(dir.path(), "outside", "1.0", r#"{"id": "outside", "version": "1.0"}"#);
        let repo = DirectoryRepository::new(&root);

        assert!(matches!(
            repo.fetch("../outside", "1.0"),
            Err(RepositoryError::InvalidName { what: "id", .. })
        ));
        assert!(matches!(
            repo.fetch("goblins", "../../outside/1.0"),
            Err(RepositoryError::InvalidName { what: "version", .. })
        ));
        assert!(matches!(repo.fetch("goblins", ".."), Err(RepositoryError::InvalidName { .. })));
        assert!(matches!(repo.versions(".."), Err(RepositoryError::InvalidName { .. })));
    }
}
