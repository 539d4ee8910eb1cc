use std::env;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Environment variable that overrides data root detection.
pub const DATA_DIR_ENV: &str = "LEGACY_DATA_DIR";

/// Cached path to the directory containing the engine's runtime data files.
static DATA_ROOT: LazyLock<PathBuf> = LazyLock::new(detect_data_root);

/// Well-known locations inside one data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    /// Base game package.
    pub base: PathBuf,
    /// One subdirectory per mod package.
    pub mods: PathBuf,
    /// Hook manifest and module sources.
    pub scripts: PathBuf,
    pub settings: PathBuf,
    pub player: PathBuf,
    pub saves: PathBuf,
}

impl DataPaths {
    /// Lay out the standard directories under `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            base: root.join("base"),
            mods: root.join("mods"),
            scripts: root.join("scripts"),
            settings: root.join("settings.toml"),
            player: root.join("player.toml"),
            saves: root.join("saved_games"),
            root,
        }
    }

    /// Layout rooted at the auto-detected data directory.
    pub fn detect() -> Self {
        Self::at(DATA_ROOT.clone())
    }

    /// Hook manifest location; `hooks.toml` wins over `hooks.json` when both exist.
    pub fn hook_manifest(&self) -> PathBuf {
        let toml_path = self.scripts.join("hooks.toml");
        let json_path = self.scripts.join("hooks.json");
        if !toml_path.exists() && json_path.exists() {
            json_path
        } else {
            toml_path
        }
    }
}

/// Resolve the most likely location of the runtime data directory.
fn detect_data_root() -> PathBuf {
    if let Ok(explicit) = env::var(DATA_DIR_ENV)
        && !explicit.trim().is_empty()
    {
        return PathBuf::from(explicit);
    }

    let mut candidates = Vec::new();

    // Common layouts: workspace root and flattened `data/`.
    candidates.push(PathBuf::from("legacy_engine/data"));
    candidates.push(PathBuf::from("data"));

    if let Ok(exe_path) = env::current_exe()
        && let Some(dir) = exe_path.parent()
    {
        candidates.push(dir.join("legacy_engine/data"));
        candidates.push(dir.join("data"));

        if let Some(parent) = dir.parent() {
            candidates.push(parent.join("legacy_engine/data"));
            candidates.push(parent.join("data"));
        }
    }

    if let Some(user_data) = dirs::data_dir() {
        candidates.push(user_data.join("our_legacy"));
    }

    candidates
        .into_iter()
        .find(|candidate| candidate.is_dir())
        .unwrap_or_else(|| PathBuf::from("legacy_engine/data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_relative_to_root() {
        let paths = DataPaths::at("/tmp/legacy");
        assert_eq!(paths.base, PathBuf::from("/tmp/legacy/base"));
        assert_eq!(paths.mods, PathBuf::from("/tmp/legacy/mods"));
        assert_eq!(paths.hook_manifest(), PathBuf::from("/tmp/legacy/scripts/hooks.toml"));
    }

    #[test]
    fn json_manifest_used_when_toml_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = DataPaths::at(dir.path());
        std::fs::create_dir_all(&paths.scripts).expect("mkdir");
        std::fs::write(paths.scripts.join("hooks.json"), "{}").expect("write");
        assert_eq!(paths.hook_manifest(), paths.scripts.join("hooks.json"));
    }
}
