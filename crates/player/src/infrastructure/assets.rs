//! File-backed asset registry.
//!
//! Maps asset names to image files on disk and persists the mapping as
//! `registry.json` (`{name: {path}}`) inside the assets directory. Image
//! decoding is someone else's job; the registry only answers "does this
//! asset exist locally" for token validity.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tabletop_domain::AssetCatalog;

use crate::infrastructure::persistence::PersistenceError;

pub const REGISTRY_FILE: &str = "registry.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryEntry {
    path: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    dir: PathBuf,
    assets: BTreeMap<String, PathBuf>,
}

impl AssetRegistry {
    /// Empty registry rooted at `dir`; nothing is read or written yet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            assets: BTreeMap::new(),
        }
    }

    /// Loads `registry.json` from `dir`. A missing or unreadable registry
    /// yields an empty one; entries whose file is gone are skipped.
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new(dir);
        let path = registry.registry_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No asset registry loaded");
                return registry;
            }
        };

        let entries: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed asset registry");
                return registry;
            }
        };

        for (name, entry) in entries {
            let Some(file) = entry.get("path").and_then(|p| p.as_str()) else {
                continue;
            };
            let file = PathBuf::from(file);
            if file.exists() {
                registry.assets.insert(name, file);
            } else {
                tracing::warn!(asset = %name, path = %file.display(), "Registered asset file is missing");
            }
        }
        registry
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;
        let entries: BTreeMap<&str, RegistryEntry> = self
            .assets
            .iter()
            .map(|(name, path)| {
                (
                    name.as_str(),
                    RegistryEntry {
                        path: path.to_string_lossy().into_owned(),
                    },
                )
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| PersistenceError::Format(e.to_string()))?;
        let path = self.registry_path();
        fs::write(&path, json).map_err(|e| PersistenceError::io(&path, e))
    }

    /// Registers an existing image file under its file name, or
    /// `stem_1.ext`, `stem_2.ext`, ... when that name is taken. The file is
    /// referenced where it is, not copied.
    pub fn register(&mut self, file: &Path) -> Result<String, PersistenceError> {
        if !file.is_file() {
            return Err(PersistenceError::MissingFile(file.to_path_buf()));
        }
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PersistenceError::MissingFile(file.to_path_buf()))?;

        let name = self.unique_name(&file_name);
        self.assets.insert(name.clone(), file.to_path_buf());
        tracing::info!(asset = %name, path = %file.display(), "Asset registered");
        Ok(name)
    }

    /// Adds `name` as-is if it is free and the file exists. Used when a
    /// campaign brings its own asset table. Returns whether it was added.
    pub fn adopt(&mut self, name: &str, file: &Path) -> bool {
        if self.assets.contains_key(name) || !file.exists() {
            return false;
        }
        self.assets.insert(name.to_string(), file.to_path_buf());
        true
    }

    fn unique_name(&self, file_name: &str) -> String {
        if !self.assets.contains_key(file_name) {
            return file_name.to_string();
        }
        let path = Path::new(file_name);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        (1..)
            .map(|i| format!("{stem}_{i}{ext}"))
            .find(|candidate| !self.assets.contains_key(candidate))
            .unwrap_or_else(|| file_name.to_string())
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.assets.get(name).map(PathBuf::as_path)
    }

    pub fn remove(&mut self, name: &str) -> Option<PathBuf> {
        self.assets.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.assets
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl AssetCatalog for AssetRegistry {
    fn contains(&self, asset_name: &str) -> bool {
        self.assets.contains_key(asset_name)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"not really a png").expect("write image");
        path
    }

    #[test]
    fn test_register_picks_unique_names() {
        let tmp = TempDir::new().expect("tempdir");
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::create_dir_all(&a).expect("mkdir");
        fs::create_dir_all(&b).expect("mkdir");

        let mut registry = AssetRegistry::new(tmp.path().join("assets"));
        assert_eq!(registry.register(&image(&a, "goblin.png")).expect("register"), "goblin.png");
        assert_eq!(registry.register(&image(&b, "goblin.png")).expect("register"), "goblin_1.png");
        assert_eq!(registry.register(&image(&b, "goblin.png")).expect("register"), "goblin_2.png");
        assert!(registry.contains("goblin_1.png"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_register_missing_file_fails() {
        let tmp = TempDir::new().expect("tempdir");
        let mut registry = AssetRegistry::new(tmp.path());
        let err = registry
            .register(&tmp.path().join("ghost.png"))
            .expect_err("missing");
        assert!(matches!(err, PersistenceError::MissingFile(_)));
    }

    #[test]
    fn test_save_and_load_skip_vanished_files() {
        let tmp = TempDir::new().expect("tempdir");
        let dir = tmp.path().join("assets");
        let keep = image(tmp.path(), "knight.png");
        let gone = image(tmp.path(), "ghost.png");

        let mut registry = AssetRegistry::new(&dir);
        registry.register(&keep).expect("register");
        registry.register(&gone).expect("register");
        registry.save().expect("save");
        fs::remove_file(&gone).expect("remove");

        let loaded = AssetRegistry::load(&dir);
        assert!(loaded.contains("knight.png"));
        assert!(!loaded.contains("ghost.png"));
        assert_eq!(loaded.path("knight.png"), Some(keep.as_path()));
    }

    #[test]
    fn test_load_tolerates_garbage() {
        let tmp = TempDir::new().expect("tempdir");
        fs::write(tmp.path().join(REGISTRY_FILE), "[1, 2").expect("write");
        assert!(AssetRegistry::load(tmp.path()).is_empty());
        assert!(AssetRegistry::load(tmp.path().join("nope")).is_empty());
    }
}
