//! Character sets on disk
//!
//! A TOML file with one `[[characters]]` table per character. Marker and
//! character image paths are relative to the file's directory.

use arcast_core::{
    CharacterConfig, CharacterId, ConfigurationStore, FsMediaStore, MarkerRole, StoreError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
struct CharacterFile {
    #[serde(default)]
    characters: Vec<CharacterConfig>,
}

#[derive(Serialize)]
struct CharacterFileRef<'a> {
    characters: Vec<&'a CharacterConfig>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

/// Configuration store persisted to a TOML file after every write.
#[derive(Debug)]
pub struct TomlConfigStore {
    path: PathBuf,
    records: RwLock<BTreeMap<CharacterId, CharacterConfig>>,
}

impl TomlConfigStore {
    /// Load an existing character file.
    ///
    /// Records without an id get the next free one and records without a
    /// version start at 1. Every record is validated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path)?;
        let file: CharacterFile =
            toml::from_str(&content).map_err(|e| StoreError::Parse(e.to_string()))?;

        let mut next_id = file.characters.iter().map(|c| c.id.0).max().unwrap_or(0);
        let mut records = BTreeMap::new();
        for mut config in file.characters {
            if config.id.0 == 0 || records.contains_key(&config.id) {
                next_id += 1;
                config.id = CharacterId(next_id);
            }
            config.version = config.version.max(1);
            config.normalize();
            config.validate()?;
            records.insert(config.id, config);
        }

        info!(path = %path.display(), characters = records.len(), "character file loaded");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// An empty store that will be written to `path` on the first commit.
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open `path` if it exists, otherwise start empty.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Ok(Self::create(path))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Media store resolving image paths the way the file refers to them.
    pub fn media_store(&self) -> FsMediaStore {
        let root = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        FsMediaStore::new(root)
    }

    fn persist(&self, records: &BTreeMap<CharacterId, CharacterConfig>) -> Result<(), StoreError> {
        let file = CharacterFileRef {
            characters: records.values().collect(),
        };
        let content =
            toml::to_string_pretty(&file).map_err(|e| StoreError::Parse(e.to_string()))?;
        fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), characters = records.len(), "character file written");
        Ok(())
    }
}

impl ConfigurationStore for TomlConfigStore {
    fn list_active_configs(&self) -> Result<Vec<CharacterConfig>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.values().cloned().collect())
    }

    fn get_config(&self, id: CharacterId) -> Result<CharacterConfig, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        records.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn insert(&self, mut config: CharacterConfig) -> Result<CharacterConfig, StoreError> {
        config.validate()?;
        let mut records = self.records.write().map_err(poisoned)?;

        let next = records.keys().next_back().map_or(0, |id| id.0) + 1;
        config.id = CharacterId(next);
        config.version = 1;
        records.insert(config.id, config.clone());
        self.persist(&records)?;
        Ok(config)
    }

    fn replace(&self, mut config: CharacterConfig) -> Result<CharacterConfig, StoreError> {
        config.validate()?;
        let mut records = self.records.write().map_err(poisoned)?;

        let stored = records
            .get_mut(&config.id)
            .ok_or(StoreError::NotFound(config.id))?;
        if stored.version != config.version {
            return Err(StoreError::VersionConflict {
                id: config.id,
                expected: config.version,
                found: stored.version,
            });
        }

        config.version += 1;
        *stored = config.clone();
        self.persist(&records)?;
        Ok(config)
    }

    fn remove(&self, id: CharacterId) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.remove(&id).ok_or(StoreError::NotFound(id))?;
        self.persist(&records)
    }

    fn update_feature_counts(
        &self,
        id: CharacterId,
        detection_count: u32,
        positioning_count: u32,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let stored = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        for (role, count) in [
            (MarkerRole::Detection, detection_count),
            (MarkerRole::Positioning, positioning_count),
        ] {
            if let Some(image) = stored.marker.image_mut(role).as_mut() {
                image.feature_count = count;
            }
        }
        stored.version += 1;
        self.persist(&records)
    }
}
