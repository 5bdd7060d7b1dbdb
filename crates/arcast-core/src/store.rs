//! Configuration and media store boundaries
//!
//! The engine reads character snapshots through [`ConfigurationStore`] and
//! image bytes through [`MediaStore`]. Writes are serialized per store and
//! guarded by an optimistic version check, so two editors racing on the same
//! character cannot silently lose an update.

use crate::character::{CharacterConfig, CharacterId, MarkerRole, MediaRef};
use crate::error::StoreError;
use crate::hash::ContentHash;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub trait ConfigurationStore: Send + Sync {
    /// Every configuration visible to the engine.
    fn list_active_configs(&self) -> Result<Vec<CharacterConfig>, StoreError>;

    fn get_config(&self, id: CharacterId) -> Result<CharacterConfig, StoreError>;

    /// Store a new record. The store assigns the id and sets version 1.
    fn insert(&self, config: CharacterConfig) -> Result<CharacterConfig, StoreError>;

    /// Replace a record if its stored version still equals `config.version`.
    /// The committed copy carries the bumped version.
    fn replace(&self, config: CharacterConfig) -> Result<CharacterConfig, StoreError>;

    fn remove(&self, id: CharacterId) -> Result<(), StoreError>;

    /// Write back freshly computed marker feature counts. Counts for a role
    /// with no image are ignored.
    fn update_feature_counts(
        &self,
        id: CharacterId,
        detection_count: u32,
        positioning_count: u32,
    ) -> Result<(), StoreError>;
}

pub trait MediaStore: Send + Sync {
    fn fetch(&self, media: &MediaRef) -> Result<Vec<u8>, StoreError>;

    /// Persist bytes and return a handle for them.
    fn put(&self, name_hint: &str, bytes: &[u8]) -> Result<MediaRef, StoreError>;
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

/// Process-local configuration store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    records: RwLock<BTreeMap<CharacterId, CharacterConfig>>,
    next_id: AtomicU64,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfigurationStore for MemoryConfigStore {
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

        config.id = CharacterId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        config.version = 1;
        records.insert(config.id, config.clone());

        tracing::debug!(id = %config.id, name = %config.name, "character stored");
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
        Ok(config)
    }

    fn remove(&self, id: CharacterId) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
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
        Ok(())
    }
}

/// Process-local media store keyed by content hash.
#[derive(Debug, Default)]
pub struct MemoryMediaStore {
    blobs: RwLock<HashMap<MediaRef, Arc<Vec<u8>>>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaStore for MemoryMediaStore {
    fn fetch(&self, media: &MediaRef) -> Result<Vec<u8>, StoreError> {
        let blobs = self.blobs.read().map_err(poisoned)?;
        blobs
            .get(media)
            .map(|b| b.as_ref().clone())
            .ok_or_else(|| StoreError::MediaNotFound(media.clone()))
    }

    fn put(&self, name_hint: &str, bytes: &[u8]) -> Result<MediaRef, StoreError> {
        let hash = ContentHash::of(bytes);
        let media = MediaRef::new(format!("mem://{}/{}", hash.as_str(), name_hint));
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        blobs.insert(media.clone(), Arc::new(bytes.to_vec()));
        Ok(media)
    }
}

/// Media store rooted at a directory; references are relative paths.
#[derive(Debug, Clone)]
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, media: &MediaRef) -> PathBuf {
        let path = Path::new(media.as_str());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl MediaStore for FsMediaStore {
    fn fetch(&self, media: &MediaRef) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(media);
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::MediaNotFound(media.clone()),
            _ => StoreError::Io(e),
        })
    }

    fn put(&self, name_hint: &str, bytes: &[u8]) -> Result<MediaRef, StoreError> {
        let hash = ContentHash::of(bytes);
        let file_name = format!("{}_{}", &hash.as_str()[..12], sanitize(name_hint));
        let dir = self.root.join("media");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(&file_name), bytes)?;
        Ok(MediaRef::new(format!("media/{file_name}")))
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "image".to_string() } else { cleaned }
}
