//! Character write path
//!
//! Marker images are hashed and indexed before a record is committed, so the
//! engine never sees a changed image with a stale feature count. Hashes and
//! counts are derived: whatever an edit carries for them is replaced by the
//! stored values or by a fresh extraction. Extraction runs only when a
//! marker's bytes differ from the stored ones; unrelated field edits never
//! touch the feature index.

use arcast_core::{
    CharacterConfig, CharacterId, ConfigurationStore, ContentHash, DeviceFix, MarkerImage,
    MarkerRole, MediaRef, MediaStore, StoreError, needs_recompute,
};
use arcast_cv::{ExtractionFailure, FeatureIndex};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const ROLES: [MarkerRole; 2] = [MarkerRole::Detection, MarkerRole::Positioning];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{role} marker uploaded {count} times in one write")]
    DuplicateUpload { role: MarkerRole, count: usize },
}

/// Non-fatal problems found while committing a character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryWarning {
    /// The marker was stored with zero features and will never match.
    UnusableMarker {
        role: MarkerRole,
        failure: ExtractionFailure,
    },
}

impl fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryWarning::UnusableMarker { role, failure } => {
                write!(f, "{role} marker is unusable: {failure}")
            }
        }
    }
}

/// New bytes for one marker image.
#[derive(Debug, Clone)]
pub struct MarkerUpload {
    pub role: MarkerRole,
    /// File name hint for the media store
    pub name: String,
    pub bytes: Vec<u8>,
}

impl MarkerUpload {
    pub fn new(role: MarkerRole, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            role,
            name: name.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Committed {
    pub config: CharacterConfig,
    /// Roles whose features were extracted for this write
    pub recomputed: Vec<MarkerRole>,
    pub warnings: Vec<RegistryWarning>,
}

/// Where the bytes of a marker slot come from for this write.
enum Source {
    Upload(MarkerUpload),
    Stored(MediaRef),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecalculationSummary {
    pub characters: usize,
    pub markers: usize,
    /// Markers whose stored count or hash changed
    pub updated: usize,
    pub unusable: usize,
    /// Characters whose media could not be read or whose refreshed counts
    /// could not be written back
    pub failed: Vec<CharacterId>,
}

#[derive(Default)]
struct Refresh {
    recomputed: Vec<MarkerRole>,
    warnings: Vec<RegistryWarning>,
}

pub struct CharacterRegistry {
    store: Arc<dyn ConfigurationStore>,
    media: Arc<dyn MediaStore>,
    index: Arc<FeatureIndex>,
}

impl fmt::Debug for CharacterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacterRegistry")
            .field("index", &self.index)
            .finish()
    }
}

impl CharacterRegistry {
    pub fn new(
        store: Arc<dyn ConfigurationStore>,
        media: Arc<dyn MediaStore>,
        index: Arc<FeatureIndex>,
    ) -> Self {
        Self { store, media, index }
    }

    pub fn index(&self) -> &FeatureIndex {
        &self.index
    }

    pub fn list(&self) -> Result<Vec<CharacterConfig>, RegistryError> {
        Ok(self.store.list_active_configs()?)
    }

    pub fn get(&self, id: CharacterId) -> Result<CharacterConfig, RegistryError> {
        Ok(self.store.get_config(id)?)
    }

    pub fn remove(&self, id: CharacterId) -> Result<(), RegistryError> {
        self.store.remove(id)?;
        info!(character = %id, "character removed");
        Ok(())
    }

    /// Store a new character, indexing any uploaded or referenced marker.
    pub fn create(
        &self,
        mut draft: CharacterConfig,
        uploads: Vec<MarkerUpload>,
    ) -> Result<Committed, RegistryError> {
        draft.normalize();
        draft.validate().map_err(StoreError::from)?;
        check_uploads(&uploads)?;

        let refresh = self.refresh_markers(&mut draft, None, uploads)?;
        let config = self.store.insert(draft)?;
        info!(character = %config.id, name = %config.name, "character created");

        Ok(Committed {
            config,
            recomputed: refresh.recomputed,
            warnings: refresh.warnings,
        })
    }

    /// Commit an edit made against `edited.version`.
    ///
    /// A marker is re-extracted when it gets new bytes, either by upload or by
    /// pointing at different media whose content differs from the stored one.
    /// A concurrent commit in between surfaces as
    /// [`StoreError::VersionConflict`] instead of being overwritten.
    pub fn update(
        &self,
        mut edited: CharacterConfig,
        uploads: Vec<MarkerUpload>,
    ) -> Result<Committed, RegistryError> {
        edited.normalize();
        edited.validate().map_err(StoreError::from)?;
        check_uploads(&uploads)?;

        let stored = self.store.get_config(edited.id)?;
        if stored.version != edited.version {
            return Err(StoreError::VersionConflict {
                id: edited.id,
                expected: edited.version,
                found: stored.version,
            }
            .into());
        }

        let refresh = self.refresh_markers(&mut edited, Some(&stored), uploads)?;
        let config = self.store.replace(edited)?;
        debug!(character = %config.id, version = config.version, "character updated");

        Ok(Committed {
            config,
            recomputed: refresh.recomputed,
            warnings: refresh.warnings,
        })
    }

    /// Create a marker-triggered character from a freshly scanned image,
    /// anchored where the device stands.
    pub fn capture_marker(
        &self,
        name: impl Into<String>,
        fix: &DeviceFix,
        image_name: &str,
        image: Vec<u8>,
    ) -> Result<Committed, RegistryError> {
        let mut draft = CharacterConfig::new(name, fix.latitude, fix.longitude);
        draft.anchor.altitude = fix.altitude.unwrap_or(0.0);
        draft.marker.enabled = true;

        let upload = MarkerUpload::new(MarkerRole::Detection, image_name, image);
        self.create(draft, vec![upload])
    }

    /// Re-extract every stored marker and write back changed counts.
    pub fn recalculate_all(&self) -> Result<RecalculationSummary, RegistryError> {
        let mut summary = RecalculationSummary::default();

        for config in self.store.list_active_configs()? {
            summary.characters += 1;
            let mut updated = config.clone();
            let mut hashes_changed = false;
            let mut counts_changed = false;

            for role in ROLES {
                let Some(image) = updated.marker.image_mut(role).as_mut() else {
                    continue;
                };
                summary.markers += 1;

                let bytes = match self.media.fetch(&image.media) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(character = %config.id, %role, %err, "marker media unreadable");
                        if !summary.failed.contains(&config.id) {
                            summary.failed.push(config.id);
                        }
                        continue;
                    }
                };

                let (hash, extracted) = self.extract(&bytes, role);
                let count = extracted.unwrap_or(0);
                if count == 0 {
                    summary.unusable += 1;
                }

                let hash_changed = hash != image.content_hash;
                let count_changed = count != image.feature_count;
                if hash_changed || count_changed {
                    summary.updated += 1;
                }
                hashes_changed |= hash_changed;
                counts_changed |= count_changed;
                image.content_hash = hash;
                image.feature_count = count;
            }

            let written = if hashes_changed {
                self.store.replace(updated).map(drop)
            } else if counts_changed {
                let count = |role| updated.marker.image(role).map_or(0, |i| i.feature_count);
                self.store.update_feature_counts(
                    config.id,
                    count(MarkerRole::Detection),
                    count(MarkerRole::Positioning),
                )
            } else {
                Ok(())
            };

            if let Err(err) = written {
                warn!(character = %config.id, %err, "refreshed counts not written");
                if !summary.failed.contains(&config.id) {
                    summary.failed.push(config.id);
                }
            }
        }

        info!(
            characters = summary.characters,
            markers = summary.markers,
            updated = summary.updated,
            "feature counts recalculated"
        );
        Ok(summary)
    }

    fn extract(&self, bytes: &[u8], role: MarkerRole) -> (ContentHash, Result<u32, ExtractionFailure>) {
        match self.index.index_marker(bytes, role) {
            Ok(indexed) => (indexed.content_hash, Ok(indexed.feature_count)),
            Err(failure) => {
                warn!(%role, %failure, "marker has no usable features");
                (ContentHash::of(bytes), Err(failure))
            }
        }
    }

    /// Bring each marker's hash and count in line with its image bytes.
    ///
    /// `stored` is the committed record an edit replaces. A slot keeping the
    /// stored media takes the stored hash and count. An upload, or a slot
    /// pointing at other media, is hashed and extracted unless its bytes
    /// equal the stored marker's.
    fn refresh_markers(
        &self,
        config: &mut CharacterConfig,
        stored: Option<&CharacterConfig>,
        mut uploads: Vec<MarkerUpload>,
    ) -> Result<Refresh, RegistryError> {
        let mut refresh = Refresh::default();

        for role in ROLES {
            let previous = stored.and_then(|s| s.marker.image(role)).cloned();
            let position = uploads.iter().position(|u| u.role == role);
            let upload = position.map(|i| uploads.swap_remove(i));
            let slot = config.marker.image_mut(role);

            let current = slot.as_ref().map(|image| image.media.clone());
            let source = match (upload, current) {
                (Some(upload), _) => Source::Upload(upload),
                (None, None) => continue,
                (None, Some(media)) => match &previous {
                    Some(prev) if prev.media == media && !prev.content_hash.is_empty() => {
                        *slot = Some(prev.clone());
                        continue;
                    }
                    _ => Source::Stored(media),
                },
            };

            let (bytes, stored_media, name) = match source {
                Source::Upload(upload) => (upload.bytes, None, upload.name),
                Source::Stored(media) => (self.media.fetch(&media)?, Some(media), String::new()),
            };

            let hash = ContentHash::of(&bytes);
            if let Some(prev) = previous.filter(|p| !needs_recompute(Some(&p.content_hash), &hash)) {
                debug!(%role, %hash, "marker unchanged, keeping cached features");
                *slot = Some(MarkerImage {
                    media: stored_media.unwrap_or(prev.media),
                    ..prev
                });
                continue;
            }

            let media = match stored_media {
                Some(media) => media,
                None => self.media.put(&name, &bytes)?,
            };
            let (content_hash, extracted) = self.extract(&bytes, role);
            let feature_count = match extracted {
                Ok(count) => count,
                Err(failure) => {
                    refresh
                        .warnings
                        .push(RegistryWarning::UnusableMarker { role, failure });
                    0
                }
            };

            *slot = Some(MarkerImage {
                media,
                content_hash,
                feature_count,
            });
            refresh.recomputed.push(role);
        }

        Ok(refresh)
    }
}

/// At most one upload per marker role.
fn check_uploads(uploads: &[MarkerUpload]) -> Result<(), RegistryError> {
    for role in ROLES {
        let count = uploads.iter().filter(|u| u.role == role).count();
        if count > 1 {
            return Err(RegistryError::DuplicateUpload { role, count });
        }
    }
    Ok(())
}
