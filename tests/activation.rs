//! End-to-end activation cycles over in-memory stores.

use anyhow::Result;
use approx::assert_abs_diff_eq;
use arcast::{
    ActivationEngine, CharacterOutcome, CharacterRegistry, CycleError, RecordingSink,
    SensorSnapshot, Settings, StillSource, StrategyPolicy,
};
use arcast_core::{
    CharacterConfig, CharacterId, ConfigurationStore, ContentHash, DeviceFix, DeviceOrientation,
    GeoTrigger, MarkerImage, MediaRef, MemoryConfigStore, MemoryMediaStore, StoreError, Strategy,
};
use arcast_cv::traits::ObjectModel;
use arcast_cv::utils::ImageUtils;
use arcast_cv::{BBox, BBoxCollection, FeatureIndex, Frame, ModelHandle, synthetic};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Replays a fixed detection list and counts invocations.
struct ScriptedModel {
    boxes: Vec<BBox>,
    calls: Arc<AtomicUsize>,
}

impl ObjectModel for ScriptedModel {
    fn infer(&self, _frame: &Frame) -> arcast_cv::Result<BBoxCollection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(BBoxCollection::from_vec(self.boxes.clone()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Fixture {
    store: Arc<MemoryConfigStore>,
    media: Arc<MemoryMediaStore>,
    index: Arc<FeatureIndex>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryConfigStore::new()),
            media: Arc::new(MemoryMediaStore::new()),
            index: Arc::new(FeatureIndex::default()),
        }
    }

    fn registry(&self) -> CharacterRegistry {
        CharacterRegistry::new(self.store.clone(), self.media.clone(), self.index.clone())
    }

    fn engine(&self, settings: &Settings, model: ModelHandle) -> ActivationEngine {
        ActivationEngine::new(
            settings,
            self.store.clone(),
            self.media.clone(),
            self.index.clone(),
            model,
        )
    }

    fn engine_without_model(&self) -> ActivationEngine {
        self.engine(&Settings::default(), ModelHandle::unavailable("not configured"))
    }
}

fn scripted(boxes: Vec<BBox>) -> (ModelHandle, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let model = ScriptedModel {
        boxes,
        calls: calls.clone(),
    };
    (ModelHandle::ready(Arc::new(model)), calls)
}

fn blank_frame() -> Frame {
    Frame::from_gray(synthetic::flat(640, 480, 0))
}

fn snapshot(frame: Frame, lat: f64, lon: f64) -> SensorSnapshot {
    SensorSnapshot::new(frame, DeviceFix::new(lat, lon), DeviceOrientation::new(0.0))
}

fn object_character(name: &str, class: &str, threshold: f64) -> CharacterConfig {
    let mut config = CharacterConfig::new(name, 45.0, 9.0);
    config.object.enabled = true;
    config.object.target_class = class.to_string();
    config.object.confidence_threshold = threshold;
    config
}

#[test]
fn test_gps_character_inside_and_outside_radius() -> Result<()> {
    let fixture = Fixture::new();
    let stored = fixture
        .store
        .insert(CharacterConfig::new("Fountain", 45.0, 9.0).with_radius(10.0))?;
    let engine = fixture.engine_without_model();

    let here = engine.evaluate(&snapshot(blank_frame(), 45.0, 9.0))?;
    assert_eq!(here.verdicts.len(), 1);
    assert_eq!(here.verdicts[0].character, stored.id);
    assert_eq!(here.verdicts[0].strategy, Strategy::Gps);
    let fix = GeoTrigger::new().evaluate(&DeviceFix::new(45.0, 9.0), &stored);
    assert_abs_diff_eq!(fix.distance_m, 0.0, epsilon = 1e-9);

    let away = engine.evaluate(&snapshot(blank_frame(), 45.001, 9.0))?;
    assert!(away.verdicts.is_empty());
    assert_eq!(away.characters[0].outcome, CharacterOutcome::NoTrigger);
    Ok(())
}

#[test]
fn test_zero_feature_marker_never_matches() -> Result<()> {
    let fixture = Fixture::new();
    let flat = ImageUtils::encode_png(&synthetic::flat(200, 200, 128))?;
    let committed = fixture.registry().capture_marker(
        "Blank poster",
        &DeviceFix::new(45.0, 9.0),
        "blank.png",
        flat,
    )?;
    assert_eq!(
        committed.config.marker.detection.as_ref().map(|m| m.feature_count),
        Some(0)
    );

    let engine = fixture.engine_without_model();
    let textured = Frame::from_gray(synthetic::random_blocks(480, 360, 10, 77));
    for frame in [blank_frame(), textured] {
        let report = engine.evaluate(&snapshot(frame, 45.0, 9.0))?;
        assert!(report.verdicts.is_empty());
        assert_eq!(report.characters[0].outcome, CharacterOutcome::NoTrigger);
    }
    Ok(())
}

#[test]
fn test_object_threshold_scenario() -> Result<()> {
    let fixture = Fixture::new();
    fixture
        .store
        .insert(object_character("Bottle buddy", "bottle", 0.5))?;

    let (weak, _) = scripted(vec![BBox::new(100.0, 100.0, 60.0, 120.0, 0.42).with_class("bottle")]);
    let report = fixture
        .engine(&Settings::default(), weak)
        .evaluate(&snapshot(blank_frame(), 45.0, 9.0))?;
    assert!(report.verdicts.is_empty());

    let (strong, _) = scripted(vec![BBox::new(100.0, 100.0, 60.0, 120.0, 0.51).with_class("bottle")]);
    let report = fixture
        .engine(&Settings::default(), strong)
        .evaluate(&snapshot(blank_frame(), 45.0, 9.0))?;
    assert_eq!(report.verdicts.len(), 1);
    assert_eq!(report.verdicts[0].strategy, Strategy::Object);
    Ok(())
}

#[test]
fn test_marker_character_found_in_frame() -> Result<()> {
    let fixture = Fixture::new();
    let marker = synthetic::random_blocks(200, 200, 10, 42);
    let committed = fixture.registry().capture_marker(
        "Poster",
        &DeviceFix::new(45.0, 9.0),
        "poster.png",
        ImageUtils::encode_png(&marker)?,
    )?;
    assert!(committed.warnings.is_empty());
    assert_eq!(fixture.index.extraction_count(), 1);

    let mut canvas = synthetic::flat(480, 360, 128);
    synthetic::paste(&mut canvas, &marker, 100, 80);
    let engine = fixture.engine_without_model();
    let report = engine.evaluate(&snapshot(Frame::from_gray(canvas), 45.0, 9.0))?;

    assert_eq!(report.verdicts.len(), 1, "{:?}", report.characters);
    let verdict = &report.verdicts[0];
    assert_eq!(verdict.strategy, Strategy::Marker);
    assert_eq!(verdict.transform.scale, committed.config.placement.base_size);
    // Marker center sits 40 px left of the principal point, 1 mm per pixel.
    assert_abs_diff_eq!(verdict.transform.translation.x, -0.04, epsilon = 1e-2);
    assert!(report.stats.frame_features.is_some_and(|n| n > 0));

    // Matching reused the descriptors indexed at capture time.
    assert_eq!(fixture.index.extraction_count(), 1);
    Ok(())
}

#[test]
fn test_failing_character_does_not_block_others() -> Result<()> {
    let fixture = Fixture::new();

    let mut broken = CharacterConfig::new("Lost media", 45.0, 9.0);
    broken.marker.enabled = true;
    broken.marker.detection = Some(MarkerImage {
        media: MediaRef::new("mem://gone/marker.png"),
        content_hash: ContentHash::of(b"gone"),
        feature_count: 300,
    });
    let broken = fixture.store.insert(broken)?;
    let healthy = fixture.store.insert(CharacterConfig::new("Statue", 45.0, 9.0))?;

    let report = fixture
        .engine_without_model()
        .evaluate(&snapshot(blank_frame(), 45.0, 9.0))?;

    assert_eq!(report.stats.characters, 2);
    assert_eq!(report.stats.failures, 1);
    assert_eq!(report.verdicts.len(), 1);
    assert_eq!(report.verdicts[0].character, healthy.id);

    let failed = report
        .characters
        .iter()
        .find(|c| c.character == broken.id)
        .map(|c| c.outcome.clone());
    assert!(matches!(
        failed,
        Some(CharacterOutcome::Failed {
            strategy: Strategy::Marker,
            ..
        })
    ));
    Ok(())
}

#[test]
fn test_object_model_runs_once_per_cycle() -> Result<()> {
    let fixture = Fixture::new();
    fixture.store.insert(object_character("Cup", "cup", 0.5))?;
    fixture.store.insert(object_character("Bottle", "bottle", 0.5))?;
    fixture.store.insert(object_character("Chair", "chair", 0.5))?;

    let (model, calls) = scripted(vec![
        BBox::new(10.0, 10.0, 50.0, 50.0, 0.9).with_class("cup"),
        BBox::new(300.0, 10.0, 50.0, 90.0, 0.8).with_class("bottle"),
    ]);
    let engine = fixture.engine(&Settings::default(), model);

    let report = engine.evaluate(&snapshot(blank_frame(), 45.0, 9.0))?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.stats.detections, Some(2));
    assert_eq!(report.verdicts.len(), 2);
    // No marker character, so the frame was never described.
    assert_eq!(report.stats.frame_features, None);

    engine.evaluate(&snapshot(blank_frame(), 45.0, 9.0))?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_gps_only_cycle_skips_vision() -> Result<()> {
    let fixture = Fixture::new();
    fixture.store.insert(CharacterConfig::new("Bench", 45.0, 9.0))?;
    let (model, calls) = scripted(vec![]);

    let report = fixture
        .engine(&Settings::default(), model)
        .evaluate(&snapshot(blank_frame(), 45.0, 9.0))?;
    assert_eq!(report.stats.frame_features, None);
    assert_eq!(report.stats.detections, None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_fallthrough_policy() -> Result<()> {
    let fixture = Fixture::new();
    let mut both = object_character("Both", "bottle", 0.5);
    both.marker.enabled = true;
    let textured = ImageUtils::encode_png(&synthetic::random_blocks(200, 200, 10, 5))?;
    let both = fixture
        .registry()
        .create(
            both,
            vec![arcast::MarkerUpload::new(
                arcast_core::MarkerRole::Detection,
                "both.png",
                textured,
            )],
        )?
        .config;

    let boxes = vec![BBox::new(100.0, 100.0, 60.0, 120.0, 0.9).with_class("bottle")];

    // Marker takes precedence and is not in view: nothing renders.
    let (model, _) = scripted(boxes.clone());
    let report = fixture
        .engine(&Settings::default(), model)
        .evaluate(&snapshot(blank_frame(), 45.0, 9.0))?;
    assert!(report.verdicts.is_empty());

    let settings = Settings {
        strategy: StrategyPolicy {
            fallthrough: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let (model, _) = scripted(boxes);
    let report = fixture
        .engine(&settings, model)
        .evaluate(&snapshot(blank_frame(), 45.0, 9.0))?;
    assert_eq!(report.verdicts.len(), 1);
    assert_eq!(report.verdicts[0].character, both.id);
    assert_eq!(report.verdicts[0].strategy, Strategy::Object);
    Ok(())
}

struct UnavailableStore;

impl ConfigurationStore for UnavailableStore {
    fn list_active_configs(&self) -> Result<Vec<CharacterConfig>, StoreError> {
        Err(StoreError::Unavailable("database offline".into()))
    }

    fn get_config(&self, id: CharacterId) -> Result<CharacterConfig, StoreError> {
        Err(StoreError::NotFound(id))
    }

    fn insert(&self, _config: CharacterConfig) -> Result<CharacterConfig, StoreError> {
        Err(StoreError::Unavailable("database offline".into()))
    }

    fn replace(&self, _config: CharacterConfig) -> Result<CharacterConfig, StoreError> {
        Err(StoreError::Unavailable("database offline".into()))
    }

    fn remove(&self, id: CharacterId) -> Result<(), StoreError> {
        Err(StoreError::NotFound(id))
    }

    fn update_feature_counts(&self, id: CharacterId, _: u32, _: u32) -> Result<(), StoreError> {
        Err(StoreError::NotFound(id))
    }
}

#[test]
fn test_unavailable_store_skips_cycle() {
    let engine = ActivationEngine::new(
        &Settings::default(),
        Arc::new(UnavailableStore),
        Arc::new(MemoryMediaStore::new()),
        Arc::new(FeatureIndex::default()),
        ModelHandle::unavailable("not configured"),
    );

    let mut source = StillSource(snapshot(blank_frame(), 45.0, 9.0));
    let mut sink = RecordingSink::default();
    let err = engine.tick(&mut source, &mut sink).unwrap_err();

    assert!(matches!(err, CycleError::StoreUnavailable(_)));
    assert!(sink.cycles.is_empty());
}

#[test]
fn test_tick_submits_verdicts_and_skips_missing_frames() -> Result<()> {
    let fixture = Fixture::new();
    fixture.store.insert(CharacterConfig::new("Statue", 45.0, 9.0))?;
    let engine = fixture.engine_without_model();
    let mut sink = RecordingSink::default();

    let mut still = StillSource(snapshot(blank_frame(), 45.0, 9.0));
    engine.tick(&mut still, &mut sink)?;
    engine.tick(&mut still, &mut sink)?;
    assert_eq!(sink.cycles.len(), 2);
    assert_eq!(sink.cycles[1].len(), 1);

    let mut dead_camera = || -> anyhow::Result<SensorSnapshot> { anyhow::bail!("camera closed") };
    let err = engine.tick(&mut dead_camera, &mut sink).unwrap_err();
    assert!(matches!(err, CycleError::FrameUnavailable(reason) if reason.contains("camera closed")));
    assert_eq!(sink.cycles.len(), 2);
    Ok(())
}

#[test]
fn test_deleted_character_disappears_next_cycle() -> Result<()> {
    let fixture = Fixture::new();
    let stored = fixture.store.insert(CharacterConfig::new("Kiosk", 45.0, 9.0))?;
    let engine = fixture.engine_without_model();

    assert_eq!(engine.evaluate(&snapshot(blank_frame(), 45.0, 9.0))?.verdicts.len(), 1);
    fixture.registry().remove(stored.id)?;
    assert!(engine.evaluate(&snapshot(blank_frame(), 45.0, 9.0))?.verdicts.is_empty());
    Ok(())
}
