//! Per-frame activation
//!
//! Each cycle reads a fresh snapshot of the character list, then decides for
//! every character whether it is visible and where. The frame's features and
//! the object model's raw detections are computed at most once per cycle and
//! shared by all characters.

use crate::sensors::{FrameSource, RenderSink, SensorSnapshot};
use crate::settings::Settings;
use arcast_core::{
    CharacterConfig, CharacterId, ConfigurationStore, GeoTrigger, MarkerRole, MediaStore,
    PoseResolver, StoreError, Strategy, StrategyOutcome, Transform3D,
};
use arcast_cv::{
    BBoxCollection, FeatureIndex, FeatureSet, MarkerMatcher, MarkerTarget, ModelHandle,
    ObjectGate,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Precedence between enabled strategies.
///
/// With `fallthrough` off only the highest-priority enabled strategy runs.
/// With it on, a strategy that does not fire hands over to the next enabled
/// one in `order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyPolicy {
    #[serde(default = "default_order")]
    pub order: Vec<Strategy>,
    #[serde(default)]
    pub fallthrough: bool,
}

fn default_order() -> Vec<Strategy> {
    vec![Strategy::Marker, Strategy::Object, Strategy::Gps]
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self {
            order: default_order(),
            fallthrough: false,
        }
    }
}

impl StrategyPolicy {
    /// Strategies to try for `config`, highest priority first.
    pub fn plan(&self, config: &CharacterConfig) -> Vec<Strategy> {
        let enabled = config.enabled_strategies();
        let ordered = self.order.iter().copied().filter(|s| enabled.contains(s));
        if self.fallthrough {
            ordered.collect()
        } else {
            ordered.take(1).collect()
        }
    }
}

/// A character to render this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub character: CharacterId,
    pub name: String,
    pub strategy: Strategy,
    pub transform: Transform3D,
}

/// Diagnostic result for one character in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CharacterOutcome {
    Rendered { strategy: Strategy },
    NoTrigger,
    /// The strategy could not run, e.g. marker media missing from the store.
    Failed { strategy: Strategy, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterReport {
    pub character: CharacterId,
    pub name: String,
    #[serde(flatten)]
    pub outcome: CharacterOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleStats {
    pub characters: usize,
    pub verdicts: usize,
    pub failures: usize,
    /// Frame keypoints, if any character needed them
    pub frame_features: Option<usize>,
    /// Raw detections after NMS, if the object model ran
    pub detections: Option<usize>,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub verdicts: Vec<Verdict>,
    pub characters: Vec<CharacterReport>,
    pub stats: CycleStats,
}

/// Reasons a whole cycle is skipped.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("sensor frame unavailable: {0}")]
    FrameUnavailable(String),

    #[error("configuration store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

/// Work shared by every character within one cycle.
struct Cycle<'a> {
    snapshot: &'a SensorSnapshot,
    frame_features: OnceLock<FeatureSet>,
    detections: OnceLock<BBoxCollection>,
}

impl<'a> Cycle<'a> {
    fn new(snapshot: &'a SensorSnapshot) -> Self {
        Self {
            snapshot,
            frame_features: OnceLock::new(),
            detections: OnceLock::new(),
        }
    }

    fn frame_features(&self, index: &FeatureIndex) -> &FeatureSet {
        self.frame_features
            .get_or_init(|| index.extract_frame(&self.snapshot.frame))
    }

    fn detections(&self, gate: &ObjectGate) -> &BBoxCollection {
        self.detections.get_or_init(|| gate.infer(&self.snapshot.frame))
    }
}

pub struct ActivationEngine {
    store: Arc<dyn ConfigurationStore>,
    media: Arc<dyn MediaStore>,
    index: Arc<FeatureIndex>,
    matcher: MarkerMatcher,
    gate: ObjectGate,
    resolver: PoseResolver,
    geo: GeoTrigger,
    policy: StrategyPolicy,
}

impl std::fmt::Debug for ActivationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationEngine")
            .field("index", &self.index)
            .field("gate", &self.gate)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ActivationEngine {
    /// `index` should be the one the write path indexes markers with, so
    /// descriptors computed at upload time are reused for matching.
    pub fn new(
        settings: &Settings,
        store: Arc<dyn ConfigurationStore>,
        media: Arc<dyn MediaStore>,
        index: Arc<FeatureIndex>,
        model: ModelHandle,
    ) -> Self {
        Self {
            store,
            media,
            index,
            matcher: MarkerMatcher::new(settings.matcher.clone(), settings.camera.clone()),
            gate: ObjectGate::new(model, settings.object.clone()),
            resolver: PoseResolver::new(settings.pose.clone(), settings.camera.clone()),
            geo: GeoTrigger::new(),
            policy: settings.strategy.clone(),
        }
    }

    pub fn index(&self) -> &FeatureIndex {
        &self.index
    }

    pub fn gate(&self) -> &ObjectGate {
        &self.gate
    }

    pub fn policy(&self) -> &StrategyPolicy {
        &self.policy
    }

    /// Capture one snapshot, evaluate it and hand the verdicts to `sink`.
    pub fn tick(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn RenderSink,
    ) -> Result<CycleReport, CycleError> {
        let snapshot = source.capture().map_err(|err| {
            let reason = format!("{err:#}");
            warn!(%reason, "no sensor snapshot, skipping cycle");
            CycleError::FrameUnavailable(reason)
        })?;

        let report = self.evaluate(&snapshot)?;
        sink.submit(&report.verdicts);
        Ok(report)
    }

    /// Evaluate every active character against one snapshot.
    ///
    /// Only an unreadable character list fails the cycle; anything that goes
    /// wrong for a single character is reported in its [`CharacterReport`].
    pub fn evaluate(&self, snapshot: &SensorSnapshot) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let configs = self.store.list_active_configs().map_err(|err| {
            warn!(%err, "character list unavailable, skipping cycle");
            CycleError::StoreUnavailable(err)
        })?;

        let cycle = Cycle::new(snapshot);

        #[cfg(feature = "parallel")]
        let results: Vec<(CharacterReport, Option<Verdict>)> = {
            use rayon::prelude::*;
            configs
                .par_iter()
                .map(|config| self.evaluate_character(config, &cycle))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(CharacterReport, Option<Verdict>)> = configs
            .iter()
            .map(|config| self.evaluate_character(config, &cycle))
            .collect();

        let mut report = CycleReport::default();
        for (character, verdict) in results {
            if matches!(character.outcome, CharacterOutcome::Failed { .. }) {
                report.stats.failures += 1;
            }
            report.characters.push(character);
            report.verdicts.extend(verdict);
        }

        report.stats.characters = configs.len();
        report.stats.verdicts = report.verdicts.len();
        report.stats.frame_features = cycle.frame_features.get().map(FeatureSet::len);
        report.stats.detections = cycle.detections.get().map(BBoxCollection::len);
        report.stats.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        info!(
            characters = report.stats.characters,
            verdicts = report.stats.verdicts,
            failures = report.stats.failures,
            elapsed_ms = report.stats.elapsed_ms,
            "cycle complete"
        );
        Ok(report)
    }

    fn evaluate_character(
        &self,
        config: &CharacterConfig,
        cycle: &Cycle<'_>,
    ) -> (CharacterReport, Option<Verdict>) {
        let report = |outcome| CharacterReport {
            character: config.id,
            name: config.name.clone(),
            outcome,
        };

        let mut failure = None;
        for strategy in self.policy.plan(config) {
            let outcome = match self.run_strategy(strategy, config, cycle) {
                Ok(outcome) => outcome,
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(character = %config.id, %strategy, %reason, "strategy failed");
                    failure = Some((strategy, reason));
                    continue;
                }
            };

            let orientation = &cycle.snapshot.orientation;
            if let Some(transform) = self.resolver.resolve(&outcome, config, orientation) {
                debug!(character = %config.id, %strategy, "character visible");
                let verdict = Verdict {
                    character: config.id,
                    name: config.name.clone(),
                    strategy,
                    transform,
                };
                return (report(CharacterOutcome::Rendered { strategy }), Some(verdict));
            }
            debug!(character = %config.id, %strategy, "no trigger");
        }

        let outcome = match failure {
            Some((strategy, reason)) => CharacterOutcome::Failed { strategy, reason },
            None => CharacterOutcome::NoTrigger,
        };
        (report(outcome), None)
    }

    fn run_strategy(
        &self,
        strategy: Strategy,
        config: &CharacterConfig,
        cycle: &Cycle<'_>,
    ) -> anyhow::Result<StrategyOutcome> {
        match strategy {
            Strategy::Marker => self.run_marker(config, cycle),
            Strategy::Object => Ok(self.run_object(config, cycle)),
            Strategy::Gps => Ok(StrategyOutcome::Gps(
                self.geo.evaluate(&cycle.snapshot.fix, config),
            )),
        }
    }

    fn marker_target(
        &self,
        config: &CharacterConfig,
        role: MarkerRole,
    ) -> anyhow::Result<Option<MarkerTarget>> {
        match config.marker.image(role) {
            Some(image) => self.index.target(image, role, self.media.as_ref()),
            None => Ok(None),
        }
    }

    /// The detection marker decides visibility; the positioning marker, when
    /// configured and found, decides placement.
    fn run_marker(&self, config: &CharacterConfig, cycle: &Cycle<'_>) -> anyhow::Result<StrategyOutcome> {
        let Some(detection) = self.marker_target(config, MarkerRole::Detection)? else {
            debug!(character = %config.id, "no usable detection marker");
            return Ok(StrategyOutcome::NoTrigger);
        };

        let frame_features = cycle.frame_features(&self.index);
        let min_confidence = self.matcher.config().min_feature_confidence;
        let Some(detection_pose) = self.matcher.match_marker(frame_features, &detection, min_confidence)
        else {
            return Ok(StrategyOutcome::NoTrigger);
        };

        let positioning = match self.marker_target(config, MarkerRole::Positioning) {
            Ok(Some(target)) => self.matcher.match_marker(frame_features, &target, min_confidence),
            Ok(None) => None,
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(character = %config.id, %reason, "positioning marker unavailable");
                None
            }
        };

        Ok(StrategyOutcome::Marker {
            detection: detection_pose,
            positioning,
        })
    }

    fn run_object(&self, config: &CharacterConfig, cycle: &Cycle<'_>) -> StrategyOutcome {
        let raw = cycle.detections(&self.gate);
        let candidates = self.gate.filter(
            raw,
            &config.object.target_class,
            config.object.confidence_threshold,
        );

        match self.gate.select(&candidates, cycle.snapshot.frame.dimensions()) {
            Some(hit) => StrategyOutcome::Object(hit),
            None => StrategyOutcome::NoTrigger,
        }
    }
}
