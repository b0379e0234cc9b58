use std::path::{Path, PathBuf};

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::{
    landmarks::{DetectionResult, Landmark, LandmarkSet, Side},
    variant::DetectorVariant,
};

/// How the model treats consecutive calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningMode {
    /// Calls form one video; state from the previous frame is reused.
    #[default]
    Video,
    /// Every call is independent.
    Image,
}

fn default_min_confidence() -> f32 {
    0.5
}

/// Per-variant detector configuration, shared by every instance built from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorOptions {
    pub variant: DetectorVariant,
    pub model_path: PathBuf,
    #[serde(default)]
    pub running_mode: RunningMode,
    /// Upper bound on detected instances; falls back to the variant default.
    #[serde(default)]
    pub max_instances: Option<usize>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Model input size; frames are resized when both are set.
    #[serde(default)]
    pub input_width: Option<u32>,
    #[serde(default)]
    pub input_height: Option<u32>,
}

impl DetectorOptions {
    /// Defaults for `variant` with its model asset looked up in `model_folder`.
    pub fn for_variant(variant: DetectorVariant, model_folder: &Path) -> Self {
        Self {
            variant,
            model_path: model_folder.join(variant.default_model_file()),
            running_mode: RunningMode::Video,
            max_instances: None,
            min_confidence: default_min_confidence(),
            input_width: None,
            input_height: None,
        }
    }

    pub fn instance_limit(&self) -> usize {
        self.max_instances
            .unwrap_or_else(|| self.variant.default_max_instances())
    }

    pub fn input_size(&self) -> Option<(u32, u32)> {
        self.input_width.zip(self.input_height)
    }

    pub fn validate(&self) -> Result<(), DetectorError> {
        let invalid = |reason: String| DetectorError::InvalidOptions {
            variant: self.variant,
            reason,
        };
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(invalid(format!(
                "min_confidence {} outside [0, 1]",
                self.min_confidence
            )));
        }
        if self.instance_limit() == 0 {
            return Err(invalid("max_instances must be at least 1".into()));
        }
        if matches!(self.input_width, Some(0)) || matches!(self.input_height, Some(0)) {
            return Err(invalid("input size must be non-zero".into()));
        }
        Ok(())
    }

    /// Drop instances below `min_confidence`, keep at most the instance limit
    /// and attach world points and sides where the variant has them.
    pub fn select_instances(&self, raw: RawInstances) -> Result<Vec<LandmarkSet>, DetectorError> {
        let variant = self.variant;
        let malformed = |reason: String| DetectorError::MalformedOutput { variant, reason };
        let instances = raw.image.len();
        if raw.presence.len() != instances {
            return Err(malformed(format!(
                "{} presence scores for {instances} instances",
                raw.presence.len()
            )));
        }
        if variant.carries_side() && raw.handedness.len() != instances {
            return Err(malformed(format!(
                "{} handedness scores for {instances} instances",
                raw.handedness.len()
            )));
        }

        let worlds: Vec<Option<Vec<Landmark>>> = match raw.world {
            world if !variant.reports_world() || world.is_empty() => vec![None; instances],
            world if world.len() == instances => world.into_iter().map(Some).collect(),
            world => {
                return Err(malformed(format!(
                    "{} world sets for {instances} instances",
                    world.len()
                )));
            }
        };

        let mut sets = Vec::new();
        for (n, (points, world)) in raw.image.into_iter().zip(worlds).enumerate() {
            if raw.presence[n] < self.min_confidence {
                continue;
            }
            if sets.len() >= self.instance_limit() {
                break;
            }
            let mut set = LandmarkSet::new(points);
            if let Some(world) = world {
                set = set.with_world(world);
            }
            if variant.carries_side() {
                set = set.with_side(Side::from_right_score(raw.handedness[n]));
            }
            sets.push(set);
        }
        Ok(sets)
    }
}

/// Per-instance model output before filtering.
#[derive(Clone, Debug, Default)]
pub struct RawInstances {
    pub image: Vec<Vec<Landmark>>,
    /// Empty when the model does not estimate metric coordinates.
    pub world: Vec<Vec<Landmark>>,
    pub presence: Vec<f32>,
    /// Probability of a right hand.
    pub handedness: Vec<f32>,
}

/// Stateful landmark model. Timestamps passed to one instance must never decrease.
pub trait LandmarkDetector {
    fn variant(&self) -> DetectorVariant;

    fn detect(&mut self, image: &RgbImage, timestamp_ms: i64) -> Result<DetectionResult>;
}

/// Builds fresh detector instances from shared options.
pub trait DetectorFactory {
    fn create(&self, options: &DetectorOptions) -> Result<Box<dyn LandmarkDetector>>;
}

impl<F> DetectorFactory for F
where
    F: Fn(&DetectorOptions) -> Result<Box<dyn LandmarkDetector>>,
{
    fn create(&self, options: &DetectorOptions) -> Result<Box<dyn LandmarkDetector>> {
        self(options)
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("{variant} detector received timestamp {got} ms after {previous} ms")]
    TimestampRegression {
        variant: DetectorVariant,
        previous: i64,
        got: i64,
    },
    #[error("{expected} detector returned a {got} result")]
    VariantMismatch {
        expected: DetectorVariant,
        got: DetectorVariant,
    },
    #[error("{variant} model output is malformed: {reason}")]
    MalformedOutput {
        variant: DetectorVariant,
        reason: String,
    },
    #[error("invalid {variant} detector options: {reason}")]
    InvalidOptions {
        variant: DetectorVariant,
        reason: String,
    },
}

/// Enforces the non-decreasing timestamp contract in front of a detector.
pub struct TemporalDetector {
    inner: Box<dyn LandmarkDetector>,
    last_timestamp_ms: Option<i64>,
}

impl TemporalDetector {
    pub fn new(inner: Box<dyn LandmarkDetector>) -> Self {
        Self {
            inner,
            last_timestamp_ms: None,
        }
    }

    pub fn variant(&self) -> DetectorVariant {
        self.inner.variant()
    }

    pub fn last_timestamp_ms(&self) -> Option<i64> {
        self.last_timestamp_ms
    }

    pub fn detect(&mut self, image: &RgbImage, timestamp_ms: i64) -> Result<DetectionResult> {
        let variant = self.inner.variant();
        if let Some(previous) = self.last_timestamp_ms {
            if timestamp_ms < previous {
                return Err(DetectorError::TimestampRegression {
                    variant,
                    previous,
                    got: timestamp_ms,
                }
                .into());
            }
        }

        let result = self.inner.detect(image, timestamp_ms)?;
        self.last_timestamp_ms = Some(timestamp_ms);
        if result.variant != variant {
            return Err(DetectorError::VariantMismatch {
                expected: variant,
                got: result.variant,
            }
            .into());
        }
        trace!(
            "{variant} detector: {} instance(s) at {timestamp_ms} ms",
            result.sets.len()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        variant: DetectorVariant,
        reported: DetectorVariant,
        calls: Vec<i64>,
    }

    impl LandmarkDetector for Scripted {
        fn variant(&self) -> DetectorVariant {
            self.variant
        }

        fn detect(&mut self, _image: &RgbImage, timestamp_ms: i64) -> Result<DetectionResult> {
            self.calls.push(timestamp_ms);
            Ok(DetectionResult::new(
                self.reported,
                vec![LandmarkSet::new(vec![Landmark::default()])],
            ))
        }
    }

    fn guard(variant: DetectorVariant, reported: DetectorVariant) -> TemporalDetector {
        TemporalDetector::new(Box::new(Scripted {
            variant,
            reported,
            calls: Vec::new(),
        }))
    }

    #[test]
    fn test_equal_and_increasing_timestamps_pass() {
        let image = RgbImage::new(4, 4);
        let mut detector = guard(DetectorVariant::Pose, DetectorVariant::Pose);
        for ts in [0, 33, 33, 67] {
            detector.detect(&image, ts).unwrap();
        }
        assert_eq!(detector.last_timestamp_ms(), Some(67));
    }

    #[test]
    fn test_regression_is_rejected_before_the_model() {
        let image = RgbImage::new(4, 4);
        let mut detector = guard(DetectorVariant::Hands, DetectorVariant::Hands);
        detector.detect(&image, 100).unwrap();
        let err = detector.detect(&image, 99).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DetectorError>(),
            Some(DetectorError::TimestampRegression {
                previous: 100,
                got: 99,
                ..
            })
        ));
        assert_eq!(detector.last_timestamp_ms(), Some(100));
    }

    #[test]
    fn test_variant_mismatch_is_rejected() {
        let image = RgbImage::new(4, 4);
        let mut detector = guard(DetectorVariant::Face, DetectorVariant::Pose);
        let err = detector.detect(&image, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DetectorError>(),
            Some(DetectorError::VariantMismatch { .. })
        ));
    }

    #[test]
    fn test_options_from_json_use_defaults() {
        let options: DetectorOptions =
            serde_json::from_str(r#"{"variant": "hands", "model_path": "models/h.pt"}"#).unwrap();
        assert_eq!(options.running_mode, RunningMode::Video);
        assert_eq!(options.instance_limit(), 2);
        assert_eq!(options.min_confidence, 0.5);
        assert_eq!(options.input_size(), None);
        options.validate().unwrap();
    }

    #[test]
    fn test_for_variant_points_into_model_folder() {
        let options = DetectorOptions::for_variant(DetectorVariant::Face, Path::new("models"));
        assert_eq!(options.model_path, Path::new("models/face_landmarker.pt"));
        assert_eq!(options.instance_limit(), 1);
    }

    #[test]
    fn test_invalid_options_are_reported() {
        let mut options = DetectorOptions::for_variant(DetectorVariant::Pose, Path::new("m"));
        options.min_confidence = 1.5;
        assert!(options.validate().is_err());
        options.min_confidence = 0.5;
        options.max_instances = Some(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_closure_acts_as_factory() {
        let factory = |options: &DetectorOptions| -> Result<Box<dyn LandmarkDetector>> {
            Ok(Box::new(Scripted {
                variant: options.variant,
                reported: options.variant,
                calls: Vec::new(),
            }))
        };
        let options = DetectorOptions::for_variant(DetectorVariant::Hands, Path::new("m"));
        let detector = factory.create(&options).unwrap();
        assert_eq!(detector.variant(), DetectorVariant::Hands);
    }

    fn instances(count: usize, x: f32) -> Vec<Vec<Landmark>> {
        (0..count)
            .map(|_| vec![Landmark::new(x, 0.5, 0.0); 21])
            .collect()
    }

    #[test]
    fn test_select_instances_filters_and_caps() {
        let options = DetectorOptions::for_variant(DetectorVariant::Hands, Path::new("m"));
        let raw = RawInstances {
            image: instances(4, 0.2),
            world: instances(4, 0.01),
            presence: vec![0.9, 0.1, 0.8, 0.7],
            handedness: vec![0.9, 0.9, 0.2, 0.9],
        };

        let sets = options.select_instances(raw).unwrap();

        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].side, Some(Side::Right));
        assert_eq!(sets[1].side, Some(Side::Left));
        assert!(sets.iter().all(|set| set.world.is_some()));
    }

    #[test]
    fn test_select_instances_accepts_missing_world_tensor() {
        let options = DetectorOptions::for_variant(DetectorVariant::Pose, Path::new("m"));
        let raw = RawInstances {
            image: instances(1, 0.4),
            presence: vec![0.9],
            ..RawInstances::default()
        };

        let sets = options.select_instances(raw).unwrap();

        assert_eq!(sets.len(), 1);
        assert!(sets[0].world.is_none());
        assert!(sets[0].side.is_none());
    }

    #[test]
    fn test_select_instances_rejects_partial_world_tensor() {
        let mut options = DetectorOptions::for_variant(DetectorVariant::Hands, Path::new("m"));
        options.max_instances = Some(4);
        let raw = RawInstances {
            image: instances(2, 0.3),
            world: instances(1, 0.02),
            presence: vec![0.9, 0.9],
            handedness: vec![0.1, 0.9],
        };

        let err = options.select_instances(raw).unwrap_err();

        assert!(matches!(
            err,
            DetectorError::MalformedOutput {
                variant: DetectorVariant::Hands,
                ..
            }
        ));
    }

    #[test]
    fn test_select_instances_rejects_missing_presence() {
        let options = DetectorOptions::for_variant(DetectorVariant::Face, Path::new("m"));
        let raw = RawInstances {
            image: instances(1, 0.3),
            ..RawInstances::default()
        };
        assert!(options.select_instances(raw).is_err());
    }
}
