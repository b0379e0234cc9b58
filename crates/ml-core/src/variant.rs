use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vocabulary::{
    FACE_CONNECTIONS, FACE_LANDMARK_NAMES, HAND_CONNECTIONS, HAND_LANDMARK_NAMES,
    POSE_CONNECTIONS, POSE_LANDMARK_NAMES,
};

/// Closed set of landmark models the pipeline knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorVariant {
    #[serde(alias = "hand")]
    Hands,
    Face,
    Pose,
}

#[derive(Debug, Error)]
#[error("unknown detector variant {0:?}; expected one of hands, face, pose")]
pub struct UnknownVariant(pub String);

impl DetectorVariant {
    pub const ALL: [DetectorVariant; 3] = [Self::Hands, Self::Face, Self::Pose];

    /// Label used in output file names and the `detector_type` column.
    pub fn label(self) -> &'static str {
        match self {
            Self::Hands => "hands",
            Self::Face => "face",
            Self::Pose => "pose",
        }
    }

    /// File name of the model asset looked up in the models folder.
    pub fn default_model_file(self) -> &'static str {
        match self {
            Self::Hands => "hand_landmarker.pt",
            Self::Face => "face_landmarker.pt",
            Self::Pose => "pose_landmarker.pt",
        }
    }

    pub fn default_max_instances(self) -> usize {
        match self {
            Self::Hands => 2,
            Self::Face | Self::Pose => 1,
        }
    }

    pub fn landmark_names(self) -> &'static [&'static str] {
        match self {
            Self::Hands => &HAND_LANDMARK_NAMES,
            Self::Face => FACE_LANDMARK_NAMES.as_slice(),
            Self::Pose => &POSE_LANDMARK_NAMES,
        }
    }

    pub fn landmark_count(self) -> usize {
        self.landmark_names().len()
    }

    pub fn connections(self) -> &'static [(usize, usize)] {
        match self {
            Self::Hands => &HAND_CONNECTIONS,
            Self::Face => FACE_CONNECTIONS.as_slice(),
            Self::Pose => &POSE_CONNECTIONS,
        }
    }

    /// Only hand detections carry a left/right label.
    pub fn carries_side(self) -> bool {
        matches!(self, Self::Hands)
    }

    /// Hands and pose report metric world coordinates next to image coordinates.
    pub fn reports_world(self) -> bool {
        matches!(self, Self::Hands | Self::Pose)
    }
}

impl fmt::Display for DetectorVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DetectorVariant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hands" | "hand" => Ok(Self::Hands),
            "face" => Ok(Self::Face),
            "pose" => Ok(Self::Pose),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}
