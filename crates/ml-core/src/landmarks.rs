use serde::{Deserialize, Serialize};

use crate::variant::DetectorVariant;

/// One estimated point. Image coordinates are normalized to the frame,
/// world coordinates are in metres around the model's origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True when the point lies inside the frame in normalized coordinates.
    pub fn in_frame(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// Handedness as reported by the model. Not corrected for camera mirroring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }

    /// Map a right-hand probability onto a label.
    pub fn from_right_score(score: f32) -> Self {
        if score >= 0.5 { Self::Right } else { Self::Left }
    }
}

/// All points of one detected instance (one hand, one face, one body).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkSet {
    pub image: Vec<Landmark>,
    pub world: Option<Vec<Landmark>>,
    pub side: Option<Side>,
}

impl LandmarkSet {
    pub fn new(image: Vec<Landmark>) -> Self {
        Self {
            image,
            world: None,
            side: None,
        }
    }

    pub fn with_world(mut self, world: Vec<Landmark>) -> Self {
        self.world = Some(world);
        self
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// Coordinates that go into the table: world when reported, image otherwise.
    pub fn tabulated(&self) -> &[Landmark] {
        self.world.as_deref().unwrap_or(&self.image)
    }

    /// `(min_x, min_y, max_x, max_y)` of the image coordinates.
    pub fn bounding_box(&self) -> Option<(f32, f32, f32, f32)> {
        let first = self.image.first()?;
        let init = (first.x, first.y, first.x, first.y);
        Some(self.image.iter().fold(init, |(x0, y0, x1, y1), p| {
            (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y))
        }))
    }
}

/// Output of one detector for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub variant: DetectorVariant,
    pub sets: Vec<LandmarkSet>,
}

impl DetectionResult {
    pub fn empty(variant: DetectorVariant) -> Self {
        Self {
            variant,
            sets: Vec::new(),
        }
    }

    pub fn new(variant: DetectorVariant, sets: Vec<LandmarkSet>) -> Self {
        Self { variant, sets }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Total number of points across every instance.
    pub fn point_count(&self) -> usize {
        self.sets.iter().map(LandmarkSet::len).sum()
    }
}
