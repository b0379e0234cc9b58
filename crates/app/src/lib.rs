//! Landmark tracking for recorded movement-assessment videos.
//!
//! Each video is decoded frame by frame, passed through the configured hand,
//! face and pose detectors, and turned into an annotated copy, a thumbnail and
//! a gzip CSV table of landmark coordinates.

pub mod tracking;
