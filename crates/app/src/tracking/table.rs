//! Landmark table: one row per (frame, detector, landmark), written once as
//! gzip-compressed CSV when the video is finished.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use csv::{ReaderBuilder, WriterBuilder};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use ml_core::{DetectionResult, DetectorVariant, Side};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tracking::provenance::Provenance;

pub const TABLE_COLUMNS: [&str; 11] = [
    "x",
    "y",
    "z",
    "detector_type",
    "landmark",
    "side",
    "time_stamp",
    "task",
    "date",
    "subject",
    "video",
];

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{variant} set #{set_index} reports {got} landmarks, vocabulary has {expected}")]
    LandmarkCount {
        variant: DetectorVariant,
        set_index: usize,
        expected: usize,
        got: usize,
    },
    #[error("{variant} set #{set_index} has {image} image points but {world} world points")]
    WorldCount {
        variant: DetectorVariant,
        set_index: usize,
        image: usize,
        world: usize,
    },
    #[error("{variant} set #{set_index} carries no side label")]
    MissingSide {
        variant: DetectorVariant,
        set_index: usize,
    },
}

/// One landmark position of one detected instance in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkRecord {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub detector_type: DetectorVariant,
    pub landmark: &'static str,
    pub side: Option<Side>,
    pub time_stamp: i64,
}

/// Turn one detection result into table records stamped with `timestamp_ms`.
///
/// Point `i` of every set is paired with name `i` of the variant vocabulary.
pub fn build_records(
    result: &DetectionResult,
    timestamp_ms: i64,
) -> Result<Vec<LandmarkRecord>, SchemaError> {
    let variant = result.variant;
    let names = variant.landmark_names();
    let mut records = Vec::with_capacity(result.point_count());

    for (set_index, set) in result.sets.iter().enumerate() {
        if set.image.len() != names.len() {
            return Err(SchemaError::LandmarkCount {
                variant,
                set_index,
                expected: names.len(),
                got: set.image.len(),
            });
        }
        if let Some(world) = set.world.as_ref() {
            if world.len() != set.image.len() {
                return Err(SchemaError::WorldCount {
                    variant,
                    set_index,
                    image: set.image.len(),
                    world: world.len(),
                });
            }
        }

        let side = if variant.carries_side() {
            Some(set.side.ok_or(SchemaError::MissingSide { variant, set_index })?)
        } else {
            None
        };

        records.extend(
            set.tabulated()
                .iter()
                .zip(names)
                .map(|(point, &landmark)| LandmarkRecord {
                    x: point.x,
                    y: point.y,
                    z: point.z,
                    detector_type: variant,
                    landmark,
                    side,
                    time_stamp: timestamp_ms,
                }),
        );
    }

    Ok(records)
}

#[derive(Serialize)]
struct TableRow<'a> {
    x: f32,
    y: f32,
    z: f32,
    detector_type: &'static str,
    landmark: &'static str,
    side: &'static str,
    time_stamp: i64,
    task: &'a str,
    date: &'a str,
    subject: &'a str,
    video: &'a str,
}

/// A row read back from a stored table.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StoredRow {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub detector_type: String,
    pub landmark: String,
    pub side: String,
    pub time_stamp: i64,
    pub task: String,
    pub date: String,
    pub subject: String,
    pub video: String,
}

/// Append-only record buffer for one video.
#[derive(Debug, Default)]
pub struct LandmarkTable {
    records: Vec<LandmarkRecord>,
}

impl LandmarkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, records: Vec<LandmarkRecord>) {
        self.records.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[LandmarkRecord] {
        &self.records
    }

    /// Write every record plus the provenance columns to `path`. The header is
    /// written even when the table is empty.
    pub fn write_gz(&self, path: &Path, provenance: &Provenance) -> Result<(), csv::Error> {
        let file = File::create(path)?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(encoder);

        writer.write_record(TABLE_COLUMNS)?;
        for record in &self.records {
            writer.serialize(TableRow {
                x: record.x,
                y: record.y,
                z: record.z,
                detector_type: record.detector_type.label(),
                landmark: record.landmark,
                side: record.side.map(Side::label).unwrap_or(""),
                time_stamp: record.time_stamp,
                task: &provenance.task,
                date: &provenance.date,
                subject: &provenance.subject,
                video: &provenance.video,
            })?;
        }

        let encoder = writer
            .into_inner()
            .map_err(|err| csv::Error::from(err.into_error()))?;
        encoder.finish()?.into_inner().map_err(|err| err.into_error())?;
        Ok(())
    }
}

/// Read a table written by [`LandmarkTable::write_gz`].
pub fn read_table(path: &Path) -> Result<Vec<StoredRow>, csv::Error> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new().from_reader(GzDecoder::new(BufReader::new(file)));
    reader.deserialize().collect()
}
