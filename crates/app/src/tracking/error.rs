use std::{error::Error as _, path::PathBuf};

use ml_core::DetectorVariant;
use thiserror::Error;
use video_ingest::IngestError;

use crate::tracking::{pipeline::TaskState, table::SchemaError};

/// Every way a single video task can fail. Each variant is fatal for that
/// video only; the batch moves on to the next file.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("cannot open video {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: IngestError,
    },
    #[error("failed to read frame")]
    Read(#[source] IngestError),
    #[error("frame #{got} arrived where #{expected} was due")]
    FrameOrder { expected: u64, got: u64 },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("{variant} detector failed at {timestamp_ms} ms")]
    Detector {
        variant: DetectorVariant,
        timestamp_ms: i64,
        #[source]
        source: anyhow::Error,
    },
    #[error("could not create the {variant} detector")]
    DetectorSetup {
        variant: DetectorVariant,
        #[source]
        source: anyhow::Error,
    },
    #[error("task cannot run from state {0:?}")]
    InvalidState(TaskState),
}

impl TaskError {
    /// Short label used for the outcome metric and the batch summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Read(_) | Self::FrameOrder { .. } => "read",
            Self::Schema(_) => "schema",
            Self::Write { .. } => "write",
            Self::Detector { .. } => "detector",
            Self::DetectorSetup { .. } => "detector_setup",
            Self::InvalidState(_) => "state",
        }
    }

    /// The error and all of its causes on one line.
    pub fn describe(&self) -> String {
        let mut text = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            text.push_str(": ");
            text.push_str(&err.to_string());
            cause = err.source();
        }
        text
    }
}
