//! Offline landmark tracking over recorded task videos.
//!
//! The module is split into focused submodules:
//! - `config`: CLI flags and the immutable `TrackingConfig`.
//! - `provenance`: date/subject/task parsed from the file name.
//! - `outputs`: output file naming and flagging of partial results.
//! - `table`: landmark records and the gzip CSV writer.
//! - `annotation`: overlay drawing per detector variant.
//! - `pipeline`: the per-video state machine and frame loop.
//! - `batch`: video selection and the sequential batch runner.
//! - `telemetry`: tracing subscriber and metrics recorder glue.

use anyhow::{Context, Result};
use ml_core::DetectorFactory;
use tracing::info;

pub mod annotation;
pub mod batch;
pub mod config;
pub mod error;
pub mod outputs;
pub mod pipeline;
pub mod provenance;
pub mod table;
mod telemetry;

pub use batch::{BatchSummary, VideoOutcome, VideoRun, run_batch};
pub use config::{TrackCliArgs, TrackingConfig};
pub use error::TaskError;
pub use pipeline::{TaskPipeline, TaskReport, TaskState};

/// Parse the `track` flags and run the batch they describe.
pub fn run_from_args(args: TrackCliArgs) -> Result<BatchSummary> {
    let config = TrackingConfig::try_from(args)?;
    run(&config)
}

pub fn run(config: &TrackingConfig) -> Result<BatchSummary> {
    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    let metrics = telemetry::init_metrics_recorder();

    let summary = if config.dry_run {
        batch::plan_batch(config)?
    } else {
        let factory = landmark_backend(config)?;
        run_batch(config, factory.as_ref())?
    };

    if let (Some(path), Some(handle)) = (config.telemetry.metrics_snapshot_path.as_ref(), metrics)
    {
        telemetry::write_metrics_snapshot(handle, path)
            .with_context(|| format!("failed to write metrics snapshot {}", path.display()))?;
        info!("metrics snapshot written to {}", path.display());
    }
    Ok(summary)
}

#[cfg(feature = "with-tch")]
fn landmark_backend(config: &TrackingConfig) -> Result<Box<dyn DetectorFactory>> {
    Ok(Box::new(ml_core::TorchDetectorFactory::new(
        config.use_cpu,
        config.telemetry.verbose,
    )))
}

#[cfg(not(feature = "with-tch"))]
fn landmark_backend(_config: &TrackingConfig) -> Result<Box<dyn DetectorFactory>> {
    anyhow::bail!("no landmark backend compiled in; rebuild with `--features with-tch`")
}
