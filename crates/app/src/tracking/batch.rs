//! Batch front-end: select videos, prepare output folders, and run one
//! `TaskPipeline` per video. A failing video never stops the batch.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use metrics::counter;
use ml_core::DetectorFactory;
use tracing::{debug, error, info, info_span};
use video_ingest::{FrameSource, VideoSink, VideoSource};

use crate::tracking::{
    config::{TrackingConfig, VideoSelection},
    error::TaskError,
    outputs::TaskOutputs,
    pipeline::{TaskPipeline, TaskReport},
    provenance::Provenance,
};

#[derive(Debug)]
pub enum VideoOutcome {
    Completed(TaskReport),
    /// Table already present and `--skip-existing` was given.
    Skipped,
    /// Dry run: the outputs that would have been written.
    Planned(TaskOutputs),
    Failed(TaskError),
}

#[derive(Debug)]
pub struct VideoRun {
    pub video: PathBuf,
    pub outcome: VideoOutcome,
}

#[derive(Debug)]
pub struct BatchSummary {
    pub runs: Vec<VideoRun>,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
}

impl BatchSummary {
    fn count(&self, pick: impl Fn(&VideoOutcome) -> bool) -> usize {
        self.runs.iter().filter(|run| pick(&run.outcome)).count()
    }

    pub fn completed(&self) -> usize {
        self.count(|outcome| matches!(outcome, VideoOutcome::Completed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, VideoOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, VideoOutcome::Failed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &TaskError)> {
        self.runs.iter().filter_map(|run| match &run.outcome {
            VideoOutcome::Failed(err) => Some((run.video.as_path(), err)),
            _ => None,
        })
    }
}

/// Resolve the configured selection into an ordered list of video paths.
pub fn discover_videos(config: &TrackingConfig) -> Result<Vec<PathBuf>> {
    match &config.selection {
        VideoSelection::Explicit(files) => Ok(files
            .iter()
            .map(|file| config.input_folder.join(file))
            .collect()),
        VideoSelection::Discover {
            suffix,
            task_tokens,
        } => {
            if !config.input_folder.is_dir() {
                bail!(
                    "input folder {} does not exist",
                    config.input_folder.display()
                );
            }
            let mut candidates = Vec::new();
            collect_files(&config.input_folder, suffix, &mut candidates).with_context(|| {
                format!("failed to scan {}", config.input_folder.display())
            })?;
            let found = candidates.len();

            let mut selected: Vec<PathBuf> = candidates
                .into_iter()
                .filter(|path| {
                    let name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().to_lowercase())
                        .unwrap_or_default();
                    task_tokens.iter().any(|token| name.contains(token.as_str()))
                })
                .collect();
            selected.sort();
            selected.dedup();
            info!("{found} video(s) found, {} selected by task", selected.len());
            Ok(selected)
        }
    }
}

fn collect_files(dir: &Path, suffix: &str, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, suffix, out)?;
        } else if path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(suffix))
        {
            out.push(path);
        }
    }
    Ok(())
}

fn prepare_output_folders(config: &TrackingConfig) -> Result<()> {
    for folder in [&config.outputs.video_folder, &config.outputs.data_folder] {
        fs::create_dir_all(folder)
            .with_context(|| format!("failed to create output folder {}", folder.display()))?;
    }
    Ok(())
}

fn outputs_for(config: &TrackingConfig, video: &Path) -> TaskOutputs {
    TaskOutputs::for_video(
        video,
        &config.variants(),
        &config.outputs.video_folder,
        &config.outputs.data_folder,
    )
}

/// List the selected videos and their planned outputs without touching them.
pub fn plan_batch(config: &TrackingConfig) -> Result<BatchSummary> {
    let started = Local::now();
    let runs = discover_videos(config)?
        .into_iter()
        .map(|video| {
            let outputs = outputs_for(config, &video);
            info!(
                "would process {} -> {}, {}, {}",
                video.display(),
                outputs.video.display(),
                outputs.thumbnail.display(),
                outputs.table.display()
            );
            VideoRun {
                video,
                outcome: VideoOutcome::Planned(outputs),
            }
        })
        .collect();
    Ok(BatchSummary {
        runs,
        started,
        finished: Local::now(),
    })
}

/// Process every selected video in order with fresh detectors from `factory`.
pub fn run_batch(config: &TrackingConfig, factory: &dyn DetectorFactory) -> Result<BatchSummary> {
    let started = Local::now();
    info!("started processing at {}", started.format("%Y-%m-%d %H:%M:%S"));

    let videos = discover_videos(config)?;
    prepare_output_folders(config)?;

    let total = videos.len();
    let mut runs = Vec::with_capacity(total);
    for (n, video) in videos.into_iter().enumerate() {
        let span = info_span!("video", n = n + 1, total);
        let _span_guard = span.enter();
        let outputs = outputs_for(config, &video);

        if config.skip_existing && outputs.table.exists() {
            info!("skipping {}: {} exists", video.display(), outputs.table.display());
            counter!("movid_videos_total", "outcome" => "skipped").increment(1);
            runs.push(VideoRun {
                video,
                outcome: VideoOutcome::Skipped,
            });
            continue;
        }

        info!("processing {}", video.display());
        let outcome = match run_video_task(&video, &outputs, config, factory) {
            Ok(report) => VideoOutcome::Completed(report),
            Err(err) => VideoOutcome::Failed(err),
        };
        runs.push(VideoRun { video, outcome });
    }

    let finished = Local::now();
    let summary = BatchSummary {
        runs,
        started,
        finished,
    };
    let seconds = (finished - started).num_seconds();
    info!(
        "finished processing at {}; took {:02}:{:02}:{:02} ({} done, {} skipped, {} failed)",
        finished.format("%Y-%m-%d %H:%M:%S"),
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60,
        summary.completed(),
        summary.skipped(),
        summary.failed()
    );
    Ok(summary)
}

/// Open one video, build its detectors and sink, and run its pipeline.
pub fn run_video_task(
    video: &Path,
    outputs: &TaskOutputs,
    config: &TrackingConfig,
    factory: &dyn DetectorFactory,
) -> Result<TaskReport, TaskError> {
    let setup = || -> Result<_, TaskError> {
        let source = VideoSource::open(video).map_err(|source| TaskError::Open {
            path: video.to_path_buf(),
            source,
        })?;
        let metadata = source.metadata().clone();
        debug!(
            "{}x{} @ {} fps, {} frames",
            metadata.width, metadata.height, metadata.frame_rate, metadata.frame_count
        );

        let detectors = config
            .detectors
            .iter()
            .map(|options| {
                factory
                    .create(options)
                    .map_err(|source| TaskError::DetectorSetup {
                        variant: options.variant,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let sink = VideoSink::open(
            &outputs.video,
            &outputs.thumbnail,
            &config.outputs.sink,
            metadata.frame_rate,
            metadata.width,
            metadata.height,
        )
        .map_err(|err| {
            outputs.flag_incomplete();
            TaskError::Write {
                path: outputs.video.clone(),
                source: err.into(),
            }
        })?;
        Ok((source, sink, detectors))
    };

    let (source, sink, detectors) = match setup() {
        Ok(parts) => parts,
        Err(err) => {
            error!("{}: {}", video.display(), err.describe());
            counter!("movid_videos_total", "outcome" => "failed").increment(1);
            return Err(err);
        }
    };

    let mut pipeline = TaskPipeline::new(
        source,
        sink,
        detectors,
        Provenance::from_path(video),
        outputs.clone(),
        config.outputs.thumbnail_fraction,
    );
    pipeline.run()
}
