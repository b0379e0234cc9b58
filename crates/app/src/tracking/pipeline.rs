//! Per-video frame loop.
//!
//! A `TaskPipeline` owns everything for one video: the frame source, one
//! detector per configured variant, the sink, and the growing table. Frames
//! move through `read -> RGB -> (detect, tabulate, annotate) per detector ->
//! write -> thumbnail` strictly in order, and the three outputs stay in
//! lock-step with the read cursor.

use std::time::Instant;

use image::RgbImage;
use metrics::{counter, histogram};
use ml_core::{DetectorVariant, LandmarkDetector, TemporalDetector};
use tracing::{debug, debug_span, error, info, info_span, warn};
use video_ingest::{FrameSink, FrameSource};

use crate::tracking::{
    annotation::{AnnotationStyle, annotate_with, style_for},
    error::TaskError,
    outputs::TaskOutputs,
    provenance::Provenance,
    table::{LandmarkTable, build_records},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Opening,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

/// What one finished task produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskReport {
    pub video: String,
    pub frames_read: u64,
    pub frames_written: u64,
    pub rows: usize,
    /// Index of the frame stored as thumbnail, if playback reached the capture point.
    pub thumbnail_frame: Option<u64>,
    /// Decoder timestamp of the last frame read.
    pub last_timestamp_ms: Option<i64>,
}

/// One detector together with the geometry and style resolved for its variant.
pub struct DetectorSlot {
    variant: DetectorVariant,
    style: &'static AnnotationStyle,
    detector: TemporalDetector,
}

impl DetectorSlot {
    pub fn new(detector: Box<dyn LandmarkDetector>) -> Self {
        let variant = detector.variant();
        Self {
            variant,
            style: style_for(variant),
            detector: TemporalDetector::new(detector),
        }
    }

    pub fn variant(&self) -> DetectorVariant {
        self.variant
    }
}

pub struct TaskPipeline<S, K> {
    source: Option<S>,
    sink: Option<K>,
    slots: Vec<DetectorSlot>,
    table: LandmarkTable,
    provenance: Provenance,
    outputs: TaskOutputs,
    thumbnail_fraction: f64,
    state: TaskState,
    report: TaskReport,
}

impl<S: FrameSource, K: FrameSink> TaskPipeline<S, K> {
    /// Detectors run and draw in the order given.
    pub fn new(
        source: S,
        sink: K,
        detectors: Vec<Box<dyn LandmarkDetector>>,
        provenance: Provenance,
        outputs: TaskOutputs,
        thumbnail_fraction: f64,
    ) -> Self {
        let report = TaskReport {
            video: provenance.video.clone(),
            frames_read: 0,
            frames_written: 0,
            rows: 0,
            thumbnail_frame: None,
            last_timestamp_ms: None,
        };
        Self {
            source: Some(source),
            sink: Some(sink),
            slots: detectors.into_iter().map(DetectorSlot::new).collect(),
            table: LandmarkTable::new(),
            provenance,
            outputs,
            thumbnail_fraction,
            state: TaskState::Opening,
            report,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn table(&self) -> &LandmarkTable {
        &self.table
    }

    pub fn outputs(&self) -> &TaskOutputs {
        &self.outputs
    }

    /// Drive the video to completion. On any error the task ends in
    /// [`TaskState::Failed`] with its partial outputs flagged.
    pub fn run(&mut self) -> Result<TaskReport, TaskError> {
        if self.state != TaskState::Opening {
            return Err(TaskError::InvalidState(self.state));
        }

        let span = info_span!("task", video = %self.provenance.video);
        let _span_guard = span.enter();
        let started = Instant::now();

        match self.stream().and_then(|()| self.finalize()) {
            Ok(()) => {
                self.transition(TaskState::Done);
                counter!("movid_videos_total", "outcome" => "done").increment(1);
                info!(
                    "finished {} frames, {} rows in {:.1}s",
                    self.report.frames_written,
                    self.report.rows,
                    started.elapsed().as_secs_f64()
                );
                Ok(self.report.clone())
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: TaskState) {
        debug!("task state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn stream(&mut self) -> Result<(), TaskError> {
        self.transition(TaskState::Streaming);

        let source = self
            .source
            .as_mut()
            .ok_or(TaskError::InvalidState(TaskState::Streaming))?;
        let sink = self
            .sink
            .as_mut()
            .ok_or(TaskError::InvalidState(TaskState::Streaming))?;
        let frame_count = source.metadata().frame_count;
        // Clamped to the last frame index.
        let last_index = frame_count.saturating_sub(1) as f64;
        let thumbnail_at = (frame_count as f64 * self.thumbnail_fraction).min(last_index);
        let report = &mut self.report;
        let mut detector_clock: Option<i64> = None;

        while let Some(frame) = source.next_frame().map_err(TaskError::Read)? {
            let _frame_span = debug_span!("frame", index = frame.index).entered();

            if frame.index != report.frames_read {
                return Err(TaskError::FrameOrder {
                    expected: report.frames_read,
                    got: frame.index,
                });
            }
            let rgb = frame.to_rgb_image().map_err(TaskError::Read)?;

            // Detectors never see time go backwards, even if the decoder does.
            let detector_ts = match detector_clock {
                Some(previous) if frame.timestamp_ms < previous => {
                    warn!(
                        "decoder position moved back from {previous} to {} ms",
                        frame.timestamp_ms
                    );
                    previous
                }
                _ => frame.timestamp_ms,
            };

            let mut annotated: Option<RgbImage> = None;
            for slot in &mut self.slots {
                let label = slot.variant.label();
                let detect_started = Instant::now();
                let result = slot.detector.detect(&rgb, detector_ts).map_err(|source| {
                    TaskError::Detector {
                        variant: slot.variant,
                        timestamp_ms: detector_ts,
                        source,
                    }
                })?;
                histogram!("movid_detector_latency_seconds", "variant" => label)
                    .record(detect_started.elapsed().as_secs_f64());

                let records = build_records(&result, frame.timestamp_ms)?;
                counter!("movid_rows_total", "variant" => label).increment(records.len() as u64);
                report.rows += records.len();
                self.table.append(records);

                let base = annotated.as_ref().unwrap_or(&rgb);
                annotated = Some(annotate_with(base, &result, slot.style));
            }
            let composed = annotated.unwrap_or(rgb);

            sink.write(&composed).map_err(|err| TaskError::Write {
                path: self.outputs.video.clone(),
                source: err.into(),
            })?;
            report.frames_written = sink.frames_written();

            if report.thumbnail_frame.is_none() && frame.index as f64 >= thumbnail_at {
                sink.capture_thumbnail(&composed)
                    .map_err(|err| TaskError::Write {
                        path: self.outputs.thumbnail.clone(),
                        source: err.into(),
                    })?;
                debug!("captured thumbnail at frame {}", frame.index);
                report.thumbnail_frame = Some(frame.index);
            }

            report.frames_read += 1;
            report.last_timestamp_ms = Some(frame.timestamp_ms);
            detector_clock = Some(detector_ts);
            counter!("movid_frames_total").increment(1);
        }

        if report.thumbnail_frame.is_none() {
            warn!(
                "video ended after {} of {frame_count} reported frames; no thumbnail captured",
                report.frames_read
            );
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), TaskError> {
        self.transition(TaskState::Finalizing);
        self.source.take();

        self.table
            .write_gz(&self.outputs.table, &self.provenance)
            .map_err(|err| TaskError::Write {
                path: self.outputs.table.clone(),
                source: err.into(),
            })?;

        if let Some(mut sink) = self.sink.take() {
            sink.finish().map_err(|err| TaskError::Write {
                path: self.outputs.video.clone(),
                source: err.into(),
            })?;
        }
        Ok(())
    }

    fn fail(&mut self, err: &TaskError) {
        self.transition(TaskState::Failed);
        error!(
            "task failed after {} frames: {}",
            self.report.frames_read,
            err.describe()
        );
        counter!("movid_videos_total", "outcome" => "failed").increment(1);

        self.source.take();
        if let Some(mut sink) = self.sink.take() {
            if let Err(finish_err) = sink.finish() {
                warn!("failed to release writer: {finish_err}");
            }
        }
        self.outputs.flag_incomplete();
    }
}
