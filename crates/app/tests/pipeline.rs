use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::Result;
use image::RgbImage;
use ml_core::{DetectionResult, DetectorVariant, Landmark, LandmarkDetector, LandmarkSet, Side};
use movid::tracking::{
    TaskError, TaskPipeline, TaskState,
    outputs::{TaskOutputs, incomplete_path},
    provenance::Provenance,
    table::{SchemaError, read_table},
};
use tempfile::TempDir;
use video_ingest::{Frame, FrameFormat, FrameSink, FrameSource, IngestError, VideoMetadata};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

struct FakeSource {
    metadata: VideoMetadata,
    frames: VecDeque<Frame>,
}

impl FakeSource {
    fn with_timestamps(timestamps: &[i64], width: u32, height: u32) -> Self {
        let frames = timestamps
            .iter()
            .enumerate()
            .map(|(index, &timestamp_ms)| Frame {
                index: index as u64,
                timestamp_ms,
                width,
                height,
                data: [10u8, 20, 30].repeat((width * height) as usize),
                format: FrameFormat::Bgr8,
            })
            .collect();
        Self {
            metadata: VideoMetadata {
                path: PathBuf::from("fake.MOV"),
                frame_rate: 30.0,
                frame_count: timestamps.len() as u64,
                width,
                height,
            },
            frames,
        }
    }

    fn at_30fps(count: usize, width: u32, height: u32) -> Self {
        let timestamps: Vec<i64> = (0..count).map(|i| (i as i64 * 1000) / 30).collect();
        Self::with_timestamps(&timestamps, width, height)
    }
}

impl FrameSource for FakeSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, IngestError> {
        Ok(self.frames.pop_front())
    }
}

#[derive(Default)]
struct SinkState {
    first_pixels: Vec<[u8; 3]>,
    thumbnail_after: Option<usize>,
    finished: bool,
}

struct FakeSink {
    path: PathBuf,
    thumbnail: PathBuf,
    width: u32,
    height: u32,
    state: Rc<RefCell<SinkState>>,
}

impl FrameSink for FakeSink {
    fn write(&mut self, image: &RgbImage) -> Result<(), IngestError> {
        if image.dimensions() != (self.width, self.height) {
            return Err(IngestError::Resolution {
                width: self.width,
                height: self.height,
                got_width: image.width(),
                got_height: image.height(),
            });
        }
        let mut state = self.state.borrow_mut();
        if state.first_pixels.is_empty() {
            fs::write(&self.path, b"partial video")?;
        }
        state.first_pixels.push(image.get_pixel(0, 0).0);
        Ok(())
    }

    fn capture_thumbnail(&mut self, _image: &RgbImage) -> Result<(), IngestError> {
        let mut state = self.state.borrow_mut();
        if state.thumbnail_after.is_some() {
            return Err(IngestError::ThumbnailTaken {
                path: self.path.clone(),
            });
        }
        fs::write(&self.thumbnail, b"still")?;
        state.thumbnail_after = Some(state.first_pixels.len());
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.state.borrow().first_pixels.len() as u64
    }

    fn finish(&mut self) -> Result<(), IngestError> {
        self.state.borrow_mut().finished = true;
        Ok(())
    }
}

type Script = Box<dyn FnMut(u64) -> DetectionResult>;

struct ScriptedDetector {
    variant: DetectorVariant,
    calls: u64,
    script: Script,
    timestamps: Rc<RefCell<Vec<i64>>>,
}

impl LandmarkDetector for ScriptedDetector {
    fn variant(&self) -> DetectorVariant {
        self.variant
    }

    fn detect(&mut self, _image: &RgbImage, timestamp_ms: i64) -> Result<DetectionResult> {
        self.timestamps.borrow_mut().push(timestamp_ms);
        let result = (self.script)(self.calls);
        self.calls += 1;
        Ok(result)
    }
}

fn scripted(
    variant: DetectorVariant,
    script: impl FnMut(u64) -> DetectionResult + 'static,
) -> (Box<dyn LandmarkDetector>, Rc<RefCell<Vec<i64>>>) {
    let timestamps = Rc::new(RefCell::new(Vec::new()));
    let detector = ScriptedDetector {
        variant,
        calls: 0,
        script: Box::new(script),
        timestamps: timestamps.clone(),
    };
    (Box::new(detector), timestamps)
}

fn set(count: usize, x: f32) -> LandmarkSet {
    LandmarkSet::new((0..count).map(|i| Landmark::new(x, 0.02 * (i % 40) as f32, 0.0)).collect())
}

/// One hand on even calls, two on odd calls.
fn alternating_hands(call: u64) -> DetectionResult {
    let mut sets = vec![set(21, 0.3).with_side(Side::Left)];
    if call % 2 == 1 {
        sets.push(set(21, 0.7).with_side(Side::Right));
    }
    DetectionResult::new(DetectorVariant::Hands, sets)
}

struct Harness {
    dir: TempDir,
    outputs: TaskOutputs,
    sink_state: Rc<RefCell<SinkState>>,
    thumbnail_fraction: f64,
}

impl Harness {
    fn new(variants: &[DetectorVariant]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let outputs = TaskOutputs::for_video(
            Path::new("20240101_P03_FTA_trial1.MOV"),
            variants,
            dir.path(),
            dir.path(),
        );
        Self {
            dir,
            outputs,
            sink_state: Rc::new(RefCell::new(SinkState::default())),
            thumbnail_fraction: 0.5,
        }
    }

    fn pipeline(
        &self,
        source: FakeSource,
        detectors: Vec<Box<dyn LandmarkDetector>>,
    ) -> TaskPipeline<FakeSource, FakeSink> {
        let sink = FakeSink {
            path: self.outputs.video.clone(),
            thumbnail: self.outputs.thumbnail.clone(),
            width: source.metadata.width,
            height: source.metadata.height,
            state: self.sink_state.clone(),
        };
        TaskPipeline::new(
            source,
            sink,
            detectors,
            Provenance::from_filename("20240101_P03_FTA_trial1.MOV"),
            self.outputs.clone(),
            self.thumbnail_fraction,
        )
    }
}

#[test]
fn test_ten_frames_without_hands() {
    let harness = Harness::new(&[DetectorVariant::Hands]);
    let (detector, seen) = scripted(DetectorVariant::Hands, |_| {
        DetectionResult::empty(DetectorVariant::Hands)
    });
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(10, 640, 480), vec![detector]);

    let report = pipeline.run().unwrap();

    assert_eq!(pipeline.state(), TaskState::Done);
    assert_eq!(report.frames_read, 10);
    assert_eq!(report.frames_written, 10);
    assert_eq!(report.rows, 0);
    assert_eq!(report.thumbnail_frame, Some(5));
    assert_eq!(seen.borrow().len(), 10);

    let state = harness.sink_state.borrow();
    assert_eq!(state.first_pixels.len(), 10);
    assert_eq!(state.thumbnail_after, Some(6));
    assert!(state.finished);
    assert!(read_table(&harness.outputs.table).unwrap().is_empty());
}

#[test]
fn test_single_frame_video_gets_a_thumbnail() {
    let harness = Harness::new(&[DetectorVariant::Pose]);
    let (detector, _) = scripted(DetectorVariant::Pose, |_| {
        DetectionResult::empty(DetectorVariant::Pose)
    });
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(1, WIDTH, HEIGHT), vec![detector]);

    let report = pipeline.run().unwrap();

    assert_eq!(report.thumbnail_frame, Some(0));
    assert_eq!(harness.sink_state.borrow().thumbnail_after, Some(1));
    assert!(harness.outputs.thumbnail.exists());
}

#[test]
fn test_thumbnail_at_full_progress_takes_the_last_frame() {
    let mut harness = Harness::new(&[DetectorVariant::Pose]);
    harness.thumbnail_fraction = 1.0;
    let (detector, _) = scripted(DetectorVariant::Pose, |_| {
        DetectionResult::empty(DetectorVariant::Pose)
    });
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(10, WIDTH, HEIGHT), vec![detector]);

    let report = pipeline.run().unwrap();

    assert_eq!(report.thumbnail_frame, Some(9));
    assert_eq!(harness.sink_state.borrow().thumbnail_after, Some(10));
}

#[test]
fn test_thumbnail_at_zero_takes_the_first_frame() {
    let mut harness = Harness::new(&[DetectorVariant::Pose]);
    harness.thumbnail_fraction = 0.0;
    let (detector, _) = scripted(DetectorVariant::Pose, |_| {
        DetectionResult::empty(DetectorVariant::Pose)
    });
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(3, WIDTH, HEIGHT), vec![detector]);

    assert_eq!(pipeline.run().unwrap().thumbnail_frame, Some(0));
}

#[test]
fn test_frames_are_converted_to_rgb_before_writing() {
    let harness = Harness::new(&[DetectorVariant::Face]);
    let (detector, _) = scripted(DetectorVariant::Face, |_| {
        DetectionResult::empty(DetectorVariant::Face)
    });
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(3, WIDTH, HEIGHT), vec![detector]);

    pipeline.run().unwrap();

    let state = harness.sink_state.borrow();
    assert!(state.first_pixels.iter().all(|pixel| *pixel == [30, 20, 10]));
}

#[test]
fn test_records_carry_frame_timestamps_and_sides() {
    let harness = Harness::new(&[DetectorVariant::Hands]);
    let (detector, _) = scripted(DetectorVariant::Hands, alternating_hands);
    let source = FakeSource::at_30fps(6, WIDTH, HEIGHT);
    let timestamps: Vec<i64> = source.frames.iter().map(|f| f.timestamp_ms).collect();
    let mut pipeline = harness.pipeline(source, vec![detector]);

    let report = pipeline.run().unwrap();
    assert_eq!(report.rows, 21 * 9);

    let rows = read_table(&harness.outputs.table).unwrap();
    assert_eq!(rows.len(), report.rows);

    let mut per_frame: BTreeMap<i64, Vec<&str>> = BTreeMap::new();
    for row in &rows {
        assert!(timestamps.contains(&row.time_stamp));
        per_frame.entry(row.time_stamp).or_default().push(row.side.as_str());
        assert_eq!(row.detector_type, "hands");
        assert_eq!(row.task, "FTA");
        assert_eq!(row.subject, "P03");
    }
    for (frame, ts) in timestamps.iter().enumerate() {
        let sides = &per_frame[ts];
        let hands = if frame % 2 == 1 { 2 } else { 1 };
        assert_eq!(sides.len(), 21 * hands);
        assert_eq!(sides.iter().filter(|s| **s == "Left").count(), 21);
        assert_eq!(sides.iter().filter(|s| **s == "Right").count(), 21 * (hands - 1));
        // side order follows detection order
        assert_eq!(sides[0], "Left");
    }
}

#[test]
fn test_detectors_run_in_configured_order_and_share_timestamps() {
    let harness = Harness::new(&[DetectorVariant::Pose, DetectorVariant::Face]);
    let (pose, pose_seen) = scripted(DetectorVariant::Pose, |_| {
        DetectionResult::new(DetectorVariant::Pose, vec![set(33, 0.5)])
    });
    let (face, face_seen) = scripted(DetectorVariant::Face, |_| {
        DetectionResult::new(DetectorVariant::Face, vec![set(478, 0.4)])
    });
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(4, WIDTH, HEIGHT), vec![pose, face]);

    let report = pipeline.run().unwrap();

    assert_eq!(report.rows, 4 * (33 + 478));
    assert_eq!(*pose_seen.borrow(), *face_seen.borrow());
    let records = pipeline.table().records();
    assert_eq!(records[0].detector_type, DetectorVariant::Pose);
    assert_eq!(records[33].detector_type, DetectorVariant::Face);
    assert!(records.iter().all(|r| r.side.is_none()));
}

#[test]
fn test_detector_never_sees_time_go_backwards() {
    let harness = Harness::new(&[DetectorVariant::Pose]);
    let (pose, seen) = scripted(DetectorVariant::Pose, |_| {
        DetectionResult::new(DetectorVariant::Pose, vec![set(33, 0.5)])
    });
    let source = FakeSource::with_timestamps(&[0, 33, 30, 66, 60], WIDTH, HEIGHT);
    let mut pipeline = harness.pipeline(source, vec![pose]);

    let report = pipeline.run().unwrap();

    assert_eq!(*seen.borrow(), vec![0, 33, 33, 66, 66]);
    assert_eq!(report.last_timestamp_ms, Some(60));
    let stamps: Vec<i64> = pipeline
        .table()
        .records()
        .chunks(33)
        .map(|chunk| chunk[0].time_stamp)
        .collect();
    assert_eq!(stamps, vec![0, 33, 30, 66, 60]);
}

#[test]
fn test_schema_error_fails_the_video_and_flags_outputs() {
    let harness = Harness::new(&[DetectorVariant::Hands]);
    let (detector, _) = scripted(DetectorVariant::Hands, |call| {
        let count = if call == 3 { 20 } else { 21 };
        DetectionResult::new(
            DetectorVariant::Hands,
            vec![set(count, 0.5).with_side(Side::Right)],
        )
    });
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(8, WIDTH, HEIGHT), vec![detector]);

    let err = pipeline.run().unwrap_err();

    assert!(matches!(
        err,
        TaskError::Schema(SchemaError::LandmarkCount {
            expected: 21,
            got: 20,
            ..
        })
    ));
    assert_eq!(pipeline.state(), TaskState::Failed);
    let state = harness.sink_state.borrow();
    assert_eq!(state.first_pixels.len(), 3);
    assert!(state.finished);
    assert!(!harness.outputs.video.exists());
    assert!(harness.dir.path().join(format!(
        "{}.incomplete",
        harness.outputs.video.file_name().unwrap().to_string_lossy()
    ))
    .exists());
    assert!(!harness.outputs.table.exists());
}

#[test]
fn test_table_write_failure_fails_while_finalizing() {
    let harness = Harness::new(&[DetectorVariant::Hands]);
    // A directory in place of the table makes the gzip writer fail.
    fs::create_dir(&harness.outputs.table).unwrap();
    let (detector, _) = scripted(DetectorVariant::Hands, alternating_hands);
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(4, WIDTH, HEIGHT), vec![detector]);

    let err = pipeline.run().unwrap_err();

    match &err {
        TaskError::Write { path, .. } => assert_eq!(path, &harness.outputs.table),
        other => panic!("expected a write error, got {other:?}"),
    }
    assert_eq!(err.kind(), "write");
    assert_eq!(pipeline.state(), TaskState::Failed);

    let state = harness.sink_state.borrow();
    assert_eq!(state.first_pixels.len(), 4);
    assert!(state.finished);
    for path in [&harness.outputs.video, &harness.outputs.thumbnail] {
        assert!(!path.exists());
        assert!(incomplete_path(path).exists());
    }
}

#[test]
fn test_frame_gap_is_a_read_fault() {
    let harness = Harness::new(&[DetectorVariant::Face]);
    let (detector, _) = scripted(DetectorVariant::Face, |_| {
        DetectionResult::empty(DetectorVariant::Face)
    });
    let mut source = FakeSource::at_30fps(4, WIDTH, HEIGHT);
    source.frames.remove(2);
    let mut pipeline = harness.pipeline(source, vec![detector]);

    let err = pipeline.run().unwrap_err();

    assert!(matches!(err, TaskError::FrameOrder { expected: 2, got: 3 }));
    assert_eq!(err.kind(), "read");
    assert_eq!(pipeline.state(), TaskState::Failed);
}

#[test]
fn test_detector_failure_is_reported_with_variant() {
    struct Broken;
    impl LandmarkDetector for Broken {
        fn variant(&self) -> DetectorVariant {
            DetectorVariant::Pose
        }
        fn detect(&mut self, _image: &RgbImage, _timestamp_ms: i64) -> Result<DetectionResult> {
            anyhow::bail!("model crashed")
        }
    }

    let harness = Harness::new(&[DetectorVariant::Pose]);
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(2, WIDTH, HEIGHT), vec![Box::new(Broken)]);

    let err = pipeline.run().unwrap_err();

    assert!(matches!(
        err,
        TaskError::Detector {
            variant: DetectorVariant::Pose,
            timestamp_ms: 0,
            ..
        }
    ));
    assert!(err.describe().contains("model crashed"));
}

#[test]
fn test_pipeline_runs_only_once() {
    let harness = Harness::new(&[DetectorVariant::Face]);
    let (detector, _) = scripted(DetectorVariant::Face, |_| {
        DetectionResult::empty(DetectorVariant::Face)
    });
    let mut pipeline = harness.pipeline(FakeSource::at_30fps(1, WIDTH, HEIGHT), vec![detector]);

    pipeline.run().unwrap();

    assert!(matches!(
        pipeline.run(),
        Err(TaskError::InvalidState(TaskState::Done))
    ));
}

#[test]
fn test_repeated_runs_produce_identical_tables() {
    let run_once = || {
        let harness = Harness::new(&[DetectorVariant::Hands]);
        let (detector, _) = scripted(DetectorVariant::Hands, alternating_hands);
        let mut pipeline = harness.pipeline(FakeSource::at_30fps(5, WIDTH, HEIGHT), vec![detector]);
        pipeline.run().unwrap();
        read_table(&harness.outputs.table)
            .unwrap()
            .into_iter()
            .map(|row| (row.landmark, row.side))
            .collect::<Vec<_>>()
    };

    let first = run_once();
    let second = run_once();
    assert_eq!(first.len(), second.len());
    assert_eq!(first, second);
}
