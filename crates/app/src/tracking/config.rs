//! Configuration for the `track` subcommand.
//!
//! CLI flags are parsed once into an immutable `TrackingConfig` which every
//! video task borrows; nothing downstream re-reads flags.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use ml_core::{DetectorOptions, DetectorVariant};
use video_ingest::{SinkOptions, parse_fourcc};

/// Which videos the batch should process.
#[derive(Clone, Debug, PartialEq)]
pub enum VideoSelection {
    /// Recursive search for files ending with `suffix` whose name contains one
    /// of the task tokens (case-insensitive).
    Discover {
        suffix: String,
        task_tokens: Vec<String>,
    },
    /// Explicit files relative to the input folder.
    Explicit(Vec<PathBuf>),
}

#[derive(Clone, Debug)]
pub struct OutputOptions {
    /// Folder receiving annotated videos and thumbnails.
    pub video_folder: PathBuf,
    /// Folder receiving the compressed landmark tables.
    pub data_folder: PathBuf,
    pub sink: SinkOptions,
    /// Playback fraction at which the thumbnail is captured.
    pub thumbnail_fraction: f64,
}

/// Logging, tracing and metrics knobs.
#[derive(Clone, Debug, Default)]
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing task and frame spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Write the Prometheus text exposition here once the batch ends.
    pub metrics_snapshot_path: Option<PathBuf>,
    /// Default the log filter to `debug` instead of `info`.
    pub verbose: bool,
}

#[derive(Clone, Debug)]
pub struct TrackingConfig {
    pub input_folder: PathBuf,
    pub selection: VideoSelection,
    /// Detectors in the order they run and draw on every frame.
    pub detectors: Vec<DetectorOptions>,
    pub outputs: OutputOptions,
    pub telemetry: TelemetryOptions,
    /// Run models on the CPU even when CUDA is available.
    pub use_cpu: bool,
    /// Skip videos whose landmark table already exists.
    pub skip_existing: bool,
    /// Only list the videos and planned outputs.
    pub dry_run: bool,
}

impl TrackingConfig {
    /// Active variants in configured order.
    pub fn variants(&self) -> Vec<DetectorVariant> {
        self.detectors.iter().map(|options| options.variant).collect()
    }
}

/// CLI arguments accepted by the `track` subcommand.
#[derive(Debug, Args)]
pub struct TrackCliArgs {
    /// Folder holding the source videos.
    #[arg(long = "input", value_name = "DIR", default_value = "videos")]
    pub input: PathBuf,
    /// Process only these files (relative to --input); disables the recursive search.
    #[arg(long = "video", value_name = "FILE")]
    pub videos: Vec<PathBuf>,
    /// File suffix of candidate videos.
    #[arg(long = "suffix", default_value = ".MOV")]
    pub suffix: String,
    /// Task-type tokens a file name must contain (comma separated).
    #[arg(
        long = "task",
        value_name = "TOKENS",
        value_delimiter = ',',
        default_values_t = vec!["fta".to_string(), "hoc".to_string()]
    )]
    pub tasks: Vec<String>,
    /// Detectors to run, in drawing order (comma separated).
    #[arg(
        long = "track",
        value_name = "VARIANTS",
        value_delimiter = ',',
        default_values_t = DetectorVariant::ALL.to_vec()
    )]
    pub track: Vec<DetectorVariant>,
    /// JSON file with a list of detector options; replaces --track.
    #[arg(long = "detectors", value_name = "PATH", conflicts_with = "track")]
    pub detectors: Option<PathBuf>,
    /// Folder holding the model assets.
    #[arg(long = "models", value_name = "DIR", default_value = "models")]
    pub models: PathBuf,
    /// Maximum number of hands per frame.
    #[arg(long = "max-hands", value_name = "N", default_value_t = 2)]
    pub max_hands: usize,
    /// Output folder for annotated videos and thumbnails.
    #[arg(long = "video-out", value_name = "DIR", default_value = "annotated_videos")]
    pub video_out: PathBuf,
    /// Output folder for landmark tables.
    #[arg(long = "data-out", value_name = "DIR", default_value = "landmark_data")]
    pub data_out: PathBuf,
    /// Four-character codec tag of the annotated video.
    #[arg(long = "fourcc", default_value = "mp4v")]
    pub fourcc: String,
    /// Thumbnail JPEG quality (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 85)]
    pub jpeg_quality: u8,
    /// Playback fraction at which the thumbnail is taken.
    #[arg(long = "thumbnail-at", value_name = "FRACTION", default_value_t = 0.5)]
    pub thumbnail_at: f64,
    /// Skip videos whose landmark table already exists.
    #[arg(long = "skip-existing", action = clap::ArgAction::SetTrue)]
    pub skip_existing: bool,
    /// List the selected videos and their outputs without processing.
    #[arg(long = "dry-run", action = clap::ArgAction::SetTrue)]
    pub dry_run: bool,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Enable debug logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Write a Prometheus metrics snapshot when the batch ends.
    #[arg(long = "metrics-snapshot", value_name = "PATH")]
    pub metrics_snapshot: Option<PathBuf>,
}

impl TryFrom<TrackCliArgs> for TrackingConfig {
    type Error = anyhow::Error;

    fn try_from(args: TrackCliArgs) -> Result<Self> {
        let selection = if args.videos.is_empty() {
            let suffix = args.suffix.trim().to_string();
            if suffix.is_empty() {
                bail!("--suffix must not be empty");
            }
            let task_tokens: Vec<String> = args
                .tasks
                .iter()
                .map(|token| token.trim().to_lowercase())
                .filter(|token| !token.is_empty())
                .collect();
            if task_tokens.is_empty() {
                bail!("--task needs at least one task token");
            }
            VideoSelection::Discover {
                suffix,
                task_tokens,
            }
        } else {
            VideoSelection::Explicit(args.videos)
        };

        let detectors = match args.detectors.as_ref() {
            Some(path) => load_detector_options(path)?,
            None => {
                if args.max_hands == 0 {
                    bail!("--max-hands must be at least 1");
                }
                args.track
                    .iter()
                    .map(|&variant| {
                        let mut options = DetectorOptions::for_variant(variant, &args.models);
                        if variant == DetectorVariant::Hands {
                            options.max_instances = Some(args.max_hands);
                        }
                        options
                    })
                    .collect()
            }
        };
        validate_detectors(&detectors)?;

        parse_fourcc(&args.fourcc).map_err(|err| anyhow!("--fourcc: {err}"))?;
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if !(0.0..=1.0).contains(&args.thumbnail_at) {
            bail!("--thumbnail-at must lie between 0 and 1");
        }

        let outputs = OutputOptions {
            video_folder: args.video_out,
            data_folder: args.data_out,
            sink: SinkOptions {
                fourcc: args.fourcc,
                jpeg_quality: args.jpeg_quality,
            },
            thumbnail_fraction: args.thumbnail_at,
        };

        let telemetry = TelemetryOptions {
            chrome_trace_path: args.chrome_trace,
            metrics_snapshot_path: args.metrics_snapshot,
            verbose: args.verbose,
        };

        Ok(Self {
            input_folder: args.input,
            selection,
            detectors,
            outputs,
            telemetry,
            use_cpu: args.use_cpu,
            skip_existing: args.skip_existing,
            dry_run: args.dry_run,
        })
    }
}

fn load_detector_options(path: &Path) -> Result<Vec<DetectorOptions>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read detector options {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse detector options {}", path.display()))
}

fn validate_detectors(detectors: &[DetectorOptions]) -> Result<()> {
    if detectors.is_empty() {
        bail!("at least one detector must be configured");
    }
    let mut seen = HashSet::new();
    for options in detectors {
        if !seen.insert(options.variant) {
            bail!("detector {} is configured more than once", options.variant);
        }
        options.validate()?;
    }
    Ok(())
}
