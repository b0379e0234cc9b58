//! Offline video ingest: sequential decoding of recorded files and encoding of
//! annotated copies.
//!
//! - `source`: [`VideoSource`], an OpenCV decoder yielding frames in file order.
//! - `sink`: [`VideoSink`], an OpenCV encoder plus the JPEG thumbnail.
//! - `convert`: BGR/RGB channel swaps between OpenCV and `image` buffers.

use image::RgbImage;

mod convert;
mod sink;
mod source;
mod types;

pub use convert::{swap_red_blue, swap_red_blue_into};
pub use sink::{SinkOptions, VideoSink, parse_fourcc, write_jpeg};
pub use source::VideoSource;
pub use types::{Frame, FrameFormat, IngestError, VideoMetadata};

/// Finite, non-restartable producer of frames in capture order.
pub trait FrameSource {
    /// Stream properties, available before the first frame is read.
    fn metadata(&self) -> &VideoMetadata;

    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, IngestError>;
}

/// Consumer of annotated frames. Frames are written exactly in call order.
pub trait FrameSink {
    fn write(&mut self, image: &RgbImage) -> Result<(), IngestError>;

    /// Store `image` as the one still for this video; a second call fails.
    fn capture_thumbnail(&mut self, image: &RgbImage) -> Result<(), IngestError>;

    fn frames_written(&self) -> u64;

    /// Flush and release the encoder. Calling it again is a no-op.
    fn finish(&mut self) -> Result<(), IngestError>;
}
