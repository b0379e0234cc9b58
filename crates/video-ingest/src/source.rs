//! OpenCV-backed sequential reader over a video file.

use std::path::Path;

use opencv::{
    core::{Mat, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use tracing::{debug, warn};

use crate::{
    FrameSource,
    types::{Frame, FrameFormat, IngestError, VideoMetadata},
};

/// Decodes a video file frame by frame in capture order.
///
/// The decoder handle is released when the source is dropped, whichever way
/// the caller leaves its frame loop.
pub struct VideoSource {
    capture: VideoCapture,
    metadata: VideoMetadata,
    buffer: Mat,
    next_index: u64,
    exhausted: bool,
}

impl VideoSource {
    /// Open `path` and read the stream properties.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let open_error = || IngestError::Open {
            path: path.to_path_buf(),
        };
        let uri = path.to_str().ok_or_else(open_error)?;

        let capture = match VideoCapture::from_file(uri, videoio::CAP_ANY) {
            Ok(cap) => cap,
            Err(err) => {
                debug!("video-ingest: decoder rejected {uri}: {err}");
                return Err(open_error());
            }
        };
        if !capture.is_opened().map_err(|e| IngestError::Other(e.into()))? {
            return Err(open_error());
        }

        let prop = |id: i32| -> Result<f64, IngestError> {
            capture.get(id).map_err(|e| IngestError::Other(e.into()))
        };
        let frame_rate = (prop(videoio::CAP_PROP_FPS)? * 1000.0).round() / 1000.0;
        let frame_count = prop(videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as u64;
        let width = prop(videoio::CAP_PROP_FRAME_WIDTH)?.max(0.0) as u32;
        let height = prop(videoio::CAP_PROP_FRAME_HEIGHT)?.max(0.0) as u32;

        let metadata = VideoMetadata {
            path: path.to_path_buf(),
            frame_rate,
            frame_count,
            width,
            height,
        };
        debug!(
            "video-ingest: opened {uri} ({}x{} @ {} fps, {} frames)",
            width, height, frame_rate, frame_count
        );

        Ok(Self {
            capture,
            metadata,
            buffer: Mat::default(),
            next_index: 0,
            exhausted: false,
        })
    }
}

impl FrameSource for VideoSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, IngestError> {
        if self.exhausted {
            return Ok(None);
        }

        let grabbed = self
            .capture
            .read(&mut self.buffer)
            .map_err(|e| IngestError::Other(e.into()))?;
        if !grabbed || self.buffer.empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let index = self.next_index;
        let channels = self.buffer.channels();
        if channels != 3 {
            return Err(IngestError::UnsupportedFormat { index, channels });
        }

        // Position of the frame just decoded, as reported by the container.
        let timestamp_ms = self
            .capture
            .get(videoio::CAP_PROP_POS_MSEC)
            .map_err(|e| IngestError::Other(e.into()))? as i64;

        let size = self
            .buffer
            .size()
            .map_err(|e| IngestError::Other(e.into()))?;
        let data = self
            .buffer
            .data_bytes()
            .map_err(|e| IngestError::Other(e.into()))?
            .to_vec();

        self.next_index += 1;
        Ok(Some(Frame {
            index,
            timestamp_ms,
            width: size.width.max(0) as u32,
            height: size.height.max(0) as u32,
            data,
            format: FrameFormat::Bgr8,
        }))
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        if let Err(err) = self.capture.release() {
            warn!(
                "video-ingest: failed to release decoder for {}: {err}",
                self.metadata.path.display()
            );
        }
    }
}
