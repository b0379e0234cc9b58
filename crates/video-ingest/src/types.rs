use std::path::PathBuf;

use anyhow::Error;
use image::RgbImage;
use thiserror::Error;

use crate::convert::swap_red_blue;

/// Raw frame decoded from a video file, in the decoder's channel order.
pub struct Frame {
    /// Zero-based position of the frame in the stream.
    pub index: u64,
    /// Decoder position of this frame in milliseconds.
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
}

impl Frame {
    /// Number of bytes a tightly packed 3-channel buffer of this size occupies.
    pub fn expected_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 3
    }

    /// Build an RGB image from the frame, swapping channels for BGR sources.
    pub fn to_rgb_image(&self) -> Result<RgbImage, IngestError> {
        let expected = self.expected_len();
        if self.data.len() != expected {
            return Err(IngestError::FrameSize {
                index: self.index,
                expected,
                got: self.data.len(),
            });
        }

        let data = match self.format {
            FrameFormat::Bgr8 => swap_red_blue(&self.data),
            FrameFormat::Rgb8 => self.data.clone(),
        };

        RgbImage::from_vec(self.width, self.height, data).ok_or(IngestError::FrameSize {
            index: self.index,
            expected,
            got: self.data.len(),
        })
    }
}

/// Stream properties read once when a video is opened.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub path: PathBuf,
    pub frame_rate: f64,
    /// Frame count reported by the container; may differ from the frames actually decoded.
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open video source {path:?}")]
    Open { path: PathBuf },
    #[error("failed to create video writer {path:?} with codec {fourcc:?}")]
    CreateWriter { path: PathBuf, fourcc: String },
    #[error("invalid codec tag {0:?}: expected exactly four ASCII characters")]
    InvalidFourcc(String),
    #[error("frame #{index} holds {got} bytes, expected {expected}")]
    FrameSize { index: u64, expected: usize, got: usize },
    #[error("unsupported decoder output for frame #{index}: {channels} channel(s)")]
    UnsupportedFormat { index: u64, channels: i32 },
    #[error("frame is {got_width}x{got_height} but the writer was opened for {width}x{height}")]
    Resolution {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("thumbnail already captured at {path:?}")]
    ThumbnailTaken { path: PathBuf },
    #[error("failed to encode thumbnail {path:?}")]
    Thumbnail {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("video writer {path:?} has already been released")]
    Released { path: PathBuf },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] Error),
}
