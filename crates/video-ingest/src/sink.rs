//! Annotated video output plus the single still thumbnail captured mid-video.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use image::{RgbImage, codecs::jpeg::JpegEncoder};
use opencv::{
    core::{self, Mat, MatTraitManual},
    prelude::*,
    videoio::{VideoWriter, VideoWriterTrait, VideoWriterTraitConst},
};
use tracing::{debug, warn};

use crate::{FrameSink, convert::swap_red_blue_into, types::IngestError};

/// Parse a four-character codec tag such as `mp4v` or `avc1`.
pub fn parse_fourcc(tag: &str) -> Result<[char; 4], IngestError> {
    let chars: Vec<char> = tag.chars().collect();
    match chars.as_slice() {
        [a, b, c, d] if chars.iter().all(|ch| ch.is_ascii_graphic()) => Ok([*a, *b, *c, *d]),
        _ => Err(IngestError::InvalidFourcc(tag.to_string())),
    }
}

/// Encode `image` as a JPEG file at `path`.
pub fn write_jpeg(path: &Path, image: &RgbImage, quality: u8) -> Result<(), IngestError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|source| IngestError::Thumbnail {
            path: path.to_path_buf(),
            source,
        })?;
    writer.flush()?;
    Ok(())
}

/// Settings shared by every sink opened during a batch.
#[derive(Clone, Debug)]
pub struct SinkOptions {
    /// Four-character codec tag handed to the encoder.
    pub fourcc: String,
    /// JPEG quality of the thumbnail (1-100).
    pub jpeg_quality: u8,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            fourcc: "mp4v".to_string(),
            jpeg_quality: 85,
        }
    }
}

/// OpenCV `VideoWriter` wrapper that appends RGB frames in call order.
pub struct VideoSink {
    writer: VideoWriter,
    path: PathBuf,
    thumbnail_path: PathBuf,
    jpeg_quality: u8,
    width: u32,
    height: u32,
    scratch: Mat,
    frames_written: u64,
    thumbnail_taken: bool,
    released: bool,
}

impl VideoSink {
    /// Create the output video at `path`; the thumbnail lands at `thumbnail_path`.
    pub fn open(
        path: impl AsRef<Path>,
        thumbnail_path: impl AsRef<Path>,
        options: &SinkOptions,
        frame_rate: f64,
        width: u32,
        height: u32,
    ) -> Result<Self, IngestError> {
        let path = path.as_ref().to_path_buf();
        let create_error = || IngestError::CreateWriter {
            path: path.clone(),
            fourcc: options.fourcc.clone(),
        };
        let [a, b, c, d] = parse_fourcc(&options.fourcc)?;
        let code = VideoWriter::fourcc(a, b, c, d).map_err(|e| IngestError::Other(e.into()))?;
        let uri = path.to_str().ok_or_else(create_error)?;

        let size = core::Size::new(width as i32, height as i32);
        let writer = match VideoWriter::new(uri, code, frame_rate, size, true) {
            Ok(writer) => writer,
            Err(err) => {
                debug!("video-ingest: encoder rejected {uri}: {err}");
                return Err(create_error());
            }
        };
        if !writer.is_opened().map_err(|e| IngestError::Other(e.into()))? {
            return Err(create_error());
        }

        let scratch = Mat::new_rows_cols_with_default(
            height as i32,
            width as i32,
            core::CV_8UC3,
            core::Scalar::all(0.0),
        )
        .map_err(|e| IngestError::Other(e.into()))?;

        Ok(Self {
            writer,
            thumbnail_path: thumbnail_path.as_ref().to_path_buf(),
            path,
            jpeg_quality: options.jpeg_quality,
            width,
            height,
            scratch,
            frames_written: 0,
            thumbnail_taken: false,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_resolution(&self, image: &RgbImage) -> Result<(), IngestError> {
        if image.width() != self.width || image.height() != self.height {
            return Err(IngestError::Resolution {
                width: self.width,
                height: self.height,
                got_width: image.width(),
                got_height: image.height(),
            });
        }
        Ok(())
    }
}

impl FrameSink for VideoSink {
    fn write(&mut self, image: &RgbImage) -> Result<(), IngestError> {
        if self.released {
            return Err(IngestError::Released {
                path: self.path.clone(),
            });
        }
        self.check_resolution(image)?;

        let target = self
            .scratch
            .data_bytes_mut()
            .map_err(|e| IngestError::Other(e.into()))?;
        swap_red_blue_into(image.as_raw(), target);
        self.writer
            .write(&self.scratch)
            .map_err(|e| IngestError::Other(e.into()))?;
        self.frames_written += 1;
        Ok(())
    }

    fn capture_thumbnail(&mut self, image: &RgbImage) -> Result<(), IngestError> {
        if self.thumbnail_taken {
            return Err(IngestError::ThumbnailTaken {
                path: self.thumbnail_path.clone(),
            });
        }
        write_jpeg(&self.thumbnail_path, image, self.jpeg_quality)?;
        self.thumbnail_taken = true;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finish(&mut self) -> Result<(), IngestError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.writer
            .release()
            .map_err(|e| IngestError::Other(e.into()))
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            warn!(
                "video-ingest: failed to release writer for {}: {err}",
                self.path.display()
            );
        }
    }
}
