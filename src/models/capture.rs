// Data structures for decoded video frames and video locations

use crate::models::pose::{PoseError, PoseResult};
use image::{ImageBuffer, RgbImage};
use std::fmt;
use std::path::PathBuf;

/// Pixel format of decoded frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    RGBA8,
    BGRA8,
    RGB8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::RGBA8 | PixelFormat::BGRA8 => 4,
            PixelFormat::RGB8 => 3,
        }
    }
}

/// A frame decoded at a sampled timestamp
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: PixelFormat,
}

impl FrameSample {
    pub fn new(
        timestamp_ms: i64,
        width: u32,
        height: u32,
        data: Vec<u8>,
        format: PixelFormat,
    ) -> PoseResult<Self> {
        if width == 0 || height == 0 {
            return Err(PoseError::DecodeFailed(format!(
                "Empty frame {}x{} at {}ms",
                width, height, timestamp_ms
            )));
        }

        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(PoseError::DecodeFailed(format!(
                "Frame buffer has {} bytes, expected {} for {}x{} {:?}",
                data.len(),
                expected,
                width,
                height,
                format
            )));
        }

        Ok(Self {
            timestamp_ms,
            width,
            height,
            data,
            format,
        })
    }

    pub fn from_rgb_image(timestamp_ms: i64, image: RgbImage) -> Self {
        Self {
            timestamp_ms,
            width: image.width(),
            height: image.height(),
            data: image.into_raw(),
            format: PixelFormat::RGB8,
        }
    }

    /// Copy the pixels into an RGB image, leaving the sample untouched
    pub fn to_rgb_image(&self) -> PoseResult<RgbImage> {
        let pixels = self.width as usize * self.height as usize;
        let mut rgb = Vec::with_capacity(pixels * 3);

        match self.format {
            PixelFormat::RGBA8 => {
                for chunk in self.data.chunks_exact(4) {
                    rgb.extend_from_slice(&chunk[..3]);
                }
            }
            PixelFormat::BGRA8 => {
                for chunk in self.data.chunks_exact(4) {
                    rgb.push(chunk[2]); // R
                    rgb.push(chunk[1]); // G
                    rgb.push(chunk[0]); // B
                }
            }
            PixelFormat::RGB8 => rgb.extend_from_slice(&self.data),
        }

        ImageBuffer::from_raw(self.width, self.height, rgb).ok_or_else(|| {
            PoseError::DecodeFailed(format!(
                "Frame buffer does not match {}x{}",
                self.width, self.height
            ))
        })
    }
}

/// Location of a video as passed by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoUri {
    /// Local filesystem path
    File(PathBuf),
    /// `content://` identifier resolved by the host
    Content(String),
}

impl VideoUri {
    pub const CONTENT_SCHEME: &'static str = "content://";
    pub const FILE_SCHEME: &'static str = "file://";

    pub fn parse(uri: &str) -> Self {
        if uri.starts_with(Self::CONTENT_SCHEME) {
            VideoUri::Content(uri.to_string())
        } else if let Some(path) = uri.strip_prefix(Self::FILE_SCHEME) {
            VideoUri::File(PathBuf::from(path))
        } else {
            VideoUri::File(PathBuf::from(uri))
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, VideoUri::Content(_))
    }
}

impl fmt::Display for VideoUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoUri::File(path) => write!(f, "{}", path.display()),
            VideoUri::Content(uri) => f.write_str(uri),
        }
    }
}
