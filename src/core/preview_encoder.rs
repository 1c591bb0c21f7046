// Preview JPEG encoding and frame downscaling

use crate::core::config::PipelineConfig;
use crate::models::capture::FrameSample;
use crate::models::pose::{PoseError, PoseResult};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbImage};

pub const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Encodes sampled frames as small JPEG previews
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewEncoder {
    width: u32,
    nominal_height: u32,
    quality: u8,
}

impl Default for PreviewEncoder {
    fn default() -> Self {
        Self::new(480, 270, 80)
    }
}

impl PreviewEncoder {
    pub fn new(width: u32, nominal_height: u32, quality: u8) -> Self {
        Self {
            width,
            nominal_height,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.preview_width_px,
            config.preview_height_px,
            config.preview_quality,
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Tallest preview; the height a 16:9 source scales to at the target width
    pub fn nominal_height(&self) -> u32 {
        self.nominal_height
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Output size for a source frame: the source aspect ratio fitted inside
    /// `width` x `nominal_height`, never upscaled
    pub fn preview_dimensions(&self, src_width: u32, src_height: u32) -> (u32, u32) {
        if src_width <= self.width && src_height <= self.nominal_height {
            return (src_width, src_height);
        }

        let height = scaled_height(src_width, src_height, self.width);
        if height <= self.nominal_height {
            (self.width, height)
        } else {
            // Portrait and narrow frames are bounded by height
            (scaled_height(src_height, src_width, self.nominal_height), self.nominal_height)
        }
    }

    pub fn encode_preview(&self, frame: &FrameSample) -> PoseResult<Vec<u8>> {
        let rgb = frame.to_rgb_image()?;
        self.encode_rgb(&rgb)
    }

    /// Encode an RGB image; the input is only read
    pub fn encode_rgb(&self, image: &RgbImage) -> PoseResult<Vec<u8>> {
        let (width, height) = self.preview_dimensions(image.width(), image.height());

        let scaled;
        let target = if (width, height) == image.dimensions() {
            image
        } else {
            scaled = imageops::resize(image, width, height, FilterType::Triangle);
            &scaled
        };

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .write_image(target.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| PoseError::EncodeFailed(e.to_string()))?;

        Ok(buffer)
    }

    pub fn encode_data_uri(&self, frame: &FrameSample) -> PoseResult<String> {
        Ok(to_data_uri(&self.encode_preview(frame)?))
    }
}

/// `data:image/jpeg;base64,...` with standard, unwrapped base64
pub fn to_data_uri(jpeg: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
    format!("{}{}", DATA_URI_PREFIX, encoded)
}

/// Working copy scaled down to `width`; narrower images are copied as-is
pub fn downscale_to_width(image: &RgbImage, width: u32) -> RgbImage {
    if image.width() <= width {
        return image.clone();
    }
    let height = scaled_height(image.width(), image.height(), width);
    imageops::resize(image, width, height, FilterType::Triangle)
}

fn scaled_height(src_width: u32, src_height: u32, width: u32) -> u32 {
    let height = (src_height as u64 * width as u64 + src_width as u64 / 2) / src_width as u64;
    height.max(1) as u32
}
