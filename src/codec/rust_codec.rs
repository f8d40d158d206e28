//! Pure Rust codec: `image` for decode, `jpeg-encoder` for encode.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Header + pixel ceiling | [`markers::read_header`] (SOF dimensions) |
//! | Decode | `image::ImageReader` with `Limits`, JPEG format forced |
//! | Encode | `jpeg_encoder::Encoder` (quality, `SamplingFactor`, progressive, optimized Huffman) |
//!
//! The ceiling is enforced from the frame header before any pixel work, so
//! an oversized image never allocates its pixel buffer.

use super::markers;
use super::params::{Subsampling, validate_quality};
use super::{DecodeError, EncodeError, EncodeParams, JpegCodec, SourceImage};
use crate::codec::ColorMode;
use crate::config::CodecConfig;
use image::error::ImageError;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use std::io::Cursor;

/// Default decode ceiling in pixels (width × height).
pub const DEFAULT_MAX_PIXELS: u64 = 100_000_000;

/// Largest dimension a baseline/progressive JPEG frame can declare.
const MAX_DIMENSION: u32 = u16::MAX as u32;

/// Codec backed by the `image` and `jpeg-encoder` crates.
///
/// Stateless apart from its pixel ceiling; one instance can serve any number
/// of concurrent sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RustCodec {
    max_pixels: u64,
}

impl RustCodec {
    pub fn new() -> Self {
        Self {
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }

    pub fn with_max_pixels(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    pub fn from_config(config: &CodecConfig) -> Self {
        Self::with_max_pixels(config.max_pixels)
    }

    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(MAX_DIMENSION);
        limits.max_image_height = Some(MAX_DIMENSION);
        limits
    }
}

impl Default for RustCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn map_image_error(err: ImageError, width: u32, height: u32, limit: u64) -> DecodeError {
    match err {
        ImageError::Limits(_) => DecodeError::TooLarge {
            width,
            height,
            limit,
        },
        ImageError::Unsupported(e) => DecodeError::UnsupportedFormat(e.to_string()),
        other => DecodeError::CorruptData(other.to_string()),
    }
}

fn sampling_factor(subsampling: Subsampling) -> SamplingFactor {
    match subsampling {
        Subsampling::S444 => SamplingFactor::R_4_4_4,
        Subsampling::S422 => SamplingFactor::R_4_2_2,
        Subsampling::S420 => SamplingFactor::R_4_2_0,
    }
}

impl JpegCodec for RustCodec {
    fn decode(&self, bytes: &[u8]) -> Result<SourceImage, DecodeError> {
        let header = markers::read_header(bytes)?;
        let frame = &header.frame;
        let (width, height) = (frame.width as u32, frame.height as u32);
        if frame.pixel_count() > self.max_pixels {
            return Err(DecodeError::TooLarge {
                width,
                height,
                limit: self.max_pixels,
            });
        }

        let mut reader = ImageReader::with_format(Cursor::new(bytes), ImageFormat::Jpeg);
        reader.limits(self.limits());
        let decoded = reader
            .decode()
            .map_err(|e| map_image_error(e, width, height, self.max_pixels))?;

        if decoded.width() != width || decoded.height() != height {
            return Err(DecodeError::CorruptData(format!(
                "frame declares {width}x{height} but decoded {}x{}",
                decoded.width(),
                decoded.height()
            )));
        }

        match decoded {
            DynamicImage::ImageLuma8(gray) => SourceImage::from_luma(width, height, gray.into_raw()),
            other => {
                let rgb = other.to_rgb8().into_raw();
                SourceImage::from_rgb(width, height, rgb, frame.subsampling())
            }
        }
    }

    fn encode(&self, image: &SourceImage, params: &EncodeParams) -> Result<Vec<u8>, EncodeError> {
        let quality = validate_quality(params.quality)?;
        let (width, height) = (image.width(), image.height());
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(EncodeError::EncodeFailure(format!(
                "{width}x{height} exceeds the JPEG dimension limit of {MAX_DIMENSION}"
            )));
        }

        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf, quality);
        encoder.set_progressive(params.progressive);
        encoder.set_optimized_huffman_tables(params.optimize_huffman);
        let color_type = match image.color() {
            ColorMode::Color => {
                encoder.set_sampling_factor(sampling_factor(params.subsampling));
                ColorType::Rgb
            }
            ColorMode::Grayscale => ColorType::Luma,
        };
        encoder
            .encode(image.pixels(), width as u16, height as u16, color_type)
            .map_err(|e| EncodeError::EncodeFailure(e.to_string()))?;
        Ok(buf)
    }
}
