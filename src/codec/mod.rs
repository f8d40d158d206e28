//! JPEG codec adapter.
//!
//! The [`JpegCodec`] trait is the seam between the recompression engine and
//! the actual JPEG bitstream work: decode a stream into a [`SourceImage`],
//! encode pixels back at a given quality and subsampling.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Header inspection** | custom marker walker ([`markers`]) |
//! | **Decode** | `image` crate (`ImageReader` with `Limits`) |
//! | **Encode** | `jpeg-encoder` (sampling factor, progressive, optimized Huffman) |
//!
//! The production implementation is [`RustCodec`]. Tests use a mock codec
//! that records operations and synthesizes candidate distortion.

pub mod markers;
pub mod params;
pub mod rust_codec;

use crate::analysis::rgb_to_luma;
use crate::similarity::LumaView;
use params::Subsampling;
use thiserror::Error;

pub use params::EncodeParams;
pub use rust_codec::RustCodec;

/// Source stream could not be turned into pixels. Always fatal for a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt data: {0}")]
    CorruptData(String),
    #[error("image too large: {width}x{height} exceeds the {limit} pixel ceiling")]
    TooLarge { width: u32, height: u32, limit: u64 },
}

/// A single encode failed. Recoverable during the search.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("invalid quality {0} (expected 1-100)")]
    InvalidQuality(u8),
    #[error("encoder failure: {0}")]
    EncodeFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Color,
    Grayscale,
}

/// A decoded image: interleaved pixels plus the luma plane every candidate
/// is compared against. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    width: u32,
    height: u32,
    color: ColorMode,
    subsampling: Option<Subsampling>,
    pixels: Vec<u8>,
    luma: Vec<u8>,
}

impl SourceImage {
    /// Build from interleaved RGB8 pixels.
    pub fn from_rgb(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        subsampling: Option<Subsampling>,
    ) -> Result<Self, DecodeError> {
        check_len(width, height, 3, pixels.len())?;
        let luma = rgb_to_luma(&pixels);
        Ok(Self {
            width,
            height,
            color: ColorMode::Color,
            subsampling,
            pixels,
            luma,
        })
    }

    /// Build from an 8-bit grayscale plane.
    pub fn from_luma(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, DecodeError> {
        check_len(width, height, 1, pixels.len())?;
        Ok(Self {
            width,
            height,
            color: ColorMode::Grayscale,
            subsampling: None,
            luma: pixels.clone(),
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color(&self) -> ColorMode {
        self.color
    }

    /// Layout declared by the source stream, when recognised.
    pub fn subsampling(&self) -> Option<Subsampling> {
        self.subsampling
    }

    /// Interleaved pixels: RGB8 for colour, L8 for grayscale.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn luma(&self) -> LumaView<'_> {
        LumaView::new(&self.luma, self.width, self.height)
    }
}

fn check_len(width: u32, height: u32, channels: usize, len: usize) -> Result<(), DecodeError> {
    let expected = width as usize * height as usize * channels;
    if len != expected {
        return Err(DecodeError::CorruptData(format!(
            "pixel buffer holds {len} bytes, {width}x{height}x{channels} needs {expected}"
        )));
    }
    Ok(())
}

/// Decode/encode operations the search needs from a JPEG library.
///
/// Implementations must not share mutable state between calls: sessions on
/// different threads call into the same codec concurrently.
pub trait JpegCodec: Sync {
    /// Decode a JPEG stream into pixels and metadata.
    fn decode(&self, bytes: &[u8]) -> Result<SourceImage, DecodeError>;

    /// Encode pixels into a JPEG stream.
    fn encode(&self, image: &SourceImage, params: &EncodeParams) -> Result<Vec<u8>, EncodeError>;
}
