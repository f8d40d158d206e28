//! Shared test utilities for the unit test suite.
//!
//! Synthetic pixel buffers, a reference JPEG encoder, and helpers to build
//! marker segments so codec, session, and marker tests start from real
//! streams without fixture files.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let rgb = noisy_rgb(64, 48, 7);
//! let jpeg = encode_jpeg(&rgb, 64, 48, 90, Subsampling::S420);
//! let exif = app_segment(0xE1, b"Exif\0\0fake");
//! let with_exif = with_segment(&jpeg, &exif);
//! assert_eq!(segment_markers(&with_exif)[0], 0xE1);
//! ```

use crate::codec::markers::read_header;
use crate::codec::params::Subsampling;
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};

// =========================================================================
// Pixel buffers
// =========================================================================

/// Smooth RGB ramp: red follows x, green follows y, blue is constant.
pub fn gradient_rgb(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| {
            let (x, y) = (i % width, i / width);
            [
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                128,
            ]
        })
        .collect()
}

pub fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    (0..width * height).flat_map(|_| color).collect()
}

/// Deterministic full-range noise (xorshift32).
pub fn noisy_rgb(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761) | 1;
    (0..width * height * 3)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

// =========================================================================
// JPEG streams
// =========================================================================

/// Encode RGB pixels as a baseline JPEG with the given layout.
pub fn encode_jpeg(rgb: &[u8], width: u32, height: u32, quality: u8, subsampling: Subsampling) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf, quality);
    encoder.set_sampling_factor(match subsampling {
        Subsampling::S444 => SamplingFactor::R_4_4_4,
        Subsampling::S422 => SamplingFactor::R_4_2_2,
        Subsampling::S420 => SamplingFactor::R_4_2_0,
    });
    encoder
        .encode(rgb, width as u16, height as u16, ColorType::Rgb)
        .unwrap();
    buf
}

/// Build an APPn (or any length-prefixed) segment.
pub fn app_segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 2) as u16;
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Insert `segment` right after SOI.
pub fn with_segment(jpeg: &[u8], segment: &[u8]) -> Vec<u8> {
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "not a JPEG stream");
    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(segment);
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Markers of the non-frame segments in front of the first scan.
pub fn segment_markers(jpeg: &[u8]) -> Vec<u8> {
    read_header(jpeg)
        .unwrap()
        .segments
        .iter()
        .map(|s| s.marker)
        .collect()
}
