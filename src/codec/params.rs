//! Parameter types for encode operations.
//!
//! These structs describe *what* to encode, not *how*. They are the interface
//! between the search (which decides quality and subsampling) and the
//! [`JpegCodec`](super::JpegCodec) implementation (which does the pixel work),
//! so a mock codec can stand in during tests.
//!
//! ## Types
//!
//! - [`Subsampling`] — chroma layout of an encode: 4:4:4, 4:2:2 or 4:2:0.
//! - [`SubsamplingPolicy`] — how a session picks the layout for its candidates.
//! - [`EncodeParams`] — quality, layout and entropy-coding switches for one encode.

use super::EncodeError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

/// Chroma subsampling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subsampling {
    /// Full chroma resolution.
    #[serde(rename = "444")]
    S444,
    /// Chroma halved horizontally.
    #[serde(rename = "422")]
    S422,
    /// Chroma halved in both axes.
    #[serde(rename = "420")]
    S420,
}

impl Subsampling {
    /// Luma `(horizontal, vertical)` sampling factors with chroma at 1×1.
    pub fn luma_factors(self) -> (u8, u8) {
        match self {
            Subsampling::S444 => (1, 1),
            Subsampling::S422 => (2, 1),
            Subsampling::S420 => (2, 2),
        }
    }

    /// Detect the layout from per-component `(h, v)` sampling factors.
    ///
    /// Only three-component images whose chroma planes are sampled at 1×1
    /// map to a layout; grayscale, CMYK, 4:1:1, 4:4:0 and other exotic
    /// layouts return `None`.
    pub fn from_sampling_factors(factors: &[(u8, u8)]) -> Option<Self> {
        let [luma, cb, cr] = factors else {
            return None;
        };
        if *cb != (1, 1) || *cr != (1, 1) {
            return None;
        }
        match luma {
            (1, 1) => Some(Subsampling::S444),
            (2, 1) => Some(Subsampling::S422),
            (2, 2) => Some(Subsampling::S420),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Subsampling::S444 => "4:4:4",
            Subsampling::S422 => "4:2:2",
            Subsampling::S420 => "4:2:0",
        }
    }
}

impl fmt::Display for Subsampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session chooses the subsampling shared by all of its candidates.
///
/// Subsampling is picked once per session, never searched: only quality is
/// a search dimension.
///
/// Serialized as `"auto"`, `"preserve"`, `"444"`, `"422"` or `"420"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SubsamplingPolicy {
    /// 4:4:4 when the source carries fine chroma detail, otherwise the
    /// source's own layout (4:2:0 when unrecognised).
    #[default]
    Auto,
    /// The source's own layout (4:2:0 when unrecognised).
    Preserve,
    /// Always this layout.
    Fixed(Subsampling),
}

impl TryFrom<String> for SubsamplingPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "auto" => Ok(SubsamplingPolicy::Auto),
            "preserve" => Ok(SubsamplingPolicy::Preserve),
            "444" | "4:4:4" => Ok(SubsamplingPolicy::Fixed(Subsampling::S444)),
            "422" | "4:2:2" => Ok(SubsamplingPolicy::Fixed(Subsampling::S422)),
            "420" | "4:2:0" => Ok(SubsamplingPolicy::Fixed(Subsampling::S420)),
            other => Err(format!(
                "unknown subsampling '{other}' (expected auto, preserve, 444, 422 or 420)"
            )),
        }
    }
}

impl From<SubsamplingPolicy> for String {
    fn from(policy: SubsamplingPolicy) -> Self {
        match policy {
            SubsamplingPolicy::Auto => "auto".to_string(),
            SubsamplingPolicy::Preserve => "preserve".to_string(),
            SubsamplingPolicy::Fixed(Subsampling::S444) => "444".to_string(),
            SubsamplingPolicy::Fixed(Subsampling::S422) => "422".to_string(),
            SubsamplingPolicy::Fixed(Subsampling::S420) => "420".to_string(),
        }
    }
}

/// Everything a codec needs to produce one encoded candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    /// Encoder quality, 1–100.
    pub quality: u8,
    /// Chroma layout (ignored for grayscale sources).
    pub subsampling: Subsampling,
    pub progressive: bool,
    pub optimize_huffman: bool,
}

/// Reject qualities outside 1–100 instead of silently clamping them.
pub fn validate_quality(quality: u8) -> Result<u8, EncodeError> {
    if (MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
        Ok(quality)
    } else {
        Err(EncodeError::InvalidQuality(quality))
    }
}
