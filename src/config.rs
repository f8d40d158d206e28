//! Recompression configuration.
//!
//! Handles loading, validating, and merging TOML configuration. A session is
//! always driven by an explicit [`RecompressConfig`]; there is no global
//! state. User files are sparse and layered over the stock defaults.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! preset = "medium"          # low | medium | high | veryhigh
//! strict = false             # fail instead of falling back when no candidate meets the target
//!
//! [search]
//! min_quality = 40
//! max_quality = 95
//! max_attempts = 6
//! # threshold = 0.9999      # overrides the preset's SSIM target
//! # step = 1                # overrides the preset's quality step
//!
//! [codec]
//! max_pixels = 100000000
//! progressive = true
//! optimize_huffman = true
//! subsampling = "auto"      # auto | preserve | 444 | 422 | 420
//! chroma_detail_threshold = 6.0
//!
//! [metric]
//! window = 8
//! stride = 1
//! downscale = true
//! parallel = true
//!
//! [output]
//! strip_metadata = false
//! tag_output = true
//! skip_processed = true
//! comment = "Compressed by jpeg-recompress"
//! ```
//!
//! ## Partial Configuration
//!
//! ```toml
//! preset = "high"
//!
//! [search]
//! min_quality = 60
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::codec::params::{MAX_QUALITY, MIN_QUALITY, SubsamplingPolicy};
use crate::preset::{QualityPreset, SearchPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Tag written into every recompressed file and used to skip it next time.
pub const DEFAULT_COMMENT: &str = "Compressed by jpeg-recompress";

/// Largest COM payload: segment length is 16-bit and includes itself.
const MAX_COMMENT_LEN: usize = 65_533;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Everything a recompression session needs to know.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecompressConfig {
    pub preset: QualityPreset,
    /// Report `TargetUnreachable` instead of returning the best candidate.
    pub strict: bool,
    pub search: SearchConfig,
    pub codec: CodecConfig,
    pub metric: MetricConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub min_quality: u8,
    pub max_quality: u8,
    /// Hard cap on encode/decode/score attempts, not counting the size probe.
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u8>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_quality: 40,
            max_quality: 95,
            max_attempts: 6,
            threshold: None,
            step: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    /// Decode ceiling (width × height).
    pub max_pixels: u64,
    pub progressive: bool,
    pub optimize_huffman: bool,
    pub subsampling: SubsamplingPolicy,
    /// `auto` subsampling switches to 4:4:4 above this chroma detail score.
    pub chroma_detail_threshold: f64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_pixels: 100_000_000,
            progressive: true,
            optimize_huffman: true,
            subsampling: SubsamplingPolicy::Auto,
            chroma_detail_threshold: 6.0,
        }
    }
}

/// SSIM parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricConfig {
    pub window: u32,
    pub stride: u32,
    /// Compare at roughly 256px on the short edge.
    pub downscale: bool,
    /// Score window rows on the rayon pool.
    pub parallel: bool,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            window: 8,
            stride: 1,
            downscale: true,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Drop APP1-APP13, APP15 and COM segments from the output.
    pub strip_metadata: bool,
    /// Insert `comment` as a COM segment into recompressed output.
    pub tag_output: bool,
    /// Keep sources that already carry `comment` untouched.
    pub skip_processed: bool,
    pub comment: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            strip_metadata: false,
            tag_output: true,
            skip_processed: true,
            comment: DEFAULT_COMMENT.to_string(),
        }
    }
}

impl RecompressConfig {
    /// Config for a preset with every other value at its default.
    pub fn with_preset(preset: QualityPreset) -> Self {
        Self {
            preset,
            ..Self::default()
        }
    }

    /// The preset's policy with `search.threshold` / `search.step` applied.
    pub fn policy(&self) -> SearchPolicy {
        let base = self.preset.policy();
        SearchPolicy {
            threshold: self.search.threshold.unwrap_or(base.threshold),
            step: self.search.step.unwrap_or(base.step),
        }
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let quality_range = MIN_QUALITY..=MAX_QUALITY;
        let search = &self.search;
        if !quality_range.contains(&search.min_quality) || !quality_range.contains(&search.max_quality)
        {
            return Err(ConfigError::Validation(
                "search.min_quality and search.max_quality must be 1-100".into(),
            ));
        }
        if search.min_quality > search.max_quality {
            return Err(ConfigError::Validation(format!(
                "search.min_quality ({}) must not exceed search.max_quality ({})",
                search.min_quality, search.max_quality
            )));
        }
        if search.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "search.max_attempts must be at least 1".into(),
            ));
        }
        if let Some(threshold) = search.threshold.filter(|t| !(*t > 0.0 && *t <= 1.0)) {
            return Err(ConfigError::Validation(format!(
                "search.threshold must be in (0, 1], got {threshold}"
            )));
        }
        if search.step == Some(0) {
            return Err(ConfigError::Validation(
                "search.step must be at least 1".into(),
            ));
        }

        if self.codec.max_pixels == 0 {
            return Err(ConfigError::Validation(
                "codec.max_pixels must be non-zero".into(),
            ));
        }
        let chroma = self.codec.chroma_detail_threshold;
        if !chroma.is_finite() || chroma < 0.0 {
            return Err(ConfigError::Validation(
                "codec.chroma_detail_threshold must be a non-negative number".into(),
            ));
        }

        if !(1..=64).contains(&self.metric.window) {
            return Err(ConfigError::Validation(
                "metric.window must be 1-64".into(),
            ));
        }
        if self.metric.stride == 0 {
            return Err(ConfigError::Validation(
                "metric.stride must be at least 1".into(),
            ));
        }

        let output = &self.output;
        if (output.tag_output || output.skip_processed) && output.comment.is_empty() {
            return Err(ConfigError::Validation(
                "output.comment must not be empty while tagging or skipping is enabled".into(),
            ));
        }
        if output.comment.len() > MAX_COMMENT_LEN {
            return Err(ConfigError::Validation(format!(
                "output.comment must be at most {MAX_COMMENT_LEN} bytes"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged on top of.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(RecompressConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist, `Err` if it exists but
/// contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<RecompressConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: RecompressConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML file, layered over the stock defaults.
///
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<RecompressConfig, ConfigError> {
    resolve_config(stock_defaults_value()?, load_raw_config(path)?)
}

/// Parse a sparse TOML document, layered over the stock defaults.
pub fn from_toml_str(content: &str) -> Result<RecompressConfig, ConfigError> {
    let overlay: toml::Value = toml::from_str(content)?;
    resolve_config(stock_defaults_value()?, Some(overlay))
}

/// Returns a fully-commented stock config with all keys and explanations.
pub fn stock_config_toml() -> &'static str {
    r##"# jpeg-recompress configuration
# =============================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Fidelity preset: low, medium, high or veryhigh.
#   low      SSIM >= 0.999,   quality step 2
#   medium   SSIM >= 0.9999,  quality step 1
#   high     SSIM >= 0.99995, quality step 1
#   veryhigh SSIM >= 0.99999, quality step 1
preset = "medium"

# When no candidate reaches the target, fail with "target unreachable"
# instead of returning the most similar candidate.
strict = false

# ---------------------------------------------------------------------------
# Quality search
# ---------------------------------------------------------------------------
[search]
# Encoder quality bounds (1-100). The result always lies inside them.
min_quality = 40
max_quality = 95

# Maximum encode/decode/compare attempts per image.
max_attempts = 6

# Override the preset's SSIM target, in (0, 1].
# threshold = 0.9999

# Override the preset's quality step.
# step = 1

# ---------------------------------------------------------------------------
# Codec
# ---------------------------------------------------------------------------
[codec]
# Refuse to decode images with more pixels than this (width * height).
max_pixels = 100000000

# Write progressive JPEGs.
progressive = true

# Build image-specific Huffman tables.
optimize_huffman = true

# Chroma subsampling of the output:
#   auto      4:4:4 for images with fine colour detail, else the source layout
#   preserve  the source layout (4:2:0 when unrecognised)
#   444, 422, 420  always this layout
subsampling = "auto"

# Colour detail score above which "auto" keeps full chroma resolution.
chroma_detail_threshold = 6.0

# ---------------------------------------------------------------------------
# Similarity metric (SSIM on luma)
# ---------------------------------------------------------------------------
[metric]
# Square analysis window size in pixels (1-64).
window = 8

# Distance between neighbouring windows in pixels.
stride = 1

# Compare large images at roughly 256px on the short edge.
downscale = true

# Spread the comparison over all CPU cores.
parallel = true

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Drop EXIF, XMP, ICC, IPTC and comment segments from the output.
strip_metadata = false

# Mark recompressed files with a comment segment.
tag_output = true

# Copy files that already carry the mark without recompressing them.
skip_processed = true

# Text of the mark.
comment = "Compressed by jpeg-recompress"
"##
}
