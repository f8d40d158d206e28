//! Quality presets and the search policy each one maps to.
//!
//! A preset names how faithful the recompressed image must be. It resolves
//! to a [`SearchPolicy`]: the minimum SSIM a candidate must reach and the
//! quality step the binary search moves in.
//!
//! | Preset | SSIM threshold | Step |
//! |---|---|---|
//! | `low` | 0.999 | 2 |
//! | `medium` | 0.9999 | 1 |
//! | `high` | 0.99995 | 1 |
//! | `veryhigh` | 0.99999 | 1 |
//!
//! Both values can be overridden per session through
//! [`SearchConfig`](crate::config::SearchConfig).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named fidelity tier, ordered from most to least aggressive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    #[default]
    Medium,
    High,
    #[serde(alias = "very-high", alias = "very_high")]
    VeryHigh,
}

/// Target similarity and search granularity resolved from a preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchPolicy {
    /// Minimum SSIM a candidate needs to be accepted.
    pub threshold: f64,
    /// Quality increment between neighbouring candidates.
    pub step: u8,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::Low,
        QualityPreset::Medium,
        QualityPreset::High,
        QualityPreset::VeryHigh,
    ];

    pub fn threshold(self) -> f64 {
        match self {
            QualityPreset::Low => 0.999,
            QualityPreset::Medium => 0.9999,
            QualityPreset::High => 0.99995,
            QualityPreset::VeryHigh => 0.99999,
        }
    }

    /// Low tolerates a coarser search; every other tier walks single steps.
    pub fn step(self) -> u8 {
        match self {
            QualityPreset::Low => 2,
            _ => 1,
        }
    }

    pub fn policy(self) -> SearchPolicy {
        SearchPolicy {
            threshold: self.threshold(),
            step: self.step(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityPreset::Low => "low",
            QualityPreset::Medium => "medium",
            QualityPreset::High => "high",
            QualityPreset::VeryHigh => "veryhigh",
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a preset name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quality preset '{0}' (expected low, medium, high or veryhigh)")]
pub struct UnknownPreset(pub String);

impl FromStr for QualityPreset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(QualityPreset::Low),
            "medium" => Ok(QualityPreset::Medium),
            "high" => Ok(QualityPreset::High),
            "veryhigh" | "very-high" | "very_high" => Ok(QualityPreset::VeryHigh),
            _ => Err(UnknownPreset(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_increase_with_preset() {
        let thresholds: Vec<f64> = QualityPreset::ALL.iter().map(|p| p.threshold()).collect();
        assert!(thresholds.windows(2).all(|w| w[0] < w[1]), "{thresholds:?}");
    }

    #[test]
    fn presets_are_ordered() {
        assert!(QualityPreset::Low < QualityPreset::Medium);
        assert!(QualityPreset::High < QualityPreset::VeryHigh);
    }

    #[test]
    fn default_is_medium() {
        assert_eq!(QualityPreset::default(), QualityPreset::Medium);
        assert_eq!(QualityPreset::default().policy().threshold, 0.9999);
    }

    #[test]
    fn low_uses_coarser_step() {
        assert_eq!(QualityPreset::Low.step(), 2);
        assert_eq!(QualityPreset::VeryHigh.step(), 1);
    }

    #[test]
    fn parse_names_and_aliases() {
        assert_eq!("low".parse::<QualityPreset>().unwrap(), QualityPreset::Low);
        assert_eq!("Medium".parse::<QualityPreset>().unwrap(), QualityPreset::Medium);
        assert_eq!(" high ".parse::<QualityPreset>().unwrap(), QualityPreset::High);
        assert_eq!("very-high".parse::<QualityPreset>().unwrap(), QualityPreset::VeryHigh);
        assert_eq!("veryhigh".parse::<QualityPreset>().unwrap(), QualityPreset::VeryHigh);
    }

    #[test]
    fn parse_unknown_is_error() {
        let err = "ultra".parse::<QualityPreset>().unwrap_err();
        assert_eq!(err, UnknownPreset("ultra".to_string()));
        assert!(err.to_string().contains("ultra"));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for preset in QualityPreset::ALL {
            assert_eq!(preset.to_string().parse::<QualityPreset>().unwrap(), preset);
        }
    }
}
