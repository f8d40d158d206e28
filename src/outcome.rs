//! The result record of one recompression session.
//!
//! An [`Outcome`] is created once, at the end of a session, and owns its
//! output bytes. [`Outcome::report`] turns it into a serializable
//! [`OutcomeReport`] for logs and pipelines.

use crate::codec::params::Subsampling;
use crate::search::SearchResult;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepReason {
    /// The source already carries the recompression tag.
    AlreadyProcessed,
    /// Encoding at the top quality is not smaller than the source.
    ProbeNotSmaller,
    /// The assembled output is not smaller than the source.
    NoSavings,
}

impl KeepReason {
    pub fn as_str(self) -> &'static str {
        match self {
            KeepReason::AlreadyProcessed => "already processed",
            KeepReason::ProbeNotSmaller => "no smaller at top quality",
            KeepReason::NoSavings => "no savings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// New bytes were produced. Check `met_target` for fallback candidates.
    Recompressed,
    /// The source bytes are the result.
    KeptOriginal(KeepReason),
    /// Strict mode: no candidate reached the target, nothing was produced.
    TargetUnreachable,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Recompressed => "recompressed",
            OutcomeStatus::KeptOriginal(_) => "kept_original",
            OutcomeStatus::TargetUnreachable => "target_unreachable",
            OutcomeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which component ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Decode,
    Encode,
    Metric,
    Config,
    Cancelled,
    Io,
    TargetUnreachable,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Decode => "decode",
            FailureKind::Encode => "encode",
            FailureKind::Metric => "metric",
            FailureKind::Config => "config",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Io => "io",
            FailureKind::TargetUnreachable => "target_unreachable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

/// Everything a caller learns from one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: OutcomeStatus,
    /// Quality of the winning (or best) candidate, when the search ran.
    pub quality: Option<u8>,
    pub similarity: Option<f64>,
    pub met_target: bool,
    pub attempts: u32,
    pub subsampling: Option<Subsampling>,
    pub source_size: usize,
    /// Recompressed stream; present only for [`OutcomeStatus::Recompressed`].
    pub bytes: Option<Vec<u8>>,
    pub failure: Option<Failure>,
}

impl Outcome {
    pub(crate) fn recompressed(result: SearchResult, bytes: Vec<u8>, source_size: usize) -> Self {
        Self {
            status: OutcomeStatus::Recompressed,
            quality: Some(result.candidate.quality),
            similarity: Some(result.candidate.similarity),
            met_target: result.met_target,
            attempts: result.attempts,
            subsampling: result.subsampling,
            source_size,
            bytes: Some(bytes),
            failure: None,
        }
    }

    pub(crate) fn kept(reason: KeepReason, source_size: usize) -> Self {
        Self {
            status: OutcomeStatus::KeptOriginal(reason),
            quality: None,
            similarity: None,
            met_target: false,
            attempts: 0,
            subsampling: None,
            source_size,
            bytes: None,
            failure: None,
        }
    }

    /// Original kept after a completed search, with the search's figures.
    pub(crate) fn kept_after_search(result: &SearchResult, source_size: usize) -> Self {
        Self {
            quality: Some(result.candidate.quality),
            similarity: Some(result.candidate.similarity),
            met_target: result.met_target,
            attempts: result.attempts,
            subsampling: result.subsampling,
            ..Self::kept(KeepReason::NoSavings, source_size)
        }
    }

    pub(crate) fn unreachable(
        quality: u8,
        similarity: f64,
        attempts: u32,
        subsampling: Option<Subsampling>,
        source_size: usize,
        message: String,
    ) -> Self {
        Self {
            status: OutcomeStatus::TargetUnreachable,
            quality: Some(quality),
            similarity: Some(similarity),
            met_target: false,
            attempts,
            subsampling,
            source_size,
            bytes: None,
            failure: Some(Failure {
                kind: FailureKind::TargetUnreachable,
                message,
            }),
        }
    }

    pub(crate) fn failed(kind: FailureKind, message: String, attempts: u32, source_size: usize) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            quality: None,
            similarity: None,
            met_target: false,
            attempts,
            subsampling: None,
            source_size,
            bytes: None,
            failure: Some(Failure { kind, message }),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Recompressed | OutcomeStatus::KeptOriginal(_)
        )
    }

    /// The bytes a caller should store: the new stream, the untouched
    /// source, or nothing when the session did not succeed.
    pub fn output_bytes<'a>(&'a self, source: &'a [u8]) -> Option<&'a [u8]> {
        match self.status {
            OutcomeStatus::Recompressed => self.bytes.as_deref(),
            OutcomeStatus::KeptOriginal(_) => Some(source),
            OutcomeStatus::TargetUnreachable | OutcomeStatus::Failed => None,
        }
    }

    pub fn output_size(&self) -> Option<usize> {
        match self.status {
            OutcomeStatus::Recompressed => self.bytes.as_ref().map(Vec::len),
            OutcomeStatus::KeptOriginal(_) => Some(self.source_size),
            _ => None,
        }
    }

    /// Space saved relative to the source, as a percentage.
    pub fn savings_percent(&self) -> Option<f64> {
        let output = self.output_size()?;
        if self.source_size == 0 {
            return None;
        }
        Some((1.0 - output as f64 / self.source_size as f64) * 100.0)
    }

    pub fn report(&self) -> OutcomeReport {
        OutcomeReport {
            status: self.status.as_str(),
            reason: match self.status {
                OutcomeStatus::KeptOriginal(reason) => Some(reason),
                _ => None,
            },
            quality: self.quality,
            similarity: self.similarity,
            met_target: self.met_target,
            attempts: self.attempts,
            subsampling: self.subsampling.map(Subsampling::as_str),
            source_size: self.source_size,
            output_size: self.output_size(),
            sha256: self
                .bytes
                .as_ref()
                .map(|bytes| format!("{:x}", Sha256::digest(bytes))),
            failure: self.failure.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.report())
    }
}

/// Serializable summary of an [`Outcome`], without the image bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<KeepReason>,
    pub quality: Option<u8>,
    pub similarity: Option<f64>,
    pub met_target: bool,
    pub attempts: u32,
    pub subsampling: Option<&'static str>,
    pub source_size: usize,
    pub output_size: Option<usize>,
    /// SHA-256 of the recompressed stream, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}
