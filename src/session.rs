//! Recompression session: the top-level operation.
//!
//! ```text
//! header      walk markers, reject unsupported streams early
//! skip        source carries the tag comment -> keep original
//! decode      once; failure ends the session, nothing is written
//! search      size probe (counting carried segments), then binary search
//! assemble    tag comment + preserved metadata spliced after SOI/APP0
//! size check  output not smaller than the source -> keep original
//! ```
//!
//! A [`Recompressor`] owns its codec and configuration and holds no mutable
//! state, so one instance can serve sessions on any number of threads.

use crate::codec::markers::{JpegHeader, comment_segment, read_header, splice_segments};
use crate::codec::{DecodeError, EncodeError, JpegCodec, RustCodec};
use crate::config::{ConfigError, RecompressConfig, load_config};
use crate::outcome::{FailureKind, KeepReason, Outcome};
use crate::search::{
    CancelToken, SearchController, SearchError, SearchEvent, SearchOutcome, choose_subsampling,
};
use crate::similarity::{SimilarityError, ssim};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RecompressError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecompressError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RecompressError::Decode(_) => FailureKind::Decode,
            RecompressError::Encode(_) => FailureKind::Encode,
            RecompressError::Search(SearchError::Metric(_)) => FailureKind::Metric,
            RecompressError::Search(SearchError::EncodeFailure { .. }) => FailureKind::Encode,
            RecompressError::Search(SearchError::ThresholdUnreachable { .. }) => {
                FailureKind::TargetUnreachable
            }
            RecompressError::Search(SearchError::Cancelled { .. }) => FailureKind::Cancelled,
            RecompressError::Config(_) => FailureKind::Config,
            RecompressError::Io(_) => FailureKind::Io,
        }
    }

    fn attempts(&self) -> u32 {
        match self {
            RecompressError::Search(SearchError::Cancelled { attempts })
            | RecompressError::Search(SearchError::EncodeFailure { attempts, .. }) => *attempts,
            _ => 0,
        }
    }
}

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

/// Per-session hooks: cooperative cancellation and progress events.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub cancel: Option<CancelToken>,
    pub events: Option<Sender<SearchEvent>>,
}

/// Recompresses JPEG streams with one codec and one configuration.
pub struct Recompressor<C: JpegCodec = RustCodec> {
    codec: C,
    config: RecompressConfig,
}

impl Recompressor<RustCodec> {
    /// Recompressor with the pure Rust codec, its ceiling taken from `config`.
    pub fn new(config: RecompressConfig) -> Self {
        let codec = RustCodec::from_config(&config.codec);
        Self { codec, config }
    }

    /// Load a TOML config (layered over the defaults) and build from it.
    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::new(load_config(path)?))
    }
}

impl Default for Recompressor<RustCodec> {
    fn default() -> Self {
        Self::new(RecompressConfig::default())
    }
}

impl<C: JpegCodec> Recompressor<C> {
    pub fn with_codec(codec: C, config: RecompressConfig) -> Self {
        Self { codec, config }
    }

    pub fn config(&self) -> &RecompressConfig {
        &self.config
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn recompress(&self, source: &[u8]) -> Outcome {
        self.recompress_with(source, &SessionContext::default())
    }

    /// Run one session over an in-memory stream. Never fails: every error
    /// ends up in the returned [`Outcome`].
    pub fn recompress_with(&self, source: &[u8], ctx: &SessionContext) -> Outcome {
        let source_size = source.len();
        let outcome = match self.run(source, ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(kind = ?e.kind(), error = %e, "recompression failed");
                Outcome::failed(e.kind(), e.to_string(), e.attempts(), source_size)
            }
        };
        info!(
            status = %outcome.status,
            quality = ?outcome.quality,
            similarity = ?outcome.similarity,
            attempts = outcome.attempts,
            source_size,
            output_size = ?outcome.output_size(),
            "recompression finished"
        );
        outcome
    }

    pub fn recompress_file(&self, input: &Path, output: &Path) -> Outcome {
        self.recompress_file_with(input, output, &SessionContext::default())
    }

    /// Read `input`, recompress it and write the result to `output`.
    ///
    /// Recompressed bytes or, when the original is kept, a copy of the
    /// source are written. Failures write nothing; a write that fails
    /// halfway removes the partial file.
    pub fn recompress_file_with(&self, input: &Path, output: &Path, ctx: &SessionContext) -> Outcome {
        let source = match fs::read(input) {
            Ok(source) => source,
            Err(e) => {
                warn!(path = %input.display(), error = %e, "cannot read source");
                let e = RecompressError::Io(e);
                return Outcome::failed(e.kind(), e.to_string(), 0, 0);
            }
        };

        let outcome = self.recompress_with(&source, ctx);
        let Some(bytes) = outcome.output_bytes(&source) else {
            return outcome;
        };
        match write_output(output, bytes) {
            Ok(()) => {
                debug!(path = %output.display(), size = bytes.len(), "wrote output");
                outcome
            }
            Err(e) => {
                warn!(path = %output.display(), error = %e, "cannot write output");
                let e = RecompressError::Io(e);
                Outcome::failed(e.kind(), e.to_string(), outcome.attempts, source.len())
            }
        }
    }

    /// SSIM between two JPEG streams, compared on luma.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Result<f64, CompareError> {
        let first = self.codec.decode(a)?;
        let second = self.codec.decode(b)?;
        Ok(ssim(first.luma(), second.luma(), &self.config.metric)?)
    }

    fn run(&self, source: &[u8], ctx: &SessionContext) -> Result<Outcome, RecompressError> {
        self.config.validate()?;
        let source_size = source.len();
        let output = &self.config.output;

        let header = read_header(source)?;
        if output.skip_processed && header.has_comment(source, &output.comment) {
            debug!("source already carries the recompression tag");
            return Ok(Outcome::kept(KeepReason::AlreadyProcessed, source_size));
        }

        let image = self.codec.decode(source)?;
        debug!(
            width = image.width(),
            height = image.height(),
            subsampling = ?image.subsampling(),
            "decoded source"
        );

        let insert = self.carried_segments(source, &header);
        let controller = SearchController::new(&self.codec, &self.config)
            .with_cancel(ctx.cancel.clone())
            .with_events(ctx.events.clone())
            .with_overhead(insert.len());
        let result = match controller.run(&image, source_size) {
            Ok(SearchOutcome::Converged(result)) => result,
            Ok(SearchOutcome::ProbeNotSmaller { .. }) => {
                return Ok(Outcome::kept(KeepReason::ProbeNotSmaller, source_size));
            }
            Err(e) => {
                if let SearchError::ThresholdUnreachable {
                    best_quality,
                    best_similarity,
                    attempts,
                    ..
                } = &e
                {
                    return Ok(Outcome::unreachable(
                        *best_quality,
                        *best_similarity,
                        *attempts,
                        choose_subsampling(&image, &self.config.codec),
                        source_size,
                        e.to_string(),
                    ));
                }
                return Err(e.into());
            }
        };

        let bytes = assemble(&result.candidate.bytes, &insert)?;
        if bytes.len() >= source_size {
            debug!(
                output_size = bytes.len(),
                source_size, "output not smaller than source"
            );
            return Ok(Outcome::kept_after_search(&result, source_size));
        }
        Ok(Outcome::recompressed(result, bytes, source_size))
    }

    /// Tag comment and preserved source metadata, in output order.
    fn carried_segments(&self, source: &[u8], header: &JpegHeader) -> Vec<u8> {
        let output = &self.config.output;
        let mut insert = Vec::new();
        if output.tag_output {
            insert.extend(comment_segment(&output.comment));
        }
        if !output.strip_metadata {
            insert.extend(header.metadata_bytes(source, &output.comment));
        }
        insert
    }
}

/// Splice `insert` into the winning candidate right after SOI/APP0.
fn assemble(encoded: &[u8], insert: &[u8]) -> Result<Vec<u8>, RecompressError> {
    if insert.is_empty() {
        return Ok(encoded.to_vec());
    }
    Ok(splice_segments(encoded, insert)?)
}

/// Write `bytes` to `path`, removing the file again if the write fails.
fn write_output(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    if written.is_err() {
        drop(file);
        let _ = fs::remove_file(path);
    }
    written
}
