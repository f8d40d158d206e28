//! Quality search controller.
//!
//! Finds the lowest encoder quality in `[min_quality, max_quality]` whose
//! decoded candidate still reaches the SSIM target against the source luma.
//!
//! ## Algorithm
//!
//! ```text
//! probe   encode at max_quality; not smaller than the source -> stop, keep original
//! loop    q = midpoint(low, high) snapped to the step grid anchored at low
//!         encode(q) -> decode -> ssim(candidate, source)
//!         ssim >= threshold  -> accepted, high = q - step
//!         ssim <  threshold  -> rejected, low  = q + step
//! until   low > high, or max_attempts reached
//! ```
//!
//! The lowest accepted quality wins (equal qualities prefer the higher
//! similarity). Without any accepted candidate the most similar rejected one
//! is returned with `met_target = false`, or `ThresholdUnreachable` in strict
//! mode. Candidates are encoded with the final encoder settings, so the
//! winning bytes are used as-is.
//!
//! An encode that fails, or candidate bytes that do not decode, count as a
//! rejected attempt and push the search toward higher quality. Metric errors
//! abort the search.

use crate::analysis::{chroma_detail, midpoint_quality};
use crate::codec::params::{EncodeParams, Subsampling, SubsamplingPolicy};
use crate::codec::{ColorMode, JpegCodec, SourceImage};
use crate::config::{CodecConfig, RecompressConfig};
use crate::similarity::{SimilarityError, ssim};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("similarity metric failed: {0}")]
    Metric(#[from] SimilarityError),
    #[error("all {attempts} encode attempts failed, last error: {message}")]
    EncodeFailure { attempts: u32, message: String },
    #[error(
        "no candidate reached SSIM {threshold}: best was quality {best_quality} at {best_similarity:.6}"
    )]
    ThresholdUnreachable {
        threshold: f64,
        best_quality: u8,
        best_similarity: f64,
        attempts: u32,
    },
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Cooperative cancellation flag, checked before each attempt.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One scored encode.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub quality: u8,
    pub bytes: Vec<u8>,
    pub similarity: f64,
}

/// Progress reported while searching.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// Size probe at the top of the quality range.
    Probe {
        quality: u8,
        size: usize,
        source_size: usize,
    },
    /// A candidate was encoded, decoded and compared.
    Scored {
        attempt: u32,
        quality: u8,
        size: usize,
        similarity: f64,
        accepted: bool,
    },
    /// A candidate could not be produced or decoded.
    Rejected {
        attempt: u32,
        quality: u8,
        reason: String,
    },
}

/// Bounds and bookkeeping of a running search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    pub low: i32,
    pub high: i32,
    pub attempts: u32,
    pub failures: u32,
    /// Lowest-quality candidate that met the target.
    pub best: Option<Candidate>,
    /// Most similar candidate that missed the target.
    pub fallback: Option<Candidate>,
}

impl SearchState {
    pub fn new(min_quality: u8, max_quality: u8) -> Self {
        Self {
            low: min_quality as i32,
            high: max_quality as i32,
            attempts: 0,
            failures: 0,
            best: None,
            fallback: None,
        }
    }

    pub fn is_open(&self, max_attempts: u32) -> bool {
        self.low <= self.high && self.attempts < max_attempts
    }

    pub fn next_quality(&self, step: u8) -> u8 {
        midpoint_quality(self.low, self.high, step as i32) as u8
    }

    pub fn accept(&mut self, candidate: Candidate, step: u8) {
        self.high = candidate.quality as i32 - step as i32;
        let better = match &self.best {
            None => true,
            Some(best) => {
                candidate.quality < best.quality
                    || (candidate.quality == best.quality && candidate.similarity > best.similarity)
            }
        };
        if better {
            self.best = Some(candidate);
        }
    }

    pub fn reject(&mut self, candidate: Candidate, step: u8) {
        self.low = candidate.quality as i32 + step as i32;
        let better = match &self.fallback {
            None => true,
            Some(fallback) => {
                candidate.similarity > fallback.similarity
                    || (candidate.similarity == fallback.similarity
                        && candidate.quality < fallback.quality)
            }
        };
        if better {
            self.fallback = Some(candidate);
        }
    }

    /// An attempt that produced no score moves the search up like a rejection.
    pub fn fail(&mut self, quality: u8, step: u8) {
        self.failures += 1;
        self.low = quality as i32 + step as i32;
    }
}

/// Winning candidate of a converged search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub candidate: Candidate,
    /// `false` when this is the fallback of an unreachable target.
    pub met_target: bool,
    pub attempts: u32,
    /// Layout shared by every candidate; `None` for grayscale.
    pub subsampling: Option<Subsampling>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Converged(SearchResult),
    /// Even the top quality does not shrink the file, so nothing was searched.
    ProbeNotSmaller { quality: u8, size: usize },
}

/// Pick the layout every candidate of a session is encoded with.
///
/// Grayscale sources have no chroma and return `None`.
pub fn choose_subsampling(source: &SourceImage, codec: &CodecConfig) -> Option<Subsampling> {
    if source.color() == ColorMode::Grayscale {
        return None;
    }
    let detected = source.subsampling().unwrap_or(Subsampling::S420);
    let chosen = match codec.subsampling {
        SubsamplingPolicy::Fixed(subsampling) => subsampling,
        SubsamplingPolicy::Preserve => detected,
        SubsamplingPolicy::Auto => {
            let detail = chroma_detail(source.pixels(), source.width(), source.height());
            if detail > codec.chroma_detail_threshold {
                debug!(detail, "fine chroma detail, keeping full chroma resolution");
                Subsampling::S444
            } else {
                detected
            }
        }
    };
    Some(chosen)
}

/// Drives encode → decode → compare over one source image.
pub struct SearchController<'a, C: JpegCodec> {
    codec: &'a C,
    config: &'a RecompressConfig,
    cancel: Option<CancelToken>,
    events: Option<Sender<SearchEvent>>,
    /// Bytes the session adds to the winner (tag plus carried metadata).
    overhead: usize,
}

impl<'a, C: JpegCodec> SearchController<'a, C> {
    pub fn new(codec: &'a C, config: &'a RecompressConfig) -> Self {
        Self {
            codec,
            config,
            cancel: None,
            events: None,
            overhead: 0,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<CancelToken>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: Option<Sender<SearchEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Count `overhead` extra bytes against the size probe.
    pub fn with_overhead(mut self, overhead: usize) -> Self {
        self.overhead = overhead;
        self
    }

    fn emit(&self, event: SearchEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }

    fn check_cancel(&self, attempts: u32) -> Result<(), SearchError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(SearchError::Cancelled { attempts }),
            _ => Ok(()),
        }
    }

    /// Search `source`, whose encoded stream is `source_size` bytes long.
    pub fn run(&self, source: &SourceImage, source_size: usize) -> Result<SearchOutcome, SearchError> {
        let search = &self.config.search;
        let policy = self.config.policy();
        let step = policy.step.max(1);
        let subsampling = choose_subsampling(source, &self.config.codec);
        let params = |quality: u8| EncodeParams {
            quality,
            subsampling: subsampling.unwrap_or(Subsampling::S420),
            progressive: self.config.codec.progressive,
            optimize_huffman: self.config.codec.optimize_huffman,
        };

        self.check_cancel(0)?;
        match self.codec.encode(source, &params(search.max_quality)) {
            Ok(probe) => {
                self.emit(SearchEvent::Probe {
                    quality: search.max_quality,
                    size: probe.len(),
                    source_size,
                });
                if probe.len() + self.overhead >= source_size {
                    debug!(
                        quality = search.max_quality,
                        size = probe.len(),
                        overhead = self.overhead,
                        source_size,
                        "size probe not smaller than source"
                    );
                    return Ok(SearchOutcome::ProbeNotSmaller {
                        quality: search.max_quality,
                        size: probe.len(),
                    });
                }
            }
            Err(e) => warn!(quality = search.max_quality, error = %e, "size probe failed"),
        }

        let mut state = SearchState::new(search.min_quality, search.max_quality);
        let mut last_error = String::new();
        while state.is_open(search.max_attempts) {
            self.check_cancel(state.attempts)?;
            let quality = state.next_quality(step);
            state.attempts += 1;
            let attempt = state.attempts;

            let bytes = match self.codec.encode(source, &params(quality)) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(attempt, quality, error = %e, "candidate encode failed");
                    last_error = e.to_string();
                    self.emit(SearchEvent::Rejected {
                        attempt,
                        quality,
                        reason: last_error.clone(),
                    });
                    state.fail(quality, step);
                    continue;
                }
            };
            let decoded = match self.codec.decode(&bytes) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(attempt, quality, error = %e, "candidate does not decode");
                    last_error = e.to_string();
                    self.emit(SearchEvent::Rejected {
                        attempt,
                        quality,
                        reason: last_error.clone(),
                    });
                    state.fail(quality, step);
                    continue;
                }
            };

            let similarity = ssim(decoded.luma(), source.luma(), &self.config.metric)?;
            let accepted = similarity >= policy.threshold;
            debug!(
                attempt,
                quality,
                size = bytes.len(),
                similarity,
                accepted,
                low = state.low,
                high = state.high,
                "scored candidate"
            );
            self.emit(SearchEvent::Scored {
                attempt,
                quality,
                size: bytes.len(),
                similarity,
                accepted,
            });

            let candidate = Candidate {
                quality,
                bytes,
                similarity,
            };
            if accepted {
                state.accept(candidate, step);
            } else {
                state.reject(candidate, step);
            }
        }

        let attempts = state.attempts;
        let (candidate, met_target) = match (state.best, state.fallback) {
            (Some(best), _) => (best, true),
            (None, Some(fallback)) => {
                if self.config.strict {
                    return Err(SearchError::ThresholdUnreachable {
                        threshold: policy.threshold,
                        best_quality: fallback.quality,
                        best_similarity: fallback.similarity,
                        attempts,
                    });
                }
                warn!(
                    threshold = policy.threshold,
                    quality = fallback.quality,
                    similarity = fallback.similarity,
                    "target unreachable, using most similar candidate"
                );
                (fallback, false)
            }
            (None, None) => {
                return Err(SearchError::EncodeFailure {
                    attempts,
                    message: last_error,
                });
            }
        };

        Ok(SearchOutcome::Converged(SearchResult {
            candidate,
            met_target,
            attempts,
            subsampling,
        }))
    }
}
