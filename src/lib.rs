//! # jpeg-recompress
//!
//! Re-encode a JPEG at the lowest quality that still looks like the
//! original. "Looks like" is measured with SSIM on the luma plane; the
//! quality is found by binary search between configurable bounds.
//!
//! ```no_run
//! use jpeg_recompress::{QualityPreset, RecompressConfig, Recompressor};
//! use std::path::Path;
//!
//! let recompressor = Recompressor::new(RecompressConfig::with_preset(QualityPreset::High));
//! let outcome = recompressor.recompress_file(Path::new("in.jpg"), Path::new("out.jpg"));
//! println!("{}", outcome.to_json().unwrap());
//! ```
//!
//! # Architecture: One Session, Four Parts
//!
//! ```text
//! Session ──decode──▶ Codec
//!    │
//!    └──▶ Search ⇄ { Codec (encode candidate), Codec (decode candidate), Similarity }
//!    │
//!    ◀── winning bytes + Outcome
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Top-level operation: decode once, search, assemble output, write files |
//! | [`search`] | Binary search over quality, fallback and strict handling, progress events |
//! | [`similarity`] | Deterministic SSIM over two luma planes |
//! | [`codec`] | `JpegCodec` trait, `RustCodec` (image + jpeg-encoder), JPEG marker walker |
//! | [`preset`] | Named fidelity tiers and the SSIM target / step each maps to |
//! | [`config`] | TOML configuration: defaults, layering, validation |
//! | [`outcome`] | Session result record and its JSON report |
//! | [`output`] | Human-readable progress and outcome lines |
//! | [`analysis`] | Pure pixel math: BT.601 luma, chroma detail, downscaling |
//!
//! # Design Decisions
//!
//! ## Exact, Order-Independent SSIM
//!
//! Window statistics come from integer summed-area tables, so the metric
//! gives the same bits whether rows are scored on one thread or many. A
//! search that makes accept/reject decisions on a threshold like 0.99995
//! must not flip a decision depending on the thread pool.
//!
//! ## Candidates Are Final Encodes
//!
//! Every candidate is encoded with the settings the output will use
//! (progressive, optimized Huffman tables, the session's subsampling), so the
//! winner's bytes are reused directly instead of being encoded twice.
//!
//! ## Never Larger Than the Source
//!
//! A size probe at the top quality skips the search when re-encoding cannot
//! help, and the assembled output is only kept when it is smaller than the
//! source. Otherwise the outcome says "keep original", and file sessions
//! copy the source bytes.
//!
//! ## Metadata Travels, Files Get Tagged
//!
//! EXIF, XMP, ICC, IPTC and comment segments are carried into the output
//! right after the encoder's JFIF header, behind a comment tag. Sources that
//! already carry the tag are not recompressed again.

pub mod analysis;
pub mod codec;
pub mod config;
pub mod outcome;
pub mod output;
pub mod preset;
pub mod search;
pub mod session;
pub mod similarity;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use codec::{DecodeError, EncodeError, JpegCodec, RustCodec, SourceImage};
pub use config::{ConfigError, RecompressConfig};
pub use outcome::{FailureKind, KeepReason, Outcome, OutcomeReport, OutcomeStatus};
pub use preset::QualityPreset;
pub use search::{CancelToken, SearchError, SearchEvent};
pub use session::{CompareError, RecompressError, Recompressor, SessionContext};
pub use similarity::{LumaView, SimilarityError, ssim};
