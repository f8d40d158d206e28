//! End-to-end recompression tests with the pure Rust codec.
//!
//! Every source is synthesized in memory with `jpeg-encoder`, so the suite
//! needs no fixture files. File-based sessions run inside a `TempDir`.

use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use jpeg_recompress::codec::markers::{comment_segment, read_header};
use jpeg_recompress::codec::params::{EncodeParams, Subsampling, SubsamplingPolicy};
use jpeg_recompress::config::DEFAULT_COMMENT;
use jpeg_recompress::{
    CancelToken, CompareError, FailureKind, JpegCodec, KeepReason, OutcomeStatus, QualityPreset,
    RecompressConfig, Recompressor, RustCodec, SearchEvent, SessionContext, SimilarityError, ssim,
};
use std::fs;
use std::sync::mpsc;
use tempfile::TempDir;

// ===========================================================================
// Source builders
// ===========================================================================

fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    (0..width * height).flat_map(|_| color).collect()
}

fn gradient_rgb(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| {
            let (x, y) = (i % width, i / width);
            [
                (x * 255 / width) as u8,
                (y * 255 / height) as u8,
                ((x + y) * 127 / (width + height)) as u8 + 64,
            ]
        })
        .collect()
}

fn noisy_rgb(width: u32, height: u32, seed: u32) -> Vec<u8> {
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

fn encode_jpeg(rgb: &[u8], width: u32, height: u32, quality: u8, subsampling: Subsampling) -> Vec<u8> {
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

fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Insert segments right after SOI, in the given order.
fn with_segments(jpeg: &[u8], segments: &[Vec<u8>]) -> Vec<u8> {
    let mut out = jpeg[..2].to_vec();
    for s in segments {
        out.extend_from_slice(s);
    }
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Smooth 128×128 photo-like source at quality 100 with EXIF and a comment.
fn gradient_source_with_metadata() -> Vec<u8> {
    let jpeg = encode_jpeg(&gradient_rgb(128, 128), 128, 128, 100, Subsampling::S420);
    with_segments(
        &jpeg,
        &[
            segment(0xE1, b"Exif\0\0II*\0fake-exif-body"),
            segment(0xFE, b"shot on film"),
        ],
    )
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[test]
fn solid_colour_converges_near_min_quality() {
    let jpeg = encode_jpeg(&solid_rgb(64, 64, [90, 160, 200]), 64, 64, 100, Subsampling::S444);
    let source = with_segments(&jpeg, &[segment(0xE1, &[0u8; 4000])]);
    let mut config = RecompressConfig::with_preset(QualityPreset::Medium);
    config.output.strip_metadata = true;

    let outcome = Recompressor::new(config).recompress(&source);

    assert_eq!(outcome.status, OutcomeStatus::Recompressed);
    assert!(outcome.met_target);
    let quality = outcome.quality.unwrap();
    assert!((40..=60).contains(&quality), "quality {quality}");
    assert!(outcome.similarity.unwrap() >= QualityPreset::Medium.threshold());
    assert_eq!(outcome.subsampling, Some(Subsampling::S444));
    assert!(outcome.bytes.as_ref().unwrap().len() < source.len());
}

#[test]
fn already_small_source_keeps_original_after_probe() {
    let source = encode_jpeg(&noisy_rgb(64, 64, 11), 64, 64, 40, Subsampling::S420);
    let mut events = Vec::new();
    let (tx, rx) = mpsc::channel();
    let ctx = SessionContext {
        cancel: None,
        events: Some(tx),
    };

    let outcome = Recompressor::default().recompress_with(&source, &ctx);
    drop(ctx);
    events.extend(rx.iter());

    assert_eq!(
        outcome.status,
        OutcomeStatus::KeptOriginal(KeepReason::ProbeNotSmaller)
    );
    assert!(outcome.bytes.is_none());
    assert_eq!(outcome.output_bytes(&source), Some(&source[..]));
    // Only the probe was encoded.
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], SearchEvent::Probe { quality: 95, .. }));
}

#[test]
fn corrupt_source_fails_without_output() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("broken.jpg");
    let output = tmp.path().join("out.jpg");
    let jpeg = encode_jpeg(&gradient_rgb(32, 32), 32, 32, 90, Subsampling::S420);
    fs::write(&input, &jpeg[..40]).unwrap();

    let recompressor = Recompressor::new(RecompressConfig::with_preset(QualityPreset::VeryHigh));
    let outcome = recompressor.recompress_file(&input, &output);

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.failure.as_ref().unwrap().kind, FailureKind::Decode);
    assert!(!output.exists());
}

#[test]
fn non_jpeg_input_fails_with_decode_error() {
    let outcome = Recompressor::default().recompress(b"GIF89a not a jpeg at all");
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.failure.unwrap().kind, FailureKind::Decode);
}

#[test]
fn attempt_cap_falls_back_to_best_candidate() {
    let source = encode_jpeg(&noisy_rgb(64, 64, 5), 64, 64, 100, Subsampling::S444);
    let mut config = RecompressConfig::with_preset(QualityPreset::VeryHigh);
    config.search.max_attempts = 3;

    let outcome = Recompressor::new(config).recompress(&source);

    assert_eq!(outcome.status, OutcomeStatus::Recompressed);
    assert!(!outcome.met_target);
    assert_eq!(outcome.attempts, 3);
    let quality = outcome.quality.unwrap();
    assert_ne!(quality, 95);
    assert!([67, 81, 88].contains(&quality), "quality {quality}");
    assert!(outcome.similarity.unwrap() < QualityPreset::VeryHigh.threshold());
}

#[test]
fn strict_mode_reports_unreachable_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("noise.jpg");
    let output = tmp.path().join("out.jpg");
    fs::write(
        &input,
        encode_jpeg(&noisy_rgb(64, 64, 9), 64, 64, 100, Subsampling::S444),
    )
    .unwrap();

    let mut config = RecompressConfig::with_preset(QualityPreset::VeryHigh);
    config.strict = true;
    config.search.max_attempts = 3;
    let outcome = Recompressor::new(config).recompress_file(&input, &output);

    assert_eq!(outcome.status, OutcomeStatus::TargetUnreachable);
    assert!(outcome.quality.is_some());
    assert_eq!(
        outcome.failure.unwrap().kind,
        FailureKind::TargetUnreachable
    );
    assert!(!output.exists());
}

#[test]
fn tiny_and_thin_images_are_recompressed() {
    for (width, height, subsampling) in [
        (1, 1, Subsampling::S444),
        (4, 4, Subsampling::S444),
        (400, 6, Subsampling::S420),
    ] {
        let jpeg = encode_jpeg(&gradient_rgb(width, height), width, height, 100, subsampling);
        let source = with_segments(&jpeg, &[segment(0xE1, &[0u8; 3000])]);
        let mut config = RecompressConfig::default();
        config.output.strip_metadata = true;

        let outcome = Recompressor::new(config).recompress(&source);

        assert_eq!(
            outcome.status,
            OutcomeStatus::Recompressed,
            "{width}x{height}: {:?}",
            outcome.failure
        );
        let bytes = outcome.bytes.unwrap();
        let frame = read_header(&bytes).unwrap().frame;
        assert_eq!((frame.width, frame.height), (width as u16, height as u16));
    }
}

// ===========================================================================
// Output assembly
// ===========================================================================

#[test]
fn metadata_is_preserved_behind_the_tag() {
    let source = gradient_source_with_metadata();
    let outcome = Recompressor::default().recompress(&source);
    assert_eq!(outcome.status, OutcomeStatus::Recompressed);

    let bytes = outcome.bytes.unwrap();
    let header = read_header(&bytes).unwrap();
    let markers: Vec<u8> = header.segments.iter().map(|s| s.marker).collect();
    assert_eq!(&markers[..4], &[0xE0, 0xFE, 0xE1, 0xFE]);
    assert!(header.has_comment(&bytes, DEFAULT_COMMENT));
    assert_eq!(
        header.segments[2].payload(&bytes),
        b"Exif\0\0II*\0fake-exif-body"
    );
    assert_eq!(header.segments[3].payload(&bytes), b"shot on film");
}

#[test]
fn strip_metadata_keeps_only_the_tag() {
    let source = gradient_source_with_metadata();
    let mut config = RecompressConfig::default();
    config.output.strip_metadata = true;
    let outcome = Recompressor::new(config).recompress(&source);

    let bytes = outcome.bytes.unwrap();
    let header = read_header(&bytes).unwrap();
    let metadata: Vec<u8> = header.metadata_segments().map(|s| s.marker).collect();
    assert_eq!(metadata, vec![0xFE]);
    assert!(header.has_comment(&bytes, DEFAULT_COMMENT));
}

#[test]
fn untagged_output_when_tagging_disabled() {
    let source = gradient_source_with_metadata();
    let mut config = RecompressConfig::default();
    config.output.tag_output = false;
    config.output.strip_metadata = true;
    let outcome = Recompressor::new(config).recompress(&source);

    let bytes = outcome.bytes.unwrap();
    let header = read_header(&bytes).unwrap();
    assert_eq!(header.metadata_segments().count(), 0);
}

#[test]
fn recompressing_output_again_is_a_no_op() {
    let recompressor = Recompressor::default();
    let first = recompressor.recompress(&gradient_source_with_metadata());
    let bytes = first.bytes.unwrap();

    let second = recompressor.recompress(&bytes);
    assert_eq!(
        second.status,
        OutcomeStatus::KeptOriginal(KeepReason::AlreadyProcessed)
    );
    assert_eq!(second.output_bytes(&bytes), Some(&bytes[..]));
}

#[test]
fn previous_tag_is_not_duplicated_when_reprocessing() {
    let mut config = RecompressConfig::default();
    config.output.skip_processed = false;
    let recompressor = Recompressor::new(config);
    let tagged = with_segments(
        &encode_jpeg(&gradient_rgb(128, 128), 128, 128, 100, Subsampling::S420),
        &[comment_segment(DEFAULT_COMMENT)],
    );

    let outcome = recompressor.recompress(&tagged);
    let bytes = outcome.bytes.unwrap();
    let header = read_header(&bytes).unwrap();
    let tags = header
        .segments
        .iter()
        .filter(|s| s.marker == 0xFE && s.payload(&bytes) == DEFAULT_COMMENT.as_bytes())
        .count();
    assert_eq!(tags, 1);
}

#[test]
fn output_is_progressive_with_chosen_layout() {
    let mut config = RecompressConfig::default();
    config.codec.subsampling = SubsamplingPolicy::Fixed(Subsampling::S422);
    let outcome = Recompressor::new(config).recompress(&gradient_source_with_metadata());

    assert_eq!(outcome.subsampling, Some(Subsampling::S422));
    let bytes = outcome.bytes.unwrap();
    let frame = read_header(&bytes).unwrap().frame;
    assert_eq!(frame.subsampling(), Some(Subsampling::S422));
    assert_eq!(
        frame.process,
        jpeg_recompress::codec::markers::CodingProcess::Progressive
    );
}

#[test]
fn grayscale_source_has_no_subsampling() {
    let plane: Vec<u8> = (0..96 * 96).map(|i| ((i % 96) * 2 + (i / 96)) as u8).collect();
    let mut buf = Vec::new();
    Encoder::new(&mut buf, 100)
        .encode(&plane, 96, 96, ColorType::Luma)
        .unwrap();

    let outcome = Recompressor::default().recompress(&buf);
    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(outcome.subsampling, None);
    if let Some(bytes) = &outcome.bytes {
        assert_eq!(read_header(bytes).unwrap().frame.components.len(), 1);
    }
}

// ===========================================================================
// Properties
// ===========================================================================

#[test]
fn quality_stays_within_configured_bounds() {
    let source = gradient_source_with_metadata();
    for preset in QualityPreset::ALL {
        let mut config = RecompressConfig::with_preset(preset);
        config.search.min_quality = 55;
        config.search.max_quality = 85;
        let outcome = Recompressor::new(config).recompress(&source);
        if let Some(quality) = outcome.quality {
            assert!((55..=85).contains(&quality), "{preset}: {quality}");
        }
    }
}

#[test]
fn similarity_rises_with_quality() {
    let codec = RustCodec::new();
    let source = codec
        .decode(&encode_jpeg(&gradient_rgb(96, 96), 96, 96, 100, Subsampling::S420))
        .unwrap();
    let metric = RecompressConfig::default().metric;
    let score = |quality: u8| {
        let params = EncodeParams {
            quality,
            subsampling: Subsampling::S420,
            progressive: true,
            optimize_huffman: true,
        };
        let candidate = codec.decode(&codec.encode(&source, &params).unwrap()).unwrap();
        ssim(candidate.luma(), source.luma(), &metric).unwrap()
    };
    let (low, mid, high) = (score(20), score(60), score(98));
    assert!(low <= mid && mid <= high, "{low} {mid} {high}");
}

#[test]
fn concurrent_sessions_produce_identical_bytes() {
    let source = gradient_source_with_metadata();
    let recompressor = Recompressor::default();
    let reference = recompressor.recompress(&source);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| recompressor.recompress(&source)))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), reference);
        }
    });
}

#[test]
fn parallel_metric_matches_sequential() {
    let source = gradient_source_with_metadata();
    let mut sequential = RecompressConfig::default();
    sequential.metric.parallel = false;

    let a = Recompressor::default().recompress(&source);
    let b = Recompressor::new(sequential).recompress(&source);
    assert_eq!(a, b);
}

#[test]
fn cancelled_session_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.jpg");
    let output = tmp.path().join("out.jpg");
    fs::write(&input, gradient_source_with_metadata()).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let ctx = SessionContext {
        cancel: Some(token),
        events: None,
    };
    let outcome = Recompressor::default().recompress_file_with(&input, &output, &ctx);

    assert_eq!(outcome.failure.unwrap().kind, FailureKind::Cancelled);
    assert!(!output.exists());
}

// ===========================================================================
// Files and comparison
// ===========================================================================

#[test]
fn file_session_writes_recompressed_bytes() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.jpg");
    let output = tmp.path().join("out.jpg");
    let source = gradient_source_with_metadata();
    fs::write(&input, &source).unwrap();

    let outcome = Recompressor::default().recompress_file(&input, &output);

    assert_eq!(outcome.status, OutcomeStatus::Recompressed);
    let written = fs::read(&output).unwrap();
    assert_eq!(Some(written.as_slice()), outcome.bytes.as_deref());
    assert!(written.len() < source.len());
    // The source file is never touched.
    assert_eq!(fs::read(&input).unwrap(), source);

    let report = outcome.report();
    assert_eq!(report.output_size, Some(written.len()));
    assert_eq!(report.sha256.as_ref().map(String::len), Some(64));
}

#[test]
fn file_session_copies_kept_original() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.jpg");
    let output = tmp.path().join("out.jpg");
    let source = encode_jpeg(&noisy_rgb(64, 64, 3), 64, 64, 40, Subsampling::S420);
    fs::write(&input, &source).unwrap();

    let outcome = Recompressor::default().recompress_file(&input, &output);

    assert!(matches!(outcome.status, OutcomeStatus::KeptOriginal(_)));
    assert_eq!(fs::read(&output).unwrap(), source);
}

#[test]
fn missing_input_is_an_io_failure() {
    let tmp = TempDir::new().unwrap();
    let outcome = Recompressor::default()
        .recompress_file(&tmp.path().join("absent.jpg"), &tmp.path().join("out.jpg"));
    assert_eq!(outcome.failure.unwrap().kind, FailureKind::Io);
}

#[test]
fn compare_identical_and_recompressed() {
    let recompressor = Recompressor::default();
    let source = gradient_source_with_metadata();
    assert_eq!(recompressor.compare(&source, &source).unwrap(), 1.0);

    let recompressed = recompressor.recompress(&source).bytes.unwrap();
    let score = recompressor.compare(&source, &recompressed).unwrap();
    assert!(score > 0.9 && score <= 1.0, "{score}");
}

#[test]
fn compare_rejects_different_dimensions() {
    let recompressor = Recompressor::default();
    let a = encode_jpeg(&gradient_rgb(32, 32), 32, 32, 90, Subsampling::S420);
    let b = encode_jpeg(&gradient_rgb(48, 32), 48, 32, 90, Subsampling::S420);
    let err = recompressor.compare(&a, &b).unwrap_err();
    assert!(matches!(
        err,
        CompareError::Similarity(SimilarityError::DimensionMismatch { .. })
    ));
}

#[test]
fn compare_rejects_corrupt_input() {
    let recompressor = Recompressor::default();
    let a = encode_jpeg(&gradient_rgb(32, 32), 32, 32, 90, Subsampling::S420);
    assert!(matches!(
        recompressor.compare(&a, b"junk"),
        Err(CompareError::Decode(_))
    ));
}

#[test]
fn config_file_drives_the_session() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("recompress.toml");
    fs::write(
        &path,
        r#"
preset = "low"

[search]
min_quality = 60
max_quality = 80

[output]
strip_metadata = true
"#,
    )
    .unwrap();

    let recompressor = Recompressor::from_config_file(&path).unwrap();
    assert_eq!(recompressor.config().preset, QualityPreset::Low);
    let outcome = recompressor.recompress(&gradient_source_with_metadata());
    if let Some(quality) = outcome.quality {
        assert!((60..=80).contains(&quality));
    }
}
