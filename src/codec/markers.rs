//! Minimal JPEG marker walker.
//!
//! Reads the segments in front of the first scan and extracts what the
//! recompression session needs without decoding any pixels:
//!
//! - the frame header (coding process, dimensions, per-component sampling
//!   factors), checked against the decode ceiling before the real decode;
//! - metadata segments (APP1–APP13, APP15, COM) to carry into the output;
//! - the recompression tag comment that marks already-processed files.
//!
//! It can also build a COM segment and splice segments into a freshly
//! encoded stream right after its SOI/APP0 prefix.

use super::params::Subsampling;
use super::{DecodeError, EncodeError};
use std::ops::Range;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP14: u8 = 0xEE;
const APP15: u8 = 0xEF;
const COM: u8 = 0xFE;
const TEM: u8 = 0x01;

/// Entropy coding process declared by the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingProcess {
    Baseline,
    ExtendedSequential,
    Progressive,
}

/// One component entry of the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    pub id: u8,
    pub horizontal: u8,
    pub vertical: u8,
}

/// Parsed SOF0/SOF1/SOF2 segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub process: CodingProcess,
    pub width: u16,
    pub height: u16,
    pub components: Vec<ComponentInfo>,
}

impl FrameInfo {
    pub fn subsampling(&self) -> Option<Subsampling> {
        let factors: Vec<(u8, u8)> = self
            .components
            .iter()
            .map(|c| (c.horizontal, c.vertical))
            .collect();
        Subsampling::from_sampling_factors(&factors)
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A marker segment before the first scan, as a byte range of the stream
/// (including the `0xFF` marker prefix and length field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub marker: u8,
    pub range: Range<usize>,
}

impl Segment {
    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.range.clone()]
    }

    /// Segment payload, after the marker and the two length bytes.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.range.start + 4..self.range.end]
    }

    /// APP1–APP13, APP15 and COM. APP0 (JFIF) and APP14 (Adobe colour
    /// transform) describe the encoding itself and belong to the encoder.
    pub fn is_metadata(&self) -> bool {
        match self.marker {
            APP0 | APP14 => false,
            m => (APP0..=APP15).contains(&m) || m == COM,
        }
    }
}

/// Everything in front of the first SOS marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegHeader {
    pub frame: FrameInfo,
    /// Non-frame segments in stream order.
    pub segments: Vec<Segment>,
}

impl JpegHeader {
    pub fn metadata_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_metadata())
    }

    /// True when any COM segment starts with `text`.
    pub fn has_comment(&self, data: &[u8], text: &str) -> bool {
        self.segments
            .iter()
            .filter(|s| s.marker == COM)
            .any(|s| s.payload(data).starts_with(text.as_bytes()))
    }

    /// Concatenated metadata segments, leaving out COM segments that carry
    /// `skip_comment` so a re-tagged output never holds two tags.
    pub fn metadata_bytes(&self, data: &[u8], skip_comment: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for segment in self.metadata_segments() {
            if segment.marker == COM && segment.payload(data).starts_with(skip_comment.as_bytes()) {
                continue;
            }
            out.extend_from_slice(segment.bytes(data));
        }
        out
    }
}

/// Walk the marker segments up to the first scan.
///
/// Fails with `UnsupportedFormat` when the stream does not start with SOI
/// or declares a process the codec cannot handle (lossless, hierarchical,
/// arithmetic coding, 12-bit precision), and with `CorruptData` when a
/// segment is truncated or the stream reaches scan data without a frame.
pub fn read_header(data: &[u8]) -> Result<JpegHeader, DecodeError> {
    if data.len() < 2 || data[0] != 0xFF || data[1] != SOI {
        return Err(DecodeError::UnsupportedFormat(
            "missing JPEG start-of-image marker".into(),
        ));
    }

    let mut frame = None;
    let mut segments = Vec::new();
    let mut pos = 2;

    loop {
        if pos >= data.len() {
            return Err(truncated(pos));
        }
        if data[pos] != 0xFF {
            return Err(DecodeError::CorruptData(format!(
                "expected marker at offset {pos}, found 0x{:02X}",
                data[pos]
            )));
        }

        // Any number of 0xFF fill bytes may precede a marker code
        let mut code_pos = pos + 1;
        while code_pos < data.len() && data[code_pos] == 0xFF {
            code_pos += 1;
        }
        if code_pos >= data.len() {
            return Err(truncated(code_pos));
        }
        let marker = data[code_pos];
        let start = code_pos - 1;

        match marker {
            SOI => {
                return Err(DecodeError::CorruptData(format!(
                    "unexpected start-of-image marker at offset {start}"
                )));
            }
            EOI => {
                return Err(DecodeError::CorruptData(
                    "end of image before any scan data".into(),
                ));
            }
            // Markers without a length field
            TEM | 0xD0..=0xD7 => {
                pos = code_pos + 1;
                continue;
            }
            _ => {}
        }

        if code_pos + 3 > data.len() {
            return Err(truncated(code_pos));
        }
        let len = u16::from_be_bytes([data[code_pos + 1], data[code_pos + 2]]) as usize;
        if len < 2 {
            return Err(DecodeError::CorruptData(format!(
                "invalid segment length {len} for marker 0x{marker:02X}"
            )));
        }
        let end = code_pos + 1 + len;
        if end > data.len() {
            return Err(truncated(data.len()));
        }
        let payload = &data[code_pos + 3..end];

        match marker {
            SOS => break,
            0xC0..=0xC2 => {
                if frame.is_some() {
                    return Err(DecodeError::CorruptData("multiple frame headers".into()));
                }
                frame = Some(parse_frame(marker, payload)?);
            }
            0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                return Err(DecodeError::UnsupportedFormat(format!(
                    "unsupported JPEG process (SOF marker 0x{marker:02X}): lossless, hierarchical and arithmetic-coded streams are not handled"
                )));
            }
            _ => segments.push(Segment {
                marker,
                range: start..end,
            }),
        }

        pos = end;
    }

    let frame = frame.ok_or_else(|| {
        DecodeError::CorruptData("scan data starts before any frame header".into())
    })?;
    Ok(JpegHeader { frame, segments })
}

fn truncated(offset: usize) -> DecodeError {
    DecodeError::CorruptData(format!("stream truncated at offset {offset} before scan data"))
}

/// Parse a SOF payload: precision, height, width, component count, then
/// three bytes (id, h/v sampling nibbles, quant table) per component.
fn parse_frame(marker: u8, payload: &[u8]) -> Result<FrameInfo, DecodeError> {
    if payload.len() < 6 {
        return Err(DecodeError::CorruptData("frame header too short".into()));
    }
    let precision = payload[0];
    let height = u16::from_be_bytes([payload[1], payload[2]]);
    let width = u16::from_be_bytes([payload[3], payload[4]]);
    let count = payload[5] as usize;

    if precision != 8 {
        return Err(DecodeError::UnsupportedFormat(format!(
            "{precision}-bit sample precision"
        )));
    }
    if !matches!(count, 1 | 3 | 4) {
        return Err(DecodeError::UnsupportedFormat(format!(
            "{count} colour components"
        )));
    }
    if payload.len() < 6 + count * 3 {
        return Err(DecodeError::CorruptData(
            "frame header shorter than its component table".into(),
        ));
    }
    if width == 0 {
        return Err(DecodeError::CorruptData("frame width is zero".into()));
    }
    if height == 0 {
        return Err(DecodeError::UnsupportedFormat(
            "image height defined by a DNL marker".into(),
        ));
    }

    let components = payload[6..6 + count * 3]
        .chunks_exact(3)
        .map(|c| ComponentInfo {
            id: c[0],
            horizontal: c[1] >> 4,
            vertical: c[1] & 0x0F,
        })
        .collect();

    let process = match marker {
        0xC0 => CodingProcess::Baseline,
        0xC1 => CodingProcess::ExtendedSequential,
        _ => CodingProcess::Progressive,
    };

    Ok(FrameInfo {
        process,
        width,
        height,
        components,
    })
}

/// Build a COM segment carrying `text`.
///
/// Callers keep `text` under 65 534 bytes (enforced by config validation);
/// longer text is truncated to fit the 16-bit segment length.
pub fn comment_segment(text: &str) -> Vec<u8> {
    let body = &text.as_bytes()[..text.len().min(u16::MAX as usize - 2)];
    let len = (body.len() + 2) as u16;
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&[0xFF, COM]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Insert pre-built segments into an encoded stream, right after SOI and
/// the encoder's APP0 (JFIF) segment when it has one.
pub fn splice_segments(encoded: &[u8], insert: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if encoded.len() < 2 || encoded[0] != 0xFF || encoded[1] != SOI {
        return Err(EncodeError::EncodeFailure(
            "encoder output does not start with a start-of-image marker".into(),
        ));
    }

    let mut at = 2;
    if encoded.len() >= 6 && encoded[2] == 0xFF && encoded[3] == APP0 {
        let len = u16::from_be_bytes([encoded[4], encoded[5]]) as usize;
        if 4 + len > encoded.len() {
            return Err(EncodeError::EncodeFailure(
                "encoder output has a truncated APP0 segment".into(),
            ));
        }
        at = 4 + len;
    }

    let mut out = Vec::with_capacity(encoded.len() + insert.len());
    out.extend_from_slice(&encoded[..at]);
    out.extend_from_slice(insert);
    out.extend_from_slice(&encoded[at..]);
    Ok(out)
}
