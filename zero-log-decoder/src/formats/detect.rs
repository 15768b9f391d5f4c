//! Layout detection
//!
//! All layout-distinguishing rules live in one ordered table. Downstream code
//! receives a [`LayoutKind`] and never re-derives the layout from raw bytes.

use super::sections::has_revision2_vin;
use super::{find_sequence, COMPRESSED_TELEMETRY_SIZE, FRAME_MARKER, RING_BUFFER_SIZE};
use crate::types::{DecoderError, LayoutKind, LogCategory, Result, SectionKind};
use std::path::Path;

/// Bytes of the buffer quoted in an `UnrecognizedFormat` error
const DIAGNOSTIC_HEAD_LEN: usize = 16;

/// Length of a vehicle identification number
pub(crate) const VIN_LEN: usize = 17;

/// Every Zero VIN starts with this manufacturer prefix
pub(crate) const VIN_PREFIX: &str = "538";

/// A single detection heuristic
struct DetectionRule {
    description: &'static str,
    matches: fn(&[u8]) -> bool,
    layout: LayoutKind,
}

/// Detection rules in priority order; the first match wins
const DETECTION_RULES: [DetectionRule; 5] = [
    DetectionRule {
        description: "ring buffer dump size",
        matches: is_ring_buffer_size,
        layout: LayoutKind::RingBuffer2024,
    },
    DetectionRule {
        description: "compressed telemetry dump size",
        matches: is_compressed_telemetry_size,
        layout: LayoutKind::CompressedTelemetry2025,
    },
    DetectionRule {
        description: "entry marker at offset 0",
        matches: starts_with_frame_marker,
        layout: LayoutKind::RingBuffer2024,
    },
    DetectionRule {
        description: "section magic present",
        matches: has_section_magic,
        layout: LayoutKind::Legacy,
    },
    DetectionRule {
        description: "revision 2 header VIN",
        matches: has_revision2_vin,
        layout: LayoutKind::Legacy,
    },
];

fn is_ring_buffer_size(buf: &[u8]) -> bool {
    buf.len() == RING_BUFFER_SIZE
}

fn is_compressed_telemetry_size(buf: &[u8]) -> bool {
    buf.len() == COMPRESSED_TELEMETRY_SIZE
}

fn starts_with_frame_marker(buf: &[u8]) -> bool {
    buf.first() == Some(&FRAME_MARKER)
}

fn has_section_magic(buf: &[u8]) -> bool {
    SectionKind::ALL
        .iter()
        .any(|kind| find_sequence(buf, &kind.magic()).is_some())
}

/// Classify a dump into one of the known layouts
///
/// # Arguments
/// * `buf` - Full content of the log file
///
/// # Returns
/// * `Ok(LayoutKind)` for a recognised layout
/// * `Err(DecoderError::UnrecognizedFormat)` naming the length and first 16 bytes otherwise
pub fn detect_layout(buf: &[u8]) -> Result<LayoutKind> {
    if !buf.is_empty() {
        if let Some(rule) = DETECTION_RULES.iter().find(|rule| (rule.matches)(buf)) {
            log::debug!(
                "Detected {} layout ({}, {} bytes)",
                rule.layout,
                rule.description,
                buf.len()
            );
            return Ok(rule.layout);
        }
    }

    Err(DecoderError::UnrecognizedFormat {
        len: buf.len(),
        head: buf[..buf.len().min(DIAGNOSTIC_HEAD_LEN)].to_vec(),
    })
}

/// Guess which controller wrote a dump
///
/// Legacy dumps carry an `MBB`/`BMS` tag at offset 0 or 0x0D; otherwise the
/// file name is searched for the tag as a token delimited by `_`, `-`, `.` or
/// any other non-alphanumeric character. Returns `None` when neither gives an answer.
pub fn sniff_category(buf: &[u8], file_name: Option<&str>) -> Option<LogCategory> {
    for offset in [0x000, 0x00D] {
        if let Some(category) = buf.get(offset..offset + 3).and_then(category_tag) {
            return Some(category);
        }
    }

    // Exported names carry the tag as its own token, as in `VIN_MBB_2024-01-01.bin`
    let name = Path::new(file_name?).file_name()?.to_str()?.to_ascii_uppercase();
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|token| category_tag(token.as_bytes()))
}

fn category_tag(tag: &[u8]) -> Option<LogCategory> {
    match tag {
        b"MBB" => Some(LogCategory::Mbb),
        b"BMS" => Some(LogCategory::Bms),
        _ => None,
    }
}

/// Extract a VIN embedded in a log file name
///
/// Exported logs are named like `VIN_MBB_2024-01-01.bin`; the VIN is the
/// 17 characters starting at the manufacturer prefix.
pub fn filename_vin(file_name: &str) -> Option<String> {
    let base = Path::new(file_name).file_name()?.to_str()?;
    let start = base.find(VIN_PREFIX)?;
    let candidate = base.get(start..start + VIN_LEN)?;
    candidate
        .chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then(|| candidate.to_string())
}
