//! Log dump layouts
//!
//! This module holds the wire constants shared by every layout, the format
//! detector that classifies a dump and the section locator that finds its
//! metadata.

pub mod detect;
pub mod sections;

pub use detect::{detect_layout, filename_vin, sniff_category};
pub use sections::{locate_sections, SectionMap};

/// First byte of every entry frame
pub const FRAME_MARKER: u8 = 0xB2;

/// Marker, length, type code and 4-byte timestamp
pub const FRAME_HEADER_LEN: usize = 7;

/// Size of a 2024 ring-buffer dump, and of its ring
pub const RING_BUFFER_SIZE: usize = 0x40000;

/// Size of a 2025+ compressed telemetry dump
pub const COMPRESSED_TELEMETRY_SIZE: usize = 131_200;

/// Bytes between a log section magic and its first entry in legacy dumps
pub const LEGACY_SECTION_HEADER_LEN: usize = 0x10;

/// Offset of the first occurrence of `needle` in `haystack`
pub(crate) fn find_sequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(haystack, needle)
}

/// Offset of the last occurrence of `needle` in `haystack`
pub(crate) fn rfind_sequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::rfind(haystack, needle)
}
