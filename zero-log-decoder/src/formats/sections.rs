//! Section and header location
//!
//! Finds the magic-marked metadata sections of a dump and recovers whatever
//! header fields the layout carries. Nothing here fails: a field that cannot
//! be read is reported as absent, and a missing section is simply not listed.
//! Whether a missing event log is fatal is the decoder's decision.

use super::detect::{VIN_LEN, VIN_PREFIX};
use super::{find_sequence, rfind_sequence};
use crate::types::{HeaderInfo, LayoutKind, LogCategory, SectionDescriptor, SectionKind};
use byteorder::{ByteOrder, LittleEndian};

/// Bytes occupied by a log section header: magic, end, start, count
const LOG_SECTION_LEN: usize = 0x10;

/// Length of the ASCII date following a date section magic
const SECTION_DATE_LEN: usize = 20;

/// Serial number location relative to the first-run date magic (2024 layout)
const RING_SERIAL_FROM_FIRST_RUN: usize = 0x302;
const RING_SERIAL_LEN: usize = 15;
const RING_SERIAL_MIN_LEN: usize = 8;
/// How far either side of the expected address the serial search reaches
const RING_SERIAL_WINDOW: usize = 0x20;
/// Addresses where older 2024 builds store the serial number
const RING_SERIAL_FALLBACKS: [usize; 3] = [0x3BD10, 0x3BD00, 0x3BD20];

/// Sections found in a dump together with the header fields recovered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionMap {
    pub sections: Vec<SectionDescriptor>,
    pub header: HeaderInfo,
}

impl SectionMap {
    pub fn get(&self, kind: SectionKind) -> Option<&SectionDescriptor> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    pub fn event_log(&self) -> Option<&SectionDescriptor> {
        self.get(SectionKind::EventLog)
    }

    pub fn error_log(&self) -> Option<&SectionDescriptor> {
        self.get(SectionKind::ErrorLog)
    }
}

/// Locate the metadata sections and header fields of a dump
///
/// # Arguments
/// * `buf` - Full content of the log file
/// * `layout` - Layout reported by the format detector
/// * `category` - Controller that wrote the log (selects the legacy header map)
pub fn locate_sections(buf: &[u8], layout: LayoutKind, category: LogCategory) -> SectionMap {
    let (sections, mut header) = match layout {
        LayoutKind::CompressedTelemetry2025 => {
            // No markers: header data arrives later through system information entries
            return SectionMap::default();
        }
        LayoutKind::Legacy => {
            let sections = scan_sections(buf, find_sequence);
            let header = match category {
                LogCategory::Mbb => legacy_mbb_header(buf),
                LogCategory::Bms => legacy_bms_header(buf),
            };
            (sections, header)
        }
        LayoutKind::RingBuffer2024 => {
            let sections = scan_sections(buf, rfind_sequence);
            let header = ring_buffer_header(buf, &sections);
            (sections, header)
        }
    };

    for section in &sections {
        match section.kind {
            SectionKind::BuildDate if header.build_date.is_none() => {
                header.build_date = section.date.clone();
            }
            SectionKind::FirstRunDate if header.first_run_date.is_none() => {
                header.first_run_date = section.date.clone();
            }
            _ => {}
        }
    }

    for section in &sections {
        log::info!(
            "Found {:?} section at 0x{:X} (start {:?}, end {:?}, count {:?})",
            section.kind,
            section.header_offset,
            section.start,
            section.end,
            section.count
        );
    }

    SectionMap { sections, header }
}

/// Find every section magic using the given search strategy
fn scan_sections(buf: &[u8], search: fn(&[u8], &[u8]) -> Option<usize>) -> Vec<SectionDescriptor> {
    SectionKind::ALL
        .iter()
        .filter_map(|&kind| {
            let offset = search(buf, &kind.magic())?;
            read_section(buf, kind, offset)
        })
        .collect()
}

fn read_section(buf: &[u8], kind: SectionKind, offset: usize) -> Option<SectionDescriptor> {
    let mut section = SectionDescriptor {
        kind,
        magic: kind.magic(),
        header_offset: offset,
        start: None,
        end: None,
        count: None,
        date: None,
    };

    if kind.is_log() {
        let Some(header) = buf.get(offset..offset + LOG_SECTION_LEN) else {
            log::warn!("{:?} header at 0x{:X} runs past end of buffer", kind, offset);
            return None;
        };
        section.end = Some(LittleEndian::read_u32(&header[0x4..0x8]));
        section.start = Some(LittleEndian::read_u32(&header[0x8..0xC]));
        section.count = Some(LittleEndian::read_u32(&header[0xC..0x10]));
    } else {
        section.date = read_text(buf, offset + 4, SECTION_DATE_LEN);
    }

    Some(section)
}

/// Read a NUL-terminated printable ASCII field
///
/// Returns `None` when the field lies outside the buffer, is empty, or holds
/// anything other than printable ASCII before the terminator.
pub(crate) fn read_text(buf: &[u8], offset: usize, len: usize) -> Option<String> {
    let raw = buf.get(offset..offset.checked_add(len)?)?;
    let text = raw.split(|&b| b == 0).next().unwrap_or_default();
    if text.is_empty() || !text.iter().all(|&b| b == b' ' || b.is_ascii_graphic()) {
        return None;
    }
    let trimmed = std::str::from_utf8(text).ok()?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn read_u16_text(buf: &[u8], offset: usize) -> Option<String> {
    buf.get(offset..offset + 2)
        .map(|b| LittleEndian::read_u16(b).to_string())
}

/// Whether a string looks like a Zero VIN
pub(crate) fn is_vin(text: &str) -> bool {
    text.len() == VIN_LEN && text.starts_with(VIN_PREFIX)
}

/// How a legacy revision stores a revision number
#[derive(Clone, Copy)]
enum RevField {
    U16(usize),
    Text(usize, usize),
}

impl RevField {
    fn read(self, buf: &[u8]) -> Option<String> {
        match self {
            RevField::U16(offset) => read_u16_text(buf, offset),
            RevField::Text(offset, len) => read_text(buf, offset, len),
        }
    }
}

/// Fixed field addresses of one legacy MBB header revision
struct MbbRevision {
    revision: u8,
    vin: usize,
    /// Revision 2 headers keep the VIN where older ones keep the first-run date
    first_run_date: Option<usize>,
    serial: (usize, usize),
    firmware: RevField,
    board: RevField,
    model: usize,
}

const MBB_REVISIONS: [MbbRevision; 3] = [
    MbbRevision {
        revision: 0,
        vin: 0x240,
        first_run_date: Some(MBB_FIRST_RUN_DATE),
        serial: (0x200, 21),
        firmware: RevField::U16(0x27B),
        board: RevField::U16(0x27D),
        model: 0x27F,
    },
    MbbRevision {
        revision: 1,
        vin: 0x252,
        first_run_date: Some(MBB_FIRST_RUN_DATE),
        serial: (0x210, 13),
        firmware: RevField::U16(0x266),
        board: RevField::U16(0x268),
        model: 0x26B,
    },
    MbbRevision {
        revision: 2,
        vin: 0x029,
        first_run_date: None,
        serial: (0x03C, 13),
        firmware: RevField::Text(0x06B, 7),
        board: RevField::Text(0x05C, 8),
        model: 0x019,
    },
];

const MBB_MODEL_LEN: usize = 3;
const MBB_FIRST_RUN_DATE: usize = 0x2A;

/// Whether a revision 2 MBB header, which has no section magics, is present
pub(crate) fn has_revision2_vin(buf: &[u8]) -> bool {
    MBB_REVISIONS
        .iter()
        .filter(|rev| rev.revision == 2)
        .any(|rev| read_text(buf, rev.vin, VIN_LEN).map_or(false, |vin| is_vin(&vin)))
}

fn legacy_mbb_header(buf: &[u8]) -> HeaderInfo {
    let mut header = HeaderInfo::default();

    // The revision is identified by where a well-formed VIN sits
    let found = MBB_REVISIONS.iter().find_map(|rev| {
        read_text(buf, rev.vin, VIN_LEN)
            .filter(|vin| is_vin(vin))
            .map(|vin| (rev, vin))
    });

    match found {
        Some((rev, vin)) => {
            log::debug!("Legacy MBB header revision {}", rev.revision);
            header.revision = Some(rev.revision);
            header.vin = Some(vin);
            header.serial_number = read_text(buf, rev.serial.0, rev.serial.1);
            header.firmware_rev = rev.firmware.read(buf);
            header.board_rev = rev.board.read(buf);
            header.model = read_text(buf, rev.model, MBB_MODEL_LEN);
            header.first_run_date = rev
                .first_run_date
                .and_then(|offset| read_text(buf, offset, SECTION_DATE_LEN));
        }
        None => {
            log::warn!("Unknown legacy MBB header revision: no VIN at any known address");
            header.first_run_date = read_text(buf, MBB_FIRST_RUN_DATE, SECTION_DATE_LEN);
        }
    }

    header
}

/// Fixed field addresses of one legacy BMS header revision
struct BmsRevision {
    code: u8,
    revision: u8,
    bms_serial: Option<(usize, usize)>,
    pack_serial: (usize, usize),
}

const BMS_REVISIONS: [BmsRevision; 3] = [
    BmsRevision {
        code: 0xB6,
        revision: 0,
        bms_serial: Some((0x300, 21)),
        pack_serial: (0x320, 8),
    },
    BmsRevision {
        code: 0xDE,
        revision: 1,
        bms_serial: None,
        pack_serial: (0x331, 8),
    },
    BmsRevision {
        code: 0x79,
        revision: 2,
        bms_serial: Some((0x038, 13)),
        pack_serial: (0x06C, 7),
    },
];

const BMS_REVISION_CODE: usize = 0x04;
const BMS_FIRST_RUN_DATE: usize = 0x12;

fn legacy_bms_header(buf: &[u8]) -> HeaderInfo {
    let mut header = HeaderInfo {
        first_run_date: read_text(buf, BMS_FIRST_RUN_DATE, SECTION_DATE_LEN),
        ..Default::default()
    };

    let code = buf.get(BMS_REVISION_CODE).copied();
    match BMS_REVISIONS.iter().find(|rev| Some(rev.code) == code) {
        Some(rev) => {
            log::debug!("Legacy BMS header revision {}", rev.revision);
            header.revision = Some(rev.revision);
            header.bms_serial_number = rev
                .bms_serial
                .and_then(|(offset, len)| read_text(buf, offset, len));
            header.pack_serial_number = read_text(buf, rev.pack_serial.0, rev.pack_serial.1);
        }
        None => log::warn!("Unknown legacy BMS header revision code: {:?}", code),
    }

    header
}

fn ring_buffer_header(buf: &[u8], sections: &[SectionDescriptor]) -> HeaderInfo {
    let first_run = sections
        .iter()
        .find(|s| s.kind == SectionKind::FirstRunDate)
        .map(|s| s.header_offset);

    HeaderInfo {
        serial_number: find_ring_serial(buf, first_run),
        ..Default::default()
    }
}

/// Search for the serial number near the first-run date section
///
/// Candidates are tried in order of distance from the expected address and
/// must start on a string boundary; the static fallback addresses come last.
fn find_ring_serial(buf: &[u8], first_run: Option<usize>) -> Option<String> {
    if let Some(anchor) = first_run.map(|offset| offset + RING_SERIAL_FROM_FIRST_RUN) {
        let nearby = (0..=RING_SERIAL_WINDOW).flat_map(|delta| {
            let after = Some(anchor + delta);
            let before = (delta > 0).then(|| anchor.checked_sub(delta)).flatten();
            after.into_iter().chain(before)
        });
        for offset in nearby {
            let at_boundary =
                offset == 0 || buf.get(offset - 1).map_or(false, |b| !b.is_ascii_alphanumeric());
            if at_boundary {
                if let Some(serial) = read_serial(buf, offset) {
                    return Some(serial);
                }
            }
        }
    }

    RING_SERIAL_FALLBACKS
        .iter()
        .find_map(|&offset| read_serial(buf, offset))
}

fn read_serial(buf: &[u8], offset: usize) -> Option<String> {
    read_text(buf, offset, RING_SERIAL_LEN).filter(|s| {
        s.len() >= RING_SERIAL_MIN_LEN && s.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
        buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn log_section(buf: &mut [u8], offset: usize, magic: u8, end: u32, start: u32, count: u32) {
        put(buf, offset, &[magic; 4]);
        put(buf, offset + 4, &end.to_le_bytes());
        put(buf, offset + 8, &start.to_le_bytes());
        put(buf, offset + 12, &count.to_le_bytes());
    }

    #[test]
    fn test_read_text_rules() {
        let mut buf = vec![0u8; 32];
        put(&mut buf, 0, b"ABC\0junk");
        assert_eq!(read_text(&buf, 0, 8).as_deref(), Some("ABC"));
        assert_eq!(read_text(&buf, 16, 8), None); // empty
        put(&mut buf, 16, &[b'A', 0x01, b'B']);
        assert_eq!(read_text(&buf, 16, 3), None); // not printable
        assert_eq!(read_text(&buf, 30, 8), None); // out of range
    }

    #[test]
    fn test_ring_sections_and_serial() {
        let mut buf = vec![0u8; 0x40000];
        put(&mut buf, 0x3B000, &[0xA0; 4]);
        put(&mut buf, 0x3B004, b"Jan 01 2024 10:00:00");
        put(&mut buf, 0x3BA00, &[0xA1; 4]);
        put(&mut buf, 0x3BA04, b"2024-02-03 04:05:06");
        put(&mut buf, 0x3BA00 + 0x302, b"ZR1234567890AB\0");
        log_section(&mut buf, 0x3C000, 0xA2, 0x300, 0x100, 9);

        let map = locate_sections(&buf, LayoutKind::RingBuffer2024, LogCategory::Mbb);
        assert_eq!(map.sections.len(), 3);
        let events = map.event_log().unwrap();
        assert_eq!(events.header_offset, 0x3C000);
        assert_eq!(events.end, Some(0x300));
        assert_eq!(events.start, Some(0x100));
        assert_eq!(events.count, Some(9));
        assert!(map.error_log().is_none());
        assert_eq!(map.header.serial_number.as_deref(), Some("ZR1234567890AB"));
        assert_eq!(map.header.first_run_date.as_deref(), Some("2024-02-03 04:05:06"));
        assert_eq!(map.header.build_date.as_deref(), Some("Jan 01 2024 10:00:00"));
    }

    #[test]
    fn test_ring_serial_found_near_anchor() {
        let mut buf = vec![0u8; 0x40000];
        put(&mut buf, 0x3BA00, &[0xA1; 4]);
        put(&mut buf, 0x3BA00 + 0x302 + 5, b"SERIAL99X\0");
        let map = locate_sections(&buf, LayoutKind::RingBuffer2024, LogCategory::Mbb);
        assert_eq!(map.header.serial_number.as_deref(), Some("SERIAL99X"));
    }

    #[test]
    fn test_ring_serial_static_fallback() {
        let mut buf = vec![0u8; 0x40000];
        put(&mut buf, 0x3BD00, b"FALLBACK1\0");
        let map = locate_sections(&buf, LayoutKind::RingBuffer2024, LogCategory::Mbb);
        assert_eq!(map.header.serial_number.as_deref(), Some("FALLBACK1"));
    }

    #[test]
    fn test_truncated_log_header_is_ignored() {
        let mut buf = vec![0u8; 0x100];
        put(&mut buf, 0xF8, &[0xA2; 4]);
        let map = locate_sections(&buf, LayoutKind::Legacy, LogCategory::Bms);
        assert!(map.event_log().is_none());
    }

    #[test]
    fn test_legacy_mbb_revision_1() {
        let mut buf = vec![0u8; 0x1000];
        put(&mut buf, 0x2A, b"2019-05-06 07:08:09");
        put(&mut buf, 0x252, b"538SD1Z20GCG00001");
        put(&mut buf, 0x210, b"MBB123456789");
        put(&mut buf, 0x266, &47u16.to_le_bytes());
        put(&mut buf, 0x268, &3u16.to_le_bytes());
        put(&mut buf, 0x26B, b"SRF");
        log_section(&mut buf, 0x800, 0xA2, 0x900, 0x810, 4);

        let map = locate_sections(&buf, LayoutKind::Legacy, LogCategory::Mbb);
        let header = &map.header;
        assert_eq!(header.revision, Some(1));
        assert_eq!(header.vin.as_deref(), Some("538SD1Z20GCG00001"));
        assert_eq!(header.serial_number.as_deref(), Some("MBB123456789"));
        assert_eq!(header.firmware_rev.as_deref(), Some("47"));
        assert_eq!(header.board_rev.as_deref(), Some("3"));
        assert_eq!(header.model.as_deref(), Some("SRF"));
        assert_eq!(header.first_run_date.as_deref(), Some("2019-05-06 07:08:09"));
        assert_eq!(map.event_log().unwrap().count, Some(4));
    }

    #[test]
    fn test_legacy_mbb_revision_2() {
        let mut buf = vec![0u8; 0x1000];
        put(&mut buf, 0x019, b"DSR");
        put(&mut buf, 0x029, b"538SD1Z20GCG00001");
        put(&mut buf, 0x03C, b"MBB2000000001");
        put(&mut buf, 0x05C, b"BRD-0042");
        put(&mut buf, 0x06B, b"v55.3.1");

        let map = locate_sections(&buf, LayoutKind::Legacy, LogCategory::Mbb);
        let header = &map.header;
        assert_eq!(header.revision, Some(2));
        assert_eq!(header.vin.as_deref(), Some("538SD1Z20GCG00001"));
        assert_eq!(header.serial_number.as_deref(), Some("MBB2000000001"));
        assert_eq!(header.board_rev.as_deref(), Some("BRD-0042"));
        assert_eq!(header.firmware_rev.as_deref(), Some("v55.3.1"));
        assert_eq!(header.model.as_deref(), Some("DSR"));
        // 0x2A lies inside the VIN in this revision
        assert_eq!(header.first_run_date, None);
        assert!(map.sections.is_empty());
        assert!(has_revision2_vin(&buf));
    }

    #[test]
    fn test_legacy_mbb_unreadable_fields_are_absent() {
        let mut buf = vec![0xFFu8; 0x1000];
        put(&mut buf, 0x240, b"538SD1Z20GCG00002");
        let header = locate_sections(&buf, LayoutKind::Legacy, LogCategory::Mbb).header;
        assert_eq!(header.revision, Some(0));
        assert_eq!(header.vin.as_deref(), Some("538SD1Z20GCG00002"));
        assert_eq!(header.serial_number, None);
        assert_eq!(header.model, None);
        assert_eq!(header.first_run_date, None);
        // u16 fields are always readable
        assert_eq!(header.firmware_rev.as_deref(), Some("65535"));
    }

    #[test]
    fn test_legacy_bms_revisions() {
        let mut buf = vec![0u8; 0x1000];
        buf[BMS_REVISION_CODE] = 0x79;
        put(&mut buf, 0x12, b"2021-01-01 00:00:00");
        put(&mut buf, 0x038, b"BMS0000000001");
        put(&mut buf, 0x06C, b"PK12345");
        let header = locate_sections(&buf, LayoutKind::Legacy, LogCategory::Bms).header;
        assert_eq!(header.revision, Some(2));
        assert_eq!(header.bms_serial_number.as_deref(), Some("BMS0000000001"));
        assert_eq!(header.pack_serial_number.as_deref(), Some("PK12345"));
        assert_eq!(header.first_run_date.as_deref(), Some("2021-01-01 00:00:00"));

        buf[BMS_REVISION_CODE] = 0xDE;
        put(&mut buf, 0x331, b"PACK0001");
        let header = locate_sections(&buf, LayoutKind::Legacy, LogCategory::Bms).header;
        assert_eq!(header.revision, Some(1));
        assert_eq!(header.bms_serial_number, None);
        assert_eq!(header.pack_serial_number.as_deref(), Some("PACK0001"));
    }

    #[test]
    fn test_compressed_layout_has_no_sections() {
        let mut buf = vec![0u8; 0x100];
        log_section(&mut buf, 0x10, 0xA2, 0, 0, 0);
        let map = locate_sections(&buf, LayoutKind::CompressedTelemetry2025, LogCategory::Mbb);
        assert!(map.sections.is_empty());
        assert!(map.header.is_empty());
    }
}
