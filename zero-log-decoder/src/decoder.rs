//! Main decoder API
//!
//! This module provides the primary interface for the decoder library. The
//! Decoder struct composes the pipeline: layout detection, section location,
//! ring reconstruction, payload decoding and sequencing.

use crate::config::DecoderConfig;
use crate::escape::destuff_prefix;
use crate::fencepost::{FencepostReader, FENCEPOST_REVISION, TEXT_EVENT_HEADER_LEN};
use crate::formats::{
    detect_layout, filename_vin, locate_sections, SectionMap, FRAME_HEADER_LEN, FRAME_MARKER,
    LEGACY_SECTION_HEADER_LEN, RING_BUFFER_SIZE,
};
use crate::registry::{
    decode_payload, decode_text_event, raw_hex_fields, DecodedPayload, SYSTEM_INFO_CODE,
};
use crate::ring::{GapPolicy, RingReader, RingSpan, SkippedRun};
use crate::timeline::Sequencer;
use crate::types::{
    DecodeResult, DecodeWarning, DecodedEntry, DecoderError, EntrySource, FieldValue, Fields,
    HeaderInfo, LayoutKind, LogCategory, RawEntryFrame, Result, SectionDescriptor, WarningKind,
};
use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

/// Entry-level anomalies written to the log before further ones are suppressed
const MAX_LOGGED_WARNINGS: usize = 10;

/// The main decoder struct - entry point for all decoding operations
///
/// A decoder holds only its configuration; every call to [`Decoder::decode`]
/// is independent, so one decoder can be shared between threads.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    /// Create a decoder with the given configuration
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Read a log file from disk and decode it
    ///
    /// A VIN embedded in the file name fills the header when the dump itself
    /// does not carry one.
    ///
    /// # Arguments
    /// * `path` - Path to the log dump
    /// * `category` - Whether the dump came from the MBB or the BMS
    /// * `layout_hint` - Skip detection and decode with this layout
    ///
    /// # Returns
    /// * `Result<DecodeResult>` - Decoded entries, or an I/O or format error
    ///
    /// # Example
    /// ```no_run
    /// use zero_log_decoder::{Decoder, DecoderConfig, LogCategory};
    /// use std::path::Path;
    ///
    /// let decoder = Decoder::new(DecoderConfig::default());
    /// let result = decoder
    ///     .decode_file(Path::new("VIN_538SD1Z20GCG00001_MBB.bin"), LogCategory::Mbb, None)
    ///     .unwrap();
    /// println!("{} entries", result.entries.len());
    /// ```
    pub fn decode_file(
        &self,
        path: &Path,
        category: LogCategory,
        layout_hint: Option<LayoutKind>,
    ) -> Result<DecodeResult> {
        log::info!("Loading log file: {:?}", path);
        let buf = std::fs::read(path)?;
        let mut result = self.decode(&buf, category, layout_hint)?;
        if result.header.vin.is_none() {
            result.header.vin = path.to_str().and_then(filename_vin);
        }
        Ok(result)
    }

    /// Decode an in-memory log dump
    ///
    /// Only an unrecognised layout or a missing event log abort the decode.
    /// Every other anomaly is kept on the affected entry and listed in
    /// [`DecodeResult::warnings`].
    pub fn decode(
        &self,
        buf: &[u8],
        category: LogCategory,
        layout_hint: Option<LayoutKind>,
    ) -> Result<DecodeResult> {
        let layout = match layout_hint {
            Some(layout) => layout,
            None => detect_layout(buf)?,
        };
        log::info!("Decoding {} log as {} layout ({} bytes)", category, layout, buf.len());

        let map = locate_sections(buf, layout, category);
        let mut collector = EntryCollector::new(category, layout, self.config.max_tail_skip);

        if layout == LayoutKind::Legacy && map.header.revision == Some(FENCEPOST_REVISION) {
            let events = FencepostReader::new(buf).ok_or(DecoderError::MissingEventLog)?;
            collector.read_text_events(events);
        } else {
            let events = self.event_reader(buf, layout, &map)?;
            collector.read(events, EntrySource::Events);

            if self.config.decode_error_log {
                if let Some(section) = map.error_log() {
                    collector.read(section_reader(buf, layout, section), EntrySource::Errors);
                }
            }
        }

        let declared_count = map.event_log().and_then(|section| section.count);
        let SectionMap {
            sections,
            mut header,
        } = map;
        let EntryCollector {
            mut entries,
            mut warnings,
            system_info,
            ..
        } = collector;

        if layout == LayoutKind::CompressedTelemetry2025 {
            header.fill_missing(system_info);
        }

        let timeline = Sequencer::new(&self.config).sequence(&mut entries);
        warnings.extend(timeline.warnings);

        match declared_count {
            Some(count) => log::info!("{} entries found ({} claimed)", entries.len(), count),
            None => log::info!("{} entries found", entries.len()),
        }

        Ok(DecodeResult {
            layout,
            category,
            header,
            sections,
            entries,
            newest_first: timeline.newest_first,
            warnings,
            declared_count,
        })
    }

    /// Reader over the event log, or over the whole stream for layouts without sections
    fn event_reader<'a>(
        &self,
        buf: &'a [u8],
        layout: LayoutKind,
        map: &SectionMap,
    ) -> Result<RingReader<'a>> {
        if layout == LayoutKind::CompressedTelemetry2025 {
            return Ok(RingReader::linear(buf, 0, buf.len()).with_gap_policy(GapPolicy::Resync));
        }

        match map.event_log() {
            Some(section) => Ok(section_reader(buf, layout, section)),
            None if self.config.scan_without_event_log => {
                log::warn!("No event log header found, scanning entire file");
                let first = buf.iter().position(|&b| b == FRAME_MARKER).unwrap_or(buf.len());
                Ok(RingReader::linear(buf, first, buf.len()).with_gap_policy(GapPolicy::Resync))
            }
            None => Err(DecoderError::MissingEventLog),
        }
    }
}

/// Decode a dump with the default configuration
pub fn decode(
    buf: &[u8],
    category: LogCategory,
    layout_hint: Option<LayoutKind>,
) -> Result<DecodeResult> {
    Decoder::default().decode(buf, category, layout_hint)
}

/// Ring reader over one log section
///
/// Legacy rings start right after the section header and run to the end of
/// the dump. 2024 rings start at offset 0 and span at most 0x40000 bytes.
fn section_reader<'a>(buf: &'a [u8], layout: LayoutKind, section: &SectionDescriptor) -> RingReader<'a> {
    let span = match layout {
        LayoutKind::Legacy => {
            RingSpan::new(section.header_offset + LEGACY_SECTION_HEADER_LEN, buf.len())
        }
        _ => RingSpan::new(0, buf.len().min(RING_BUFFER_SIZE)),
    };
    let start = section.start.unwrap_or(0) as usize;
    let end = section.end.unwrap_or(0) as usize;
    // start == end is ambiguous: the declared count tells a full ring from an empty one
    let full = section.count.map_or(false, |count| count > 0);
    RingReader::new(buf, span, start, end, full)
}

/// Accumulates decoded entries and warnings across the log sections of one dump
struct EntryCollector {
    category: LogCategory,
    layout: LayoutKind,
    max_tail_skip: usize,
    entries: Vec<DecodedEntry>,
    warnings: Vec<DecodeWarning>,
    /// Header fields found in system information entries
    system_info: HeaderInfo,
    logged: usize,
}

impl EntryCollector {
    fn new(category: LogCategory, layout: LayoutKind, max_tail_skip: usize) -> Self {
        Self {
            category,
            layout,
            max_tail_skip,
            entries: Vec::new(),
            warnings: Vec::new(),
            system_info: HeaderInfo::default(),
            logged: 0,
        }
    }

    fn read(&mut self, mut reader: RingReader<'_>, source: EntrySource) {
        for item in reader.by_ref() {
            match item {
                Ok(frame) => self.push_frame(frame, source),
                Err(err) => self.push_malformed(err, source),
            }
        }
        log::debug!("{:?}: {} frames read", source, reader.frames_read());
        for run in reader.skipped() {
            self.record_skip(run);
        }
    }

    fn read_text_events(&mut self, mut reader: FencepostReader<'_>) {
        for frame in reader.by_ref() {
            if frame.truncated {
                self.warn(&DecoderError::TruncatedEntry {
                    offset: frame.offset,
                    code: frame.type_code,
                    needed: TEXT_EVENT_HEADER_LEN,
                    available: frame.length,
                });
            }
            let decoded = decode_text_event(&frame.payload);
            self.push_entry(frame, decoded, EntrySource::Events);
        }
        log::debug!("{} text events read", reader.events_read());
    }

    fn push_frame(&mut self, frame: RawEntryFrame, source: EntrySource) {
        let decoded = decode_payload(frame.type_code, &frame.payload);

        if frame.truncated || decoded.truncated {
            let needed = if frame.truncated {
                frame.length - FRAME_HEADER_LEN
            } else {
                decoded.min_len
            };
            self.warn(&DecoderError::TruncatedEntry {
                offset: frame.offset,
                code: frame.type_code,
                needed,
                available: frame.payload.len(),
            });
        }
        if !decoded.known {
            self.warn(&DecoderError::UnknownTypeCode {
                offset: frame.offset,
                code: frame.type_code,
            });
        }
        if frame.type_code == SYSTEM_INFO_CODE {
            if let Some(info) = header_from_system_info(&decoded.fields) {
                self.system_info.fill_missing(info);
            }
        }

        self.push_entry(frame, decoded, source);
    }

    fn push_entry(&mut self, frame: RawEntryFrame, decoded: DecodedPayload, source: EntrySource) {
        self.entries.push(DecodedEntry {
            sequence: self.entries.len(),
            source,
            type_code: frame.type_code,
            type_name: decoded.name,
            category: self.category,
            timestamp: frame.raw_timestamp,
            raw_timestamp: frame.raw_timestamp,
            timestamp_valid: false,
            fields: decoded.fields,
            truncated: frame.truncated || decoded.truncated,
            malformed: false,
            offset: frame.offset,
        });
    }

    /// Keep an unparseable frame as a raw entry so no bytes silently disappear
    fn push_malformed(&mut self, err: DecoderError, source: EntrySource) {
        if let DecoderError::MalformedEntry { offset, raw, .. } = &err {
            // Type code and timestamp are escaped like the rest of the body
            let block = destuff_prefix(raw.get(2..).unwrap_or_default());
            let raw_timestamp = block.get(1..5).map_or(0, LittleEndian::read_u32);
            self.entries.push(DecodedEntry {
                sequence: self.entries.len(),
                source,
                type_code: block.first().copied().unwrap_or(0),
                type_name: "Malformed Entry".to_string(),
                category: self.category,
                timestamp: raw_timestamp,
                raw_timestamp,
                timestamp_valid: false,
                fields: raw_hex_fields(raw),
                truncated: false,
                malformed: true,
                offset: *offset,
            });
        }
        self.warn(&err);
    }

    fn record_skip(&mut self, run: &SkippedRun) {
        if run.fill_only && self.layout == LayoutKind::CompressedTelemetry2025 {
            return;
        }

        let message = if run.bytes == 0 {
            format!("Section at 0x{:X} lies outside the ring, skipped", run.offset)
        } else {
            format!("Skipped {} bytes at 0x{:X} without a frame marker", run.bytes, run.offset)
        };
        if run.bytes == 0 || run.bytes > self.max_tail_skip {
            log::warn!("{}", message);
        } else {
            log::debug!("{}", message);
        }
        self.warnings
            .push(DecodeWarning::new(run.offset, WarningKind::SkippedTail, message));
    }

    fn warn(&mut self, err: &DecoderError) {
        let Some(warning) = DecodeWarning::from_error(err) else {
            log::error!("Unexpected error while reading entries: {}", err);
            return;
        };

        self.logged += 1;
        if self.logged <= MAX_LOGGED_WARNINGS {
            log::warn!("{} (warning {}/{})", warning.message, self.logged, MAX_LOGGED_WARNINGS);
        } else if self.logged == MAX_LOGGED_WARNINGS + 1 {
            log::warn!("... suppressing further entry warnings");
        }
        self.warnings.push(warning);
    }
}

/// Header fields carried by a decoded system information entry
fn header_from_system_info(fields: &Fields) -> Option<HeaderInfo> {
    let info = fields.get("system_info")?.as_object()?;
    let text = |name: &str| {
        info.get(name)
            .and_then(FieldValue::as_str)
            .map(str::to_string)
    };
    Some(HeaderInfo {
        vin: text("vin"),
        serial_number: text("serial_number"),
        firmware_rev: text("firmware"),
        ..HeaderInfo::default()
    })
}
