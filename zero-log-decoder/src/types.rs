//! Core types for the Zero log decoder library
//!
//! This module defines the data model the decoder produces when processing a
//! log dump, along with the error taxonomy. Every output type is plain data:
//! once a decode returns, nothing in it is mutated again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Named payload fields of a decoded entry, ordered by name
pub type Fields = BTreeMap<String, FieldValue>;

/// Errors that can occur during decoding
///
/// Only `UnrecognizedFormat`, `MissingEventLog` and `IoError` abort a decode.
/// The remaining variants describe entry-level anomalies; the decoder recovers
/// from them locally and reports them as [`DecodeWarning`]s.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Unrecognized log format: {len} bytes, starting with [{}]", hex_string(.head))]
    UnrecognizedFormat { len: usize, head: Vec<u8> },

    #[error("Event log section not found")]
    MissingEventLog,

    #[error("Malformed entry at offset 0x{offset:X}: {reason}")]
    MalformedEntry {
        offset: usize,
        reason: String,
        /// On-wire bytes of the offending frame, as far as they could be read
        raw: Vec<u8>,
    },

    #[error("Truncated entry at offset 0x{offset:X}: type 0x{code:02X} needs {needed} bytes, got {available}")]
    TruncatedEntry {
        offset: usize,
        code: u8,
        needed: usize,
        available: usize,
    },

    #[error("Invalid timestamp {timestamp} at offset 0x{offset:X}")]
    TimestampInvalid { offset: usize, timestamp: u32 },

    #[error("Unknown entry type 0x{code:02X} at offset 0x{offset:X}")]
    UnknownTypeCode { offset: usize, code: u8 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DecoderError {
    /// True for errors that halt the whole decode
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DecoderError::UnrecognizedFormat { .. }
                | DecoderError::MissingEventLog
                | DecoderError::IoError(_)
        )
    }
}

/// Space separated upper-case hex rendering of a byte slice
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Physical layout of a log dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    /// Pre-2024 dumps with header fields at fixed addresses
    Legacy,
    /// 2024 firmware: 256 KiB ring buffer with trailing section markers
    RingBuffer2024,
    /// 2025+ firmware: one contiguous entry stream, no section markers
    CompressedTelemetry2025,
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutKind::Legacy => write!(f, "Legacy"),
            LayoutKind::RingBuffer2024 => write!(f, "Ring Buffer (2024)"),
            LayoutKind::CompressedTelemetry2025 => write!(f, "Compressed Telemetry (2025)"),
        }
    }
}

/// Which controller produced a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogCategory {
    /// Main bike board
    Mbb,
    /// Battery management system
    Bms,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogCategory::Mbb => write!(f, "MBB"),
            LogCategory::Bms => write!(f, "BMS"),
        }
    }
}

/// Header metadata recovered from a dump
///
/// Every field is optional: layouts differ in what they carry, and a field
/// that does not decode as printable text is reported as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub serial_number: Option<String>,
    pub vin: Option<String>,
    pub firmware_rev: Option<String>,
    pub board_rev: Option<String>,
    pub model: Option<String>,
    pub first_run_date: Option<String>,
    pub build_date: Option<String>,
    pub bms_serial_number: Option<String>,
    pub pack_serial_number: Option<String>,
    /// Legacy header revision (0, 1 or 2) when one was recognised
    pub revision: Option<u8>,
}

impl HeaderInfo {
    /// Fill every absent field from `other`, keeping values already present
    pub fn fill_missing(&mut self, other: HeaderInfo) {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }
        fill(&mut self.serial_number, other.serial_number);
        fill(&mut self.vin, other.vin);
        fill(&mut self.firmware_rev, other.firmware_rev);
        fill(&mut self.board_rev, other.board_rev);
        fill(&mut self.model, other.model);
        fill(&mut self.first_run_date, other.first_run_date);
        fill(&mut self.build_date, other.build_date);
        fill(&mut self.bms_serial_number, other.bms_serial_number);
        fill(&mut self.pack_serial_number, other.pack_serial_number);
        fill(&mut self.revision, other.revision);
    }

    pub fn is_empty(&self) -> bool {
        *self == HeaderInfo::default()
    }
}

/// Kind of a metadata section, identified by its magic marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    BuildDate,
    FirstRunDate,
    EventLog,
    ErrorLog,
}

impl SectionKind {
    /// All section kinds, in magic order
    pub const ALL: [SectionKind; 4] = [
        SectionKind::BuildDate,
        SectionKind::FirstRunDate,
        SectionKind::EventLog,
        SectionKind::ErrorLog,
    ];

    /// The 4-byte magic that introduces this section
    pub fn magic(self) -> [u8; 4] {
        match self {
            SectionKind::BuildDate => [0xA0; 4],
            SectionKind::FirstRunDate => [0xA1; 4],
            SectionKind::EventLog => [0xA2; 4],
            SectionKind::ErrorLog => [0xA3; 4],
        }
    }

    /// True for the sections that hold entry frames
    pub fn is_log(self) -> bool {
        matches!(self, SectionKind::EventLog | SectionKind::ErrorLog)
    }
}

/// A metadata section discovered in the dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDescriptor {
    pub kind: SectionKind,
    pub magic: [u8; 4],
    /// Byte offset of the magic marker
    pub header_offset: usize,
    /// Offset of the oldest entry (log sections only)
    pub start: Option<u32>,
    /// Offset one past the newest entry (log sections only)
    pub end: Option<u32>,
    /// Declared number of entries (log sections only)
    pub count: Option<u32>,
    /// ASCII date (date sections only)
    pub date: Option<String>,
}

/// One entry frame as read from the ring, payload already de-stuffed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntryFrame {
    /// Byte offset of the 0xB2 marker
    pub offset: usize,
    /// Declared on-wire length, marker included
    pub length: usize,
    pub type_code: u8,
    /// Little-endian seconds since the Unix epoch, as stored
    pub raw_timestamp: u32,
    pub payload: Vec<u8>,
    /// Frame ran past the end of its section
    pub truncated: bool,
}

/// A typed payload value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    /// Fixed-point value after scaling
    Decimal(f64),
    Text(String),
    /// Embedded structured telemetry block
    Object(Fields),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            FieldValue::Object(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Decimal(v) => write!(f, "{:.3}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
            FieldValue::Object(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

macro_rules! integer_field {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                FieldValue::Integer(i64::from(v))
            }
        })*
    };
}

integer_field!(u8, u16, u32, i8, i16, i32, i64);

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Decimal(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<Fields> for FieldValue {
    fn from(v: Fields) -> Self {
        FieldValue::Object(v)
    }
}

/// Which log section an entry was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Events,
    Errors,
}

/// A fully decoded log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEntry {
    /// Position in the raw file (0-based); never changes under re-sorting
    pub sequence: usize,
    pub source: EntrySource,
    pub type_code: u8,
    pub type_name: String,
    pub category: LogCategory,
    /// Unix seconds after any fixed hardware offset correction
    pub timestamp: u32,
    /// Unix seconds as stored in the frame
    pub raw_timestamp: u32,
    pub timestamp_valid: bool,
    pub fields: Fields,
    /// Payload shorter than its type requires; decoded as far as possible
    pub truncated: bool,
    /// Frame could not be parsed; `fields` holds only `raw_hex`
    pub malformed: bool,
    /// Byte offset of the frame marker
    pub offset: usize,
}

impl DecodedEntry {
    /// Look up a payload field by name
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Classification of a non-fatal decode anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    MalformedEntry,
    TruncatedEntry,
    TimestampInvalid,
    UnknownTypeCode,
    /// Bytes between the last readable frame and the section end were skipped
    SkippedTail,
}

/// A non-fatal anomaly encountered while decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeWarning {
    pub offset: usize,
    pub kind: WarningKind,
    pub message: String,
}

impl DecodeWarning {
    pub fn new(offset: usize, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            offset,
            kind,
            message: message.into(),
        }
    }

    /// Convert an entry-level error into a warning
    ///
    /// Returns `None` for fatal errors, which are never downgraded.
    pub fn from_error(err: &DecoderError) -> Option<Self> {
        let (offset, kind) = match err {
            DecoderError::MalformedEntry { offset, .. } => (*offset, WarningKind::MalformedEntry),
            DecoderError::TruncatedEntry { offset, .. } => (*offset, WarningKind::TruncatedEntry),
            DecoderError::TimestampInvalid { offset, .. } => {
                (*offset, WarningKind::TimestampInvalid)
            }
            DecoderError::UnknownTypeCode { offset, .. } => (*offset, WarningKind::UnknownTypeCode),
            _ => return None,
        };
        Some(Self::new(offset, kind, err.to_string()))
    }
}

/// The complete output of decoding one log dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeResult {
    pub layout: LayoutKind,
    pub category: LogCategory,
    pub header: HeaderInfo,
    pub sections: Vec<SectionDescriptor>,
    /// Entries in physical (on-disk) order
    pub entries: Vec<DecodedEntry>,
    /// Indices into `entries`, newest first
    pub newest_first: Vec<usize>,
    pub warnings: Vec<DecodeWarning>,
    /// Entry count declared by the event log header, when present
    pub declared_count: Option<u32>,
}

impl DecodeResult {
    /// Iterate entries newest first
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &DecodedEntry> + '_ {
        self.newest_first.iter().filter_map(move |&i| self.entries.get(i))
    }

    /// Number of warnings of the given kind
    pub fn warning_count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }

    /// Entries read from the given section
    pub fn entries_from(&self, source: EntrySource) -> impl Iterator<Item = &DecodedEntry> + '_ {
        self.entries.iter().filter(move |e| e.source == source)
    }
}
