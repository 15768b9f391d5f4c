//! Zero Log Decoder Library
//!
//! A stateless, reusable library for decoding the binary event logs dumped
//! by Zero Motorcycles' main bike board (MBB) and battery management system
//! (BMS) into structured, time-ordered entries.
//!
//! # Architecture
//!
//! Decoding is a straight pipeline over an in-memory buffer:
//! - Detects which of three dump layouts the buffer uses (legacy, 2024 ring
//!   buffer, 2025+ compressed telemetry)
//! - Locates the metadata sections and recovers header information (VIN,
//!   serial numbers, firmware and board revisions, dates)
//! - Walks the event and error log rings, handling wraparound, and unescapes
//!   each entry frame; revision 2 legacy dumps instead split their free-text
//!   events on counting fenceposts
//! - Decodes payloads through a static registry of per-type field layouts
//! - Validates timestamps and builds a newest-first view that never
//!   renumbers entries
//!
//! The library does NOT:
//! - Read from the vehicle or any transport
//! - Convert timestamps to local time zones
//! - Format text or write output files
//!
//! All presentation is in the application layer (zero-log-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use zero_log_decoder::{Decoder, DecoderConfig, LogCategory};
//!
//! let buf = std::fs::read("VIN_538SD1Z20GCG00001_MBB_2024-06-01.bin").unwrap();
//!
//! let decoder = Decoder::new(DecoderConfig::new().with_mbb_offset(true));
//! let result = decoder.decode(&buf, LogCategory::Mbb, None).unwrap();
//!
//! println!("{} layout, VIN {:?}", result.layout, result.header.vin);
//! for entry in result.iter_newest_first().take(10) {
//!     println!("{:>6} {} {}", entry.sequence, entry.timestamp, entry.type_name);
//! }
//! for warning in &result.warnings {
//!     eprintln!("0x{:X}: {}", warning.offset, warning.message);
//! }
//! ```

// Public modules
pub mod config;
pub mod decoder;
pub mod escape;
pub mod fencepost;
pub mod formats;
pub mod registry;
pub mod ring;
pub mod timeline;
pub mod types;

// Re-export main types for convenience
pub use config::{DecoderConfig, MBB_HARDWARE_OFFSET_SECS};
pub use decoder::{decode, Decoder};
pub use formats::{detect_layout, filename_vin, sniff_category};
pub use types::{
    DecodeResult, DecodeWarning, DecodedEntry, DecoderError, EntrySource, FieldValue, Fields,
    HeaderInfo, LayoutKind, LogCategory, Result, SectionDescriptor, SectionKind, WarningKind,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
