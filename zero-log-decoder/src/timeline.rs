//! Timestamp validation and display ordering
//!
//! Entries keep their physical position as an immutable sequence number. This
//! module decides which timestamps can be trusted and builds the newest-first
//! view over the entries without moving them.

use crate::config::{DecoderConfig, MBB_HARDWARE_OFFSET_SECS};
use crate::types::{DecodeWarning, DecodedEntry, DecoderError, EntrySource, LogCategory};
use chrono::{DateTime, Datelike};

/// Last calendar year a log timestamp may fall in
pub const LATEST_VALID_YEAR: i32 = 2030;

/// Outcome of sequencing one decoded log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    /// Indices into the entry list, newest first
    pub newest_first: Vec<usize>,
    /// One `TimestampInvalid` warning per rejected timestamp
    pub warnings: Vec<DecodeWarning>,
}

/// Validates timestamps and orders entries for display
#[derive(Debug, Clone)]
pub struct Sequencer {
    tolerance_secs: u32,
    apply_mbb_offset: bool,
}

impl Sequencer {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            tolerance_secs: config.timestamp_tolerance_secs,
            apply_mbb_offset: config.apply_mbb_offset,
        }
    }

    /// Validate every entry in place and compute the newest-first order
    ///
    /// `entries` must be in physical order. Each entry's `timestamp` is
    /// recomputed from `raw_timestamp` and `timestamp_valid` is set. Valid
    /// entries are ordered by timestamp descending, ties kept in physical
    /// order; invalid entries follow in physical order.
    pub fn sequence(&self, entries: &mut [DecodedEntry]) -> Timeline {
        let mut warnings = Vec::new();
        // The backwards-jump guard is tracked per section: the error log keeps
        // its own history independent of the event log
        let mut oldest_events: Option<u32> = None;
        let mut oldest_errors: Option<u32> = None;

        for entry in entries.iter_mut() {
            entry.timestamp = self.corrected(entry.category, entry.raw_timestamp);
            let oldest = match entry.source {
                EntrySource::Events => &mut oldest_events,
                EntrySource::Errors => &mut oldest_errors,
            };

            entry.timestamp_valid = self.is_valid(entry.raw_timestamp, entry.timestamp, *oldest);
            if entry.timestamp_valid {
                *oldest = Some(oldest.map_or(entry.timestamp, |o| o.min(entry.timestamp)));
            } else {
                let err = DecoderError::TimestampInvalid {
                    offset: entry.offset,
                    timestamp: entry.raw_timestamp,
                };
                log::debug!("{}", err);
                warnings.extend(DecodeWarning::from_error(&err));
            }
        }

        let (mut valid, invalid): (Vec<usize>, Vec<usize>) =
            (0..entries.len()).partition(|&i| entries[i].timestamp_valid);
        // sort_by is stable, so equal timestamps stay in physical order
        valid.sort_by(|&a, &b| entries[b].timestamp.cmp(&entries[a].timestamp));
        valid.extend(invalid);

        Timeline {
            newest_first: valid,
            warnings,
        }
    }

    /// Apply the fixed MBB hardware clock correction when enabled
    fn corrected(&self, category: LogCategory, raw: u32) -> u32 {
        if self.apply_mbb_offset && category == LogCategory::Mbb {
            raw.saturating_add(MBB_HARDWARE_OFFSET_SECS)
        } else {
            raw
        }
    }

    fn is_valid(&self, raw: u32, timestamp: u32, oldest: Option<u32>) -> bool {
        if raw == 0 {
            return false;
        }
        let in_range = DateTime::from_timestamp(i64::from(timestamp), 0)
            .map_or(false, |dt| dt.year() <= LATEST_VALID_YEAR);
        if !in_range {
            return false;
        }
        match oldest {
            Some(oldest) => timestamp >= oldest.saturating_sub(self.tolerance_secs),
            None => true,
        }
    }
}
