//! Decoder configuration types
//!
//! The decoder needs very little configuration. These knobs tune the recovery
//! policies (how far back a timestamp may jump, how many skipped bytes still
//! count as an ordinary partial tail) rather than the wire format, which is
//! fixed.

use serde::{Deserialize, Serialize};

/// Seconds the MBB hardware clock runs behind UTC (fixed GMT-7)
pub const MBB_HARDWARE_OFFSET_SECS: u32 = 7 * 3600;

/// Configuration for the decoder library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// How many seconds a timestamp may precede the oldest valid one seen so
    /// far before it is considered corrupt
    #[serde(default = "default_timestamp_tolerance")]
    pub timestamp_tolerance_secs: u32,

    /// Trailing bytes that may be skipped without raising a warning when a
    /// frame marker is missing before the section end
    #[serde(default = "default_max_tail_skip")]
    pub max_tail_skip: usize,

    /// Shift MBB timestamps by the fixed GMT-7 hardware offset
    #[serde(default)]
    pub apply_mbb_offset: bool,

    /// When a layout should carry an event log section but none is found,
    /// scan the whole buffer for frames instead of failing
    #[serde(default)]
    pub scan_without_event_log: bool,

    /// Also decode the error log section when present
    #[serde(default = "default_true")]
    pub decode_error_log: bool,
}

fn default_timestamp_tolerance() -> u32 {
    86_400
}

fn default_max_tail_skip() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance_secs: default_timestamp_tolerance(),
            max_tail_skip: default_max_tail_skip(),
            apply_mbb_offset: false,
            scan_without_event_log: false,
            decode_error_log: true,
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the backwards timestamp tolerance
    pub fn with_timestamp_tolerance(mut self, secs: u32) -> Self {
        self.timestamp_tolerance_secs = secs;
        self
    }

    /// Builder method: set the partial-tail threshold
    pub fn with_max_tail_skip(mut self, bytes: usize) -> Self {
        self.max_tail_skip = bytes;
        self
    }

    /// Builder method: enable the MBB hardware clock correction
    pub fn with_mbb_offset(mut self, enabled: bool) -> Self {
        self.apply_mbb_offset = enabled;
        self
    }

    /// Builder method: fall back to a whole-buffer scan without an event log
    pub fn with_scan_without_event_log(mut self, enabled: bool) -> Self {
        self.scan_without_event_log = enabled;
        self
    }

    /// Builder method: enable or disable error log decoding
    pub fn with_error_log(mut self, enabled: bool) -> Self {
        self.decode_error_log = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_config_builder() {
        let config = DecoderConfig::new()
            .with_timestamp_tolerance(3600)
            .with_max_tail_skip(16)
            .with_mbb_offset(true)
            .with_scan_without_event_log(true)
            .with_error_log(false);

        assert_eq!(config.timestamp_tolerance_secs, 3600);
        assert_eq!(config.max_tail_skip, 16);
        assert!(config.apply_mbb_offset);
        assert!(config.scan_without_event_log);
        assert!(!config.decode_error_log);
    }

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::new();
        assert_eq!(config.timestamp_tolerance_secs, 86_400);
        assert_eq!(config.max_tail_skip, 4096);
        assert!(!config.apply_mbb_offset);
        assert!(!config.scan_without_event_log);
        assert!(config.decode_error_log);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: DecoderConfig =
            serde_json::from_str(r#"{ "apply_mbb_offset": true }"#).unwrap();
        assert!(config.apply_mbb_offset);
        assert_eq!(config.timestamp_tolerance_secs, 86_400);
        assert!(config.decode_error_log);
    }
}
