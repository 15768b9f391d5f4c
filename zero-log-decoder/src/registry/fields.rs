//! Bounds-checked payload field extraction
//!
//! Every read is little-endian and checked against the payload length. A read
//! that does not fit marks the payload as short and yields `None`, so a layout
//! decoder simply skips fields its payload cannot supply.

use crate::types::{FieldValue, Fields};
use byteorder::{ByteOrder, LittleEndian};

/// Reads typed fields out of a de-stuffed payload and collects named values
pub struct FieldReader<'a> {
    data: &'a [u8],
    fields: Fields,
    short: bool,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            fields: Fields::new(),
            short: false,
        }
    }

    /// Payload bytes
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn bytes(&mut self, offset: usize, n: usize) -> Option<&'a [u8]> {
        let slice = offset
            .checked_add(n)
            .and_then(|end| self.data.get(offset..end));
        if slice.is_none() {
            self.short = true;
        }
        slice
    }

    pub fn u8(&mut self, offset: usize) -> Option<u8> {
        self.bytes(offset, 1).map(|b| b[0])
    }

    pub fn i8(&mut self, offset: usize) -> Option<i8> {
        self.bytes(offset, 1).map(|b| b[0] as i8)
    }

    pub fn bool(&mut self, offset: usize) -> Option<bool> {
        self.u8(offset).map(|b| b != 0)
    }

    pub fn u16(&mut self, offset: usize) -> Option<u16> {
        self.bytes(offset, 2).map(LittleEndian::read_u16)
    }

    pub fn i16(&mut self, offset: usize) -> Option<i16> {
        self.bytes(offset, 2).map(LittleEndian::read_i16)
    }

    pub fn u32(&mut self, offset: usize) -> Option<u32> {
        self.bytes(offset, 4).map(LittleEndian::read_u32)
    }

    pub fn i32(&mut self, offset: usize) -> Option<i32> {
        self.bytes(offset, 4).map(LittleEndian::read_i32)
    }

    /// Fixed-length string, cut at the first NUL
    pub fn text(&mut self, offset: usize, len: usize) -> Option<String> {
        self.bytes(offset, len).map(decode_text)
    }

    /// String running from `offset` to the end of the payload
    pub fn text_to_end(&mut self, offset: usize) -> Option<String> {
        let len = self.data.len().checked_sub(offset)?;
        self.text(offset, len)
    }

    /// Store a field
    pub fn put(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Store a field if it was readable
    pub fn put_opt<T: Into<FieldValue>>(&mut self, name: &str, value: Option<T>) {
        if let Some(value) = value {
            self.put(name, value);
        }
    }

    /// Store a code together with its label from `table` ("Unknown" if absent)
    pub fn put_coded(&mut self, name: &str, code: Option<u16>, table: &[(u16, &str)]) {
        if let Some(code) = code {
            self.put(&format!("{}_code", name), code);
            self.put(name, label(table, code));
        }
    }

    /// Consume the reader, returning the fields and whether any read fell short
    pub fn finish(self) -> (Fields, bool) {
        (self.fields, self.short)
    }
}

/// Look up a code in a label table
pub fn label<'t>(table: &[(u16, &'t str)], code: u16) -> &'t str {
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map_or("Unknown", |(_, name)| name)
}

/// Millivolts (or any milli-unit) to units
pub fn milli(value: impl Into<i64>) -> f64 {
    value.into() as f64 / 1000.0
}

/// Integer part of a micro-unit value, truncated toward zero
pub fn micro_trunc(value: impl Into<i64>) -> i64 {
    value.into() / 1_000_000
}

/// Ratio as a percentage; zero when the denominator is zero
pub fn percent(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator * 100.0 / denominator
    }
}

/// Lower-case contiguous hex, the form used for `raw_hex` fields
pub fn compact_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode embedded text verbatim up to the first NUL
pub fn decode_text(bytes: &[u8]) -> String {
    let text = bytes.split(|&b| b == 0).next().unwrap_or_default();
    String::from_utf8_lossy(text).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_reads() {
        let data = [0x34, 0x12, 0xFF, 0xFF, 0x78, 0x56, 0x34, 0x12];
        let mut r = FieldReader::new(&data);
        assert_eq!(r.u16(0), Some(0x1234));
        assert_eq!(r.i16(2), Some(-1));
        assert_eq!(r.u32(4), Some(0x1234_5678));
        assert_eq!(r.i8(2), Some(-1));
        assert_eq!(r.bool(0), Some(true));
        let (_, short) = r.finish();
        assert!(!short);
    }

    #[test]
    fn test_out_of_range_marks_short() {
        let data = [0x01, 0x02, 0x03];
        let mut r = FieldReader::new(&data);
        assert_eq!(r.u32(0), None);
        assert_eq!(r.u8(2), Some(3));
        assert_eq!(r.u16(usize::MAX), None);
        let (_, short) = r.finish();
        assert!(short);
    }

    #[test]
    fn test_text_stops_at_nul() {
        let data = b"\x01Jun 11 2015\0\0\0\0\0\0\0\0\0";
        let mut r = FieldReader::new(data);
        assert_eq!(r.text(1, 20).as_deref(), Some("Jun 11 2015"));
        assert_eq!(r.text_to_end(1).as_deref(), Some("Jun 11 2015"));
        assert_eq!(r.text_to_end(40), None);
    }

    #[test]
    fn test_put_coded_labels() {
        let mut r = FieldReader::new(&[0x02]);
        let code = r.u8(0).map(u16::from);
        r.put_coded("cause", code, &[(0x01, "Key Switch"), (0x02, "Ext Charger 0")]);
        r.put_coded("other", Some(9), &[(0x01, "Key Switch")]);
        let (fields, _) = r.finish();
        assert_eq!(fields["cause"].as_str(), Some("Ext Charger 0"));
        assert_eq!(fields["cause_code"].as_i64(), Some(2));
        assert_eq!(fields["other"].as_str(), Some("Unknown"));
    }

    #[test]
    fn test_scaling_helpers() {
        assert_eq!(milli(3_300u16), 3.3);
        assert_eq!(micro_trunc(-2_500_000i32), -2);
        assert_eq!(micro_trunc(45_999_999u32), 45);
        assert_eq!(percent(50.0, 200.0), 25.0);
        assert_eq!(percent(1.0, 0.0), 0.0);
        assert_eq!(compact_hex(&[0x0A, 0xFF]), "0aff");
    }
}
