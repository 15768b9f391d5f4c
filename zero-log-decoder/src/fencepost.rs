//! Fencepost-delimited event streams
//!
//! Revision 2 legacy dumps do not frame their events with 0xB2 markers. Each
//! event is written as
//!
//! ```text
//! ts3 ts2 ts1 ts0 | f0 counter f2 | text ... [00 B2 data ...]
//! ```
//!
//! with a big-endian timestamp followed by a three-byte fencepost. The outer
//! fencepost bytes are those at offsets 0x0A and 0x0C of the dump header; the
//! counter in the middle steps by one per event, runs 0x01..=0xFD then 0xFF,
//! and wraps back to 0x01. An event ends four bytes before the next
//! fencepost. Lost events show up as skipped counter values.

use crate::formats::find_sequence;
use crate::registry::TEXT_EVENT_CODE;
use crate::types::RawEntryFrame;
use byteorder::{BigEndian, ByteOrder};

/// Legacy header revision whose event log is fencepost-delimited
pub const FENCEPOST_REVISION: u8 = 2;

/// Header offsets of the outer fencepost bytes
const OUTER_BYTE0: usize = 0x0A;
const OUTER_BYTE2: usize = 0x0C;

const TIMESTAMP_LEN: usize = 4;

/// Timestamp and fencepost preceding the event text
pub const TEXT_EVENT_HEADER_LEN: usize = TIMESTAMP_LEN + 3;

/// Longest plausible event; a farther fencepost means the next counter was lost
const MAX_EVENT_LEN: usize = 256;

/// Counter value of the event after one with counter `value`
pub fn next_counter(value: u8) -> u8 {
    match value {
        0xFD | 0xFE => 0xFF,
        0xFF => 0x01,
        v => v + 1,
    }
}

/// Single-pass iterator over the events of a fencepost-delimited dump
///
/// Events are yielded as [`RawEntryFrame`]s with type code
/// [`TEXT_EVENT_CODE`]; `payload` holds everything after the fencepost.
pub struct FencepostReader<'a> {
    buf: &'a [u8],
    outer: [u8; 2],
    counter: u8,
    /// Offset of the next event's fencepost
    next_start: Option<usize>,
    events_read: usize,
}

impl<'a> FencepostReader<'a> {
    /// Start reading at the first fencepost of `buf`
    ///
    /// The header itself carries a fencepost whose counter names the first
    /// event. Returns `None` when the header is too short to hold one.
    pub fn new(buf: &'a [u8]) -> Option<Self> {
        let outer = [*buf.get(OUTER_BYTE0)?, *buf.get(OUTER_BYTE2)?];
        let first = buf
            .windows(3)
            .position(|w| w[0] == outer[0] && w[2] == outer[1] && w[1] != b'\n')?;

        let mut reader = Self {
            buf,
            outer,
            counter: buf[first + 1],
            next_start: None,
            events_read: 0,
        };
        let start = reader.find(reader.counter, first + 1).unwrap_or(first);
        log::debug!(
            "Fencepost {:02X?} first seen at 0x{:X}, events from 0x{:X}",
            reader.fencepost(reader.counter),
            first,
            start
        );
        reader.next_start = Some(start);
        Some(reader)
    }

    /// Events yielded so far
    pub fn events_read(&self) -> usize {
        self.events_read
    }

    fn fencepost(&self, counter: u8) -> [u8; 3] {
        [self.outer[0], counter, self.outer[1]]
    }

    fn find(&self, counter: u8, from: usize) -> Option<usize> {
        let haystack = self.buf.get(from..)?;
        find_sequence(haystack, &self.fencepost(counter)).map(|pos| from + pos)
    }

    /// Fencepost closing the event at `start`, with its counter value
    ///
    /// Counters are tried in order until one appears within reach. A full
    /// cycle back to the current counter gives up, leaving the event to run
    /// to the end of the dump when nothing was found.
    fn find_end(&self, start: usize) -> (u8, Option<usize>) {
        let mut counter = next_counter(self.counter);
        let mut end = self.find(counter, start + 1);
        for _ in 0..=u8::MAX {
            if end.map_or(false, |end| end - start <= MAX_EVENT_LEN) {
                break;
            }
            counter = next_counter(counter);
            end = self.find(counter, start + 1);
            if counter == self.counter {
                break;
            }
        }
        (counter, end)
    }
}

impl Iterator for FencepostReader<'_> {
    type Item = RawEntryFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start.take()?;
        if start >= self.buf.len() {
            return None;
        }

        let (counter, end) = self.find_end(start);
        let from = start.saturating_sub(TIMESTAMP_LEN);
        let to = end.map_or(self.buf.len(), |end| end.saturating_sub(TIMESTAMP_LEN).max(from));
        let event = &self.buf[from..to];
        if let Some(end) = end {
            let lost = end_gap(self.counter, counter);
            if lost > 0 {
                log::debug!("{} events lost before fencepost at 0x{:X}", lost, end);
            }
        }

        self.counter = counter;
        self.next_start = end;
        self.events_read += 1;

        let truncated = event.len() < TEXT_EVENT_HEADER_LEN;
        let frame = RawEntryFrame {
            offset: from,
            length: event.len(),
            type_code: TEXT_EVENT_CODE,
            raw_timestamp: event.get(..TIMESTAMP_LEN).map_or(0, BigEndian::read_u32),
            payload: event.get(TEXT_EVENT_HEADER_LEN..).unwrap_or_default().to_vec(),
            truncated,
        };
        log::trace!("Text event at 0x{:X}: {} bytes", frame.offset, frame.length);
        Some(frame)
    }
}

/// Counter values skipped between two consecutive events
fn end_gap(from: u8, to: u8) -> usize {
    let mut counter = next_counter(from);
    let mut lost = 0;
    while counter != to && lost < usize::from(u8::MAX) {
        counter = next_counter(counter);
        lost += 1;
    }
    lost
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTER: [u8; 2] = [0xE1, 0xE2];

    /// Header with its fencepost at 0x0A naming `counter`
    fn dump(counter: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 0x40];
        buf[OUTER_BYTE0..OUTER_BYTE0 + 3].copy_from_slice(&[OUTER[0], counter, OUTER[1]]);
        buf
    }

    fn event(buf: &mut Vec<u8>, timestamp: u32, counter: u8, text: &str) {
        buf.extend_from_slice(&timestamp.to_be_bytes());
        buf.extend_from_slice(&[OUTER[0], counter, OUTER[1]]);
        buf.extend_from_slice(text.as_bytes());
        buf.push(0);
    }

    #[test]
    fn test_counter_skips_reserved_values() {
        assert_eq!(next_counter(0x01), 0x02);
        assert_eq!(next_counter(0xFD), 0xFF);
        assert_eq!(next_counter(0xFF), 0x01);
        assert_eq!(end_gap(0x10, 0x11), 0);
        assert_eq!(end_gap(0xFD, 0x01), 1);
    }

    #[test]
    fn test_events_split_on_consecutive_fenceposts() {
        let mut buf = dump(0x20);
        event(&mut buf, 1_600_000_000, 0x20, "Key On");
        event(&mut buf, 1_600_000_060, 0x21, "Key Off");

        let mut reader = FencepostReader::new(&buf).unwrap();
        let events: Vec<_> = reader.by_ref().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].offset, 0x40);
        assert_eq!(events[0].raw_timestamp, 1_600_000_000);
        assert_eq!(events[0].payload, b"Key On\0".to_vec());
        assert_eq!(events[1].raw_timestamp, 1_600_000_060);
        assert_eq!(events[1].payload, b"Key Off\0".to_vec());
        assert!(events.iter().all(|e| e.type_code == TEXT_EVENT_CODE && !e.truncated));
        assert_eq!(reader.events_read(), 2);
    }

    #[test]
    fn test_lost_counter_is_skipped() {
        let mut buf = dump(0xFC);
        event(&mut buf, 100, 0xFC, "a");
        event(&mut buf, 200, 0xFF, "b");
        event(&mut buf, 300, 0x01, "c");

        let stamps: Vec<_> = FencepostReader::new(&buf)
            .unwrap()
            .map(|e| e.raw_timestamp)
            .collect();
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_distant_fencepost_is_not_the_next_event() {
        let mut buf = dump(0x05);
        event(&mut buf, 100, 0x05, "first");
        // Counter 0x06 only appears far away; 0x07 is the real successor
        event(&mut buf, 200, 0x07, "second");
        buf.resize(buf.len() + 400, 0);
        event(&mut buf, 300, 0x06, "stray");

        let events: Vec<_> = FencepostReader::new(&buf).unwrap().collect();
        assert_eq!(events[0].raw_timestamp, 100);
        assert_eq!(events[1].raw_timestamp, 200);
        assert_eq!(events[1].payload[..6], *b"second");
    }

    #[test]
    fn test_short_buffer_has_no_reader() {
        assert!(FencepostReader::new(&[0u8; 8]).is_none());
    }
}
