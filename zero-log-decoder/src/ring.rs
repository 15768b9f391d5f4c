//! Ring-buffer entry reconstruction
//!
//! Walks the bytes of a log section from its start offset to its end offset,
//! wrapping at the top of the ring, and yields one [`RawEntryFrame`] per entry
//! in physical order. Each frame is:
//!
//! ```text
//! B2 | len | type | ts0 ts1 ts2 ts3 | payload (len - 7 bytes)
//! ```
//!
//! where `len` counts every on-wire byte including the marker, and everything
//! after the length byte is escaped (see [`crate::escape`]).
//!
//! The walk ends in one of three ordinary ways:
//! - the cursor reaches the end offset,
//! - no marker is found where a frame should start (the rest is a skipped tail),
//! - a frame runs past the end offset (yielded as truncated, then stop).

use crate::escape::destuff;
use crate::formats::{FRAME_HEADER_LEN, FRAME_MARKER};
use crate::types::{DecoderError, RawEntryFrame, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Bytes of the unescaped block before the payload: type code and timestamp
const BLOCK_HEADER_LEN: usize = 5;

/// Half-open address range `[base, top)` over which the cursor wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSpan {
    base: usize,
    top: usize,
}

impl RingSpan {
    pub fn new(base: usize, top: usize) -> Self {
        Self { base, top }
    }

    pub fn len(&self) -> usize {
        self.top.saturating_sub(self.base)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for addresses inside the span; `top` itself aliases `base`
    pub fn contains(&self, pos: usize) -> bool {
        pos >= self.base && pos <= self.top && !self.is_empty()
    }

    fn normalize(&self, pos: usize) -> usize {
        if pos == self.top {
            self.base
        } else {
            pos
        }
    }

    fn advance(&self, pos: usize, n: usize) -> usize {
        self.base + (pos - self.base + n) % self.len()
    }

    /// Forward distance from `from` to `to`, wrapping at the top
    fn distance(&self, from: usize, to: usize) -> usize {
        let len = self.len();
        ((to - self.base) + len - (from - self.base)) % len
    }
}

/// A run of bytes skipped because no frame marker was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedRun {
    pub offset: usize,
    pub bytes: usize,
    /// Every skipped byte was erased flash (0xFF) or zero padding
    pub fill_only: bool,
}

/// What to do when a frame marker is missing before the end offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapPolicy {
    /// Treat the rest of the section as a partial tail and stop
    Stop,
    /// Skip forward to the next marker and continue
    Resync,
}

/// Single-pass iterator over the entry frames of one log section
pub struct RingReader<'a> {
    buf: &'a [u8],
    span: RingSpan,
    cursor: usize,
    remaining: usize,
    gap_policy: GapPolicy,
    skipped: Vec<SkippedRun>,
    frames_read: usize,
}

impl<'a> RingReader<'a> {
    /// Read a section whose entries may wrap around the top of `span`
    ///
    /// # Arguments
    /// * `buf` - Full dump
    /// * `span` - Addresses the ring wraps over (must lie inside `buf`)
    /// * `start` - Offset of the oldest entry
    /// * `end` - Offset one past the newest entry
    /// * `full` - When `start == end`, whether the ring is full rather than empty
    pub fn new(buf: &'a [u8], span: RingSpan, start: usize, end: usize, full: bool) -> Self {
        let mut reader = Self {
            buf,
            span,
            cursor: start,
            remaining: 0,
            gap_policy: GapPolicy::Stop,
            skipped: Vec::new(),
            frames_read: 0,
        };

        if span.top > buf.len() || !span.contains(start) || !span.contains(end) {
            log::warn!(
                "Section bounds 0x{:X}..0x{:X} outside ring 0x{:X}..0x{:X}",
                start,
                end,
                span.base,
                span.top
            );
            reader.skipped.push(SkippedRun {
                offset: start,
                bytes: 0,
                fill_only: false,
            });
            return reader;
        }

        let distance = if start == end {
            0
        } else if end == span.top {
            span.top - span.normalize(start)
        } else {
            span.distance(span.normalize(start), end)
        };
        reader.cursor = span.normalize(start);
        reader.remaining = if distance == 0 && full {
            span.len()
        } else {
            distance
        };
        log::debug!(
            "Ring walk from 0x{:X} to 0x{:X}: {} bytes",
            reader.cursor,
            end,
            reader.remaining
        );
        reader
    }

    /// Read a contiguous stream `[start, end)` with no wraparound
    pub fn linear(buf: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(buf.len());
        let start = start.min(end);
        Self {
            buf,
            span: RingSpan::new(0, buf.len()),
            cursor: start,
            remaining: end - start,
            gap_policy: GapPolicy::Stop,
            skipped: Vec::new(),
            frames_read: 0,
        }
    }

    /// Builder method: choose how a missing marker is handled
    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }

    /// Byte runs skipped so far
    pub fn skipped(&self) -> &[SkippedRun] {
        &self.skipped
    }

    /// Frames yielded so far, malformed ones excluded
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    fn byte_at(&self, pos: usize, delta: usize) -> u8 {
        self.buf[self.span.advance(pos, delta)]
    }

    /// Copy `n` bytes starting at `pos`, wrapping at the top of the span
    fn gather(&self, pos: usize, n: usize) -> Vec<u8> {
        let first = n.min(self.span.top - pos);
        let mut out = Vec::with_capacity(n);
        out.extend_from_slice(&self.buf[pos..pos + first]);
        if first < n {
            let base = self.span.base;
            out.extend_from_slice(&self.buf[base..base + (n - first)]);
        }
        out
    }

    fn consume(&mut self, n: usize) {
        let n = n.min(self.remaining);
        self.cursor = self.span.advance(self.cursor, n);
        self.remaining -= n;
    }

    /// Advance until the cursor sits on a marker or the section is exhausted
    fn skip_to_marker(&mut self) -> SkippedRun {
        let offset = self.cursor;
        let mut bytes = 0;
        let mut fill_only = true;
        while self.remaining > 0 && self.buf[self.cursor] != FRAME_MARKER {
            let byte = self.buf[self.cursor];
            fill_only &= byte == 0x00 || byte == 0xFF;
            bytes += 1;
            self.consume(1);
        }
        SkippedRun {
            offset,
            bytes,
            fill_only,
        }
    }

    /// Give up on the rest of the section, recording it as a partial tail
    fn stop_with_tail(&mut self) {
        let offset = self.cursor;
        let bytes = self.remaining;
        let fill_only = self
            .gather(offset, bytes)
            .iter()
            .all(|&b| b == 0x00 || b == 0xFF);
        log::debug!("Missing marker at 0x{:X}, skipping {} trailing bytes", offset, bytes);
        self.skipped.push(SkippedRun {
            offset,
            bytes,
            fill_only,
        });
        self.remaining = 0;
    }

    fn handle_gap(&mut self) {
        match self.gap_policy {
            GapPolicy::Stop => self.stop_with_tail(),
            GapPolicy::Resync => {
                let run = self.skip_to_marker();
                log::trace!("Skipped {} bytes at 0x{:X} to next marker", run.bytes, run.offset);
                self.skipped.push(run);
            }
        }
    }
}

impl<'a> Iterator for RingReader<'a> {
    type Item = Result<RawEntryFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == 0 {
                return None;
            }

            let offset = self.cursor;
            if self.remaining < FRAME_HEADER_LEN {
                // Not even a frame header fits before the end
                self.stop_with_tail();
                continue;
            }
            if self.buf[offset] != FRAME_MARKER {
                self.handle_gap();
                continue;
            }

            let length = self.byte_at(offset, 1) as usize;
            if length < FRAME_HEADER_LEN {
                let raw = self.gather(offset, 2);
                // Step past marker and length, then resynchronise on the next marker
                self.consume(2);
                let run = self.skip_to_marker();
                if run.bytes > 0 {
                    self.skipped.push(run);
                }
                return Some(Err(DecoderError::MalformedEntry {
                    offset,
                    reason: format!("impossible frame length {}", length),
                    raw,
                }));
            }

            let truncated = length > self.remaining;
            let take = length.min(self.remaining);
            let raw = self.gather(offset, take);
            self.consume(take);
            if truncated {
                log::debug!(
                    "Frame at 0x{:X} declares {} bytes but only {} remain",
                    offset,
                    length,
                    take
                );
                self.remaining = 0;
            }

            let frame = parse_frame(offset, length, raw, truncated);
            if frame.is_ok() {
                self.frames_read += 1;
            }
            return Some(frame);
        }
    }
}

/// Split the on-wire bytes of one frame into a [`RawEntryFrame`]
fn parse_frame(offset: usize, length: usize, raw: Vec<u8>, truncated: bool) -> Result<RawEntryFrame> {
    let block = match destuff(&raw[2..]) {
        Ok(block) => block,
        Err(DecoderError::MalformedEntry { offset: pos, reason, .. }) => {
            return Err(DecoderError::MalformedEntry {
                offset,
                reason: format!("{} at frame byte {}", reason, pos + 2),
                raw,
            })
        }
        Err(other) => return Err(other),
    };

    if block.len() < BLOCK_HEADER_LEN {
        return Err(DecoderError::MalformedEntry {
            offset,
            reason: format!("only {} bytes after unescaping the frame header", block.len()),
            raw,
        });
    }

    log::trace!("Frame at 0x{:X}: {:02X?}", offset, block);
    Ok(RawEntryFrame {
        offset,
        length,
        type_code: block[0],
        raw_timestamp: LittleEndian::read_u32(&block[1..BLOCK_HEADER_LEN]),
        payload: block[BLOCK_HEADER_LEN..].to_vec(),
        truncated,
    })
}
