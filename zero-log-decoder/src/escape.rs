//! Entry byte-stuffing codec
//!
//! Entry bodies on the wire are escaped so that payload bytes never collide
//! with the 0xB2 frame marker:
//! - `ESCAPE` (0xFE) is a lead byte; the byte after it is XORed with 0xFF and
//!   the pair collapses to that single recovered byte.
//! - a literal 0xFE travels as `FE 01`, a literal 0xB2 as `FE 4D`.
//!
//! Decoding is a single left-to-right pass with one byte of look-ahead.

use crate::formats::FRAME_MARKER;
use crate::types::{DecoderError, Result};

/// Escape lead byte
pub const ESCAPE: u8 = 0xFE;

/// Mask applied to the byte following an escape lead
pub const ESCAPE_MASK: u8 = 0xFF;

/// Reverse the escape encoding of an entry body
///
/// A trailing escape lead with no following byte yields
/// [`DecoderError::MalformedEntry`] whose offset is the lead's position in
/// `input`; callers rebase it onto the frame.
pub fn destuff(input: &[u8]) -> Result<Vec<u8>> {
    match unescape(input) {
        (out, None) => Ok(out),
        (_, Some(pos)) => Err(DecoderError::MalformedEntry {
            offset: pos,
            reason: "dangling escape byte".to_string(),
            raw: input.to_vec(),
        }),
    }
}

/// Unescape everything before a dangling escape lead
///
/// Never fails; used to recover the type code and timestamp of a frame whose
/// body as a whole does not unescape.
pub fn destuff_prefix(input: &[u8]) -> Vec<u8> {
    unescape(input).0
}

/// Decoded bytes, plus the position of a dangling lead if the input ends in one
fn unescape(input: &[u8]) -> (Vec<u8>, Option<usize>) {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter().copied().enumerate();

    while let Some((pos, byte)) = bytes.next() {
        if byte != ESCAPE {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some((_, next)) => out.push(next ^ ESCAPE_MASK),
            None => return (out, Some(pos)),
        }
    }

    (out, None)
}

/// True if `byte` must be escaped on the wire
pub fn needs_escape(byte: u8) -> bool {
    byte == ESCAPE || byte == FRAME_MARKER
}

/// Apply the escape encoding, as the controller firmware does
pub fn stuff(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 8);
    for &byte in input {
        if needs_escape(byte) {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_MASK);
        } else {
            out.push(byte);
        }
    }
    out
}
