//! Checksummed/line-numbered framing for G-code lines, per the standard
//! Marlin convention: `Nxxx <line>*NN\n`, where `NN` is the XOR of every byte
//! preceding the `*` (including the `N` field itself).
//!
//! Lines sent without a sequence number are transmitted as-is, newline
//! terminated.

use core::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

/// Monotonic line-number source shared by every checksummed instruction in a
/// queue. Starts at 1, matching Marlin's expectation that line 0 is never
/// used.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU32);

impl SequenceCounter {
    pub const fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    /// Reserve and return the next line number.
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Frame `message` with no sequence number or checksum, just a trailing
/// newline — used for unsequenced/"fire and forget" instructions.
pub fn frame_plain(message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(message.len() + 1);
    buf.put_slice(message.as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}

/// Frame `message` as `N{sequence}{message}*{checksum}\n`, the checksum
/// being the XOR of every byte in `N{sequence}{message}`.
pub fn frame_checksummed(message: &str, sequence: u32) -> Bytes {
    let mut payload = BytesMut::with_capacity(message.len() + 12);
    payload.put_u8(b'N');
    payload.put_slice(itoa::Buffer::new().format(sequence).as_bytes());
    payload.put_slice(message.as_bytes());

    let checksum = xor_checksum(&payload);

    let mut buf = BytesMut::with_capacity(payload.len() + 8);
    buf.put_slice(&payload);
    buf.put_u8(b'*');
    buf.put_slice(itoa::Buffer::new().format(checksum).as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub sequence: u32,
    pub message: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("could not parse framed line")]
    Malformed,
    #[error("checksum mismatch: computed {computed} but line claimed {claimed}")]
    ChecksumMismatch { computed: u8, claimed: u8 },
}

/// Parse a line produced by [`frame_checksummed`] back into its sequence
/// number and message, verifying the checksum in the process. Used to prove
/// the checksum round-trip property: for any message sent with
/// `to_checksum=true`, parsing the framed form recovers the message.
pub fn parse_checksummed(line: &str) -> Result<ParsedFrame, FrameError> {
    use winnow::{
        ascii::dec_uint,
        combinator::{preceded, rest},
        prelude::*,
        token::take_until,
    };

    let line = line.trim_end_matches('\n');
    let mut input = line;

    let sequence: u32 = preceded('N', dec_uint)
        .parse_next(&mut input)
        .map_err(|_: winnow::error::ErrMode<winnow::error::ContextError>| FrameError::Malformed)?;

    let body: &str = take_until(0.., "*")
        .parse_next(&mut input)
        .map_err(|_: winnow::error::ErrMode<winnow::error::ContextError>| FrameError::Malformed)?;

    let claimed: u8 = preceded('*', rest)
        .parse_next(&mut input)
        .ok()
        .and_then(|s: &str| s.parse().ok())
        .ok_or(FrameError::Malformed)?;

    let mut payload = BytesMut::with_capacity(body.len() + 12);
    payload.put_u8(b'N');
    payload.put_slice(itoa::Buffer::new().format(sequence).as_bytes());
    payload.put_slice(body.as_bytes());
    let computed = xor_checksum(&payload);

    if computed != claimed {
        return Err(FrameError::ChecksumMismatch { computed, claimed });
    }

    Ok(ParsedFrame {
        sequence,
        message: body.to_owned(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_framing_is_just_newline_terminated() {
        assert_eq!(frame_plain("G28"), Bytes::from_static(b"G28\n"));
    }

    #[test]
    fn checksum_round_trip() {
        let framed = frame_checksummed("G1 X10 Y20", 42);
        let framed = std::str::from_utf8(&framed).unwrap();
        let parsed = parse_checksummed(framed).unwrap();
        assert_eq!(parsed.sequence, 42);
        assert_eq!(parsed.message, "G1 X10 Y20");
    }

    #[test]
    fn tampered_checksum_is_rejected() {
        let framed = frame_checksummed("M114", 1);
        let mut framed = std::str::from_utf8(&framed).unwrap().to_owned();
        framed.pop(); // drop trailing newline
        framed.pop(); // mangle last checksum digit
        framed.push('9');
        framed.push('\n');
        assert!(matches!(
            parse_checksummed(&framed),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn sequence_counter_starts_at_one_and_increments() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.next(), 3);
    }
}
