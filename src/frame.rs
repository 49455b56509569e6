// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::fmt;

use tracing::{debug, trace};

use crate::constants::{
    CHECKSUM_OFFSET, CHECKSUM_RANGE, COMMAND_OFFSET, CONTROLLER_CODE, DEST_OFFSET, PACKET_LEN,
    PACKET_PREFIX, PACKET_SUFFIX, PAYLOAD_LEN, PAYLOAD_OFFSET, SRC_OFFSET, TYPE_OFFSET,
};

/// Checksum formula used on the bus.
///
/// Both variants cover bytes 2..18 of the frame. Installations differ in
/// which one their wallpad firmware uses, so it is a per-gateway setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Checksum {
    /// `sum % 256`
    #[default]
    Sum,
    /// `(256 - sum % 256) % 256`
    TwosComplement,
}

impl Checksum {
    pub fn compute(&self, body: &[u8]) -> u8 {
        let sum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        match self {
            Self::Sum => sum,
            Self::TwosComplement => sum.wrapping_neg(),
        }
    }

    /// Whether the checksum byte of `frame` matches its body.
    pub fn verify(&self, frame: &PacketFrame) -> bool {
        self.compute(&frame.raw[CHECKSUM_RANGE]) == frame.checksum()
    }
}

/// A complete, prefix/suffix-delimited frame.
///
/// Only the framing is guaranteed; the checksum is checked separately by
/// [`Checksum::verify`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PacketFrame {
    raw: [u8; PACKET_LEN],
}

impl PacketFrame {
    /// Wrap a raw frame. Returns `None` unless `bytes` is exactly one
    /// prefix/suffix-delimited frame.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; PACKET_LEN] = bytes.try_into().ok()?;
        if raw[..2] != PACKET_PREFIX || raw[PACKET_LEN - 2..] != PACKET_SUFFIX {
            return None;
        }
        Some(Self { raw })
    }

    /// Wrap bytes the caller has already laid out with prefix and suffix.
    pub(crate) fn from_raw(raw: [u8; PACKET_LEN]) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &[u8; PACKET_LEN] {
        &self.raw
    }

    pub fn packet_type(&self) -> u8 {
        (self.raw[TYPE_OFFSET] >> 4) & 0x0F
    }

    pub fn dest(&self) -> (u8, u8) {
        (self.raw[DEST_OFFSET], self.raw[DEST_OFFSET + 1])
    }

    pub fn src(&self) -> (u8, u8) {
        (self.raw[SRC_OFFSET], self.raw[SRC_OFFSET + 1])
    }

    pub fn command(&self) -> u8 {
        self.raw[COMMAND_OFFSET]
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN]
    }

    pub fn checksum(&self) -> u8 {
        self.raw[CHECKSUM_OFFSET]
    }

    /// Resolve the (device code, room) of the physical device this frame
    /// talks to or about.
    ///
    /// Exactly one side must be the controller; otherwise the frame is not
    /// addressed in a way we can attribute.
    pub fn peer(&self) -> Option<(u8, u8)> {
        let dest = self.dest();
        let src = self.src();
        match (dest.0 == CONTROLLER_CODE, src.0 == CONTROLLER_CODE) {
            (true, false) => Some(src),
            (false, true) => Some(dest),
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.raw)
    }
}

impl fmt::Debug for PacketFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketFrame({})", self.to_hex())
    }
}

/// Splits an unbounded byte stream into fixed-length frames.
///
/// Bytes may arrive in chunks of any size. Misaligned or corrupted data is
/// skipped by dropping one byte at a time until a prefix/suffix pair lines up
/// again, so a valid frame following garbage is always recovered.
#[derive(Debug, Default)]
pub struct FrameSynchronizer {
    buf: Vec<u8>,
    discarded: u64,
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every complete frame now available.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<PacketFrame> {
        let mut frames = Vec::new();
        if chunk.is_empty() {
            return frames;
        }
        self.buf.extend_from_slice(chunk);

        // Every iteration either emits a frame, drops at least one byte, or stops.
        while !self.buf.is_empty() {
            let Some(start) = find_prefix(&self.buf) else {
                // A trailing first prefix byte may be completed by the next chunk.
                let keep = usize::from(self.buf.last() == Some(&PACKET_PREFIX[0]));
                self.discard(self.buf.len() - keep);
                break;
            };
            if start > 0 {
                self.discard(start);
            }
            if self.buf.len() < PACKET_LEN {
                break;
            }
            match PacketFrame::from_slice(&self.buf[..PACKET_LEN]) {
                Some(frame) => {
                    trace!("Frame received: {}", frame.to_hex());
                    frames.push(frame);
                    self.buf.drain(..PACKET_LEN);
                }
                None => {
                    debug!("Frame suffix mismatch, resynchronizing");
                    self.discard(1);
                }
            }
        }

        frames
    }

    /// Number of bytes buffered while waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Total number of bytes skipped while resynchronizing.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn discard(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        debug!("Discarding {} byte(s) of unframed data", n);
        self.buf.drain(..n);
        self.discarded += n as u64;
    }
}

fn find_prefix(buf: &[u8]) -> Option<usize> {
    buf.windows(PACKET_PREFIX.len())
        .position(|w| w == PACKET_PREFIX)
}
