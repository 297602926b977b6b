//! Binary frame codec.
//!
//! Every message on the wire, in both directions, has the layout:
//!
//! | offset     | meaning                                        |
//! |------------|------------------------------------------------|
//! | 0          | direction, `0xF1` host to device, `0xF0` back  |
//! | 1          | action (`GET`, `BAUD`, `SET`, `LOCK`)          |
//! | 2          | field code                                     |
//! | 3          | payload length, 0 - 255                        |
//! | 4..4+len   | payload                                        |
//! | last       | checksum, `(field + len + sum(payload)) % 256` |
//!
//! Nothing in here performs I/O.

use heapless::Vec;
use strum_macros::FromRepr;

use crate::error::ProtocolError;
use crate::field::FieldCode;

/// Header bytes before the payload.
pub const HEADER_LEN: usize = 4;
/// Header plus trailing checksum.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 1;
pub const MAX_PAYLOAD_LEN: usize = 255;
pub const MAX_FRAME_LEN: usize = MIN_FRAME_LEN + MAX_PAYLOAD_LEN;

pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Direction {
    /// Host to device.
    Tx = 0xF1,
    /// Device to host.
    Rx = 0xF0,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Action {
    Get = 0xA1,
    Baud = 0xB0,
    Set = 0xB1,
    Lock = 0xC1,
}

/// Sum of field byte, length byte and every payload byte, truncated to 8 bits.
pub fn checksum(field: u8, len: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(field.wrapping_add(len), |acc, byte| acc.wrapping_add(*byte))
}

/// One immutable wire message. The checksum is always derived from the contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    direction: Direction,
    action: Action,
    field: FieldCode,
    payload: Payload,
}

impl Frame {
    pub fn new(
        direction: Direction,
        action: Action,
        field: FieldCode,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        let payload =
            Payload::from_slice(payload).map_err(|_| ProtocolError::PayloadTooLong(payload.len()))?;
        Ok(Self::with_payload(direction, action, field, payload))
    }

    pub fn with_payload(direction: Direction, action: Action, field: FieldCode, payload: Payload) -> Self {
        Self {
            direction,
            action,
            field,
            payload,
        }
    }

    /// Host request without payload, e.g. a `GET`.
    pub fn request(action: Action, field: FieldCode) -> Self {
        Self::with_payload(Direction::Tx, action, field, Payload::new())
    }

    /// Host `LOCK` or `BAUD` frame: one byte on the placeholder field.
    pub fn control(action: Action, value: u8) -> Self {
        let mut payload = Payload::new();
        let _ = payload.push(value);
        Self::with_payload(Direction::Tx, action, FieldCode::None, payload)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn field(&self) -> FieldCode {
        self.field
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> u8 {
        checksum(self.field as u8, self.payload.len() as u8, &self.payload)
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        MIN_FRAME_LEN + self.payload.len()
    }

    /// Serialise the frame. Total, since the payload is capped at 255 bytes by type.
    pub fn to_bytes(&self) -> Vec<u8, MAX_FRAME_LEN> {
        let mut out = Vec::new();
        // Capacity is MAX_FRAME_LEN, these pushes cannot overflow.
        let _ = out.extend_from_slice(&[
            self.direction as u8,
            self.action as u8,
            self.field as u8,
            self.payload.len() as u8,
        ]);
        let _ = out.extend_from_slice(&self.payload);
        let _ = out.push(self.checksum());
        out
    }
}

/// Encode a frame straight from its parts.
pub fn encode(
    direction: Direction,
    action: Action,
    field: FieldCode,
    payload: &[u8],
) -> Result<Vec<u8, MAX_FRAME_LEN>, ProtocolError> {
    Ok(Frame::new(direction, action, field, payload)?.to_bytes())
}

/// Decode exactly one frame from `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::Truncated {
            needed: MIN_FRAME_LEN,
            available: bytes.len(),
        });
    }
    let declared = bytes[3] as usize;
    let needed = MIN_FRAME_LEN + declared;
    if bytes.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: bytes.len(),
        });
    }
    if bytes.len() > needed {
        return Err(ProtocolError::LengthMismatch {
            declared,
            available: bytes.len() - MIN_FRAME_LEN,
        });
    }

    let payload = &bytes[HEADER_LEN..HEADER_LEN + declared];
    let expected = checksum(bytes[2], bytes[3], payload);
    let found = bytes[needed - 1];
    if expected != found {
        return Err(ProtocolError::ChecksumMismatch { expected, found });
    }

    let direction = Direction::from_repr(bytes[0]).ok_or(ProtocolError::InvalidHeader(bytes[0]))?;
    let action = Action::from_repr(bytes[1]).ok_or(ProtocolError::InvalidHeader(bytes[1]))?;
    let field = FieldCode::from_repr(bytes[2]).ok_or(ProtocolError::UnknownField(bytes[2]))?;
    Frame::new(direction, action, field, payload)
}

/// Incremental decoder for a byte stream.
///
/// Bytes are pushed as they arrive; complete frames are pulled out with
/// [`FrameDecoder::next_frame`]. Garbage before a direction byte is skipped.
/// A frame with a bad checksum is dropped up to the next point where a frame
/// could start, and a frame whose length runs past the buffered bytes is given
/// up as soon as a whole valid frame shows up behind its header. Either way a
/// corrupt frame does not take the ones after it down too.
pub struct FrameDecoder<const N: usize = 1024> {
    buffer: Vec<u8, N>,
}

impl<const N: usize> Default for FrameDecoder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameDecoder<N> {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Bytes buffered but not yet consumed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append received bytes.
    ///
    /// When the buffer cannot hold them the stale contents are discarded and
    /// [`ProtocolError::Truncated`] reported.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.buffer.extend_from_slice(bytes).is_ok() {
            return Ok(());
        }
        let available = self.buffer.len();
        self.buffer.clear();
        let keep = &bytes[bytes.len().saturating_sub(N)..];
        let _ = self.buffer.extend_from_slice(keep);
        Err(ProtocolError::Truncated {
            needed: available + bytes.len(),
            available: N,
        })
    }

    /// Pull the next complete frame, if any.
    ///
    /// `None` means more bytes are needed. `Some(Err(_))` reports a discarded
    /// frame; call again to continue with the following bytes.
    pub fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        // Skip to the first plausible start of frame.
        let start = self
            .buffer
            .iter()
            .position(|byte| Direction::from_repr(*byte).is_some());
        match start {
            Some(0) => {}
            Some(skip) => self.consume(skip),
            None => {
                self.buffer.clear();
                return None;
            }
        }

        if self.buffer.len() < HEADER_LEN {
            return None;
        }
        if Action::from_repr(self.buffer[1]).is_none() {
            let byte = self.buffer[1];
            self.consume(1);
            return Some(Err(ProtocolError::InvalidHeader(byte)));
        }

        let total = MIN_FRAME_LEN + self.buffer[3] as usize;
        if self.buffer.len() < total {
            // A corrupt length byte must not hold back whole frames behind it.
            let next = (1..self.buffer.len()).find(|&at| self.whole_frame_at(at))?;
            self.consume(next);
            return Some(Err(ProtocolError::Truncated {
                needed: total,
                available: next,
            }));
        }
        let result = decode(&self.buffer[..total]);
        let used = match result {
            // The length byte itself may be the corrupt one.
            Err(ProtocolError::ChecksumMismatch { .. }) => (1..total)
                .find(|&at| self.frame_may_start_at(at))
                .unwrap_or(total),
            _ => total,
        };
        self.consume(used);
        Some(result)
    }

    /// A complete frame with a valid checksum starts at `at`.
    fn whole_frame_at(&self, at: usize) -> bool {
        let rest = &self.buffer[at..];
        if rest.len() < MIN_FRAME_LEN || Direction::from_repr(rest[0]).is_none() {
            return false;
        }
        let total = MIN_FRAME_LEN + rest[3] as usize;
        rest.len() >= total && decode(&rest[..total]).is_ok()
    }

    /// The bytes at `at` are a whole frame, or the start of one still arriving.
    fn frame_may_start_at(&self, at: usize) -> bool {
        let rest = &self.buffer[at..];
        if Direction::from_repr(rest[0]).is_none() {
            return false;
        }
        if rest.len() < HEADER_LEN {
            return true;
        }
        if Action::from_repr(rest[1]).is_none() || FieldCode::from_repr(rest[2]).is_none() {
            return false;
        }
        let total = MIN_FRAME_LEN + rest[3] as usize;
        rest.len() < total || decode(&rest[..total]).is_ok()
    }

    fn consume(&mut self, count: usize) {
        let count = count.min(self.buffer.len());
        let remaining = self.buffer.len() - count;
        self.buffer.copy_within(count.., 0);
        self.buffer.truncate(remaining);
    }
}
