//! TP.CM and TP.DT wire codec.
//!
//! Connection management frames are always eight bytes:
//!
//! | byte | RTS          | CTS          | EOM          | BAM          | Abort        |
//! |------|--------------|--------------|--------------|--------------|--------------|
//! | 0    | `0x10`       | `0x11`       | `0x13`       | `0x20`       | `0xFF`       |
//! | 1-2  | length (LE)  | count, next  | length (LE)  | length (LE)  | reason, FF   |
//! | 3    | segments     | `0xFF`       | segments     | segments     | `0xFF`       |
//! | 4    | max per CTS  | `0xFF`       | `0xFF`       | `0xFF`       | `0xFF`       |
//! | 5-7  | PGN (LE)     | PGN (LE)     | PGN (LE)     | PGN (LE)     | PGN (LE)     |
//!
//! Data frames carry the 1-based segment number followed by seven payload
//! bytes, padded with `0xFF` past the end of the message.

use std::fmt;

use crate::types::pgn::{DEFAULT_PRIORITY, SEGMENT_DATA_LEN};
use crate::types::{Direction, Frame, Payload};
use crate::{Result, TransportError};

/// Connection management PGN (TP.CM).
pub const TP_CM: u32 = 0xEC00;
/// Data transfer PGN (TP.DT).
pub const TP_DT: u32 = 0xEB00;

pub const CM_RTS: u8 = 0x10;
pub const CM_CTS: u8 = 0x11;
pub const CM_EOM: u8 = 0x13;
pub const CM_BAM: u8 = 0x20;
pub const CM_ABORT: u8 = 0xFF;

const PAD: u8 = 0xFF;
const FRAME_LEN: usize = 8;

/// True for TP.CM frames, addressed or global.
pub fn is_control(frame: &Frame) -> bool {
    frame.id() & 0xFF00 == TP_CM
}

/// True for TP.DT frames, addressed or global.
pub fn is_data(frame: &Frame) -> bool {
    frame.id() & 0xFF00 == TP_DT
}

/// Reason byte of a Connection Abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    ExistingSession,
    SystemResources,
    Timeout,
    CtsDuringData,
    RetransmitLimit,
    UnexpectedData,
    BadSequenceNumber,
    DuplicateSequenceNumber,
    MessageTooLarge,
    Other,
    /// Codes the table leaves undefined.
    Reserved(u8),
}

impl AbortReason {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => AbortReason::ExistingSession,
            2 => AbortReason::SystemResources,
            3 => AbortReason::Timeout,
            4 => AbortReason::CtsDuringData,
            5 => AbortReason::RetransmitLimit,
            6 => AbortReason::UnexpectedData,
            7 => AbortReason::BadSequenceNumber,
            8 => AbortReason::DuplicateSequenceNumber,
            9 => AbortReason::MessageTooLarge,
            250 => AbortReason::Other,
            code => AbortReason::Reserved(code),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            AbortReason::ExistingSession => 1,
            AbortReason::SystemResources => 2,
            AbortReason::Timeout => 3,
            AbortReason::CtsDuringData => 4,
            AbortReason::RetransmitLimit => 5,
            AbortReason::UnexpectedData => 6,
            AbortReason::BadSequenceNumber => 7,
            AbortReason::DuplicateSequenceNumber => 8,
            AbortReason::MessageTooLarge => 9,
            AbortReason::Other => 250,
            AbortReason::Reserved(code) => code,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ExistingSession => f.write_str(
                "Already in one or more connection managed sessions and cannot support another",
            ),
            AbortReason::SystemResources => f.write_str(
                "System resources were needed for another task so this connection managed session was terminated",
            ),
            AbortReason::Timeout => f.write_str(
                "A timeout occurred and this is the connection abort to close the session",
            ),
            AbortReason::CtsDuringData => {
                f.write_str("CTS messages received when data transfer is in progress")
            }
            AbortReason::RetransmitLimit => f.write_str("Maximum retransmit request limit reached"),
            AbortReason::UnexpectedData => f.write_str("Unexpected data transfer packet"),
            AbortReason::BadSequenceNumber => {
                f.write_str("Bad sequence number (software cannot recover)")
            }
            AbortReason::DuplicateSequenceNumber => {
                f.write_str("Duplicate sequence number (software cannot recover)")
            }
            AbortReason::MessageTooLarge => {
                f.write_str("\"Total Message Size\" is greater than 1785 bytes")
            }
            AbortReason::Other => f.write_str("Abort reason not listed in the table"),
            AbortReason::Reserved(code) => write!(f, "Reserved abort reason {code}"),
        }
    }
}

/// Decoded TP.CM payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    RequestToSend { len: u16, segments: u8, max_per_cts: u8, pgn: u32 },
    /// `count == 0` asks the sender to hold the connection open.
    ClearToSend { count: u8, next: u8, reserved: u16, pgn: u32 },
    EndOfMessage { len: u16, segments: u8, pgn: u32 },
    Broadcast { len: u16, segments: u8, pgn: u32 },
    Abort { reason: AbortReason, pgn: u32 },
    /// Control byte this codec does not interpret.
    Reserved { control: u8 },
}

impl ControlMessage {
    pub fn decode(payload: &Payload) -> Result<Self> {
        let control = payload
            .u8_at(0)
            .map_err(|_| TransportError::decode("TP.CM", "empty payload"))?;
        if !matches!(control, CM_RTS | CM_CTS | CM_EOM | CM_BAM | CM_ABORT) {
            return Ok(ControlMessage::Reserved { control });
        }
        if payload.len() < FRAME_LEN {
            return Err(TransportError::decode(
                "TP.CM",
                format!("control {control:#04X} needs {FRAME_LEN} bytes, got {}", payload.len()),
            ));
        }

        let pgn = payload.u24_le(5)?;
        let message = match control {
            CM_RTS => ControlMessage::RequestToSend {
                len: payload.u16_le(1)?,
                segments: payload.u8_at(3)?,
                max_per_cts: payload.u8_at(4)?,
                pgn,
            },
            CM_CTS => ControlMessage::ClearToSend {
                count: payload.u8_at(1)?,
                next: payload.u8_at(2)?,
                reserved: payload.u16_le(3)?,
                pgn,
            },
            CM_EOM => ControlMessage::EndOfMessage {
                len: payload.u16_le(1)?,
                segments: payload.u8_at(3)?,
                pgn,
            },
            CM_BAM => ControlMessage::Broadcast {
                len: payload.u16_le(1)?,
                segments: payload.u8_at(3)?,
                pgn,
            },
            _ => ControlMessage::Abort { reason: AbortReason::from_code(payload.u8_at(1)?), pgn },
        };
        Ok(message)
    }

    pub fn encode(&self) -> Vec<u8> {
        let (head, pgn): ([u8; 5], u32) = match *self {
            ControlMessage::RequestToSend { len, segments, max_per_cts, pgn } => {
                let [lo, hi] = len.to_le_bytes();
                ([CM_RTS, lo, hi, segments, max_per_cts], pgn)
            }
            ControlMessage::ClearToSend { count, next, reserved, pgn } => {
                let [lo, hi] = reserved.to_le_bytes();
                ([CM_CTS, count, next, lo, hi], pgn)
            }
            ControlMessage::EndOfMessage { len, segments, pgn } => {
                let [lo, hi] = len.to_le_bytes();
                ([CM_EOM, lo, hi, segments, PAD], pgn)
            }
            ControlMessage::Broadcast { len, segments, pgn } => {
                let [lo, hi] = len.to_le_bytes();
                ([CM_BAM, lo, hi, segments, PAD], pgn)
            }
            ControlMessage::Abort { reason, pgn } => {
                ([CM_ABORT, reason.code(), PAD, PAD, PAD], pgn)
            }
            ControlMessage::Reserved { control } => ([control, PAD, PAD, PAD, PAD], 0xFF_FFFF),
        };
        let [p0, p1, p2, _] = pgn.to_le_bytes();
        let mut bytes = head.to_vec();
        bytes.extend_from_slice(&[p0, p1, p2]);
        bytes
    }

    /// PGN of the transfer this message belongs to.
    pub fn pgn(&self) -> Option<u32> {
        match *self {
            ControlMessage::RequestToSend { pgn, .. }
            | ControlMessage::ClearToSend { pgn, .. }
            | ControlMessage::EndOfMessage { pgn, .. }
            | ControlMessage::Broadcast { pgn, .. }
            | ControlMessage::Abort { pgn, .. } => Some(pgn),
            ControlMessage::Reserved { .. } => None,
        }
    }

    /// TP.CM frame carrying this message from `source` to `destination`.
    pub fn to_frame(&self, source: u8, destination: u8) -> Frame {
        Frame::new(
            DEFAULT_PRIORITY,
            TP_CM | destination as u32,
            source,
            Direction::Transmitted,
            self.encode(),
        )
    }
}

/// Bytes of 1-based segment `sequence`, empty past the end of `data`.
pub fn segment(data: &[u8], sequence: u8) -> &[u8] {
    let start = (sequence as usize).saturating_sub(1) * SEGMENT_DATA_LEN;
    let end = (start + SEGMENT_DATA_LEN).min(data.len());
    data.get(start..end).unwrap_or_default()
}

/// TP.DT frame for segment `sequence` of `data`.
pub fn data_frame(source: u8, destination: u8, sequence: u8, data: &[u8]) -> Frame {
    let mut bytes = [PAD; FRAME_LEN];
    bytes[0] = sequence;
    let chunk = segment(data, sequence);
    bytes[1..1 + chunk.len()].copy_from_slice(chunk);
    Frame::new(
        DEFAULT_PRIORITY,
        TP_DT | destination as u32,
        source,
        Direction::Transmitted,
        bytes.to_vec(),
    )
}
