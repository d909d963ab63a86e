//! Core types for J1939 frame representation.
//!
//! ## Architecture
//!
//! - [`Frame`] is the unit that flows through links and the transport engine:
//!   fixed identity (priority, identifier, source, direction, timestamp) plus a
//!   single-assignment payload.
//! - [`Payload`] is the resolved byte view with bounds-checked little and big
//!   endian accessors used by decoders.
//! - [`pgn`] holds the identifier arithmetic: PDU1/PDU2 destination rules and
//!   transport size limits.
//!
//! ## Usage Example
//!
//! ```rust
//! use j1939tp::types::{Direction, Frame};
//!
//! # fn main() -> j1939tp::Result<()> {
//! // A request for PGN 0xFECA addressed to engine #1 (0x00)
//! let request = Frame::create(0xEA00, 0xF9, vec![0xCA, 0xFE, 0x00]);
//! assert_eq!(request.destination(), 0x00);
//! assert_eq!(request.pgn(), 0xEA00);
//!
//! // A frame about to be transmitted; its payload is confirmed later
//! let tx = Frame::pending(6, 0xFECA, 0xF9, Direction::Transmitted);
//! tx.resolve(vec![0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF])?;
//! assert_eq!(tx.blocking_payload()?.u16_le(2)?, 0x0000);
//! # Ok(())
//! # }
//! ```

mod frame;
mod payload;
pub mod pgn;

pub use frame::{Direction, Frame};
pub use payload::Payload;
pub use pgn::{GLOBAL_ADDR, MAX_PAYLOAD};
