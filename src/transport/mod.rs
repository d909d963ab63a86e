//! J1939-21 transport protocol.
//!
//! - [`control`]: TP.CM / TP.DT wire codec and abort reasons
//! - [`session`]: inbound reassembly for BAM and RTS/CTS transfers
//! - [`send`]: outbound segmentation for both handshakes
//! - [`engine`]: the [`TransportEngine`] tying them to a [`Link`](crate::Link)

pub mod control;
pub mod engine;
pub mod send;
pub mod session;

pub use control::{AbortReason, ControlMessage};
pub use engine::TransportEngine;
pub use session::{SegmentMap, SessionKind, Transfer};
