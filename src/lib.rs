//! J1939 transport protocol engine.
//!
//! Carries messages of up to 1785 bytes over an 8-byte-per-frame J1939 bus
//! using the two SAE J1939-21 transport procedures: the Broadcast Announce
//! Message (BAM) for global destinations and the RTS/CTS handshake for
//! addressed ones.
//!
//! # Features
//!
//! - **Link abstraction**: the engine both consumes and implements [`Link`],
//!   so applications read reassembled messages exactly like ordinary frames
//! - **Lazy frames**: a [`Frame`] payload can be filled in after construction
//!   and every clone observes it
//! - **Concurrent sessions**: one receive session per sender and handshake,
//!   superseded when the sender starts over
//! - **Configurable timing**: T1 to T4 and resource limits via
//!   [`TransportConfig`], loadable from YAML
//!
//! # Quick Start
//!
//! ```rust
//! use j1939tp::{EchoLink, Frame, Link, TransportEngine};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> j1939tp::Result<()> {
//!     // Two nodes on one simulated bus
//!     let bus = EchoLink::new(0xF9);
//!     let tool = TransportEngine::new(bus.clone())?;
//!     let ecu = TransportEngine::new(bus.attach(0x00))?;
//!
//!     let mut inbound = ecu.read(Duration::from_secs(5))?;
//!     let message = Frame::create(0xD300, 0xF9, vec![0x5A; 100]);
//!     tool.send(message).await?;
//!
//!     let received = inbound.next_frame().await.expect("message");
//!     assert_eq!(received.payload().await?.len(), 100);
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Buses and the transport built on them
pub mod link;
pub mod links;
pub mod stream;
pub mod transport;

// Core exports
pub use config::TransportConfig;
pub use error::*;
pub use types::{Direction, Frame, Payload};

// Main API exports
pub use link::Link;
pub use links::EchoLink;
pub use stream::FrameStream;
pub use transport::TransportEngine;
