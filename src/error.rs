//! Error types for the J1939 transport engine.
//!
//! Every failure the engine can surface is a distinct [`TransportError`]
//! variant rather than a generic I/O error, so callers can tell a peer that
//! never granted a Clear-To-Send apart from one that never acknowledged the
//! end of a message.
//!
//! ## Error Categories
//!
//! - **Flow control**: `CtsNotReceived`, `EomNotReceived`, `Aborted`
//! - **Reassembly**: `DtNotReceived`, `Canceled`
//! - **Frame promise**: `FrameFailed`, `AlreadyResolved`
//! - **Link**: `Closed`, `Io`
//! - **Data**: `PayloadTooLong`, `OutOfRange`, `Decode`, `Parse`
//! - **Configuration**: `Config`
//!
//! ## Retry
//!
//! The engine never retries a failed transfer itself. [`TransportError::is_retryable`]
//! tells the caller whether trying the same call again could succeed:
//!
//! ```rust
//! use j1939tp::TransportError;
//!
//! let error = TransportError::CtsNotReceived { destination: 0x00, pgn: 0xD300 };
//! assert!(error.is_retryable());
//! assert!(error.is_timeout());
//! ```

use thiserror::Error;

use crate::transport::control::AbortReason;

/// Result type alias for transport operations.
pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// Main error type for transport operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    #[error("CTS not received from {destination:#04X} for PGN {pgn:#06X}")]
    CtsNotReceived { destination: u8, pgn: u32 },

    #[error("EOM not received from {destination:#04X} for PGN {pgn:#06X}")]
    EomNotReceived { destination: u8, pgn: u32 },

    #[error("DT not received from {source_address:#04X} for PGN {pgn:#06X}: {received}/{expected} segments")]
    DtNotReceived { source_address: u8, pgn: u32, received: usize, expected: usize },

    #[error("Connection aborted by {peer:#04X}: {reason}")]
    Aborted { peer: u8, reason: AbortReason },

    #[error("Session from {source_address:#04X} was canceled")]
    Canceled { source_address: u8 },

    #[error("Frame failed")]
    FrameFailed,

    #[error("Frame already resolved")]
    AlreadyResolved,

    #[error("Link closed")]
    Closed,

    #[error("I/O failure: {reason}")]
    Io {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Payload of {len} bytes exceeds the 1785 byte transport limit")]
    PayloadTooLong { len: usize },

    #[error("Read of {width} bytes at offset {offset} is out of range for a {len} byte payload")]
    OutOfRange { offset: usize, width: usize, len: usize },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Invalid configuration: {details}")]
    Config { details: String },
}

impl TransportError {
    /// Returns whether the same call could succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::CtsNotReceived { .. } => true,
            TransportError::EomNotReceived { .. } => true,
            TransportError::DtNotReceived { .. } => true,
            TransportError::Aborted { .. } => true,
            TransportError::Canceled { .. } => true,
            TransportError::Io { .. } => true,
            TransportError::FrameFailed => false,
            TransportError::AlreadyResolved => false,
            TransportError::Closed => false,
            TransportError::PayloadTooLong { .. } => false,
            TransportError::OutOfRange { .. } => false,
            TransportError::Decode { .. } => false,
            TransportError::Parse { .. } => false,
            TransportError::Config { .. } => false,
        }
    }

    /// Returns whether this error was caused by a peer staying silent past a
    /// timing budget.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::CtsNotReceived { .. }
                | TransportError::EomNotReceived { .. }
                | TransportError::DtNotReceived { .. }
        )
    }

    /// Helper constructor for I/O failures.
    pub fn io_failed(reason: impl Into<String>) -> Self {
        TransportError::Io { reason: reason.into(), source: None }
    }

    /// Helper constructor for I/O failures with source.
    pub fn io_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        TransportError::Io { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for wire decoding errors.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        TransportError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for text parsing errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        TransportError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        TransportError::Config { details: details.into() }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}
