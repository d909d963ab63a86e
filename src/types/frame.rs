//! J1939 frames with a single-assignment payload.
//!
//! A [`Frame`] is either complete when built (everything received from the
//! wire) or pending (built before transmission, completed once the adapter
//! confirms it). Identity fields never change; the payload moves from
//! `Pending` to `Resolved` or `Failed` exactly once and every clone of the
//! frame observes the same transition.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;
use tracing::debug;

use super::payload::Payload;
use super::pgn::{self, DEFAULT_PRIORITY, ID_MASK};
use crate::{Result, TransportError};

/// Suffix marking transmitted frames in the text format.
const TX_MARKER: &str = "(TX)";

/// Whether a frame was received from the bus or transmitted by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Received,
    Transmitted,
}

impl Direction {
    pub fn is_transmitted(self) -> bool {
        self == Direction::Transmitted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PayloadState {
    Pending,
    Resolved(Payload),
    Failed,
}

impl PayloadState {
    /// `None` while pending.
    fn settled(&self) -> Option<Result<Payload>> {
        match self {
            PayloadState::Pending => None,
            PayloadState::Resolved(payload) => Some(Ok(payload.clone())),
            PayloadState::Failed => Some(Err(TransportError::FrameFailed)),
        }
    }
}

struct FrameInner {
    priority: u8,
    id: u32,
    source: u8,
    direction: Direction,
    timestamp: SystemTime,
    state: watch::Sender<PayloadState>,
}

/// A J1939 frame: priority, 18-bit identifier, source address and payload.
///
/// Cloning shares the payload cell, so a reader holding a clone of a pending
/// frame sees it resolve.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

impl Frame {
    /// Create a complete frame.
    pub fn new(
        priority: u8,
        id: u32,
        source: u8,
        direction: Direction,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::with_state(
            SystemTime::now(),
            priority,
            id,
            source,
            direction,
            PayloadState::Resolved(payload.into()),
        )
    }

    /// Create a complete frame stamped with an explicit time.
    pub fn new_at(
        timestamp: SystemTime,
        priority: u8,
        id: u32,
        source: u8,
        direction: Direction,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::with_state(
            timestamp,
            priority,
            id,
            source,
            direction,
            PayloadState::Resolved(payload.into()),
        )
    }

    /// Create a received frame with the default priority.
    pub fn create(id: u32, source: u8, payload: impl Into<Payload>) -> Self {
        Self::new(DEFAULT_PRIORITY, id, source, Direction::Received, payload)
    }

    /// Create a frame whose payload is not known yet.
    pub fn pending(priority: u8, id: u32, source: u8, direction: Direction) -> Self {
        Self::with_state(SystemTime::now(), priority, id, source, direction, PayloadState::Pending)
    }

    fn with_state(
        timestamp: SystemTime,
        priority: u8,
        id: u32,
        source: u8,
        direction: Direction,
        state: PayloadState,
    ) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            inner: Arc::new(FrameInner {
                priority: priority & 0x07,
                id: id & ID_MASK,
                source,
                direction,
                timestamp,
                state,
            }),
        }
    }

    /// Complete a pending frame.
    ///
    /// Fails with [`TransportError::AlreadyResolved`] if the payload was
    /// already set, or [`TransportError::FrameFailed`] if the frame failed.
    pub fn resolve(&self, payload: impl Into<Payload>) -> Result<()> {
        let payload = payload.into();
        let mut outcome = Ok(());
        self.inner.state.send_if_modified(|state| match state {
            PayloadState::Pending => {
                *state = PayloadState::Resolved(payload);
                true
            }
            PayloadState::Resolved(_) => {
                outcome = Err(TransportError::AlreadyResolved);
                false
            }
            PayloadState::Failed => {
                outcome = Err(TransportError::FrameFailed);
                false
            }
        });
        outcome
    }

    /// Mark a pending frame as permanently failed.
    ///
    /// Returns `false` when the frame had already resolved or failed; terminal
    /// states are never replaced.
    pub fn fail(&self) -> bool {
        let failed = self.inner.state.send_if_modified(|state| {
            if *state == PayloadState::Pending {
                *state = PayloadState::Failed;
                true
            } else {
                false
            }
        });
        if !failed {
            debug!(id = self.inner.id, source = self.inner.source, "fail() on a settled frame");
        }
        failed
    }

    /// Wait for the payload.
    pub async fn payload(&self) -> Result<Payload> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|state| *state != PayloadState::Pending)
            .await
            .map_err(|_| TransportError::FrameFailed)?;
        state.settled().unwrap_or(Err(TransportError::FrameFailed))
    }

    /// Wait for the payload from synchronous code.
    ///
    /// Parks the calling thread, so never call it from inside an async task.
    pub fn blocking_payload(&self) -> Result<Payload> {
        futures::executor::block_on(self.payload())
    }

    /// Payload if already settled, `Ok(None)` while pending.
    pub fn try_payload(&self) -> Result<Option<Payload>> {
        self.inner.state.borrow().settled().transpose()
    }

    /// True once the frame has resolved or failed.
    pub fn is_complete(&self) -> bool {
        *self.inner.state.borrow() != PayloadState::Pending
    }

    pub fn priority(&self) -> u8 {
        self.inner.priority
    }

    /// Full identifier (PGN plus destination for PDU1).
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// Identifier bits selected by `mask`.
    pub fn id_masked(&self, mask: u32) -> u32 {
        self.inner.id & mask
    }

    pub fn source(&self) -> u8 {
        self.inner.source
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn is_transmitted(&self) -> bool {
        self.inner.direction.is_transmitted()
    }

    pub fn timestamp(&self) -> SystemTime {
        self.inner.timestamp
    }

    /// Destination address, or the global address for PDU2 identifiers.
    pub fn destination(&self) -> u8 {
        pgn::destination_of(self.inner.id)
    }

    /// Parameter group number with any destination byte cleared.
    pub fn pgn(&self) -> u32 {
        pgn::pgn_of(self.inner.id)
    }

    pub fn matches_pgn(&self, pgn: u32) -> bool {
        self.pgn() == pgn
    }

    fn snapshot(&self) -> PayloadState {
        self.inner.state.borrow().clone()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        self.inner.id == other.inner.id
            && self.inner.priority == other.inner.priority
            && self.inner.source == other.inner.source
            && self.inner.direction == other.inner.direction
            && self.snapshot() == other.snapshot()
    }
}

impl Eq for Frame {}

/// Hashes the payload as it is now; a pending frame hashes differently once
/// it resolves.
impl Hash for Frame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
        self.inner.priority.hash(state);
        self.inner.source.hash(state);
        self.inner.direction.hash(state);
        self.snapshot().hash(state);
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = ((self.inner.priority as u32) << 18) | self.inner.id;
        write!(f, "{:06X}{:02X} ", header, self.inner.source)?;
        match &*self.inner.state.borrow() {
            PayloadState::Pending => f.write_str("<pending>")?,
            PayloadState::Failed => f.write_str("<failed>")?,
            PayloadState::Resolved(payload) => {
                let mut first = true;
                for byte in payload.as_bytes() {
                    if !first {
                        f.write_str(" ")?;
                    }
                    write!(f, "{:02X}", byte)?;
                    first = false;
                }
            }
        }
        if self.is_transmitted() {
            write!(f, " {}", TX_MARKER)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self)
    }
}

/// Parses the [`Display`](fmt::Display) format, e.g. `18EA00F9 00 FE 00`.
impl FromStr for Frame {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let mut tokens = s.split_whitespace().peekable();
        let header = tokens
            .next()
            .ok_or_else(|| TransportError::parse("frame header", "empty input"))?;
        let header = u32::from_str_radix(header, 16)
            .map_err(|e| TransportError::parse("frame header", format!("{header}: {e}")))?;

        let mut direction = Direction::Received;
        let mut bytes = Vec::new();
        for token in tokens {
            if token == TX_MARKER {
                direction = Direction::Transmitted;
                continue;
            }
            let byte = u8::from_str_radix(token, 16)
                .map_err(|e| TransportError::parse("frame data", format!("{token}: {e}")))?;
            bytes.push(byte);
        }

        let priority = ((header >> 26) & 0x07) as u8;
        let id = (header >> 8) & ID_MASK;
        let source = (header & 0xFF) as u8;
        Ok(Frame::new(priority, id, source, direction, bytes))
    }
}
