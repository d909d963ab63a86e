//! Inbound transfer sessions: segment bookkeeping and the two receive
//! procedures.
//!
//! A session reassembles one announced message from one sender. Broadcast
//! sessions only listen; peer-to-peer sessions drive the sender with CTS
//! frames, asking for the lowest run of missing segments each round, and
//! acknowledge completion with an EOM.
//!
//! Both procedures take a [`CancellationToken`] used purely as a flag: once it
//! is cancelled every data frame is discarded, so a superseded session winds
//! down through its normal timeout path and its outcome is ignored.

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::control::{ControlMessage, TP_DT};
use crate::config::TransportConfig;
use crate::link::Link;
use crate::stream::FrameStream;
use crate::types::pgn::SEGMENT_DATA_LEN;
use crate::types::{Frame, GLOBAL_ADDR};
use crate::{Result, TransportError};

/// Which handshake a session runs. Together with the sender address this
/// keys the engine's session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Broadcast,
    PeerToPeer,
}

/// A transfer announced by an RTS or BAM frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Sender of the data segments.
    pub source: u8,
    /// Receiver: our address for RTS, the global address for BAM.
    pub destination: u8,
    /// Total message length in bytes.
    pub len: usize,
    /// Announced number of data segments.
    pub segments: u8,
    /// Sender's burst limit; `0xFF` means no limit.
    pub max_per_cts: u8,
    /// Identifier of the message being transferred.
    pub pgn: u32,
}

impl Transfer {
    /// Transfer announced by `frame`, or `None` when `message` is neither an
    /// RTS nor a BAM.
    pub fn announced(frame: &Frame, message: &ControlMessage) -> Option<(SessionKind, Self)> {
        match *message {
            ControlMessage::RequestToSend { len, segments, max_per_cts, pgn } => Some((
                SessionKind::PeerToPeer,
                Self {
                    source: frame.source(),
                    destination: frame.destination(),
                    len: len as usize,
                    segments,
                    max_per_cts,
                    pgn,
                },
            )),
            ControlMessage::Broadcast { len, segments, pgn } => Some((
                SessionKind::Broadcast,
                Self {
                    source: frame.source(),
                    destination: GLOBAL_ADDR,
                    len: len as usize,
                    segments,
                    max_per_cts: 0xFF,
                    pgn,
                },
            )),
            _ => None,
        }
    }

    /// True for the data frames of this transfer.
    pub fn carries(&self, frame: &Frame) -> bool {
        frame.source() == self.source && frame.id() & 0xFFFF == TP_DT | self.destination as u32
    }

    fn burst_limit(&self) -> usize {
        match self.max_per_cts {
            0 | 0xFF => usize::MAX,
            limit => limit as usize,
        }
    }
}

/// Received-segment bitmap over 1-based segment numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMap {
    received: Vec<bool>,
    count: usize,
}

impl SegmentMap {
    pub fn new(segments: u8) -> Self {
        Self { received: vec![false; segments as usize], count: 0 }
    }

    /// Announced number of segments.
    pub fn len(&self) -> usize {
        self.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    /// Distinct segments received so far.
    pub fn received(&self) -> usize {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.count == self.received.len()
    }

    pub fn contains(&self, sequence: u8) -> bool {
        self.slot(sequence).is_some_and(|i| self.received[i])
    }

    /// Mark `sequence` received. Returns `true` only the first time; numbers
    /// outside `1..=len` are never marked.
    pub fn set(&mut self, sequence: u8) -> bool {
        let Some(i) = self.slot(sequence) else {
            return false;
        };
        if self.received[i] {
            return false;
        }
        self.received[i] = true;
        self.count += 1;
        true
    }

    /// Lowest segment number not yet received.
    pub fn next_missing(&self) -> Option<u8> {
        self.received.iter().position(|seen| !seen).map(|i| (i + 1) as u8)
    }

    /// Number of consecutive missing segments starting at `sequence`.
    pub fn run_from(&self, sequence: u8) -> usize {
        self.slot(sequence)
            .map(|start| self.received[start..].iter().take_while(|seen| !**seen).count())
            .unwrap_or(0)
    }

    fn slot(&self, sequence: u8) -> Option<usize> {
        let i = (sequence as usize).checked_sub(1)?;
        (i < self.received.len()).then_some(i)
    }
}

/// Reassembly buffer for one transfer.
struct Reassembly {
    transfer: Transfer,
    buffer: Vec<u8>,
    segments: SegmentMap,
}

impl Reassembly {
    fn new(transfer: Transfer) -> Self {
        Self { transfer, buffer: vec![0; transfer.len], segments: SegmentMap::new(transfer.segments) }
    }

    /// Place one data frame. Returns `true` when it carried a new segment.
    async fn accept(&mut self, frame: &Frame) -> bool {
        let Ok(payload) = frame.payload().await else {
            return false;
        };
        let bytes = payload.as_bytes();
        let Some((&sequence, data)) = bytes.split_first() else {
            return false;
        };
        if sequence == 0 || sequence as usize > self.segments.len() {
            warn!(
                source = self.transfer.source,
                sequence,
                segments = self.segments.len(),
                "TP.DT sequence number out of range"
            );
            return false;
        }

        let offset = (sequence as usize - 1) * SEGMENT_DATA_LEN;
        let end = (offset + SEGMENT_DATA_LEN).min(self.buffer.len());
        if offset < end {
            let width = (end - offset).min(data.len());
            self.buffer[offset..offset + width].copy_from_slice(&data[..width]);
        }
        let fresh = self.segments.set(sequence);
        trace!(source = self.transfer.source, sequence, fresh, "TP.DT");
        fresh
    }

    fn missing(&self) -> TransportError {
        TransportError::DtNotReceived {
            source_address: self.transfer.source,
            pgn: self.transfer.pgn,
            received: self.segments.received(),
            expected: self.segments.len(),
        }
    }

    fn into_frame(self) -> Frame {
        Frame::create(self.transfer.pgn, self.transfer.source, self.buffer)
    }
}

/// Reassemble a BAM transfer from `stream`.
///
/// `stream` must have been opened before the BAM frame was processed, with
/// the T2 budget; every matching frame rearms it to T1.
pub async fn receive_broadcast(
    mut stream: FrameStream,
    transfer: Transfer,
    config: &TransportConfig,
    cancel: &CancellationToken,
) -> Result<Frame> {
    debug!(
        source = transfer.source,
        pgn = transfer.pgn,
        segments = transfer.segments,
        "TP.CM_BAM session started"
    );
    let mut reassembly = Reassembly::new(transfer);

    while !reassembly.segments.is_complete() {
        let Some(frame) = stream.next_frame().await else {
            break;
        };
        if !transfer.carries(&frame) || cancel.is_cancelled() {
            continue;
        }
        stream.reset_timeout(config.t1());
        reassembly.accept(&frame).await;
    }

    if !reassembly.segments.is_complete() {
        return Err(reassembly.missing());
    }
    Ok(reassembly.into_frame())
}

/// Reassemble an RTS transfer addressed to us, driving the sender with CTS
/// frames on `link`.
///
/// Each round asks for the lowest run of missing segments, capped by the
/// sender's burst limit. A round that yields no new segment counts as a
/// stall; more than [`TransportConfig::max_stalls`] consecutive stalls fail
/// the transfer.
pub async fn receive_peer_to_peer<L: Link + ?Sized>(
    link: &L,
    transfer: Transfer,
    config: &TransportConfig,
    cancel: &CancellationToken,
) -> Result<Frame> {
    debug!(
        source = transfer.source,
        pgn = transfer.pgn,
        segments = transfer.segments,
        max_per_cts = transfer.max_per_cts,
        "TP.CM_RTS session started"
    );
    let own = transfer.destination;
    let mut reassembly = Reassembly::new(transfer);
    let mut stalls = 0u32;

    while let Some(next) = reassembly.segments.next_missing() {
        if cancel.is_cancelled() {
            return Err(TransportError::Canceled { source_address: transfer.source });
        }
        let run = reassembly.segments.run_from(next).min(transfer.burst_limit());

        // Subscribe before asking so no segment slips past
        let mut stream = link.read(config.t2())?;
        let cts = ControlMessage::ClearToSend {
            count: run as u8,
            next,
            reserved: 0xFFFF,
            pgn: transfer.pgn,
        };
        trace!(source = transfer.source, next, count = run, "TP.CM_CTS");
        link.send(cts.to_frame(own, transfer.source)).await?;

        let mut seen = 0;
        let mut fresh = 0;
        while seen < run {
            let Some(frame) = stream.next_frame().await else {
                break;
            };
            if cancel.is_cancelled() {
                break;
            }
            if !transfer.carries(&frame) {
                continue;
            }
            stream.reset_timeout(config.t1());
            seen += 1;
            if reassembly.accept(&frame).await {
                fresh += 1;
            }
        }

        if fresh == 0 {
            stalls += 1;
            if stalls > config.max_stalls {
                warn!(source = transfer.source, pgn = transfer.pgn, stalls, "TP.DT stalled");
                return Err(reassembly.missing());
            }
        } else {
            stalls = 0;
        }
    }

    // A superseded transfer is not acknowledged
    if cancel.is_cancelled() {
        return Err(TransportError::Canceled { source_address: transfer.source });
    }
    let eom = ControlMessage::EndOfMessage {
        len: transfer.len as u16,
        segments: transfer.segments,
        pgn: transfer.pgn,
    };
    link.send(eom.to_frame(own, transfer.source)).await?;
    debug!(source = transfer.source, pgn = transfer.pgn, len = transfer.len, "TP.CM_EOM sent");
    Ok(reassembly.into_frame())
}
