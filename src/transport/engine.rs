//! Transport engine: a [`Link`] that moves messages larger than one frame.
//!
//! The engine wraps an underlying link. Outbound frames of up to eight bytes
//! pass straight through; larger ones are segmented with BAM (global
//! destination) or RTS/CTS (addressed). Inbound, a dispatch task watches the
//! underlying link, spawns one receive session per announced transfer and
//! publishes every reassembled message, together with all ordinary traffic,
//! on an internal loopback that [`Link::read`] subscribes to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::control::{self, ControlMessage};
use super::send::{send_broadcast, send_peer_to_peer};
use super::session::{SessionKind, Transfer, receive_broadcast, receive_peer_to_peer};
use crate::config::TransportConfig;
use crate::link::Link;
use crate::links::EchoLink;
use crate::stream::FrameStream;
use crate::types::pgn::{MAX_PAYLOAD, SINGLE_FRAME_MAX};
use crate::types::{Frame, GLOBAL_ADDR};
use crate::{Result, TransportError};

type SessionKey = (SessionKind, u8);

/// Registered session: a unique id plus its cancellation flag.
struct SessionEntry {
    id: u64,
    cancel: CancellationToken,
}

struct EngineInner<L> {
    link: L,
    loopback: EchoLink,
    address: u8,
    config: TransportConfig,
    sessions: Mutex<HashMap<SessionKey, SessionEntry>>,
    next_session: AtomicU64,
    workers: Semaphore,
    cancel: CancellationToken,
}

impl<L: Link> EngineInner<L> {
    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// J1939 transport protocol on top of a [`Link`].
///
/// Cloning is cheap and every clone drives the same engine.
pub struct TransportEngine<L: Link> {
    inner: Arc<EngineInner<L>>,
}

impl<L: Link> Clone for TransportEngine<L> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<L: Link> TransportEngine<L> {
    /// Start an engine using the link's own address.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn new(link: L) -> Result<Self> {
        let address = link.address();
        Self::with_address(link, address)
    }

    /// Start an engine that answers to `address` on `link`.
    pub fn with_address(link: L, address: u8) -> Result<Self> {
        Self::with_config(link, address, TransportConfig::default())
    }

    /// Start an engine with explicit timing and limits.
    pub fn with_config(link: L, address: u8, config: TransportConfig) -> Result<Self> {
        config.validate()?;
        // Subscribe before returning so no frame sent afterwards is missed
        let frames = link.read(Duration::MAX)?;

        let inner = Arc::new(EngineInner {
            loopback: EchoLink::with_capacity(address, config.bus_capacity),
            workers: Semaphore::new(config.max_sessions),
            link,
            address,
            config,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(Self::dispatch(Arc::clone(&inner), frames));
        Ok(Self { inner })
    }

    /// Timing and limits in effect.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Number of inbound sessions currently registered.
    pub fn active_sessions(&self) -> usize {
        self.inner.sessions().len()
    }

    /// Dispatch task: classifies every frame seen on the underlying link.
    async fn dispatch(inner: Arc<EngineInner<L>>, mut frames: FrameStream) {
        info!(address = inner.address, "Transport dispatch started");
        let mut frame_count = 0u64;

        loop {
            let frame = tokio::select! {
                _ = inner.cancel.cancelled() => {
                    info!("Transport dispatch cancelled");
                    break;
                }
                frame = frames.next_frame() => frame,
            };
            let Some(frame) = frame else {
                info!("Underlying link closed");
                break;
            };
            frame_count += 1;

            if frame.source() == inner.address {
                continue;
            }
            Self::route(&inner, frame).await;
        }

        Self::cancel_all(&inner);
        inner.loopback.close();
        info!("Transport dispatch ended (processed {} frames)", frame_count);
    }

    async fn route(inner: &Arc<EngineInner<L>>, frame: Frame) {
        if control::is_data(&frame) {
            return;
        }
        if !control::is_control(&frame) {
            Self::relay(inner, frame).await;
            return;
        }

        let message = match frame.payload().await.and_then(|p| ControlMessage::decode(&p)) {
            Ok(message) => message,
            Err(e) => {
                warn!(source = frame.source(), error = %e, "Dropping malformed TP.CM frame");
                return;
            }
        };

        match message {
            ControlMessage::RequestToSend { .. } if frame.destination() != inner.address => {}
            ControlMessage::RequestToSend { .. } | ControlMessage::Broadcast { .. } => {
                if let Some((kind, transfer)) = Transfer::announced(&frame, &message) {
                    Self::start_session(inner, kind, transfer);
                }
            }
            ControlMessage::Abort { reason, .. } => {
                let source = frame.source();
                {
                    let mut sessions = inner.sessions();
                    for kind in [SessionKind::Broadcast, SessionKind::PeerToPeer] {
                        if let Some(entry) = sessions.remove(&(kind, source)) {
                            entry.cancel.cancel();
                        }
                    }
                }
                debug!(source, %reason, "TP.Conn_Abort, sessions cancelled");
                Self::relay(inner, frame).await;
            }
            _ => Self::relay(inner, frame).await,
        }
    }

    fn start_session(inner: &Arc<EngineInner<L>>, kind: SessionKind, transfer: Transfer) {
        // Broadcast data follows the BAM without a handshake, so subscribe now
        let stream = match kind {
            SessionKind::Broadcast => match inner.link.read(inner.config.t2()) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    error!(source = transfer.source, error = %e, "Cannot subscribe for TP.DT");
                    return;
                }
            },
            SessionKind::PeerToPeer => None,
        };

        let id = inner.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = inner.cancel.child_token();
        let previous = inner
            .sessions()
            .insert((kind, transfer.source), SessionEntry { id, cancel: cancel.clone() });
        if let Some(previous) = previous {
            previous.cancel.cancel();
            debug!(?kind, source = transfer.source, "Session superseded");
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            // Queue behind running sessions rather than rejecting
            let Ok(_permit) = inner.workers.acquire().await else {
                return;
            };
            let outcome = match stream {
                Some(stream) => receive_broadcast(stream, transfer, &inner.config, &cancel).await,
                None => receive_peer_to_peer(&inner.link, transfer, &inner.config, &cancel).await,
            };
            Self::finish(&inner, kind, transfer, id, &cancel, outcome).await;
        });
    }

    async fn finish(
        inner: &EngineInner<L>,
        kind: SessionKind,
        transfer: Transfer,
        id: u64,
        cancel: &CancellationToken,
        outcome: Result<Frame>,
    ) {
        {
            let mut sessions = inner.sessions();
            let key = (kind, transfer.source);
            if sessions.get(&key).is_some_and(|entry| entry.id == id) {
                sessions.remove(&key);
            }
        }

        if cancel.is_cancelled() {
            debug!(?kind, source = transfer.source, "Discarding outcome of cancelled session");
            return;
        }
        match outcome {
            Ok(frame) => {
                debug!(?kind, source = transfer.source, pgn = transfer.pgn, len = transfer.len, "Session complete");
                if let Err(e) = inner.loopback.send(frame).await {
                    debug!(error = %e, "Loopback closed, reassembled frame dropped");
                }
            }
            Err(e) => {
                warn!(?kind, source = transfer.source, pgn = transfer.pgn, error = %e, "Session failed");
            }
        }
    }

    async fn relay(inner: &EngineInner<L>, frame: Frame) {
        if let Err(e) = inner.loopback.send(frame).await {
            debug!(error = %e, "Loopback closed, frame dropped");
        }
    }

    fn cancel_all(inner: &EngineInner<L>) {
        for (_, entry) in inner.sessions().drain() {
            entry.cancel.cancel();
        }
    }
}

#[async_trait::async_trait]
impl<L: Link> Link for TransportEngine<L> {
    fn read(&self, timeout: Duration) -> Result<FrameStream> {
        self.inner.loopback.read(timeout)
    }

    async fn send(&self, frame: Frame) -> Result<Frame> {
        let payload = frame.payload().await?;
        if payload.len() <= SINGLE_FRAME_MAX {
            return self.inner.link.send(frame).await;
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLong { len: payload.len() });
        }

        let inner = &self.inner;
        if frame.destination() == GLOBAL_ADDR {
            send_broadcast(&inner.link, &frame, &payload, inner.address, &inner.config).await?;
        } else {
            send_peer_to_peer(&inner.link, &frame, &payload, inner.address, &inner.config).await?;
        }
        Ok(frame)
    }

    fn address(&self) -> u8 {
        self.inner.address
    }

    fn close(&self) {
        info!(address = self.inner.address, "Closing transport engine");
        self.inner.cancel.cancel();
        Self::cancel_all(&self.inner);
        self.inner.loopback.close();
        self.inner.link.close();
    }
}
