//! In-process loopback bus

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::link::Link;
use crate::stream::FrameStream;
use crate::types::Frame;
use crate::{Result, TransportError};

/// Default number of frames a subscriber may fall behind before lagging.
pub const DEFAULT_CAPACITY: usize = 4096;

struct Bus {
    sender: Mutex<Option<broadcast::Sender<Frame>>>,
}

impl Bus {
    fn sender(&self) -> Option<broadcast::Sender<Frame>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Loopback link: every frame sent is delivered to every open stream.
///
/// Several handles created with [`EchoLink::attach`] share one bus, which is
/// how tests put multiple nodes on the same simulated wire. Cloning a handle
/// keeps its address.
#[derive(Clone)]
pub struct EchoLink {
    bus: Arc<Bus>,
    address: u8,
}

impl EchoLink {
    /// Create a bus and a handle on it for `address`.
    pub fn new(address: u8) -> Self {
        Self::with_capacity(address, DEFAULT_CAPACITY)
    }

    /// Create a bus whose subscribers may buffer up to `capacity` frames.
    pub fn with_capacity(address: u8, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { bus: Arc::new(Bus { sender: Mutex::new(Some(sender)) }), address }
    }

    /// Another handle on the same bus for a different node.
    pub fn attach(&self, address: u8) -> Self {
        Self { bus: Arc::clone(&self.bus), address }
    }

    /// True once [`Link::close`] was called on any handle of this bus.
    pub fn is_closed(&self) -> bool {
        self.bus.sender().is_none()
    }
}

#[async_trait::async_trait]
impl Link for EchoLink {
    fn read(&self, timeout: Duration) -> Result<FrameStream> {
        let sender = self.bus.sender().ok_or(TransportError::Closed)?;
        Ok(FrameStream::new(sender.subscribe(), timeout))
    }

    async fn send(&self, frame: Frame) -> Result<Frame> {
        // Pending frames go out once their payload is known
        frame.payload().await?;
        let sender = self.bus.sender().ok_or(TransportError::Closed)?;
        trace!(%frame, "echo");
        // No subscribers is not an error, the frame simply reaches nobody
        let _ = sender.send(frame.clone());
        Ok(frame)
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn close(&self) {
        let dropped = self.bus.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if dropped.is_some() {
            debug!(address = self.address, "Echo bus closed");
        }
    }
}
