//! Link trait for frame buses

use std::time::Duration;

use crate::Result;
use crate::stream::FrameStream;
use crate::types::Frame;

/// A J1939 bus as seen by one node.
///
/// Links abstract over adapters, in-process buses and the transport engine
/// itself, so the engine can sit on top of any link and be used as one. The
/// trait is deliberately small: subscribe, transmit, identify, close.
#[async_trait::async_trait]
pub trait Link: Send + Sync + 'static {
    /// Subscribe to the bus.
    ///
    /// The returned stream yields every frame seen on the bus after this call,
    /// and ends once `timeout` passes without [`FrameStream::reset_timeout`]
    /// being called or when the link closes.
    ///
    /// Returns [`TransportError::Closed`](crate::TransportError::Closed) on a
    /// closed link.
    fn read(&self, timeout: Duration) -> Result<FrameStream>;

    /// Transmit a frame.
    ///
    /// Resolves with the frame as accepted by the bus once the transmission
    /// concluded. A pending frame is transmitted once its payload resolves.
    async fn send(&self, frame: Frame) -> Result<Frame>;

    /// Source address of this node.
    fn address(&self) -> u8;

    /// Release the bus. Open streams end and later calls fail with `Closed`.
    fn close(&self);
}
