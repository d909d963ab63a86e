//! Timeout-scoped frame subscriptions

use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, Sleep, sleep_until};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::types::Frame;

/// Stand-in deadline for reads that should never time out.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// One subscriber's view of a bus, bounded by a resettable deadline.
///
/// Yields every frame published after the subscription was created. Ends when
/// the deadline passes or the bus closes; once ended it stays ended.
pub struct FrameStream {
    frames: BroadcastStream<Frame>,
    deadline: Pin<Box<Sleep>>,
    done: bool,
}

impl FrameStream {
    /// Wrap a bus subscription that expires after `timeout`.
    pub fn new(receiver: broadcast::Receiver<Frame>, timeout: Duration) -> Self {
        Self {
            frames: BroadcastStream::new(receiver),
            deadline: Box::pin(sleep_until(deadline_after(timeout))),
            done: false,
        }
    }

    /// Rearm the deadline to `timeout` from now.
    ///
    /// Calling this on every frame of interest turns the timeout into an idle
    /// budget rather than a total one.
    pub fn reset_timeout(&mut self, timeout: Duration) {
        self.deadline.as_mut().reset(deadline_after(timeout));
    }

    /// Next frame, or `None` once the stream has ended.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.next().await
    }

    /// True once the deadline passed or the bus closed.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        // Drain ready frames before looking at the clock
        loop {
            match this.frames.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(frame))) => return Poll::Ready(Some(frame)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "Frame subscriber lagged, frames dropped");
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            this.done = true;
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}
