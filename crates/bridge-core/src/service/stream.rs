//! Stream adapter for subscriptions.

use super::handle::Subscription;
use crate::ports::inbound::{CallbackError, EventSink};
use bridge_types::{BridgeError, Channel};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// One item of an `EventStream`.
pub type StreamItem = Result<Value, BridgeError>;

/// `EventSink` that forwards into an unbounded channel.
pub(crate) struct ForwardingSink {
    tx: mpsc::UnboundedSender<StreamItem>,
}

impl ForwardingSink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<StreamItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ForwardingSink {
    fn on_event(&self, _channel: &Channel, payload: &Value) -> Result<(), CallbackError> {
        self.tx
            .send(Ok(payload.clone()))
            .map_err(|_| CallbackError("stream receiver dropped".into()))
    }

    fn on_error(&self, _channel: &Channel, error: &BridgeError) {
        let _ = self.tx.send(Err(error.clone()));
    }
}

/// EVENT payloads of one subscription as a `tokio_stream::Stream`.
///
/// Channel ERRORs arrive as `Err` items. The stream ends when the session
/// tears the subscription down. Dropping the stream unsubscribes.
#[derive(Debug)]
pub struct EventStream {
    subscription: Subscription,
    receiver: mpsc::UnboundedReceiver<StreamItem>,
}

impl EventStream {
    pub(crate) fn new(
        subscription: Subscription,
        receiver: mpsc::UnboundedReceiver<StreamItem>,
    ) -> Self {
        Self {
            subscription,
            receiver,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        self.subscription.channel()
    }

    /// Receive the next item, `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.receiver.recv().await
    }
}

impl Stream for EventStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
