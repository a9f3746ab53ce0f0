//! # Bridge Handle
//!
//! The caller-facing API. Cheap to clone; every clone talks to the same
//! engine task. All operations are non-blocking: they enqueue a command and
//! await its deferred result.

use super::engine::{Command, SessionSnapshot};
use super::stream::{EventStream, ForwardingSink};
use crate::domain::correlation::RequestOutcome;
use crate::domain::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::domain::handshake::HandshakeState;
use crate::domain::subscription::SubscriptionId;
use crate::ports::inbound::{sink_fn, CallbackError, EventSink, RequestHandler};
use bridge_types::{BridgeError, Channel, ErrorKind, ErrorPayload, MessageId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

fn parse_channel(name: &str) -> Result<Channel, BridgeError> {
    Channel::parse(name).map_err(|e| BridgeError::Malformed(e.to_string()))
}

/// Handle to a running protocol engine.
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionSnapshot>,
    diagnostics: Arc<Diagnostics>,
    next_subscription: Arc<AtomicU64>,
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("session", &*self.state.borrow())
            .finish()
    }
}

impl BridgeHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<SessionSnapshot>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            commands,
            state,
            diagnostics,
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    fn send(&self, cmd: Command) -> Result<(), BridgeError> {
        self.commands
            .send(cmd)
            .map_err(|_| BridgeError::EngineStopped)
    }

    async fn call_engine<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))?;
        rx.await.map_err(|_| BridgeError::EngineStopped)
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Initiate the handshake and wait for the session to settle.
    ///
    /// # Errors
    ///
    /// `HandshakeTimeout` or `HandshakeFailed` when the session ends FAILED;
    /// the failure is final for this session.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        self.call_engine(|reply| Command::Connect { reply }).await??;
        self.wait_connected().await
    }

    /// Wait until the current session reaches CONNECTED or FAILED.
    ///
    /// # Errors
    ///
    /// The session's failure, or `EngineStopped`.
    pub async fn wait_connected(&self) -> Result<(), BridgeError> {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| BridgeError::EngineStopped)?
            .clone();

        match snapshot.state {
            HandshakeState::Connected => Ok(()),
            _ => Err(snapshot.failure.unwrap_or(BridgeError::HandshakeFailed {
                reason: "session failed".into(),
            })),
        }
    }

    /// Tear down the current session and start a fresh IDLE one.
    ///
    /// # Errors
    ///
    /// `EngineStopped`.
    pub async fn reset(&self) -> Result<(), BridgeError> {
        self.call_engine(|reply| Command::Reset { reply }).await
    }

    /// Stop the engine. Pending work fails with `ENGINE_STOPPED`.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Current session snapshot.
    #[must_use]
    pub fn state(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Watch session changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send a REQUEST with the default timeout and await its answer.
    ///
    /// # Errors
    ///
    /// `SessionNotConnected` (nothing is sent), `RequestTimeout`, or the
    /// peer's ERROR as `Remote`.
    pub async fn request(&self, channel: &str, payload: Value) -> RequestOutcome {
        self.request_inner(channel, payload, None).await
    }

    /// Like `request` with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See `request`.
    pub async fn request_with_timeout(
        &self,
        channel: &str,
        payload: Value,
        timeout: Duration,
    ) -> RequestOutcome {
        self.request_inner(channel, payload, Some(timeout)).await
    }

    async fn request_inner(
        &self,
        channel: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> RequestOutcome {
        let channel = parse_channel(channel)?;
        self.call_engine(|reply| Command::Request {
            id: MessageId::generate(),
            channel,
            payload,
            timeout,
            reply,
        })
        .await?
    }

    /// Typed request through serde.
    ///
    /// # Errors
    ///
    /// Errors of `request`, plus `Malformed` when either side does not
    /// (de)serialize.
    pub async fn call<Req, Resp>(
        &self,
        channel: &str,
        request: &Req,
        timeout: Option<Duration>,
    ) -> Result<Resp, BridgeError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload =
            serde_json::to_value(request).map_err(|e| BridgeError::Malformed(e.to_string()))?;
        let value = self.request_inner(channel, payload, timeout).await?;
        serde_json::from_value(value).map_err(|e| BridgeError::Malformed(e.to_string()))
    }

    /// Answer REQUESTs on `channel`. Replaces any previous handler.
    ///
    /// # Errors
    ///
    /// `Malformed` for an invalid channel name, `EngineStopped`.
    pub fn register_handler(
        &self,
        channel: &str,
        handler: impl RequestHandler + 'static,
    ) -> Result<(), BridgeError> {
        let channel = parse_channel(channel)?;
        self.send(Command::RegisterHandler {
            channel,
            handler: Arc::new(handler),
        })
    }

    /// # Errors
    ///
    /// `Malformed` for an invalid channel name, `EngineStopped`.
    pub fn unregister_handler(&self, channel: &str) -> Result<(), BridgeError> {
        let channel = parse_channel(channel)?;
        self.send(Command::UnregisterHandler { channel })
    }

    // =========================================================================
    // Publish / subscribe
    // =========================================================================

    /// Subscribe `sink` to EVENTs on `channel`.
    ///
    /// # Errors
    ///
    /// `SessionNotConnected`, `Malformed` channel, `EngineStopped`.
    pub async fn subscribe(
        &self,
        channel: &str,
        sink: impl EventSink + 'static,
    ) -> Result<Subscription, BridgeError> {
        self.subscribe_sink(parse_channel(channel)?, Arc::new(sink))
            .await
    }

    /// Subscribe a closure to EVENTs on `channel`.
    ///
    /// # Errors
    ///
    /// See `subscribe`.
    pub async fn subscribe_fn<F>(&self, channel: &str, on_event: F) -> Result<Subscription, BridgeError>
    where
        F: Fn(&Channel, &Value) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.subscribe(channel, sink_fn(on_event)).await
    }

    /// Subscribe and receive EVENT payloads as a stream.
    ///
    /// # Errors
    ///
    /// See `subscribe`.
    pub async fn subscribe_stream(&self, channel: &str) -> Result<EventStream, BridgeError> {
        let (sink, receiver) = ForwardingSink::new();
        let subscription = self
            .subscribe_sink(parse_channel(channel)?, Arc::new(sink))
            .await?;
        Ok(EventStream::new(subscription, receiver))
    }

    async fn subscribe_sink(
        &self,
        channel: Channel,
        sink: Arc<dyn EventSink>,
    ) -> Result<Subscription, BridgeError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let active = Arc::new(AtomicBool::new(true));

        let subscribe_channel = channel.clone();
        let subscribe_active = Arc::clone(&active);
        self.call_engine(|reply| Command::Subscribe {
            id,
            channel: subscribe_channel,
            sink,
            active: subscribe_active,
            reply,
        })
        .await??;

        Ok(Subscription {
            id,
            channel,
            active,
            commands: self.commands.clone(),
        })
    }

    /// Stop local delivery for `subscription`. Idempotent.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    /// Send an EVENT if the peer subscribed to `channel`.
    ///
    /// Returns whether anything was sent.
    ///
    /// # Errors
    ///
    /// `SessionNotConnected`, `Malformed` channel, `Transport`.
    pub async fn publish(&self, channel: &str, payload: Value) -> Result<bool, BridgeError> {
        let channel = parse_channel(channel)?;
        self.call_engine(|reply| Command::Publish {
            channel,
            payload,
            reply,
        })
        .await?
    }

    /// Send a channel-scoped ERROR to the peer's subscribers of `channel`.
    ///
    /// # Errors
    ///
    /// See `publish`.
    pub async fn publish_error(
        &self,
        channel: &str,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<bool, BridgeError> {
        let channel = parse_channel(channel)?;
        let error = ErrorPayload::new(kind, message);
        self.call_engine(|reply| Command::PublishError {
            channel,
            error,
            reply,
        })
        .await?
    }
}

/// A local subscription.
///
/// Dropping it does not unsubscribe; call `unsubscribe` (an `EventStream`
/// does this on drop).
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    channel: Channel,
    active: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// False after `unsubscribe` or session teardown.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// No local callback runs after this returns. Idempotent.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!(subscription = %self.id, channel = %self.channel, "Unsubscribing");
        }
        // The engine may still hold the entry after a teardown cleared the flag.
        let _ = self.commands.send(Command::Unsubscribe { id: self.id });
    }
}
