//! # Protocol Engine
//!
//! One task per session owns every piece of mutable protocol state. Three
//! sources feed it, multiplexed in a single `select!` loop:
//!
//! ```text
//!   BridgeHandle ──Command──┐
//!   PlatformPort ──RawMessage──► ProtocolEngine ──► TransportAdapter ──► peer
//!   timers (handshake + request deadlines) ─┘
//! ```
//!
//! Request handlers run in spawned tasks and hand their results back through
//! a dedicated channel, so a handler can itself issue requests without
//! stalling the loop.

use crate::adapters::transport::{Inbound, TransportAdapter};
use crate::domain::config::BridgeConfig;
use crate::domain::correlation::{CorrelationManager, RequestOutcome, Resolution};
use crate::domain::diagnostics::{Anomaly, DiagnosticEvent, DiagnosticHook, Diagnostics};
use crate::domain::handshake::{HandshakeCoordinator, HandshakeState, HandshakeStep};
use crate::domain::seen_ids::SeenIdCache;
use crate::domain::subscription::{SubscriptionId, SubscriptionRegistry};
use crate::ports::inbound::{EventSink, HandlerError, IncomingRequest, RequestHandler};
use crate::ports::outbound::{RawMessage, TransportError};
use bridge_types::{
    BridgeError, Channel, Envelope, ErrorKind, ErrorPayload, MessageId, MessageType,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: HandshakeState,
    /// Pinned peer origin once CONNECTED.
    pub peer_origin: Option<String>,
    /// Why the session failed, once FAILED.
    pub failure: Option<BridgeError>,
}

/// Work sent from a `BridgeHandle` to the engine.
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Request {
        id: MessageId,
        channel: Channel,
        payload: Value,
        timeout: Option<Duration>,
        reply: oneshot::Sender<RequestOutcome>,
    },
    Subscribe {
        id: SubscriptionId,
        channel: Channel,
        sink: Arc<dyn EventSink>,
        active: Arc<AtomicBool>,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Publish {
        channel: Channel,
        payload: Value,
        reply: oneshot::Sender<Result<bool, BridgeError>>,
    },
    PublishError {
        channel: Channel,
        error: ErrorPayload,
        reply: oneshot::Sender<Result<bool, BridgeError>>,
    },
    RegisterHandler {
        channel: Channel,
        handler: Arc<dyn RequestHandler>,
    },
    UnregisterHandler {
        channel: Channel,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// A handler result coming back from its task.
struct HandlerReply {
    session_id: Uuid,
    request_id: MessageId,
    channel: Channel,
    result: Result<Value, HandlerError>,
}

/// The per-session event loop.
pub struct ProtocolEngine {
    config: BridgeConfig,
    session_id: Uuid,
    transport: TransportAdapter,
    handshake: HandshakeCoordinator,
    correlation: CorrelationManager,
    subscriptions: SubscriptionRegistry,
    /// Peer envelope ids seen this session.
    seen_ids: SeenIdCache,
    handlers: HashMap<Channel, Arc<dyn RequestHandler>>,
    diagnostics: Arc<Diagnostics>,
    hook: Option<DiagnosticHook>,
    state_tx: watch::Sender<SessionSnapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedReceiver<RawMessage>,
    inbound_open: bool,
    replies_tx: mpsc::UnboundedSender<HandlerReply>,
    replies: mpsc::UnboundedReceiver<HandlerReply>,
}

impl ProtocolEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: BridgeConfig,
        transport: TransportAdapter,
        diagnostics: Arc<Diagnostics>,
        hook: Option<DiagnosticHook>,
        state_tx: watch::Sender<SessionSnapshot>,
        commands: mpsc::UnboundedReceiver<Command>,
        inbound: mpsc::UnboundedReceiver<RawMessage>,
        session_id: Uuid,
    ) -> Self {
        let (replies_tx, replies) = mpsc::unbounded_channel();
        Self {
            handshake: HandshakeCoordinator::new(config.handshake_timeout()),
            correlation: CorrelationManager::new(
                config.request_timeout(),
                config.seen_id_window_ms,
                config.seen_id_capacity,
            ),
            subscriptions: SubscriptionRegistry::new(),
            seen_ids: SeenIdCache::new(config.seen_id_window_ms, config.seen_id_capacity),
            handlers: HashMap::new(),
            config,
            session_id,
            transport,
            diagnostics,
            hook,
            state_tx,
            commands,
            inbound,
            inbound_open: true,
            replies_tx,
            replies,
        }
    }

    /// Run until `Shutdown` or until every handle is dropped.
    pub async fn run(mut self) {
        info!(
            session = %self.session_id,
            origin = %self.transport.local_origin(),
            "Bridge engine started"
        );

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },

                Some(reply) = self.replies.recv() => self.on_handler_reply(reply),

                raw = self.inbound.recv(), if self.inbound_open => match raw {
                    Some(raw) => self.on_raw(raw),
                    None => self.on_transport_closed(),
                },

                () = sleep_until(deadline) => self.on_timer(),
            }
        }

        self.teardown(&BridgeError::EngineStopped);
        self.handshake.abort(BridgeError::EngineStopped);
        self.publish_state();
        info!(session = %self.session_id, "Bridge engine stopped");
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn next_deadline(&self) -> Option<Instant> {
        match (self.handshake.deadline(), self.correlation.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_timer(&mut self) {
        let now = Instant::now();
        if let Some(err) = self.handshake.on_timer(now) {
            self.on_handshake_failed(&err);
        }
        let expired = self.correlation.expire(now);
        if expired > 0 {
            Diagnostics::incr(&self.diagnostics.request_timeouts, expired as u64);
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn on_raw(&mut self, raw: RawMessage) {
        match self.transport.receive(raw) {
            Inbound::Accepted(envelope) => self.route(envelope),
            Inbound::Rejected { reason, kind } => {
                if kind.is_some_and(MessageType::is_handshake) {
                    if let Some(err) = self.handshake.on_rejected(reason) {
                        self.on_handshake_failed(&err);
                    }
                }
            }
        }
    }

    fn route(&mut self, envelope: Envelope) {
        if !self.seen_ids.insert(&envelope.id, envelope.timestamp) {
            self.anomaly(
                Anomaly::DuplicateId,
                Some(&envelope.id),
                format!("{} reused an envelope id", envelope.kind),
            );
            return;
        }

        if envelope.kind.is_handshake() {
            self.on_handshake_envelope(&envelope);
            return;
        }

        if self.handshake.state() != HandshakeState::Connected {
            self.anomaly(
                Anomaly::NotConnected,
                Some(&envelope.id),
                format!("{} while {}", envelope.kind, self.handshake.state()),
            );
            return;
        }

        match envelope.kind {
            MessageType::Request => self.on_request(envelope),
            MessageType::Response => self.on_response(envelope),
            MessageType::Error => self.on_error_envelope(envelope),
            MessageType::Event => self.on_event(&envelope),
            MessageType::Subscribe => self.on_remote_subscribe(&envelope),
            MessageType::Unsubscribe => self.on_remote_unsubscribe(&envelope),
            MessageType::HandshakeInit
            | MessageType::HandshakeAck
            | MessageType::HandshakeComplete => {}
        }
    }

    fn on_handshake_envelope(&mut self, envelope: &Envelope) {
        match self.handshake.on_envelope(envelope, Instant::now()) {
            HandshakeStep::Send(reply) => {
                // Answer exactly the origin that sent the INIT.
                if let Err(e) = self.transport.send_to(reply, &envelope.origin) {
                    self.on_send_failed(&e);
                    self.handshake.abort(BridgeError::Transport(e.to_string()));
                }
                self.publish_state();
            }
            HandshakeStep::Connected { peer_origin, reply } => {
                self.transport.pin(&peer_origin);
                if let Some(reply) = reply {
                    if let Err(e) = self.transport.send(reply) {
                        self.on_send_failed(&e);
                    }
                }
                info!(
                    session = %self.session_id,
                    peer = %peer_origin,
                    role = ?self.handshake.role(),
                    "Session connected"
                );
                self.publish_state();
            }
            HandshakeStep::Failed(err) => self.on_handshake_failed(&err),
            HandshakeStep::Ignored(why) => {
                self.anomaly(
                    Anomaly::UnexpectedHandshake,
                    Some(&envelope.id),
                    why.to_string(),
                );
            }
        }
    }

    fn on_request(&mut self, envelope: Envelope) {
        let Some(channel) = envelope.channel else {
            return;
        };

        let Some(handler) = self.handlers.get(&channel).map(Arc::clone) else {
            debug!(channel = %channel, envelope_id = %envelope.id, "No handler for channel");
            let error = ErrorPayload::new(
                ErrorKind::NoHandler,
                format!("no handler registered for {channel}"),
            );
            self.send_error_reply(&envelope.id, &channel, &error);
            return;
        };

        let request = IncomingRequest {
            id: envelope.id.clone(),
            channel: channel.clone(),
            payload: envelope.payload,
            origin: envelope.origin,
        };
        let replies = self.replies_tx.clone();
        let session_id = self.session_id;
        let request_id = envelope.id;

        tokio::spawn(async move {
            let task = tokio::spawn(async move { handler.handle(request).await });
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(HandlerError::new(format!("handler aborted: {e}"))),
            };
            let _ = replies.send(HandlerReply {
                session_id,
                request_id,
                channel,
                result,
            });
        });
    }

    fn on_handler_reply(&mut self, reply: HandlerReply) {
        if reply.session_id != self.session_id
            || self.handshake.state() != HandshakeState::Connected
        {
            debug!(
                correlation_id = %reply.request_id,
                channel = %reply.channel,
                "Handler finished after its session ended, dropping reply"
            );
            return;
        }

        Diagnostics::incr(&self.diagnostics.requests_served, 1);
        match reply.result {
            Ok(payload) => {
                let mut response = Envelope::new(MessageType::Response)
                    .with_correlation(reply.request_id)
                    .with_payload(payload);
                response.channel = Some(reply.channel);
                if let Err(e) = self.transport.send(response) {
                    self.on_send_failed(&e);
                }
            }
            Err(e) => {
                warn!(
                    correlation_id = %reply.request_id,
                    channel = %reply.channel,
                    error = %e,
                    "Request handler failed"
                );
                let error = ErrorPayload::new(e.kind, e.message);
                self.send_error_reply(&reply.request_id, &reply.channel, &error);
            }
        }
    }

    fn on_response(&mut self, envelope: Envelope) {
        let Some(correlation_id) = envelope.correlation_id else {
            return;
        };
        let outcome = Ok(envelope.payload.unwrap_or(Value::Null));
        self.settle(&correlation_id, outcome);
    }

    fn on_error_envelope(&mut self, envelope: Envelope) {
        let error = ErrorPayload::from_value(envelope.payload.as_ref()).into_error();

        if let Some(correlation_id) = envelope.correlation_id {
            self.settle(&correlation_id, Err(error));
            return;
        }

        // Channel-scoped: every subscriber of the channel hears about it.
        if let Some(channel) = envelope.channel {
            let report = self.subscriptions.dispatch_error(&channel, &error);
            if report.delivered + report.failed == 0 {
                self.anomaly(
                    Anomaly::UnroutableError,
                    Some(&envelope.id),
                    format!("ERROR on {channel} without local subscribers"),
                );
            }
            Diagnostics::incr(&self.diagnostics.callback_failures, report.failed as u64);
        }
    }

    fn settle(&mut self, correlation_id: &MessageId, outcome: RequestOutcome) {
        match self.correlation.resolve(correlation_id, outcome, Instant::now()) {
            Resolution::Delivered | Resolution::ReceiverDropped => {
                Diagnostics::incr(&self.diagnostics.responses_matched, 1);
            }
            Resolution::Late => self.anomaly(
                Anomaly::LateResponse,
                Some(correlation_id),
                "answer for a settled request".into(),
            ),
            Resolution::Unknown => self.anomaly(
                Anomaly::UnknownCorrelation,
                Some(correlation_id),
                "answer for an unknown request".into(),
            ),
        }
    }

    fn on_event(&mut self, envelope: &Envelope) {
        let Some(channel) = &envelope.channel else {
            return;
        };
        let payload = envelope.payload.clone().unwrap_or(Value::Null);
        let report = self.subscriptions.dispatch(channel, &payload);
        Diagnostics::incr(&self.diagnostics.events_delivered, report.delivered as u64);
        Diagnostics::incr(&self.diagnostics.callback_failures, report.failed as u64);
    }

    fn on_remote_subscribe(&mut self, envelope: &Envelope) {
        if let Some(channel) = &envelope.channel {
            if self.subscriptions.add_remote(channel.clone()) {
                debug!(channel = %channel, "Peer subscribed");
            }
        }
    }

    fn on_remote_unsubscribe(&mut self, envelope: &Envelope) {
        if let Some(channel) = &envelope.channel {
            if self.subscriptions.remove_remote(channel) {
                debug!(channel = %channel, "Peer unsubscribed");
            }
        }
    }

    fn on_transport_closed(&mut self) {
        self.inbound_open = false;
        warn!(session = %self.session_id, "Platform channel closed, peer unreachable");
        let err = BridgeError::Transport(TransportError::Closed.to_string());
        self.teardown(&err);
        self.handshake.abort(err);
        self.publish_state();
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => {
                let _ = reply.send(self.connect());
            }
            Command::Request {
                id,
                channel,
                payload,
                timeout,
                reply,
            } => self.request(id, channel, payload, timeout, reply),
            Command::Subscribe {
                id,
                channel,
                sink,
                active,
                reply,
            } => {
                let _ = reply.send(self.subscribe(id, channel, sink, active));
            }
            Command::Unsubscribe { id } => self.unsubscribe(id),
            Command::Publish {
                channel,
                payload,
                reply,
            } => {
                let _ = reply.send(self.publish(Envelope::event(channel, payload)));
            }
            Command::PublishError {
                channel,
                error,
                reply,
            } => {
                let envelope = Envelope::new(MessageType::Error)
                    .with_channel(channel)
                    .with_payload(error.to_value());
                let _ = reply.send(self.publish(envelope));
            }
            Command::RegisterHandler { channel, handler } => {
                if self.handlers.insert(channel.clone(), handler).is_some() {
                    debug!(channel = %channel, "Request handler replaced");
                } else {
                    debug!(channel = %channel, "Request handler registered");
                }
            }
            Command::UnregisterHandler { channel } => {
                if self.handlers.remove(&channel).is_some() {
                    debug!(channel = %channel, "Request handler removed");
                }
            }
            Command::Reset { reply } => {
                self.reset();
                let _ = reply.send(());
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self) -> Result<(), BridgeError> {
        match self.handshake.state() {
            HandshakeState::Idle => {}
            HandshakeState::Failed => {
                return Err(self.handshake.failure().cloned().unwrap_or_else(|| {
                    BridgeError::HandshakeFailed {
                        reason: "session failed".into(),
                    }
                }));
            }
            // Already connected or in progress: the caller waits on state.
            _ => return Ok(()),
        }

        let init = self.handshake.initiate(Instant::now())?;
        info!(session = %self.session_id, "Initiating handshake");
        if let Err(e) = self.transport.send(init) {
            self.on_send_failed(&e);
            let err = BridgeError::Transport(e.to_string());
            self.handshake.abort(err.clone());
            self.publish_state();
            return Err(err);
        }
        self.publish_state();
        Ok(())
    }

    fn request(
        &mut self,
        id: MessageId,
        channel: Channel,
        payload: Value,
        timeout: Option<Duration>,
        reply: oneshot::Sender<RequestOutcome>,
    ) {
        if let Err(err) = self.require_connected() {
            debug!(channel = %channel, "Request refused, session not connected");
            let _ = reply.send(Err(err));
            return;
        }

        let envelope = Envelope::request(channel.clone(), payload).with_id(id.clone());
        if self
            .correlation
            .register(id.clone(), channel, reply, timeout, Instant::now())
            .is_err()
        {
            return;
        }

        match self.transport.send(envelope) {
            Ok(()) => Diagnostics::incr(&self.diagnostics.requests_sent, 1),
            Err(e) => {
                self.on_send_failed(&e);
                self.correlation.resolve(
                    &id,
                    Err(BridgeError::Transport(e.to_string())),
                    Instant::now(),
                );
            }
        }
    }

    fn subscribe(
        &mut self,
        id: SubscriptionId,
        channel: Channel,
        sink: Arc<dyn EventSink>,
        active: Arc<AtomicBool>,
    ) -> Result<(), BridgeError> {
        self.require_connected()?;

        if self.subscriptions.add(id, channel.clone(), sink, active) {
            let envelope = Envelope::new(MessageType::Subscribe).with_channel(channel);
            if let Err(e) = self.transport.send(envelope) {
                self.on_send_failed(&e);
                self.subscriptions.remove(id);
                return Err(BridgeError::Transport(e.to_string()));
            }
        }
        Ok(())
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        let Some(channel) = self.subscriptions.remove(id) else {
            return;
        };
        if self.handshake.state() != HandshakeState::Connected {
            return;
        }
        let envelope = Envelope::new(MessageType::Unsubscribe).with_channel(channel);
        if let Err(e) = self.transport.send(envelope) {
            self.on_send_failed(&e);
        }
    }

    /// Send an EVENT or channel ERROR if the peer subscribed to its channel.
    fn publish(&mut self, envelope: Envelope) -> Result<bool, BridgeError> {
        self.require_connected()?;

        let Some(channel) = envelope.channel.as_ref() else {
            return Ok(false);
        };
        if !self.subscriptions.peer_subscribed(channel) {
            debug!(channel = %channel, "Peer not subscribed, nothing published");
            return Ok(false);
        }

        self.transport.send(envelope).map_err(|e| {
            self.on_send_failed(&e);
            BridgeError::Transport(e.to_string())
        })?;
        Diagnostics::incr(&self.diagnostics.events_published, 1);
        Ok(true)
    }

    fn reset(&mut self) {
        let previous = self.session_id;
        self.teardown(&BridgeError::not_connected(HandshakeState::Idle));

        self.session_id = Uuid::new_v4();
        self.handshake = HandshakeCoordinator::new(self.config.handshake_timeout());
        self.transport.reset();
        self.seen_ids.clear();
        self.correlation.clear_settled();

        info!(previous = %previous, session = %self.session_id, "Session reset");
        self.publish_state();
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_connected(&self) -> Result<(), BridgeError> {
        match self.handshake.state() {
            HandshakeState::Connected => Ok(()),
            state => Err(BridgeError::not_connected(state)),
        }
    }

    /// Fail pending requests and drop all subscriptions.
    fn teardown(&mut self, error: &BridgeError) {
        self.correlation.fail_all(error, Instant::now());
        self.subscriptions.fail_all(error);
        self.subscriptions.clear_remote();
    }

    fn on_handshake_failed(&mut self, error: &BridgeError) {
        warn!(session = %self.session_id, error = %error, "Session failed");
        self.teardown(error);
        self.publish_state();
    }

    fn send_error_reply(&mut self, request_id: &MessageId, channel: &Channel, error: &ErrorPayload) {
        let envelope = Envelope::new(MessageType::Error)
            .with_correlation(request_id.clone())
            .with_channel(channel.clone())
            .with_payload(error.to_value());
        if let Err(e) = self.transport.send(envelope) {
            self.on_send_failed(&e);
        }
    }

    fn on_send_failed(&self, error: &TransportError) {
        self.anomaly(Anomaly::SendFailed, None, error.to_string());
    }

    fn anomaly(&self, anomaly: Anomaly, envelope_id: Option<&MessageId>, detail: String) {
        warn!(
            session = %self.session_id,
            anomaly = %anomaly,
            envelope_id = envelope_id.map(MessageId::as_str),
            detail = %detail,
            "Protocol anomaly"
        );
        self.diagnostics.record_anomaly(anomaly);
        if let Some(hook) = &self.hook {
            hook(&DiagnosticEvent::Anomaly {
                anomaly,
                envelope_id: envelope_id.cloned(),
                detail,
            });
        }
    }

    fn publish_state(&self) {
        let snapshot = SessionSnapshot {
            session_id: self.session_id,
            state: self.handshake.state(),
            peer_origin: self.transport.pinned_origin().map(str::to_string),
            failure: self.handshake.failure().cloned(),
        };
        self.state_tx.send_replace(snapshot);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
