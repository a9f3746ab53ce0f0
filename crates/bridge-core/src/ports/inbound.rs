//! # Driving Ports (Inbound API)
//!
//! Callback traits the application implements to take part in the session:
//! answering REQUESTs and receiving EVENTs.

use async_trait::async_trait;
use bridge_types::{BridgeError, Channel, ErrorKind, MessageId};
use serde_json::Value;
use std::future::Future;
use thiserror::Error;

/// A REQUEST delivered to a local handler.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub id: MessageId,
    pub channel: Channel,
    pub payload: Option<Value>,
    /// Transport-stamped origin of the requester.
    pub origin: String,
}

impl IncomingRequest {
    /// Decode the payload into a typed request.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError` with kind `MALFORMED_MESSAGE` on shape mismatch.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, HandlerError> {
        bridge_types::payload::decode_payload(self.payload.as_ref())
            .map_err(|e| HandlerError::with_kind(ErrorKind::MalformedMessage, e.to_string()))
    }
}

/// Failure returned by a request handler. Sent to the requester as ERROR.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::HandlerFailed, message)
    }

    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Answers REQUESTs on one channel.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: IncomingRequest) -> Result<Value, HandlerError>;
}

/// `RequestHandler` from an async closure.
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a `RequestHandler`.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(IncomingRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> RequestHandler for HandlerFn<F>
where
    F: Fn(IncomingRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, request: IncomingRequest) -> Result<Value, HandlerError> {
        (self.0)(request).await
    }
}

/// Failure reported by a subscriber callback. Logged, never propagated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Subscriber callback failed: {0}")]
pub struct CallbackError(pub String);

/// Receives EVENTs for a subscription.
///
/// Called from the engine task: implementations must not block.
pub trait EventSink: Send + Sync {
    fn on_event(&self, channel: &Channel, payload: &Value) -> Result<(), CallbackError>;

    /// Channel-scoped ERROR from the peer, or session teardown.
    fn on_error(&self, _channel: &Channel, _error: &BridgeError) {}
}

/// `EventSink` from a closure. Errors are ignored.
pub struct SinkFn<F>(F);

/// Wrap a closure as an `EventSink`.
pub fn sink_fn<F>(f: F) -> SinkFn<F>
where
    F: Fn(&Channel, &Value) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    SinkFn(f)
}

impl<F> EventSink for SinkFn<F>
where
    F: Fn(&Channel, &Value) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    fn on_event(&self, channel: &Channel, payload: &Value) -> Result<(), CallbackError> {
        (self.0)(channel, payload)
    }
}
