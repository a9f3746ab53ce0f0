//! # Bridge Core
//!
//! A secure message bridge between a host window and an embedded client
//! window that talk over an origin-tagged message port.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        BridgeHandle                          │
//! │   connect · request · call · subscribe · publish · reset     │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ Command (mpsc)
//! ┌───────────────────────────┴──────────────────────────────────┐
//! │                      ProtocolEngine task                     │
//! │  HandshakeCoordinator · CorrelationManager · Subscriptions   │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │
//! ┌───────────────────────────┴──────────────────────────────────┐
//! │   TransportAdapter: origin check → decode → stamp → validate │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │
//!                     PlatformPort (postMessage-like)
//! ```
//!
//! # Security
//!
//! - Envelope `origin`/`timestamp` come from the platform, never the sender
//! - Rejected envelopes are dropped without reply and only reach diagnostics
//! - After the handshake, trust narrows to the single pinned peer origin
//! - Handshake nonces are random per session and must be echoed exactly
//!
//! # Usage
//!
//! ```ignore
//! use bridge_core::{BridgeBuilder, BridgeConfig, MemoryWindow};
//!
//! let (host_window, client_window) = MemoryWindow::pair(HOST, CLIENT);
//! let host = BridgeBuilder::new(BridgeConfig::for_peer(CLIENT), Arc::new(host_window)).spawn()?;
//! let client = BridgeBuilder::new(BridgeConfig::for_peer(HOST), Arc::new(client_window)).spawn()?;
//!
//! host.connect().await?;
//! let status = host.request("xmc.publishing.status", json!({})).await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{Inbound, MemoryWindow, PostedMessage, TransportAdapter};
pub use domain::{
    Anomaly, BridgeConfig, ConfigError, DiagnosticEvent, DiagnosticsSnapshot, HandshakeState,
    SubscriptionId,
};
pub use ports::{
    handler_fn, sink_fn, CallbackError, EventSink, HandlerError, IncomingRequest, ManualClock,
    PlatformPort, RawMessage, RequestHandler, SystemTimeSource, TimeSource, TransportError,
};
pub use service::{
    BridgeBuilder, BridgeHandle, EventStream, SessionSnapshot, StartError, StreamItem,
    Subscription,
};

pub use bridge_types::{BridgeError, Channel, Envelope, ErrorKind, MessageId, MessageType};
