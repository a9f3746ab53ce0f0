//! # Bridge Types Crate
//!
//! The wire contract between a host window and an embedded client window.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Every type that crosses the context boundary
//!   is defined here and shared by both peers.
//! - **Transport Authority**: `Envelope::origin` and `Envelope::timestamp` are
//!   receiver-stamped; nothing in a payload may claim an identity.
//! - **Typed Failures**: `ErrorKind` is the wire taxonomy; `BridgeError` is
//!   the caller-facing error built from it.

pub mod channel;
pub mod envelope;
pub mod errors;
pub mod payload;

pub use channel::{Channel, ChannelError};
pub use envelope::{Envelope, MessageId, MessageType};
pub use errors::{BridgeError, ErrorKind, RejectReason, ShapeError};
pub use payload::{ErrorPayload, HandshakeAck, HandshakeComplete, HandshakeInit};

/// Current handshake protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Oldest protocol version this build can talk to.
pub const MIN_PROTOCOL_VERSION: u16 = 1;

/// Target origin hint meaning "any receiver".
pub const ANY_ORIGIN: &str = "*";
