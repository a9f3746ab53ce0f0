//! # Session Handshake
//!
//! Three-message nonce exchange that must complete before any application
//! traffic is allowed:
//!
//! ```text
//! initiator                          responder
//!   IDLE                               IDLE
//!   INIT_SENT   ── HANDSHAKE_INIT ──▶  AWAITING_COMPLETE
//!   ACK_RECEIVED ◀── HANDSHAKE_ACK ──
//!   CONNECTED   ── HANDSHAKE_COMPLETE ▶ CONNECTED
//! ```
//!
//! Any nonce mismatch, rejected handshake envelope or timeout moves a
//! non-terminal session to FAILED. FAILED is never retried automatically.

// Semantic submodules
mod coordinator;
mod types;

// Re-export public API
pub use coordinator::HandshakeCoordinator;
pub use types::{HandshakeState, HandshakeStep, Role};
