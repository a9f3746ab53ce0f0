//! # Bridge Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Engine pairs and a hand-driven peer
//! └── integration/
//!     ├── handshake.rs  # Nonce exchange, failures, stickiness
//!     ├── requests.rs   # Correlation, timeouts, handlers
//!     ├── pubsub.rs     # Subscribe/publish fan-out and channel errors
//!     └── security.rs   # Origin checks and transport stamping
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bridge-tests
//! cargo test -p bridge-tests integration::handshake::
//! ```

#![allow(dead_code)]

#[cfg(test)]
mod fixtures;
pub mod integration;
