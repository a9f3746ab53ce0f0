//! Cross-engine scenarios.

mod handshake;
mod pubsub;
mod requests;
mod security;
