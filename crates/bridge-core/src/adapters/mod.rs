//! # Adapters Layer
//!
//! - `transport`: validation and stamping around any `PlatformPort`
//! - `memory`: an in-process window pair implementing `PlatformPort`

pub mod memory;
pub mod transport;

pub use memory::{MemoryWindow, PostedMessage};
pub use transport::{Inbound, TransportAdapter};
