//! # Service Layer
//!
//! The protocol engine task and the handle callers use to drive it.

mod builder;
mod engine;
mod handle;
mod stream;

pub use builder::{BridgeBuilder, StartError};
pub use engine::{ProtocolEngine, SessionSnapshot};
pub use handle::{BridgeHandle, Subscription};
pub use stream::{EventStream, StreamItem};
