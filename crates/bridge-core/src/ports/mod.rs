//! # Ports Layer
//!
//! - **Driving Ports (Inbound):** callbacks the application plugs in
//! - **Driven Ports (Outbound):** what the bridge needs from its environment

pub mod inbound;
pub mod outbound;

pub use inbound::{
    handler_fn, sink_fn, CallbackError, EventSink, HandlerError, HandlerFn, IncomingRequest,
    RequestHandler, SinkFn,
};
pub use outbound::{
    ManualClock, PlatformPort, RawMessage, SystemTimeSource, TimeSource, TransportError,
};
