//! # Domain Layer
//!
//! Session logic with no I/O: every type here is driven by the engine loop
//! and tested in isolation.

pub mod config;
pub mod correlation;
pub mod diagnostics;
pub mod handshake;
pub mod origin;
pub mod seen_ids;
pub mod subscription;

pub use config::{BridgeConfig, ConfigError};
pub use correlation::{CorrelationManager, PendingStats, RequestOutcome, Resolution};
pub use diagnostics::{Anomaly, DiagnosticEvent, DiagnosticHook, Diagnostics, DiagnosticsSnapshot};
pub use handshake::{HandshakeCoordinator, HandshakeState, HandshakeStep, Role};
pub use origin::{OriginValidator, TrustPolicy, Verdict};
pub use seen_ids::SeenIdCache;
pub use subscription::{DeliveryReport, SubscriptionId, SubscriptionRegistry};
