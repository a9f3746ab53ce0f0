//! Engine construction.

use super::engine::{ProtocolEngine, SessionSnapshot};
use super::handle::BridgeHandle;
use crate::adapters::transport::TransportAdapter;
use crate::domain::config::{BridgeConfig, ConfigError};
use crate::domain::diagnostics::{DiagnosticEvent, DiagnosticHook, Diagnostics};
use crate::domain::handshake::HandshakeState;
use crate::ports::outbound::{PlatformPort, SystemTimeSource, TimeSource, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::info;
use uuid::Uuid;

/// Errors starting an engine.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot listen on platform port: {0}")]
    Transport(#[from] TransportError),
}

/// Builds a `ProtocolEngine` and its `BridgeHandle`.
///
/// ```rust,ignore
/// let (host_window, _client_window) = MemoryWindow::pair(HOST, CLIENT);
/// let host = BridgeBuilder::new(BridgeConfig::for_peer(CLIENT), Arc::new(host_window))
///     .spawn()?;
/// host.connect().await?;
/// ```
pub struct BridgeBuilder {
    config: BridgeConfig,
    platform: Arc<dyn PlatformPort>,
    clock: Arc<dyn TimeSource>,
    hook: Option<DiagnosticHook>,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig, platform: Arc<dyn PlatformPort>) -> Self {
        Self {
            config,
            platform,
            clock: Arc::new(SystemTimeSource),
            hook: None,
        }
    }

    /// Clock used to stamp outgoing envelopes.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Observe every rejected envelope and protocol anomaly.
    #[must_use]
    pub fn diagnostic_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Validate the config, register the platform listener and return the
    /// engine without starting it.
    ///
    /// # Errors
    ///
    /// `StartError::Config` or `StartError::Transport`.
    pub fn build(self) -> Result<(ProtocolEngine, BridgeHandle), StartError> {
        self.config.validate()?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.platform.listen(inbound_tx)?;

        let diagnostics = Arc::new(Diagnostics::default());
        let session_id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot {
            session_id,
            state: HandshakeState::Idle,
            peer_origin: None,
            failure: None,
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let transport = TransportAdapter::new(
            Arc::clone(&self.platform),
            self.clock,
            &self.config,
            Arc::clone(&diagnostics),
            self.hook.clone(),
        );

        info!(
            origin = %self.platform.local_origin(),
            target_origin = %self.config.target_origin,
            trusted = ?self.config.trusted_origins(),
            "Bridge configured"
        );

        let engine = ProtocolEngine::new(
            self.config,
            transport,
            Arc::clone(&diagnostics),
            self.hook,
            state_tx,
            command_rx,
            inbound_rx,
            session_id,
        );
        let handle = BridgeHandle::new(command_tx, state_rx, diagnostics);
        Ok((engine, handle))
    }

    /// Build and spawn the engine on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// See `build`.
    pub fn spawn(self) -> Result<BridgeHandle, StartError> {
        let (engine, handle) = self.build()?;
        tokio::spawn(engine.run());
        Ok(handle)
    }
}
