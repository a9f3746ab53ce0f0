//! # Handshake Scenarios
//!
//! INIT → ACK → COMPLETE between real engines and against a scripted peer
//! that gets the nonce exchange wrong.

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use bridge_core::{
        BridgeConfig, BridgeError, Envelope, ErrorKind, HandshakeState, MessageType, RawMessage,
        SystemTimeSource, TimeSource,
    };
    use bridge_types::payload::HandshakeInit;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    // =============================================================================
    // HAPPY PATH
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_two_round_trips_connect_both_sides() {
        let pair = EnginePair::connected().await;

        assert_eq!(
            posted_kinds(&pair.host_window),
            vec![MessageType::HandshakeInit, MessageType::HandshakeComplete]
        );
        assert_eq!(
            posted_kinds(&pair.client_window),
            vec![MessageType::HandshakeAck]
        );

        let host = pair.host.state();
        let client = pair.client.state();
        assert_eq!(host.state, HandshakeState::Connected);
        assert_eq!(client.state, HandshakeState::Connected);
        assert_eq!(host.peer_origin.as_deref(), Some(CLIENT));
        assert_eq!(client.peer_origin.as_deref(), Some(HOST));
        assert_ne!(host.session_id, client.session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_echoes_init_nonce() {
        let pair = EnginePair::connected().await;

        let posted = pair.host_window.outbox();
        let init = Envelope::decode(&posted[0].data).unwrap();
        let hello: HandshakeInit = serde_json::from_value(init.payload.unwrap()).unwrap();

        let ack = Envelope::decode(&pair.client_window.outbox()[0].data).unwrap();
        assert_eq!(ack.correlation_id, Some(init.id));
        assert_eq!(ack.payload.unwrap()["echo"], json!(hello.nonce.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_when_connected_is_noop() {
        let pair = EnginePair::connected().await;
        let before = pair.host_window.outbox().len();

        pair.host.connect().await.unwrap();
        pair.client.connect().await.unwrap();

        assert_eq!(pair.host_window.outbox().len(), before);
        assert_eq!(pair.client_window.outbox().len(), 1);
    }

    // =============================================================================
    // FAILURES
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_wrong_echo_fails_and_sticks() {
        let (host, _window, mut peer) = host_with_scripted_peer(BridgeConfig::for_peer(CLIENT));
        let connecting = {
            let host = host.clone();
            tokio::spawn(async move { host.connect().await })
        };

        let init = peer.expect(MessageType::HandshakeInit).await;
        peer.send(&handshake_ack(&init, Uuid::new_v4(), Uuid::new_v4()));

        let err = connecting.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandshakeFailed);
        assert_eq!(host.state().state, HandshakeState::Failed);

        // A correct ACK afterwards does not revive the session.
        let hello: HandshakeInit = serde_json::from_value(init.payload.clone().unwrap()).unwrap();
        peer.send(&handshake_ack(&init, hello.nonce, Uuid::new_v4()));
        assert!(peer.stays_quiet().await);
        assert_eq!(host.state().state, HandshakeState::Failed);
        assert_eq!(host.connect().await.unwrap_err().kind(), ErrorKind::HandshakeFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_origin_during_handshake_fails_session() {
        let (host, host_window, mut peer) = host_with_scripted_peer(BridgeConfig::for_peer(CLIENT));
        let connecting = {
            let host = host.clone();
            tokio::spawn(async move { host.connect().await })
        };

        let init = peer.expect(MessageType::HandshakeInit).await;
        let hello: HandshakeInit = serde_json::from_value(init.payload.clone().unwrap()).unwrap();
        let forged = handshake_ack(&init, hello.nonce, Uuid::new_v4());
        host_window
            .inject(RawMessage {
                data: forged.encode().unwrap(),
                origin: EVIL.into(),
                timestamp: SystemTimeSource.now_ms(),
            })
            .unwrap();

        let err = connecting.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandshakeFailed);
        assert_eq!(host.state().state, HandshakeState::Failed);
        assert_eq!(host.diagnostics().rejected_origin, 1);
        assert!(peer.stays_quiet().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_mismatch_gets_no_reply() {
        let pair = EnginePair::spawn();
        let init = Envelope::new(MessageType::HandshakeInit)
            .with_payload(json!({ "version": 99, "nonce": Uuid::new_v4() }));
        pair.client_window
            .inject(RawMessage {
                data: init.encode().unwrap(),
                origin: HOST.into(),
                timestamp: SystemTimeSource.now_ms(),
            })
            .unwrap();

        let err = pair.client.wait_connected().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandshakeFailed);
        assert!(pair.client_window.outbox().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_reset_allows_fresh_session() {
        let (host, _window, mut peer) = host_with_scripted_peer(
            BridgeConfig::for_peer(CLIENT).with_handshake_timeout(Duration::from_millis(300)),
        );

        let connecting = {
            let host = host.clone();
            tokio::spawn(async move { host.connect().await })
        };
        peer.expect(MessageType::HandshakeInit).await;
        assert_eq!(
            connecting.await.unwrap().unwrap_err(),
            BridgeError::HandshakeTimeout { timeout_ms: 300 }
        );
        let failed_session = host.state().session_id;

        host.reset().await.unwrap();
        let fresh = host.state();
        assert_eq!(fresh.state, HandshakeState::Idle);
        assert_ne!(fresh.session_id, failed_session);

        let connecting = {
            let host = host.clone();
            tokio::spawn(async move { host.connect().await })
        };
        peer.accept_handshake().await;
        connecting.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_after_connected_does_not_restart_session() {
        let pair = EnginePair::connected().await;
        let session = pair.client.state().session_id;

        let init = Envelope::new(MessageType::HandshakeInit)
            .with_payload(json!({ "version": 1, "nonce": Uuid::new_v4() }));
        pair.client_window
            .inject(RawMessage {
                data: init.encode().unwrap(),
                origin: HOST.into(),
                timestamp: SystemTimeSource.now_ms(),
            })
            .unwrap();

        eventually(|| pair.client.diagnostics().anomalies > 0).await;
        let state = pair.client.state();
        assert_eq!(state.state, HandshakeState::Connected);
        assert_eq!(state.session_id, session);
        assert_eq!(pair.client_window.outbox().len(), 1);
    }
}
