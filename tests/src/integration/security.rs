//! # Origin and Stamping Scenarios
//!
//! What a hostile or confused sender can and cannot do to a session.

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use bridge_core::{
        handler_fn, BridgeBuilder, BridgeConfig, Channel, DiagnosticEvent, Envelope, HandshakeState,
        MemoryWindow, MessageType, RawMessage, SystemTimeSource, TimeSource,
    };
    use bridge_types::RejectReason;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    const SIBLING: &str = "https://preview.example.com";

    fn raw_from(origin: &str, data: String) -> RawMessage {
        RawMessage {
            data,
            origin: origin.into(),
            timestamp: SystemTimeSource.now_ms(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_origin_is_replaced_by_sender_origin() {
        let (host, _window, mut peer) = connected_host().await;
        host.register_handler(
            "host.whoami",
            handler_fn(|req| async move { Ok(json!(req.origin)) }),
        )
        .unwrap();

        let mut forged = Envelope::request(Channel::parse("host.whoami").unwrap(), json!({}));
        forged.origin = EVIL.into();
        forged.timestamp = 1;
        peer.send(&forged);

        let response = peer.expect(MessageType::Response).await;
        assert_eq!(response.correlation_id, Some(forged.id));
        assert_eq!(response.payload, Some(json!(CLIENT)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_untrusted_init_is_ignored() {
        let pair = EnginePair::spawn();
        let init = Envelope::new(MessageType::HandshakeInit)
            .with_payload(json!({ "version": 1, "nonce": Uuid::new_v4() }));

        pair.client_window
            .inject(raw_from(EVIL, init.encode().unwrap()))
            .unwrap();

        eventually(|| pair.client.diagnostics().rejected_origin == 1).await;
        assert_eq!(pair.client.state().state, HandshakeState::Idle);
        assert!(pair.client_window.outbox().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trust_narrows_to_pinned_origin() {
        let (host_window, client_window) = MemoryWindow::pair(HOST, CLIENT);
        let mut peer = ScriptedPeer::new(client_window);
        let config = BridgeConfig {
            target_origin: "*".into(),
            allowed_origins: vec![CLIENT.into(), SIBLING.into()],
            ..BridgeConfig::default()
        };
        let host = BridgeBuilder::new(config, Arc::new(host_window.clone()))
        .spawn()
        .unwrap();
        host.register_handler("host.ping", handler_fn(|_req| async { Ok(json!("pong")) }))
            .unwrap();

        let connecting = {
            let host = host.clone();
            tokio::spawn(async move { host.connect().await })
        };
        peer.accept_handshake().await;
        connecting.await.unwrap().unwrap();

        // INIT goes out with the wildcard hint, everything after to the peer.
        let targets: Vec<String> = host_window
            .outbox()
            .into_iter()
            .map(|m| m.target_origin)
            .collect();
        assert_eq!(targets, vec!["*".to_string(), CLIENT.to_string()]);

        // SIBLING was trusted for the handshake but is not the pinned peer.
        let request = Envelope::request(Channel::parse("host.ping").unwrap(), json!({}));
        host_window
            .inject(raw_from(SIBLING, request.encode().unwrap()))
            .unwrap();
        eventually(|| host.diagnostics().rejected_origin == 1).await;
        assert!(peer.stays_quiet().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_leaves_session_intact() {
        let (host, host_window, mut peer) = connected_host().await;

        host_window
            .inject(raw_from(CLIENT, "{ not json".into()))
            .unwrap();
        host_window
            .inject(raw_from(CLIENT, r#"{"id":"x","type":"REQUEST","origin":"","timestamp":0}"#.into()))
            .unwrap();

        eventually(|| host.diagnostics().rejected_malformed == 2).await;
        assert_eq!(host.state().state, HandshakeState::Connected);
        assert!(peer.stays_quiet().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostic_hook_sees_rejections() {
        let (host_window, client_window) = MemoryWindow::pair(HOST, CLIENT);
        let _peer = ScriptedPeer::new(client_window);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook = Arc::clone(&seen);
        let host = BridgeBuilder::new(BridgeConfig::for_peer(CLIENT), Arc::new(host_window.clone()))
            .diagnostic_hook(move |event| hook.lock().push(event.clone()))
            .spawn()
            .unwrap();

        host_window
            .inject(raw_from(EVIL, Envelope::new(MessageType::Event).encode().unwrap()))
            .unwrap();
        eventually(|| !seen.lock().is_empty()).await;

        let events = seen.lock().clone();
        assert!(matches!(
            &events[0],
            DiagnosticEvent::Rejected {
                reason: RejectReason::OriginMismatch,
                origin,
                kind: Some(MessageType::Event),
            } if origin == EVIL
        ));
        assert_eq!(host.state().state, HandshakeState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outgoing_timestamps_never_go_backwards() {
        let pair = EnginePair::connected().await;
        pair.client
            .register_handler(
                "xmc.echo",
                handler_fn(|req| async move { Ok(req.payload.unwrap_or_default()) }),
            )
            .unwrap();
        for i in 0..5 {
            pair.host.request("xmc.echo", json!(i)).await.unwrap();
        }

        let stamps: Vec<u64> = pair
            .host_window
            .outbox()
            .iter()
            .map(|m| Envelope::decode(&m.data).unwrap().timestamp)
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert!(pair
            .host_window
            .outbox()
            .iter()
            .all(|m| Envelope::decode(&m.data).unwrap().origin == HOST));
    }
}
