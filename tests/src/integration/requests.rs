//! # Request / Response Scenarios
//!
//! Correlation by id, per-request timeouts and late answers, and the
//! responder-side handler registry.

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use bridge_core::{
        handler_fn, BridgeConfig, BridgeError, Envelope, ErrorKind, HandlerError, HandshakeState,
        MessageType,
    };
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::time::Duration;

    // =============================================================================
    // CORRELATION
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (host, _window, mut peer) = connected_host().await;

        let first = {
            let host = host.clone();
            tokio::spawn(async move { host.request("xmc.items.first", json!(1)).await })
        };
        let a = peer.expect(MessageType::Request).await;
        let second = {
            let host = host.clone();
            tokio::spawn(async move { host.request("xmc.items.second", json!(2)).await })
        };
        let b = peer.expect(MessageType::Request).await;
        assert_ne!(a.id, b.id);

        // Answer in reverse order.
        peer.send(&Envelope::response_to(&b, json!({ "answer": "second" })));
        peer.send(&Envelope::response_to(&a, json!({ "answer": "first" })));

        assert_eq!(
            first.await.unwrap().unwrap(),
            json!({ "answer": "first" })
        );
        assert_eq!(
            second.await.unwrap().unwrap(),
            json!({ "answer": "second" })
        );
        assert_eq!(host.diagnostics().responses_matched, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_settles_once_and_late_answer_is_noop() {
        let (host, _window, mut peer) = connected_host().await;

        let pending = {
            let host = host.clone();
            tokio::spawn(async move {
                host.request_with_timeout("xmc.slow", json!({}), Duration::from_millis(100))
                    .await
            })
        };
        let request = peer.expect(MessageType::Request).await;

        assert_eq!(
            pending.await.unwrap().unwrap_err(),
            BridgeError::RequestTimeout {
                channel: "xmc.slow".into(),
                timeout_ms: 100,
            }
        );

        peer.send(&Envelope::response_to(&request, json!("too late")));
        peer.send(&Envelope::response_to(&request, json!("later still")));
        eventually(|| host.diagnostics().late_responses == 2).await;

        let stats = host.diagnostics();
        assert_eq!(stats.request_timeouts, 1);
        assert_eq!(stats.responses_matched, 0);

        // The session is unaffected.
        let next = {
            let host = host.clone();
            tokio::spawn(async move { host.request("xmc.fast", json!({})).await })
        };
        let request = peer.expect(MessageType::Request).await;
        peer.send(&Envelope::response_to(&request, json!("ok")));
        assert_eq!(next.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_keeps_engine_alive() {
        let pair = EnginePair::connected().await;
        pair.client
            .register_handler(
                "xmc.publishing.status",
                handler_fn(|_req| async { Ok(json!({ "published": true })) }),
            )
            .unwrap();

        let status = pair
            .host
            .request_with_timeout("xmc.publishing.status", json!({}), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(status, json!({ "published": true }));

        let status = pair
            .host
            .request_with_timeout(
                "xmc.publishing.status",
                json!({}),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(status, json!({ "published": true }));
        assert_eq!(pair.host.state().state, HandshakeState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_with_unknown_correlation_is_anomaly() {
        let (host, _window, peer) = connected_host().await;

        let stray = Envelope::new(MessageType::Response)
            .with_correlation("never-sent".into())
            .with_payload(json!(null));
        peer.send(&stray);

        eventually(|| host.diagnostics().anomalies == 1).await;
        assert_eq!(host.diagnostics().responses_matched, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_does_not_disturb_engine() {
        let (host, _window, mut peer) = connected_host().await;

        let abandoned = {
            let host = host.clone();
            tokio::spawn(async move { host.request("xmc.abandoned", json!({})).await })
        };
        let request = peer.expect(MessageType::Request).await;
        abandoned.abort();
        let _ = abandoned.await;

        peer.send(&Envelope::response_to(&request, json!("nobody listens")));
        eventually(|| host.diagnostics().responses_matched == 1).await;

        let next = {
            let host = host.clone();
            tokio::spawn(async move { host.request("xmc.fast", json!({})).await })
        };
        let request = peer.expect(MessageType::Request).await;
        peer.send(&Envelope::response_to(&request, json!("ok")));
        assert_eq!(next.await.unwrap().unwrap(), json!("ok"));
    }

    // =============================================================================
    // SESSION GATING
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_request_before_handshake_never_reaches_wire() {
        let (host, host_window, mut peer) =
            host_with_scripted_peer(BridgeConfig::for_peer(CLIENT));

        let err = host
            .request("xmc.publishing.status", json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SessionNotConnected);
        assert!(host_window.outbox().is_empty());
        assert!(peer.stays_quiet().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_fails_pending_requests() {
        let (host, _window, mut peer) = connected_host().await;

        let pending = {
            let host = host.clone();
            tokio::spawn(async move { host.request("xmc.pending", json!({})).await })
        };
        peer.expect(MessageType::Request).await;

        host.reset().await.unwrap();
        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotConnected);
    }

    // =============================================================================
    // HANDLERS (two real engines)
    // =============================================================================

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct StatusQuery {
        item_id: String,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Status {
        item_id: String,
        published: bool,
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_call_round_trip() {
        let pair = EnginePair::connected().await;
        pair.client
            .register_handler(
                "xmc.publishing.status",
                handler_fn(|req| async move {
                    let query: StatusQuery = req.parse()?;
                    Ok::<_, HandlerError>(json!({ "item_id": query.item_id, "published": true }))
                }),
            )
            .unwrap();

        let status: Status = pair
            .host
            .call(
                "xmc.publishing.status",
                &StatusQuery {
                    item_id: "home".into(),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            status,
            Status {
                item_id: "home".into(),
                published: true,
            }
        );
        assert_eq!(pair.client.diagnostics().requests_served, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_call_with_wrong_shape_is_malformed() {
        let pair = EnginePair::connected().await;
        pair.client
            .register_handler(
                "xmc.publishing.status",
                handler_fn(|_req| async { Ok(json!("not a status")) }),
            )
            .unwrap();

        let err = pair
            .host
            .call::<_, Status>("xmc.publishing.status", &json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedMessage);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_sees_transport_origin() {
        let pair = EnginePair::connected().await;
        pair.client
            .register_handler(
                "xmc.whoami",
                handler_fn(|req| async move { Ok(json!(req.origin)) }),
            )
            .unwrap();

        let origin = pair.host.request("xmc.whoami", json!({})).await.unwrap();
        assert_eq!(origin, json!(HOST));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_channel_answers_no_handler() {
        let pair = EnginePair::connected().await;

        let err = pair
            .host
            .request("xmc.unknown", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoHandler);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_handler_answers_handler_failed() {
        let pair = EnginePair::connected().await;
        pair.client
            .register_handler(
                "xmc.broken",
                handler_fn(|_req| async { Err(HandlerError::new("database offline")) }),
            )
            .unwrap();

        let err = pair
            .host
            .request("xmc.broken", json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::Remote {
                kind: ErrorKind::HandlerFailed,
                message: "database offline".into(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_handler() {
        let pair = EnginePair::connected().await;
        pair.client
            .register_handler("xmc.temp", handler_fn(|_req| async { Ok(json!(1)) }))
            .unwrap();
        assert_eq!(pair.host.request("xmc.temp", json!({})).await.unwrap(), json!(1));

        pair.client.unregister_handler("xmc.temp").unwrap();
        let err = pair.host.request("xmc.temp", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoHandler);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_may_call_back_into_peer() {
        let pair = EnginePair::connected().await;
        pair.host
            .register_handler("host.page.title", handler_fn(|_req| async { Ok(json!("Home")) }))
            .unwrap();

        let client = pair.client.clone();
        pair.client
            .register_handler(
                "xmc.page.describe",
                handler_fn(move |_req| {
                    let client = client.clone();
                    async move {
                        let title = client
                            .request("host.page.title", json!({}))
                            .await
                            .map_err(|e| HandlerError::new(e.to_string()))?;
                        Ok::<_, HandlerError>(json!({ "title": title }))
                    }
                }),
            )
            .unwrap();

        let described = pair
            .host
            .request("xmc.page.describe", json!({}))
            .await
            .unwrap();
        assert_eq!(described, json!({ "title": "Home" }));
    }
}
