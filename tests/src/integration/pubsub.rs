//! # Publish / Subscribe Scenarios
//!
//! Local fan-out, the single SUBSCRIBE/UNSUBSCRIBE per channel, channel
//! errors and subscriber teardown.

#[cfg(test)]
mod tests {
    use crate::fixtures::*;
    use bridge_core::{
        BridgeError, CallbackError, Channel, ErrorKind, EventSink, MessageType,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    /// Records everything delivered to it. Clones share the record.
    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Value>>>,
        errors: Arc<Mutex<Vec<BridgeError>>>,
    }

    impl EventSink for Recorder {
        fn on_event(&self, _channel: &Channel, payload: &Value) -> Result<(), CallbackError> {
            self.events.lock().push(payload.clone());
            Ok(())
        }

        fn on_error(&self, _channel: &Channel, error: &BridgeError) {
            self.errors.lock().push(error.clone());
        }
    }

    fn count(kinds: &[MessageType], kind: MessageType) -> usize {
        kinds.iter().filter(|k| **k == kind).count()
    }

    // =============================================================================
    // FAN-OUT
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_double_subscribe_single_wire_subscription() {
        let pair = EnginePair::connected().await;
        let first = Recorder::default();
        let second = Recorder::default();

        let sub_a = pair
            .client
            .subscribe("host.state", first.clone())
            .await
            .unwrap();
        let sub_b = pair
            .client
            .subscribe("host.state", second.clone())
            .await
            .unwrap();
        assert_eq!(
            count(&posted_kinds(&pair.client_window), MessageType::Subscribe),
            1
        );

        publish_when_subscribed(&pair.host, "host.state", json!({ "mode": "edit" })).await;
        eventually(|| first.events.lock().len() == 1 && second.events.lock().len() == 1).await;

        // One unsubscribe keeps the other subscriber fed.
        sub_a.unsubscribe();
        assert!(!sub_a.is_active());
        pair.host
            .publish("host.state", json!({ "mode": "preview" }))
            .await
            .unwrap();
        eventually(|| second.events.lock().len() == 2).await;
        assert_eq!(first.events.lock().len(), 1);
        assert_eq!(
            count(&posted_kinds(&pair.client_window), MessageType::Unsubscribe),
            0
        );

        // The last one goes out on the wire exactly once.
        sub_b.unsubscribe();
        sub_b.unsubscribe();
        eventually(|| {
            count(&posted_kinds(&pair.client_window), MessageType::Unsubscribe) == 1
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            count(&posted_kinds(&pair.client_window), MessageType::Unsubscribe),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_without_peer_subscription_sends_nothing() {
        let pair = EnginePair::connected().await;
        let before = pair.host_window.outbox().len();

        let sent = pair
            .host
            .publish("host.state", json!({ "mode": "edit" }))
            .await
            .unwrap();

        assert!(!sent);
        assert_eq!(pair.host_window.outbox().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_unsubscribe_stops_publishing() {
        let pair = EnginePair::connected().await;
        let stream = pair.client.subscribe_stream("host.state").await.unwrap();
        publish_when_subscribed(&pair.host, "host.state", json!(1)).await;

        drop(stream);
        timeout(PROMPT, async {
            while pair.host.publish("host.state", json!(2)).await.unwrap() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_callback_is_contained() {
        let pair = EnginePair::connected().await;
        let healthy = Recorder::default();

        let _broken = pair
            .client
            .subscribe_fn("host.state", |_channel, _payload| {
                Err(CallbackError("render failed".into()))
            })
            .await
            .unwrap();
        let _panicking = pair
            .client
            .subscribe_fn("host.state", |_channel, _payload| panic!("subscriber bug"))
            .await
            .unwrap();
        let _healthy = pair
            .client
            .subscribe("host.state", healthy.clone())
            .await
            .unwrap();

        publish_when_subscribed(&pair.host, "host.state", json!("x")).await;
        eventually(|| healthy.events.lock().len() == 1).await;
        eventually(|| pair.client.diagnostics().callback_failures == 2).await;
        assert_eq!(pair.client.diagnostics().events_delivered, 1);
    }

    // =============================================================================
    // CHANNEL ERRORS
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_channel_error_broadcasts_to_every_subscriber() {
        let pair = EnginePair::connected().await;
        let mut first = pair.client.subscribe_stream("host.state").await.unwrap();
        let mut second = pair.client.subscribe_stream("host.state").await.unwrap();
        publish_when_subscribed(&pair.host, "host.state", json!("ready")).await;
        for stream in [&mut first, &mut second] {
            let item = timeout(PROMPT, stream.next()).await.unwrap().unwrap();
            assert_eq!(item.unwrap(), json!("ready"));
        }

        let sent = pair
            .host
            .publish_error("host.state", ErrorKind::HandlerFailed, "state unavailable")
            .await
            .unwrap();
        assert!(sent);

        let expected = BridgeError::Remote {
            kind: ErrorKind::HandlerFailed,
            message: "state unavailable".into(),
        };
        for stream in [&mut first, &mut second] {
            let item = timeout(PROMPT, stream.next()).await.unwrap().unwrap();
            assert_eq!(item.unwrap_err(), expected);
        }
    }

    // =============================================================================
    // SESSION GATING AND TEARDOWN
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_before_connect_refused() {
        let pair = EnginePair::spawn();
        let err = pair
            .client
            .subscribe_stream("host.state")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotConnected);
        assert!(pair.client_window.outbox().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_notifies_and_drops_subscribers() {
        let pair = EnginePair::connected().await;
        let recorder = Recorder::default();
        let subscription = pair
            .client
            .subscribe("host.state", recorder.clone())
            .await
            .unwrap();

        pair.client.reset().await.unwrap();

        assert!(!subscription.is_active());
        let errors = recorder.errors.lock().clone();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::SessionNotConnected);

        // Unsubscribing after teardown stays local.
        subscription.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            count(&posted_kinds(&pair.client_window), MessageType::Unsubscribe),
            0
        );
    }
}
