//! Shared test fixtures.

use bridge_core::{
    BridgeBuilder, BridgeConfig, BridgeHandle, Envelope, MemoryWindow, MessageType,
    PlatformPort, RawMessage,
};
use bridge_types::payload::{HandshakeAck, HandshakeInit};
use bridge_types::PROTOCOL_VERSION;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

pub const HOST: &str = "https://pages.example.com";
pub const CLIENT: &str = "https://editor.example.com";
pub const EVIL: &str = "https://evil.example.net";

/// How long a fixture waits for something that should happen promptly.
pub const PROMPT: Duration = Duration::from_secs(1);

/// Two real engines wired over an in-memory window pair.
pub struct EnginePair {
    pub host: BridgeHandle,
    pub client: BridgeHandle,
    pub host_window: MemoryWindow,
    pub client_window: MemoryWindow,
}

impl EnginePair {
    pub fn spawn() -> Self {
        Self::spawn_with(BridgeConfig::for_peer(CLIENT), BridgeConfig::for_peer(HOST))
    }

    pub fn spawn_with(host_config: BridgeConfig, client_config: BridgeConfig) -> Self {
        let (host_window, client_window) = MemoryWindow::pair(HOST, CLIENT);
        let host = BridgeBuilder::new(host_config, Arc::new(host_window.clone()))
            .spawn()
            .expect("host engine");
        let client = BridgeBuilder::new(client_config, Arc::new(client_window.clone()))
            .spawn()
            .expect("client engine");
        Self {
            host,
            client,
            host_window,
            client_window,
        }
    }

    /// Spawn and complete the handshake from the host side.
    pub async fn connected() -> Self {
        let pair = Self::spawn();
        pair.host.connect().await.expect("host connects");
        pair.client.wait_connected().await.expect("client connects");
        pair
    }
}

/// Message types a window has posted, oldest first.
pub fn posted_kinds(window: &MemoryWindow) -> Vec<MessageType> {
    window
        .outbox()
        .iter()
        .map(|m| Envelope::decode(&m.data).expect("posted envelope").kind)
        .collect()
}

/// Poll `condition` until it holds, failing the test after `PROMPT`.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(PROMPT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// The client side of a window pair, driven by hand.
///
/// Lets a test answer, reorder or withhold traffic that a real engine would
/// handle on its own.
pub struct ScriptedPeer {
    pub window: MemoryWindow,
    inbox: mpsc::UnboundedReceiver<RawMessage>,
}

impl ScriptedPeer {
    pub fn new(window: MemoryWindow) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        window.listen(tx).expect("scripted peer listens");
        Self { window, inbox }
    }

    /// Next envelope posted by the engine.
    pub async fn next(&mut self) -> Envelope {
        let raw = timeout(PROMPT, self.inbox.recv())
            .await
            .expect("engine posted nothing")
            .expect("window closed");
        Envelope::decode(&raw.data).expect("engine posted an undecodable envelope")
    }

    /// Next envelope, which must be of `kind`.
    pub async fn expect(&mut self, kind: MessageType) -> Envelope {
        let envelope = self.next().await;
        assert_eq!(envelope.kind, kind, "unexpected envelope {envelope:?}");
        envelope
    }

    /// True if nothing arrives within `PROMPT`.
    pub async fn stays_quiet(&mut self) -> bool {
        timeout(PROMPT, self.inbox.recv()).await.is_err()
    }

    /// Post `envelope` to the engine from this peer's real origin.
    pub fn send(&self, envelope: &Envelope) {
        let data = envelope.encode().expect("encodable envelope");
        self.window
            .post_message(data, self.window.peer_origin())
            .expect("post to engine");
    }

    /// Answer a HANDSHAKE_INIT correctly. Returns the INIT and the ACK nonce.
    pub async fn ack_init(&mut self) -> (Envelope, Uuid) {
        let init = self.expect(MessageType::HandshakeInit).await;
        let hello: HandshakeInit =
            serde_json::from_value(init.payload.clone().expect("INIT payload")).expect("INIT");
        let nonce = Uuid::new_v4();
        self.send(&handshake_ack(&init, hello.nonce, nonce));
        (init, nonce)
    }

    /// Play the responder side of a full handshake.
    pub async fn accept_handshake(&mut self) {
        let (_, nonce) = self.ack_init().await;
        let complete = self.expect(MessageType::HandshakeComplete).await;
        assert_eq!(
            complete.payload.as_ref().and_then(|p| p.get("echo")).cloned(),
            Some(serde_json::json!(nonce.to_string()))
        );
    }
}

/// A HANDSHAKE_ACK for `init` carrying `echo` and a responder `nonce`.
pub fn handshake_ack(init: &Envelope, echo: Uuid, nonce: Uuid) -> Envelope {
    let ack = HandshakeAck {
        version: PROTOCOL_VERSION,
        echo,
        nonce,
    };
    Envelope::new(MessageType::HandshakeAck)
        .with_correlation(init.id.clone())
        .with_payload(serde_json::to_value(ack).expect("ACK payload"))
}

/// A host engine facing a scripted client.
pub fn host_with_scripted_peer(config: BridgeConfig) -> (BridgeHandle, MemoryWindow, ScriptedPeer) {
    let (host_window, client_window) = MemoryWindow::pair(HOST, CLIENT);
    let peer = ScriptedPeer::new(client_window);
    let host = BridgeBuilder::new(config, Arc::new(host_window.clone()))
        .spawn()
        .expect("host engine");
    (host, host_window, peer)
}

/// A host connected to a scripted client.
pub async fn connected_host() -> (BridgeHandle, MemoryWindow, ScriptedPeer) {
    let (host, host_window, mut peer) = host_with_scripted_peer(BridgeConfig::for_peer(CLIENT));
    let connecting = {
        let host = host.clone();
        tokio::spawn(async move { host.connect().await })
    };
    peer.accept_handshake().await;
    connecting
        .await
        .expect("connect task")
        .expect("host connects");
    (host, host_window, peer)
}

/// Publish once the peer's SUBSCRIBE for `channel` has been processed.
pub async fn publish_when_subscribed(
    publisher: &BridgeHandle,
    channel: &str,
    payload: serde_json::Value,
) {
    timeout(PROMPT, async {
        while !publisher
            .publish(channel, payload.clone())
            .await
            .expect("publish while connected")
        {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("peer never subscribed");
}
