#![allow(clippy::unwrap_used)]
// Drives a `DeviceConnection` against a scripted fake receiver over an
// in-memory duplex pipe.

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use marquee_api::message::{
    DEFAULT_RECEIVER_ID, NAMESPACE_CONNECTION, NAMESPACE_CUSTOM, NAMESPACE_HEARTBEAT,
    NAMESPACE_RECEIVER,
};
use marquee_api::{
    CastCodec, CastMessage, CloseReason, ConnectionConfig, DeviceConnection, Error,
    SessionOutcome,
};

const APP_ID: &str = "B1A3B99B";

// ── Helpers ─────────────────────────────────────────────────────────

struct FakeReceiver {
    framed: Framed<DuplexStream, CastCodec>,
    sender_id: String,
}

impl FakeReceiver {
    async fn recv(&mut self) -> Option<CastMessage> {
        self.framed.next().await.map(Result::unwrap)
    }

    /// Next message, with its JSON payload parsed.
    async fn expect(&mut self) -> (CastMessage, Value) {
        let msg = self.recv().await.expect("connection closed early");
        let payload = serde_json::from_str(msg.payload()).unwrap();
        (msg, payload)
    }

    async fn reply(&mut self, namespace: &str, source: &str, payload: Value) {
        let msg = CastMessage::json(namespace, source, &self.sender_id, &payload).unwrap();
        self.framed.send(msg).await.unwrap();
    }

    async fn expect_handshake(&mut self) {
        let (msg, payload) = self.expect().await;
        assert_eq!(msg.namespace, NAMESPACE_CONNECTION);
        assert_eq!(msg.destination_id, DEFAULT_RECEIVER_ID);
        assert_eq!(payload, json!({"type": "CONNECT"}));

        let (msg, payload) = self.expect().await;
        assert_eq!(msg.namespace, NAMESPACE_RECEIVER);
        assert_eq!(msg.destination_id, DEFAULT_RECEIVER_ID);
        assert_eq!(payload, json!({"type": "LAUNCH", "appId": APP_ID, "requestId": 0}));
    }

    async fn send_running(&mut self, transport_id: &str) {
        self.reply(
            NAMESPACE_RECEIVER,
            DEFAULT_RECEIVER_ID,
            json!({
                "requestId": 0,
                "type": "RECEIVER_STATUS",
                "status": {"applications": [
                    {"appId": APP_ID, "isIdleScreen": false, "transportId": transport_id}
                ]}
            }),
        )
        .await;
    }
}

fn spawn_connection(
    settings: Value,
) -> (FakeReceiver, JoinHandle<SessionOutcome>, CancellationToken) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let conn = DeviceConnection::new("D", settings, ConnectionConfig::default());
    let sender_id = conn.sender_id().to_owned();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(conn.run(client, cancel.clone()));

    let receiver = FakeReceiver {
        framed: Framed::new(server, CastCodec),
        sender_id,
    };
    (receiver, handle, cancel)
}

// ── Handshake and session ───────────────────────────────────────────

#[tokio::test]
async fn test_handshake_then_device_payload() {
    let (mut rx, handle, cancel) = spawn_connection(json!({"url": "x"}));

    rx.expect_handshake().await;
    rx.send_running("web-1").await;

    let (msg, payload) = rx.expect().await;
    assert_eq!(msg.namespace, NAMESPACE_CONNECTION);
    assert_eq!(msg.destination_id, "web-1");
    assert_eq!(payload, json!({"type": "CONNECT"}));

    let (msg, payload) = rx.expect().await;
    assert_eq!(msg.namespace, NAMESPACE_CUSTOM);
    assert_eq!(msg.destination_id, "web-1");
    assert_eq!(
        payload,
        json!({"name": "D", "settings": {"url": "x"}, "requestId": 1})
    );

    cancel.cancel();
    let outcome = handle.await.unwrap();
    assert!(outcome.is_graceful());
    assert!(outcome.reached_session);
}

#[tokio::test]
async fn test_repeated_status_does_not_resend_payload() {
    let (mut rx, handle, cancel) = spawn_connection(json!({}));

    rx.expect_handshake().await;
    rx.send_running("web-1").await;
    rx.expect().await;
    rx.expect().await;

    // Same status again, then a heartbeat ping the connection must answer.
    rx.send_running("web-1").await;
    rx.reply(NAMESPACE_HEARTBEAT, DEFAULT_RECEIVER_ID, json!({"type": "PING"}))
        .await;

    let (msg, payload) = rx.expect().await;
    assert_eq!(msg.namespace, NAMESPACE_HEARTBEAT);
    assert_eq!(msg.destination_id, DEFAULT_RECEIVER_ID);
    assert_eq!(payload, json!({"type": "PONG"}));

    cancel.cancel();
    assert!(handle.await.unwrap().is_graceful());
}

#[tokio::test]
async fn test_bad_source_is_dropped() {
    let (mut rx, handle, cancel) = spawn_connection(json!({}));
    rx.expect_handshake().await;

    // Would be fatal if accepted.
    rx.reply(
        NAMESPACE_RECEIVER,
        "intruder",
        json!({"type": "LAUNCH_ERROR", "reason": "NOT_ALLOWED"}),
    )
    .await;

    rx.send_running("web-2").await;
    let (msg, _) = rx.expect().await;
    assert_eq!(msg.destination_id, "web-2");

    cancel.cancel();
    let outcome = handle.await.unwrap();
    assert!(outcome.is_graceful());
    assert!(outcome.reached_session);
}

// ── Failure closes ──────────────────────────────────────────────────

#[tokio::test]
async fn test_receiver_reason_closes() {
    let (mut rx, handle, _cancel) = spawn_connection(json!({}));
    rx.expect_handshake().await;

    rx.reply(
        NAMESPACE_RECEIVER,
        DEFAULT_RECEIVER_ID,
        json!({"requestId": 0, "type": "LAUNCH_ERROR", "reason": "NOT_FOUND"}),
    )
    .await;

    let outcome = handle.await.unwrap();
    assert!(
        matches!(&outcome.reason, CloseReason::Failure(Error::Receiver { reason }) if reason == "NOT_FOUND"),
        "unexpected outcome: {outcome:?}"
    );
    assert!(!outcome.reached_session);
    assert!(rx.recv().await.is_none(), "stream should be shut down");
}

#[tokio::test]
async fn test_idle_screen_closes() {
    let (mut rx, handle, _cancel) = spawn_connection(json!({}));
    rx.expect_handshake().await;
    rx.send_running("web-3").await;
    rx.expect().await;
    rx.expect().await;

    rx.reply(
        NAMESPACE_RECEIVER,
        DEFAULT_RECEIVER_ID,
        json!({"type": "RECEIVER_STATUS", "status": {"applications": [
            {"appId": "E8C28D3C", "isIdleScreen": true, "transportId": "idle"}
        ]}}),
    )
    .await;

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome.reason, CloseReason::Failure(Error::IdleScreen)));
    assert!(outcome.reached_session);
}

#[tokio::test]
async fn test_peer_close_is_failure() {
    let (mut rx, handle, _cancel) = spawn_connection(json!({}));
    rx.expect_handshake().await;
    drop(rx);

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome.reason, CloseReason::Failure(Error::PeerClosed)));
}

#[tokio::test]
async fn test_oversized_frame_is_fatal() {
    let (mut rx, handle, _cancel) = spawn_connection(json!({}));
    rx.expect_handshake().await;

    rx.framed
        .get_mut()
        .write_all(&[0x7f, 0xff, 0xff, 0xff])
        .await
        .unwrap();

    let outcome = handle.await.unwrap();
    assert!(matches!(
        outcome.reason,
        CloseReason::Failure(Error::FrameTooLarge { .. })
    ));
}

// ── Heartbeats ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_silent_receiver_times_out() {
    let (mut rx, handle, _cancel) = spawn_connection(json!({}));
    rx.expect_handshake().await;

    let mut pings = 0;
    while let Some(msg) = rx.recv().await {
        assert_eq!(msg.namespace, NAMESPACE_HEARTBEAT);
        pings += 1;
    }

    // Pings at 5s..30s; the 35s tick finds 35s of silence.
    assert_eq!(pings, 6);
    let outcome = handle.await.unwrap();
    assert!(matches!(
        outcome.reason,
        CloseReason::Failure(Error::HeartbeatTimeout { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_answered_heartbeats_keep_session_alive() {
    let (mut rx, handle, cancel) = spawn_connection(json!({}));
    rx.expect_handshake().await;

    for _ in 0..20 {
        let (msg, payload) = rx.expect().await;
        assert_eq!(msg.namespace, NAMESPACE_HEARTBEAT);
        assert_eq!(payload, json!({"type": "PING"}));
        rx.reply(NAMESPACE_HEARTBEAT, DEFAULT_RECEIVER_ID, json!({"type": "PONG"}))
            .await;
    }

    assert!(!handle.is_finished());
    cancel.cancel();
    let outcome = handle.await.unwrap();
    assert!(outcome.is_graceful());
    assert!(!outcome.reached_session);
}
