//! Realtime feed against a local WebSocket server speaking the channel protocol

use futures::{SinkExt, StreamExt};
use helpdesk_supabase::realtime::PhoenixMessage;
use helpdesk_supabase::{RealtimeClient, SupabaseClient, SupabaseConfig, SupabaseError};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

type ServerSocket = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

async fn next_message(socket: &mut ServerSocket) -> Option<PhoenixMessage> {
    while let Some(Ok(message)) = socket.next().await {
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).ok();
        }
    }
    None
}

enum JoinReply {
    Ok,
    Error,
    Silent,
}

/// Serve one connection: answer the join, push one insert, then report the
/// first message the client sends afterwards.
async fn serve_once(reply: JoinReply) -> (String, oneshot::Receiver<PhoenixMessage>) {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        unreachable!("loopback bind");
    };
    let Ok(addr) = listener.local_addr() else {
        unreachable!("bound socket has an address");
    };
    let (seen_tx, seen_rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };

        let Some(join) = next_message(&mut socket).await else {
            return;
        };
        assert_eq!(join.event, "phx_join");

        let status = match reply {
            JoinReply::Ok => "ok",
            JoinReply::Error => "error",
            JoinReply::Silent => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                return;
            },
        };
        let frames = [
            json!({
                "topic": join.topic, "event": "phx_reply", "ref": "1",
                "payload": { "status": status, "response": { "reason": "denied" } }
            }),
            json!({
                "topic": join.topic, "event": "system", "ref": null,
                "payload": { "status": "ok", "message": "Subscribed to PostgreSQL" }
            }),
            json!({
                "topic": join.topic, "event": "postgres_changes", "ref": null,
                "payload": { "data": {
                    "type": "INSERT", "table": "items", "schema": "public",
                    "commit_timestamp": "2025-01-01T00:00:00Z",
                    "record": { "id": 1, "value": "hello", "created_at": "2025-01-01T00:00:00Z" },
                    "old_record": {}
                } }
            }),
        ];
        for frame in frames {
            if socket.send(Message::Text(frame.to_string())).await.is_err() {
                return;
            }
        }

        if let Some(message) = next_message(&mut socket).await {
            let _ = seen_tx.send(message);
        }
    });

    (format!("http://{addr}"), seen_rx)
}

fn realtime(url: String) -> RealtimeClient {
    let config = SupabaseConfig::new(url, "anon-key").with_join_timeout(Duration::from_millis(500));
    RealtimeClient::new(SupabaseClient::new(config))
}

#[tokio::test]
async fn delivers_changes_and_leaves_on_stop() {
    let (url, seen) = serve_once(JoinReply::Ok).await;

    let mut subscription = match realtime(url).subscribe("items-changes", "items").await {
        Ok(subscription) => subscription,
        Err(error) => unreachable!("join should be accepted: {error}"),
    };

    let change = subscription.next().await;
    assert!(matches!(
        change,
        Some(ref c) if c.event_type == "INSERT"
            && c.table == "items"
            && c.new.as_ref().is_some_and(|row| row["value"] == "hello")
            && c.old.is_none()
    ));

    subscription.stop();
    let leave = tokio::time::timeout(Duration::from_secs(2), seen).await;
    assert!(matches!(
        leave,
        Ok(Ok(ref message))
            if message.event == "phx_leave" && message.topic == "realtime:items-changes"
    ));
}

#[tokio::test]
async fn rejected_join_is_an_error() {
    let (url, _seen) = serve_once(JoinReply::Error).await;
    let result = realtime(url).subscribe("items-changes", "items").await;
    assert!(matches!(
        result,
        Err(SupabaseError::JoinRejected(reason)) if reason.contains("denied")
    ));
}

#[tokio::test]
async fn silent_server_times_out() {
    let (url, _seen) = serve_once(JoinReply::Silent).await;
    let result = realtime(url).subscribe("items-changes", "items").await;
    assert!(matches!(result, Err(SupabaseError::Timeout(_))));
}
