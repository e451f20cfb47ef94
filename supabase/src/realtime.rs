//! Realtime change feed over WebSocket
//!
//! The realtime service speaks Phoenix channel framing: JSON objects with
//! `topic`, `event`, `payload`, `ref` and `join_ref`. One socket is opened per
//! subscription; it joins `realtime:<channel>` with a `postgres_changes`
//! filter for one table, then forwards row changes until stopped.
//!
//! ```text
//! client                                   server
//!   | phx_join {postgres_changes filter} ->  |
//!   | <- phx_reply {status: ok}              |
//!   | <- system {Subscribed to PostgreSQL}   |
//!   | <- postgres_changes {data: {...}}      |  (repeats)
//!   | heartbeat (every interval) ->          |
//!   | access_token (on session refresh) ->   |
//!   | phx_leave ->                           |
//! ```

use crate::auth::Session;
use crate::client::SupabaseClient;
use crate::error::SupabaseError;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

/// Reference used for the join message
const JOIN_REF: &str = "1";

/// One Phoenix channel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    /// Channel topic, e.g. `realtime:tickets-changes`
    pub topic: String,
    /// Event name, e.g. `phx_join`, `postgres_changes`
    pub event: String,
    /// Event body
    #[serde(default)]
    pub payload: Value,
    /// Message reference, echoed in replies
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    /// Reference of the join this message belongs to
    #[serde(default)]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    /// Join `realtime:<channel>` listening for every change to `public.<table>`
    #[must_use]
    pub fn join(channel: &str, table: &str, access_token: &str) -> Self {
        Self {
            topic: topic(channel),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [
                        { "event": "*", "schema": "public", "table": table }
                    ],
                },
                "access_token": access_token,
            }),
            reference: Some(JOIN_REF.to_string()),
            join_ref: Some(JOIN_REF.to_string()),
        }
    }

    /// Leave `realtime:<channel>`
    #[must_use]
    pub fn leave(channel: &str, reference: u64) -> Self {
        Self {
            topic: topic(channel),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: Some(JOIN_REF.to_string()),
        }
    }

    /// Hand the channel a refreshed access token
    #[must_use]
    pub fn access_token(channel: &str, access_token: &str, reference: u64) -> Self {
        Self {
            topic: topic(channel),
            event: "access_token".to_string(),
            payload: json!({ "access_token": access_token }),
            reference: Some(reference.to_string()),
            join_ref: Some(JOIN_REF.to_string()),
        }
    }

    /// Socket keep-alive
    #[must_use]
    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    fn to_text(&self) -> Result<String, SupabaseError> {
        serde_json::to_string(self).map_err(|e| SupabaseError::Realtime(e.to_string()))
    }
}

fn topic(channel: &str) -> String {
    format!("realtime:{channel}")
}

/// A row change as delivered by the feed, before it is decoded into a
/// typed record.
#[derive(Debug, Clone, PartialEq)]
pub struct PostgresChange {
    /// `INSERT`, `UPDATE`, `DELETE`, or whatever else the server sent
    pub event_type: String,
    /// Table name
    pub table: String,
    /// Schema name
    pub schema: String,
    /// Commit time as reported by the server
    pub commit_timestamp: Option<String>,
    /// Row after the change (inserts and updates)
    pub new: Option<Value>,
    /// Row before the change; for deletes usually only the primary key
    pub old: Option<Value>,
}

/// A decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A row changed
    Change(PostgresChange),
    /// Reply to a message we sent
    Reply {
        /// Reference of the message being answered
        reference: Option<String>,
        /// `ok` or `error`
        status: String,
        /// Reply body
        response: Value,
    },
    /// Informational event from the server (subscription status and such)
    System(Value),
    /// The server closed or errored the channel
    Closed(String),
    /// Anything else (presence, broadcast)
    Other(String),
}

/// Decode one text frame
///
/// # Errors
///
/// Returns [`SupabaseError::Realtime`] when the text is not a Phoenix message.
pub fn decode_frame(text: &str) -> Result<Frame, SupabaseError> {
    let message: PhoenixMessage =
        serde_json::from_str(text).map_err(|e| SupabaseError::Realtime(e.to_string()))?;
    let payload = message.payload;

    Ok(match message.event.as_str() {
        "postgres_changes" => {
            let data = payload.get("data").cloned().unwrap_or(Value::Null);
            let text_field = |key: &str| {
                data.get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };
            let row_field = |key: &str| data.get(key).filter(|v| is_row(v)).cloned();

            Frame::Change(PostgresChange {
                event_type: text_field("type").unwrap_or_default(),
                table: text_field("table").unwrap_or_default(),
                schema: text_field("schema").unwrap_or_default(),
                commit_timestamp: text_field("commit_timestamp"),
                new: row_field("record"),
                old: row_field("old_record"),
            })
        },
        "phx_reply" => Frame::Reply {
            reference: message.reference,
            status: payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            response: payload.get("response").cloned().unwrap_or(Value::Null),
        },
        "system" => Frame::System(payload),
        closed @ ("phx_close" | "phx_error") => Frame::Closed(closed.to_string()),
        other => Frame::Other(other.to_string()),
    })
}

/// A non-empty JSON object
fn is_row(value: &Value) -> bool {
    value.as_object().is_some_and(|row| !row.is_empty())
}

/// Opens realtime subscriptions with the client's current token
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    client: SupabaseClient,
}

impl RealtimeClient {
    /// Create a realtime client sharing `client`'s session
    #[must_use]
    pub const fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    /// Connect, join `realtime:<channel>` for `table`, and start forwarding
    /// changes.
    ///
    /// Returns once the server has accepted the join.
    ///
    /// # Errors
    ///
    /// - [`SupabaseError::Realtime`]: the socket could not be opened or closed early
    /// - [`SupabaseError::JoinRejected`]: the server refused the channel
    /// - [`SupabaseError::Timeout`]: no join reply within the configured timeout
    pub async fn subscribe(
        &self,
        channel: &str,
        table: &str,
    ) -> Result<RealtimeSubscription, SupabaseError> {
        let config = self.client.config();
        let (socket, _) = tokio_tungstenite::connect_async(config.realtime_url())
            .await
            .map_err(|e| SupabaseError::Realtime(e.to_string()))?;
        let (mut write, mut read) = socket.split();

        let join = PhoenixMessage::join(channel, table, &self.client.bearer_token());
        write
            .send(Message::Text(join.to_text()?))
            .await
            .map_err(|e| SupabaseError::Realtime(e.to_string()))?;

        tokio::time::timeout(config.join_timeout, async {
            while let Some(message) = read.next().await {
                let message = message.map_err(|e| SupabaseError::Realtime(e.to_string()))?;
                let Message::Text(text) = message else {
                    continue;
                };
                match decode_frame(&text)? {
                    Frame::Reply {
                        reference,
                        status,
                        response,
                    } if reference.as_deref() == Some(JOIN_REF) => {
                        return if status == "ok" {
                            Ok(())
                        } else {
                            Err(SupabaseError::JoinRejected(response.to_string()))
                        };
                    },
                    Frame::Closed(event) => return Err(SupabaseError::JoinRejected(event)),
                    frame => tracing::trace!(?frame, "Frame before join reply"),
                }
            }
            Err(SupabaseError::Realtime("socket closed before join reply".to_string()))
        })
        .await
        .map_err(|_| SupabaseError::Timeout("realtime join reply"))??;

        tracing::info!(channel, table, "Realtime channel joined");

        let sessions = self.client.session_changes();
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(pump(
            Pump {
                channel: channel.to_string(),
                heartbeat_interval: config.heartbeat_interval,
                changes: changes_tx,
                stop: stop_rx,
                sessions,
            },
            write,
            read,
        ));

        Ok(RealtimeSubscription {
            changes: changes_rx,
            stop: Some(stop_tx),
        })
    }
}

struct Pump {
    channel: String,
    heartbeat_interval: std::time::Duration,
    changes: mpsc::UnboundedSender<PostgresChange>,
    stop: oneshot::Receiver<()>,
    sessions: watch::Receiver<Option<Session>>,
}

/// Forward changes until stopped, the receiver is dropped, or the socket ends
async fn pump<W, R>(mut pump: Pump, mut write: W, mut read: R)
where
    W: futures::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + pump.heartbeat_interval,
        pump.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_ref: u64 = 2;
    let mut sessions_open = true;

    loop {
        tokio::select! {
            _ = &mut pump.stop => {
                if let Ok(leave) = PhoenixMessage::leave(&pump.channel, next_ref).to_text() {
                    let _ = write.send(Message::Text(leave)).await;
                }
                let _ = write.close().await;
                tracing::info!(channel = %pump.channel, "Realtime channel left");
                break;
            },
            _ = heartbeat.tick() => {
                let Ok(beat) = PhoenixMessage::heartbeat(next_ref).to_text() else {
                    break;
                };
                next_ref += 1;
                if let Err(error) = write.send(Message::Text(beat)).await {
                    tracing::warn!(channel = %pump.channel, %error, "Heartbeat failed");
                    break;
                }
            },
            changed = pump.sessions.changed(), if sessions_open => {
                if changed.is_err() {
                    sessions_open = false;
                    continue;
                }
                let token = pump
                    .sessions
                    .borrow_and_update()
                    .as_ref()
                    .map(|session| session.access_token.clone());
                // Signed out: the server drops the channel once the old token lapses
                let Some(token) = token else {
                    continue;
                };
                let update = PhoenixMessage::access_token(&pump.channel, &token, next_ref);
                let Ok(text) = update.to_text() else {
                    continue;
                };
                next_ref += 1;
                if let Err(error) = write.send(Message::Text(text)).await {
                    tracing::warn!(channel = %pump.channel, %error, "Token update failed");
                    break;
                }
                tracing::debug!(channel = %pump.channel, "Channel token updated");
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                    Ok(Frame::Change(change)) => {
                        tracing::debug!(
                            channel = %pump.channel,
                            event_type = %change.event_type,
                            table = %change.table,
                            "Change received"
                        );
                        if pump.changes.send(change).is_err() {
                            break;
                        }
                    },
                    Ok(Frame::System(payload)) => {
                        tracing::debug!(channel = %pump.channel, %payload, "System event");
                    },
                    Ok(Frame::Closed(event)) => {
                        tracing::warn!(
                            channel = %pump.channel,
                            event = %event,
                            "Channel closed by server"
                        );
                        break;
                    },
                    Ok(frame) => tracing::trace!(channel = %pump.channel, ?frame, "Ignored frame"),
                    Err(error) => {
                        tracing::warn!(channel = %pump.channel, %error, "Undecodable frame");
                    },
                },
                Some(Ok(Message::Close(_))) | None => {
                    tracing::warn!(channel = %pump.channel, "Realtime socket closed");
                    break;
                },
                Some(Ok(_)) => {},
                Some(Err(error)) => {
                    tracing::warn!(channel = %pump.channel, %error, "Realtime socket failed");
                    break;
                },
            },
        }
    }
}

/// Live feed of raw changes for one channel.
///
/// Ends when the socket closes. [`RealtimeSubscription::stop`] (or dropping
/// the handle) leaves the channel and closes the socket.
#[derive(Debug)]
pub struct RealtimeSubscription {
    changes: mpsc::UnboundedReceiver<PostgresChange>,
    stop: Option<oneshot::Sender<()>>,
}

impl RealtimeSubscription {
    /// Split into the change stream and a stop signal
    ///
    /// Sending on (or dropping) the signal leaves the channel.
    #[must_use]
    pub fn into_parts(mut self) -> (ChangeStream, oneshot::Sender<()>) {
        let (fallback, _) = oneshot::channel();
        let stop = self.stop.take().unwrap_or(fallback);
        let (_, empty) = mpsc::unbounded_channel();
        let changes = std::mem::replace(&mut self.changes, empty);
        (ChangeStream { changes }, stop)
    }

    /// Leave the channel
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Stream for RealtimeSubscription {
    type Item = PostgresChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.changes.poll_recv(cx)
    }
}

/// Change stream half of a [`RealtimeSubscription`]
#[derive(Debug)]
pub struct ChangeStream {
    changes: mpsc::UnboundedReceiver<PostgresChange>,
}

impl Stream for ChangeStream {
    type Item = PostgresChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.changes.poll_recv(cx)
    }
}
