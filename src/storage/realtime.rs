use std::time::Duration;

use futures_util::sink::Sink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use url::Url;

use crate::error::StoreError;
use crate::storage::{ChangeEvent, ChangeFilter, ChangeKind, Subscription, Table};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);
const JOIN_REF: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixFrame {
    pub fn join(topic: &str, filter: &ChangeFilter, reference: &str) -> Self {
        // Several kinds are requested as `*` and narrowed locally.
        let event = match filter.kinds.as_slice() {
            [single] => single.as_wire(),
            _ => "*",
        };
        let mut change = json!({
            "event": event,
            "schema": "public",
            "table": filter.table.name(),
        });
        if let Some(row_filter) = filter.row_filter() {
            change["filter"] = Value::String(row_filter);
        }
        Self {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [change],
                }
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// The row change carried by a `postgres_changes` frame, if any.
    pub fn change_event(&self) -> Option<ChangeEvent> {
        if self.event != "postgres_changes" {
            return None;
        }
        let data = self.payload.get("data")?;
        let kind = ChangeKind::from_wire(data.get("type")?.as_str()?)?;
        let table = Table::from_name(data.get("table")?.as_str()?)?;
        let record = match kind {
            ChangeKind::Delete => data.get("old_record").cloned().unwrap_or(Value::Null),
            _ => data.get("record").cloned().unwrap_or(Value::Null),
        };
        Some(ChangeEvent { table, kind, record })
    }

    fn is_join_reply(&self) -> bool {
        self.event == "phx_reply" && self.reference.as_deref() == Some(JOIN_REF)
    }
}

/// `https://x.supabase.co` becomes `wss://x.supabase.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
pub fn realtime_url(base_url: &str, api_key: &str) -> Result<Url, StoreError> {
    let mut url = Url::parse(base_url).map_err(|e| StoreError::Realtime(format!("{base_url}: {e}")))?;
    let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
    url.set_scheme(scheme)
        .map_err(|_| StoreError::Realtime(format!("cannot use {scheme} for {base_url}")))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

pub fn topic_for(filter: &ChangeFilter) -> String {
    match (&filter.table, &filter.column_eq) {
        (Table::Messages, Some((_, id))) => format!("realtime:chat-{}", id),
        (table, _) => format!("realtime:realtime-{}", table.name()),
    }
}

async fn send_frame<S>(sink: &mut S, frame: &PhoenixFrame) -> Result<(), StoreError>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let text = serde_json::to_string(frame).map_err(|e| StoreError::Realtime(e.to_string()))?;
    sink.send(WsMessage::Text(text))
        .await
        .map_err(|e| StoreError::Realtime(e.to_string()))
}

/// Connects, joins the channel for `filter` and returns once the server has
/// acknowledged the join. The socket lives in a worker owned by the returned
/// [`Subscription`]; releasing it makes the worker leave the channel and close
/// the socket.
pub async fn subscribe(url: Url, filter: ChangeFilter) -> Result<Subscription, StoreError> {
    let topic = topic_for(&filter);
    let (ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| StoreError::Realtime(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    send_frame(&mut sink, &PhoenixFrame::join(&topic, &filter, JOIN_REF)).await?;
    let reply = tokio::time::timeout(JOIN_TIMEOUT, async {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    if let Ok(frame) = serde_json::from_str::<PhoenixFrame>(&text) {
                        if frame.is_join_reply() {
                            return Ok(frame);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(StoreError::Realtime(e.to_string())),
            }
        }
        Err(StoreError::Realtime("socket closed before join reply".into()))
    })
    .await
    .map_err(|_| StoreError::Realtime(format!("timed out joining {topic}")))??;

    if reply.payload.get("status").and_then(Value::as_str) != Some("ok") {
        return Err(StoreError::Realtime(format!("join of {topic} rejected: {}", reply.payload)));
    }
    info!("joined realtime channel {}", topic);

    let (tx, rx) = mpsc::unbounded_channel();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let worker = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut next_ref: u64 = 1;
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    next_ref += 1;
                    if let Err(e) = send_frame(&mut sink, &PhoenixFrame::heartbeat(next_ref)).await {
                        warn!("realtime heartbeat on {} failed: {}", topic, e);
                        break;
                    }
                }
                _ = &mut stop_rx => break,
                _ = tx.closed() => break,
                incoming = stream.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = match serde_json::from_str::<PhoenixFrame>(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                debug!("ignoring realtime frame: {}", e);
                                continue;
                            }
                        };
                        if let Some(event) = frame.change_event() {
                            if filter.matches(&event) && tx.send(event).is_err() {
                                break;
                            }
                        } else if frame.event == "phx_error" || frame.event == "phx_close" {
                            warn!("realtime channel {} ended: {}", topic, frame.event);
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("realtime socket for {} closed", topic);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("realtime socket for {} failed: {}", topic, e);
                        break;
                    }
                }
            }
        }
        let goodbye = async {
            send_frame(&mut sink, &PhoenixFrame::leave(&topic, next_ref + 1)).await?;
            sink.close().await.map_err(|e| StoreError::Realtime(e.to_string()))
        };
        match tokio::time::timeout(LEAVE_TIMEOUT, goodbye).await {
            Ok(Ok(())) => debug!("left realtime channel {}", topic),
            Ok(Err(e)) => debug!("leaving {} failed: {}", topic, e),
            Err(_) => debug!("leaving {} timed out", topic),
        }
    });
    Ok(Subscription::with_shutdown(rx, worker, stop_tx))
}
