//! In-memory relay for integration tests: serves a fixed event store,
//! answering each REQ with the matching events (newest first, limit
//! applied) followed by EOSE, and records every inbound frame.

use futures_util::{SinkExt, StreamExt};
use nostr_fetch::event::{build_unsigned_event, generate_keypair, sign_event, NostrEvent};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub struct StoreRelay {
    pub url: String,
    pub frames: mpsc::UnboundedReceiver<String>,
}

impl StoreRelay {
    /// Drain and parse the REQ frames the relay has received so far.
    pub fn reqs(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            if let Ok(value) = serde_json::from_str::<Value>(&frame) {
                if value.get(0).and_then(Value::as_str) == Some("REQ") {
                    out.push(value);
                }
            }
        }
        out
    }
}

pub async fn spawn_store_relay(events: Vec<NostrEvent>) -> StoreRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let events = events.clone();
            let frames_tx = frames_tx.clone();
            tokio::spawn(async move {
                let mut ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(txt) = msg else {
                        continue;
                    };
                    let _ = frames_tx.send(txt.clone());
                    let Ok(value) = serde_json::from_str::<Value>(&txt) else {
                        continue;
                    };
                    let Some(arr) = value.as_array() else {
                        continue;
                    };
                    if arr.first().and_then(Value::as_str) != Some("REQ") {
                        continue;
                    }
                    let sub_id = arr
                        .get(1)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let filter = arr.get(2).cloned().unwrap_or_else(|| json!({}));
                    for ev in select(&events, &filter) {
                        if ws
                            .send(Message::Text(json!(["EVENT", sub_id, ev]).to_string()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    if ws
                        .send(Message::Text(json!(["EOSE", sub_id]).to_string()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            });
        }
    });

    StoreRelay {
        url: format!("ws://{}", addr),
        frames: frames_rx,
    }
}

/// Relay-side filter evaluation: authors, since, until (inclusive) and
/// limit, newest first.
fn select(events: &[NostrEvent], filter: &Value) -> Vec<NostrEvent> {
    let authors: Option<Vec<String>> = filter.get("authors").and_then(Value::as_array).map(|a| {
        a.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    });
    let since = filter.get("since").and_then(Value::as_u64);
    let until = filter.get("until").and_then(Value::as_u64);
    let limit = filter
        .get("limit")
        .and_then(Value::as_u64)
        .map(|l| l as usize)
        .unwrap_or(usize::MAX);

    let mut matched: Vec<NostrEvent> = events
        .iter()
        .filter(|ev| {
            authors
                .as_ref()
                .map(|a| a.contains(&ev.pubkey))
                .unwrap_or(true)
                && since.map(|s| ev.created_at >= s).unwrap_or(true)
                && until.map(|u| ev.created_at <= u).unwrap_or(true)
        })
        .cloned()
        .collect();
    matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matched.truncate(limit);
    matched
}

pub fn keypair() -> (String, String) {
    generate_keypair()
}

pub fn signed_event(pk: &str, sk: &str, created_at: u64, content: &str) -> NostrEvent {
    let unsigned = build_unsigned_event(pk, 1, vec![], content.to_string(), created_at);
    sign_event(&unsigned, sk).expect("sign event")
}

/// An event whose signature does not verify but whose schema is intact.
pub fn forged_event(pk: &str, sk: &str, created_at: u64, content: &str) -> NostrEvent {
    let mut ev = signed_event(pk, sk, created_at, content);
    let (other_pk, other_sk) = generate_keypair();
    ev.sig = signed_event(&other_pk, &other_sk, created_at, content).sig;
    ev
}
