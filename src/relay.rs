use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::channel::AbortSignal;
use crate::event::{self, NostrEvent};
use crate::filter::Filter;
use crate::util::{generate_sub_id, normalize_relay_url};

/// Failure of one per-relay subscription, surfaced as the terminal item
/// of its [`SubStream`].
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{0}")]
pub struct SubError(pub String);

/// Options for one REQ/EOSE cycle.
#[derive(Clone, Debug)]
pub struct SubOptions {
    pub sub_id: Option<String>,
    pub skip_verification: bool,
    /// Inactivity window after which the subscription is closed without
    /// waiting for EOSE.
    pub abort_sub_before_eose_timeout: Duration,
    pub abort: Option<AbortSignal>,
}

impl Default for SubOptions {
    fn default() -> Self {
        Self {
            sub_id: None,
            skip_verification: false,
            abort_sub_before_eose_timeout: Duration::from_secs(10),
            abort: None,
        }
    }
}

/// Lazy event sequence for one subscription: validated events in relay
/// order, then either a clean end or one terminal error.
pub struct SubStream {
    rx: mpsc::Receiver<Result<NostrEvent, SubError>>,
}

impl SubStream {
    pub async fn next(&mut self) -> Option<Result<NostrEvent, SubError>> {
        self.rx.recv().await
    }

    fn failed(message: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Err(SubError(message.into())));
        Self { rx }
    }
}

/// Connection-pool capability injected into the fetcher. Implementations
/// own the sockets; the fetcher only ever sees relay URLs and event
/// streams.
#[async_trait]
pub trait RelayPool: Send + Sync {
    /// Connect to the given relay URLs, reusing live connections, and
    /// return the normalized subset reachable within `connect_timeout`.
    async fn ensure_relays(&self, urls: &[String], connect_timeout: Duration) -> Vec<String>;

    /// Drive one REQ on an already-ensured relay until EOSE, notice,
    /// inactivity, abort, or transport failure.
    async fn fetch_till_eose(&self, url: &str, filter: Filter, opts: SubOptions) -> SubStream;

    /// Close every connection; in-flight subscriptions observe a
    /// transport error.
    async fn shutdown(&self);
}

enum RelayIncoming {
    Event(NostrEvent),
    Eose,
    Notice(String),
    Disconnected,
}

type SubRegistry = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<RelayIncoming>>>>;

struct RelayConn {
    outgoing: mpsc::UnboundedSender<Message>,
    subs: SubRegistry,
}

impl RelayConn {
    fn is_alive(&self) -> bool {
        !self.outgoing.is_closed()
    }
}

/// WebSocket pool over `tokio-tungstenite`: one reader/writer task per
/// relay, incoming frames routed to subscriptions by sub id.
pub struct DefaultRelayPool {
    conns: Mutex<HashMap<String, RelayConn>>,
}

impl DefaultRelayPool {
    pub fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
        }
    }

    async fn connect(url: &str, connect_timeout: Duration) -> anyhow::Result<RelayConn> {
        let (ws, _) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| anyhow!("connect timed out"))??;
        let (outgoing, rx_out) = mpsc::unbounded_channel();
        let subs: SubRegistry = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(run_connection(url.to_string(), ws, rx_out, subs.clone()));
        Ok(RelayConn { outgoing, subs })
    }
}

impl Default for DefaultRelayPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayPool for DefaultRelayPool {
    async fn ensure_relays(&self, urls: &[String], connect_timeout: Duration) -> Vec<String> {
        let mut targets = Vec::new();
        for url in urls {
            match normalize_relay_url(url) {
                Some(normalized) => {
                    if !targets.contains(&normalized) {
                        targets.push(normalized);
                    }
                }
                None => tracing::warn!(relay = %url, "invalid relay url skipped"),
            }
        }

        let mut connected = Vec::new();
        let mut pending = Vec::new();
        {
            let conns = self.conns.lock().await;
            for url in targets {
                match conns.get(&url) {
                    Some(conn) if conn.is_alive() => connected.push(url),
                    _ => pending.push(url),
                }
            }
        }

        let attempts = pending.into_iter().map(|url| async move {
            match Self::connect(&url, connect_timeout).await {
                Ok(conn) => {
                    tracing::info!(relay = %url, "relay connected");
                    Some((url, conn))
                }
                Err(err) => {
                    tracing::warn!(relay = %url, error = %err, "relay connect failed");
                    None
                }
            }
        });
        let results = futures_util::future::join_all(attempts).await;

        let mut conns = self.conns.lock().await;
        for (url, conn) in results.into_iter().flatten() {
            conns.insert(url.clone(), conn);
            connected.push(url);
        }
        connected
    }

    async fn fetch_till_eose(&self, url: &str, filter: Filter, opts: SubOptions) -> SubStream {
        let key = normalize_relay_url(url).unwrap_or_else(|| url.to_string());
        let conns = self.conns.lock().await;
        let Some(conn) = conns.get(&key).filter(|c| c.is_alive()) else {
            return SubStream::failed(format!("relay {} is not connected", url));
        };

        let sub_id = opts.sub_id.clone().unwrap_or_else(generate_sub_id);
        let (route_tx, route_rx) = mpsc::unbounded_channel();
        conn.subs.lock().await.insert(sub_id.clone(), route_tx);

        let req = json!(["REQ", sub_id, filter]).to_string();
        if conn.outgoing.send(Message::Text(req)).is_err() {
            conn.subs.lock().await.remove(&sub_id);
            return SubStream::failed(format!("connection to {} lost before EOSE", url));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(drive_subscription(
            key,
            sub_id,
            route_rx,
            tx,
            conn.outgoing.clone(),
            conn.subs.clone(),
            opts,
        ));
        SubStream { rx }
    }

    async fn shutdown(&self) {
        self.conns.lock().await.clear();
    }
}

async fn run_connection(
    url: String,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<Message>,
    subs: SubRegistry,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            out = rx_out.recv() => match out {
                Some(msg) => {
                    if let Err(err) = write.send(msg).await {
                        tracing::warn!(relay = %url, error = %err, "relay send failed");
                        break;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(txt))) => dispatch_frame(&url, &txt, &subs).await,
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(relay = %url, error = %err, "relay read failed");
                    break;
                }
            }
        }
    }
    let mut registry = subs.lock().await;
    for (_, tx) in registry.drain() {
        let _ = tx.send(RelayIncoming::Disconnected);
    }
}

async fn dispatch_frame(url: &str, raw: &str, subs: &SubRegistry) {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        tracing::debug!(relay = %url, "malformed frame dropped");
        return;
    };
    let Some(arr) = value.as_array() else {
        tracing::debug!(relay = %url, "non-array frame dropped");
        return;
    };
    match arr.first().and_then(|v| v.as_str()) {
        Some("EVENT") if arr.len() >= 3 => {
            let Some(sub_id) = arr[1].as_str() else {
                return;
            };
            let Ok(ev) = serde_json::from_value::<NostrEvent>(arr[2].clone()) else {
                tracing::debug!(relay = %url, "undecodable event dropped");
                return;
            };
            let registry = subs.lock().await;
            if let Some(tx) = registry.get(sub_id) {
                let _ = tx.send(RelayIncoming::Event(ev));
            }
        }
        Some("EOSE") if arr.len() >= 2 => {
            let Some(sub_id) = arr[1].as_str() else {
                return;
            };
            let registry = subs.lock().await;
            if let Some(tx) = registry.get(sub_id) {
                let _ = tx.send(RelayIncoming::Eose);
            }
        }
        Some("NOTICE") => {
            // connection-scoped: every open subscription on this relay stops
            let text = arr.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
            let registry = subs.lock().await;
            for tx in registry.values() {
                let _ = tx.send(RelayIncoming::Notice(text.clone()));
            }
        }
        Some("OK") | Some("AUTH") | Some("COUNT") => {}
        other => {
            tracing::debug!(relay = %url, kind = ?other, "unknown frame dropped");
        }
    }
}

async fn drive_subscription(
    url: String,
    sub_id: String,
    mut incoming: mpsc::UnboundedReceiver<RelayIncoming>,
    out: mpsc::Sender<Result<NostrEvent, SubError>>,
    outgoing: mpsc::UnboundedSender<Message>,
    subs: SubRegistry,
    opts: SubOptions,
) {
    let mut abort = opts.abort.clone();
    let mut send_close = true;
    'drive: loop {
        let idle = tokio::time::sleep(opts.abort_sub_before_eose_timeout);
        tokio::pin!(idle);
        tokio::select! {
            msg = incoming.recv() => match msg {
                Some(RelayIncoming::Event(ev)) => {
                    if !event::validate_event_schema(&ev) {
                        tracing::debug!(relay = %url, "event failed schema validation");
                        continue;
                    }
                    if !opts.skip_verification && !event::verify_event(&ev).unwrap_or(false) {
                        tracing::debug!(relay = %url, id = %ev.id, "event failed signature verification");
                        continue;
                    }
                    if out.send(Ok(ev)).await.is_err() {
                        break 'drive;
                    }
                }
                Some(RelayIncoming::Eose) => break 'drive,
                Some(RelayIncoming::Notice(text)) => {
                    tracing::debug!(relay = %url, notice = %text, "subscription ended by notice");
                    break 'drive;
                }
                Some(RelayIncoming::Disconnected) | None => {
                    // the socket is gone, a CLOSE would go nowhere
                    send_close = false;
                    let _ = out
                        .send(Err(SubError(format!("connection to {} lost before EOSE", url))))
                        .await;
                    break 'drive;
                }
            },
            _ = &mut idle => {
                tracing::debug!(relay = %url, sub = %sub_id, "no progress before EOSE, closing subscription");
                break 'drive;
            }
            _ = wait_aborted(&mut abort) => break 'drive,
        }
    }
    if send_close {
        let _ = outgoing.send(Message::Text(json!(["CLOSE", sub_id]).to_string()));
    }
    subs.lock().await.remove(&sub_id);
}

async fn wait_aborted(abort: &mut Option<AbortSignal>) {
    match abort {
        Some(signal) => signal.aborted().await,
        None => std::future::pending().await,
    }
}
