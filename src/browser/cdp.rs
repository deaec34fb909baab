//! Minimal Chrome DevTools Protocol client.
//!
//! One WebSocket per browser. Commands carry a numeric id and are matched to
//! their responses by a background reader task; everything without an id is an
//! event and is fanned out on a broadcast channel. Page-level commands are sent
//! through a flattened target session (`sessionId` on the envelope).

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    net::TcpStream,
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{BrowserError, BrowserResult};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BrowserResult<Value>>>>>;

/// A protocol event (a message without an `id`).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<ProtocolErrorBody>,
    method: Option<String>,
    params: Option<Value>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProtocolErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

pub struct CdpConnection {
    writer: tokio::sync::Mutex<WsSink>,
    pending: Pending,
    next_id: AtomicU64,
    events: broadcast::Sender<CdpEvent>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> BrowserResult<Self> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|err| BrowserError::Launch(format!("devtools connect to {ws_url}: {err}")))?;
        let (writer, mut stream) = ws.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn({
            let pending = Arc::clone(&pending);
            let events = events.clone();
            let closed = Arc::clone(&closed);
            async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => dispatch(&text, &pending, &events),
                        Ok(Message::Binary(bytes)) => {
                            dispatch(&String::from_utf8_lossy(&bytes), &pending, &events)
                        }
                        Ok(Message::Close(frame)) => {
                            debug!("devtools socket closed: {frame:?}");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!("devtools socket error: {err}");
                            break;
                        }
                    }
                }

                closed.store(true, Ordering::SeqCst);
                fail_pending(&pending, "devtools connection closed");
            }
        });

        Ok(Self {
            writer: tokio::sync::Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            events,
            closed,
            reader,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Sends a command and waits up to `timeout` for its response.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> BrowserResult<Value> {
        if self.is_closed() {
            return Err(BrowserError::Disconnected(
                "devtools connection closed".into(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, reply_tx);

        let mut envelope = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            envelope["sessionId"] = Value::String(session_id.to_string());
        }

        let sent = self
            .writer
            .lock()
            .await
            .send(Message::Text(envelope.to_string()))
            .await;
        if let Err(err) = sent {
            lock_pending(&self.pending).remove(&id);
            return Err(BrowserError::Disconnected(format!("send {method}: {err}")));
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrowserError::Disconnected(format!(
                "{method}: response channel dropped"
            ))),
            Err(_) => {
                lock_pending(&self.pending).remove(&id);
                debug!("devtools command {method} timed out");
                Err(BrowserError::timeout("devtools command", timeout))
            }
        }
    }
}

fn lock_pending(
    pending: &Pending,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<BrowserResult<Value>>>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn fail_pending(pending: &Pending, reason: &str) {
    let waiters: Vec<_> = lock_pending(pending).drain().collect();
    for (_, reply_tx) in waiters {
        let _ = reply_tx.send(Err(BrowserError::Disconnected(reason.to_string())));
    }
}

fn dispatch(text: &str, pending: &Pending, events: &broadcast::Sender<CdpEvent>) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!("dropping malformed devtools message: {err}");
            return;
        }
    };

    if let Some(id) = envelope.id {
        let Some(reply_tx) = lock_pending(pending).remove(&id) else {
            debug!("devtools response {id} has no waiter");
            return;
        };
        let result = match envelope.error {
            Some(err) => Err(BrowserError::Protocol(format!(
                "{} (code {})",
                err.message, err.code
            ))),
            None => Ok(envelope.result.unwrap_or(Value::Null)),
        };
        let _ = reply_tx.send(result);
        return;
    }

    if let Some(method) = envelope.method {
        // No subscribers is fine.
        let _ = events.send(CdpEvent {
            method,
            params: envelope.params.unwrap_or(Value::Null),
            session_id: envelope.session_id,
        });
    }
}
