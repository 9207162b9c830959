//! Socket-backed container session
//!
//! Maintains a persistent WebSocket connection to the container runtime and
//! provides the request/response surface plus the context-change stream over
//! it. Wire frames are JSON envelopes tagged with a monotonic request id;
//! a read loop dispatches responses to pending waiters and event frames to
//! the change broadcast.
//!
//! On connection loss the session reconnects with exponential backoff,
//! re-resolving the address through the caching URL resolver (so the seeded
//! address is reused instead of re-querying the network) and re-opening the
//! container for its locator. A context-change notification is fired after
//! every re-establishment, since the container may have reloaded while the
//! connection was down.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::container::CachingUrlResolver;
use crate::kv::{Capability, KeyValue};
use crate::resolution::ResolvedUrl;
use crate::session::{ContainerSession, SessionResponse, CONTENT_KIND_COMPONENT};
use crate::types::{LatchkeyError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(100);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Outbound wire frame.
#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    id: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    locator: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    op: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
}

impl<'a> WireRequest<'a> {
    fn blank(kind: &'static str) -> Self {
        Self {
            id: 0,
            kind,
            locator: None,
            mode: None,
            client: None,
            path: None,
            op: None,
            key: None,
            value: None,
        }
    }

    /// Container open handshake for a locator.
    fn open(locator: &'a str, mode: &'a str, client: &'a str) -> Self {
        Self {
            locator: Some(locator),
            mode: Some(mode),
            client: Some(client),
            ..Self::blank("open")
        }
    }

    /// Component request against the open container.
    fn component(path: &'a str) -> Self {
        Self {
            path: Some(path),
            ..Self::blank("request")
        }
    }

    /// Key/value operation against the discovered component.
    fn kv(op: &'static str, key: Option<&'a str>, value: Option<serde_json::Value>) -> Self {
        Self {
            op: Some(op),
            key,
            value,
            ..Self::blank("kv")
        }
    }
}

/// Inbound wire frame. Responses carry an id; event frames carry an event tag.
#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default, rename = "contentKind")]
    content_kind: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

/// Decoded response payload handed to a pending waiter.
#[derive(Debug, Clone)]
struct WireResponse {
    status: u16,
    content_kind: String,
    value: Option<serde_json::Value>,
}

/// Shared connection state: the writer half, the pending-request table and
/// the change broadcast. The reader half lives in the connection task.
struct SocketCore {
    locator: String,
    mode: String,
    client_name: String,
    writer: Mutex<Option<WsSink>>,
    pending: DashMap<u64, oneshot::Sender<WireResponse>>,
    next_id: AtomicU64,
    changes: broadcast::Sender<()>,
}

impl SocketCore {
    /// Send one frame and await its response. No timeout is imposed here.
    async fn roundtrip(&self, mut request: WireRequest<'_>) -> Result<WireResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        request.id = id;
        let text = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                self.pending.remove(&id);
                return Err(LatchkeyError::Transport("session disconnected".into()));
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                self.pending.remove(&id);
                return Err(e.into());
            }
        }

        rx.await
            .map_err(|_| LatchkeyError::Transport("session closed before response".into()))
    }
}

/// A container session over a persistent WebSocket connection.
pub struct SocketSession {
    core: Arc<SocketCore>,
}

impl std::fmt::Debug for SocketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketSession")
            .field("locator", &self.core.locator)
            .field("mode", &self.core.mode)
            .field("client_name", &self.core.client_name)
            .finish_non_exhaustive()
    }
}

impl SocketSession {
    /// Connect to the resolved endpoint, open the container for the locator
    /// and start the connection task.
    pub async fn open(
        locator: &str,
        resolved: &ResolvedUrl,
        resolver: Arc<CachingUrlResolver>,
        mode: &str,
        client_name: &str,
    ) -> Result<Arc<Self>> {
        let (mut sink, mut stream) = connect(&resolved.endpoint, resolver.gateway_url()).await?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let core = Arc::new(SocketCore {
            locator: locator.to_string(),
            mode: mode.to_string(),
            client_name: client_name.to_string(),
            writer: Mutex::new(None),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            changes,
        });

        // A rejected locator must not leave anything running; the connection
        // task only starts once the container has accepted the open.
        open_handshake(&core, &mut sink, &mut stream).await?;
        *core.writer.lock().await = Some(sink);
        tokio::spawn(connection_loop(Arc::clone(&core), stream, resolver));

        info!(%locator, mode, "Container session open");
        Ok(Arc::new(Self { core }))
    }
}

#[async_trait::async_trait]
impl ContainerSession for SocketSession {
    async fn request(&self, path: &str) -> Result<SessionResponse> {
        let wire = self.core.roundtrip(WireRequest::component(path)).await?;

        let value = if wire.status == 200
            && wire.content_kind == CONTENT_KIND_COMPONENT
            && wire.value.as_ref().map(exposes_key_value).unwrap_or(false)
        {
            Some(Arc::new(RemoteKeyValue {
                core: Arc::clone(&self.core),
            }) as Capability)
        } else {
            None
        };

        Ok(SessionResponse {
            status: wire.status,
            content_kind: wire.content_kind,
            value,
        })
    }

    fn context_changes(&self) -> broadcast::Receiver<()> {
        self.core.changes.subscribe()
    }
}

/// Whether a component value advertises the key/value interface.
fn exposes_key_value(value: &serde_json::Value) -> bool {
    value
        .get("interfaces")
        .and_then(|v| v.as_array())
        .map(|interfaces| interfaces.iter().any(|i| i.as_str() == Some("keyValue")))
        .unwrap_or(false)
}

/// Key/value capability proxying each operation over the session.
///
/// Transport failures surface as misses; the capability itself stays valid
/// across reconnects because it only holds the shared connection state.
struct RemoteKeyValue {
    core: Arc<SocketCore>,
}

#[async_trait::async_trait]
impl KeyValue for RemoteKeyValue {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        match self.core.roundtrip(WireRequest::kv("get", Some(key), None)).await {
            Ok(response) => response.value,
            Err(e) => {
                debug!(key, "kv get failed: {}", e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value) {
        if let Err(e) = self
            .core
            .roundtrip(WireRequest::kv("set", Some(key), Some(value)))
            .await
        {
            debug!(key, "kv set failed: {}", e);
        }
    }

    async fn delete(&self, key: &str) -> bool {
        match self
            .core
            .roundtrip(WireRequest::kv("delete", Some(key), None))
            .await
        {
            Ok(response) => response.value.and_then(|v| v.as_bool()).unwrap_or(false),
            Err(e) => {
                debug!(key, "kv delete failed: {}", e);
                false
            }
        }
    }

    async fn entries(&self) -> Vec<(String, serde_json::Value)> {
        match self.core.roundtrip(WireRequest::kv("entries", None, None)).await {
            Ok(response) => response
                .value
                .and_then(|v| match v {
                    serde_json::Value::Object(map) => Some(map.into_iter().collect()),
                    _ => None,
                })
                .unwrap_or_default(),
            Err(e) => {
                debug!("kv entries failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Connect to a WebSocket endpoint with the handshake headers the container
/// runtime expects. The origin is the externally reachable gateway URL.
async fn connect(endpoint: &str, origin: &str) -> Result<(WsSink, WsStream)> {
    let host = endpoint
        .split("//")
        .last()
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("localhost");

    let request = Request::builder()
        .uri(endpoint)
        .header("Host", host)
        .header("Origin", origin)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .body(())
        .map_err(|e| LatchkeyError::Transport(format!("Failed to build request: {}", e)))?;

    let (ws, _) = connect_async_with_config(request, None, false).await?;
    Ok(ws.split())
}

/// Send the open frame for the core's locator and read the stream inline
/// until its ack arrives. The connection task is not reading at this point,
/// so frames must be consumed here.
async fn open_handshake(core: &SocketCore, sink: &mut WsSink, stream: &mut WsStream) -> Result<()> {
    let id = core.next_id.fetch_add(1, Ordering::Relaxed);
    let mut request = WireRequest::open(&core.locator, &core.mode, &core.client_name);
    request.id = id;
    let text = serde_json::to_string(&request)?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| LatchkeyError::SessionOpen(e.to_string()))?;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let Ok(frame) = serde_json::from_str::<WireFrame>(&text) else {
                    continue;
                };
                if frame.id != Some(id) {
                    continue;
                }
                let status = frame.status.unwrap_or(500);
                if !(200..300).contains(&status) {
                    return Err(LatchkeyError::SessionOpen(format!(
                        "container rejected locator {}: status {}",
                        core.locator, status
                    )));
                }
                return Ok(());
            }
            Ok(Message::Ping(data)) => {
                let _ = sink.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    Err(LatchkeyError::SessionOpen(format!(
        "connection closed while opening {}",
        core.locator
    )))
}

/// Owns the reader half: dispatches frames while connected, reconnects with
/// backoff when the connection drops. Runs for the process lifetime of the
/// session.
async fn connection_loop(core: Arc<SocketCore>, mut stream: WsStream, resolver: Arc<CachingUrlResolver>) {
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        read_frames(&core, &mut stream).await;

        // Connection lost: in-flight requests fail, new ones are refused
        // until the writer is restored.
        *core.writer.lock().await = None;
        core.pending.clear();
        warn!(locator = %core.locator, "Container connection lost");

        loop {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);

            let resolved = match resolver.resolve(&core.locator).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Re-resolution failed: {}", e);
                    continue;
                }
            };

            match connect(&resolved.endpoint, resolver.gateway_url()).await {
                Ok((mut sink, mut new_stream)) => {
                    // Re-open before accepting traffic; a rejection tears the
                    // link down and re-enters the backoff loop.
                    match open_handshake(&core, &mut sink, &mut new_stream).await {
                        Ok(()) => {
                            *core.writer.lock().await = Some(sink);
                            stream = new_stream;
                            delay = INITIAL_RECONNECT_DELAY;
                            info!(locator = %core.locator, "Container session re-established");
                            // The container may have reloaded while the
                            // connection was down.
                            let _ = core.changes.send(());
                            break;
                        }
                        Err(e) => {
                            warn!(locator = %core.locator, "Failed to reopen container: {}", e);
                        }
                    }
                }
                Err(e) => {
                    warn!("Reconnect failed: {}", e);
                }
            }
        }
    }
}

/// Read frames until the connection closes or errors.
async fn read_frames(core: &Arc<SocketCore>, stream: &mut WsStream) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handle_frame(core, &text),
            Ok(Message::Ping(data)) => {
                let mut writer = core.writer.lock().await;
                if let Some(sink) = writer.as_mut() {
                    let _ = sink.send(Message::Pong(data)).await;
                }
            }
            Ok(Message::Close(frame)) => {
                debug!("Container closed connection: {:?}", frame);
                break;
            }
            Err(e) => {
                warn!("Container WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }
}

/// Dispatch one frame: event frames fan out to the change broadcast,
/// response frames complete their pending waiter.
fn handle_frame(core: &Arc<SocketCore>, text: &str) {
    let frame: WireFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Ignoring unparseable frame: {}", e);
            return;
        }
    };

    let is_event =
        frame.kind.as_deref() == Some("event") || frame.event.as_deref() == Some("context_changed");
    if is_event {
        let _ = core.changes.send(());
        return;
    }

    let Some(id) = frame.id else {
        debug!("Ignoring frame without id");
        return;
    };

    if let Some((_, waiter)) = core.pending.remove(&id) {
        let _ = waiter.send(WireResponse {
            status: frame.status.unwrap_or(500),
            content_kind: frame.content_kind.unwrap_or_default(),
            value: frame.value,
        });
    } else {
        debug!(id, "Response with no pending request");
    }
}
