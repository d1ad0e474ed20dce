//! WebSocket gateway - one agent session per connection.
//!
//! Each connection runs a single select loop: inbound frames on one side,
//! the session's event stream on the other. Turns run in their own task so
//! that `stop` and disconnects can abort them mid-call.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{
    AgentEvent, ConnectionId, EventSink, SessionFactory, SessionHandle, SessionRegistry, TurnStatus,
    Usage,
};
use crate::config::Config;
use crate::error::Error;
use crate::Result;

use super::protocol::{parse_inbound, ControlReply, Inbound};
use super::Channel;

/// State shared by every connection task.
struct Shared {
    registry: Arc<SessionRegistry>,
    workspace: PathBuf,
    static_base_url: String,
}

pub struct Gateway {
    shared: Arc<Shared>,
    addr: String,
    shutdown: Notify,
}

impl Gateway {
    pub fn new(
        registry: Arc<SessionRegistry>,
        addr: impl Into<String>,
        workspace: impl Into<PathBuf>,
        static_base_url: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                workspace: workspace.into(),
                static_base_url: static_base_url.into(),
            }),
            addr: addr.into(),
            shutdown: Notify::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Arc::new(SessionRegistry::new(SessionFactory::from_config(config)?));
        Ok(Self::new(
            registry,
            config.server.addr(),
            &config.workspace,
            &config.server.static_base_url,
        ))
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.shared.registry
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Accept connections on `listener` until [`Channel::stop`] is called.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("Gateway listening on ws://{}", listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = self.shared.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(shared, stream, peer).await {
                                debug!(peer = %peer, "Connection ended: {}", e);
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                _ = self.shutdown.notified() => {
                    info!(active = self.shared.registry.len(), "Gateway shutting down");
                    return Ok(());
                }
            }
        }
    }
}

impl Channel for Gateway {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.notify_one();
        Ok(())
    }
}

/// `device_id` from the handshake query string.
fn device_id(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "device_id")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let mut label = None;
    let ws_stream = accept_hdr_async(
        stream,
        |req: &Request, resp: HandshakeResponse| -> std::result::Result<HandshakeResponse, ErrorResponse> {
            label = device_id(req.uri().query());
            Ok(resp)
        },
    )
    .await
    .map_err(|e| Error::Protocol(format!("handshake failed: {}", e)))?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<AgentEvent>();

    let mut conn = Connection {
        shared,
        id: Uuid::new_v4().to_string(),
        label,
        events: events_tx,
        turn: None,
    };
    info!(connection = %conn.id, peer = %peer, label = ?conn.label, "WebSocket connection established");

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let Some(reply) = conn.on_frame(text.as_str()) else {
                        continue;
                    };
                    match reply.encode() {
                        Ok(frame) => {
                            if let Err(e) = ws_sender.send(WsMessage::Text(frame.into())).await {
                                debug!(connection = %conn.id, "Send failed: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!(connection = %conn.id, "Failed to encode reply: {}", e),
                    }
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    conn.reject(&Error::Protocol("binary frames are not supported".to_string()));
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!(connection = %conn.id, "Client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    debug!(connection = %conn.id, "WebSocket error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },

            Some(event) = events_rx.recv() => {
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(connection = %conn.id, "Failed to encode event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(WsMessage::Text(frame.into())).await {
                    debug!(connection = %conn.id, "Send failed: {}", e);
                    break;
                }
            }
        }
    }

    conn.teardown().await;
    Ok(())
}

/// Per-connection state owned by the select loop.
struct Connection {
    shared: Arc<Shared>,
    id: ConnectionId,
    label: Option<String>,
    events: EventSink,
    turn: Option<JoinHandle<()>>,
}

impl Connection {
    fn busy(&self) -> bool {
        self.turn.as_ref().is_some_and(|turn| !turn.is_finished())
    }

    fn reject(&self, err: &Error) {
        warn!(connection = %self.id, "Rejected frame: {}", err);
        let _ = self.events.send(AgentEvent::error(err));
    }

    fn session(&self) -> SessionHandle {
        let session = self.shared.registry.get_or_create(&self.id);
        // Only idle sessions are labelled; a running turn holds the lock.
        if let (Some(label), Ok(mut guard)) = (&self.label, session.try_lock()) {
            if guard.label().is_none() {
                guard.set_label(label.clone());
            }
        }
        session
    }

    /// Handle one text frame. Returns the reply for control frames.
    fn on_frame(&mut self, text: &str) -> Option<ControlReply> {
        let inbound = match parse_inbound(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                self.reject(&e);
                return None;
            }
        };

        match inbound {
            Inbound::Message { content, attachments } => {
                self.start_turn(content, attachments);
                None
            }
            Inbound::Stop => {
                self.stop_turn();
                None
            }
            Inbound::InitAgent => {
                self.session();
                Some(ControlReply::AgentInitialized {
                    session_id: self.id.clone(),
                    model: self.shared.registry.factory().model_id().to_string(),
                })
            }
            Inbound::WorkspaceInfo => Some(ControlReply::WorkspaceInfo {
                path: self.shared.workspace.display().to_string(),
                static_base_url: self.shared.static_base_url.clone(),
            }),
        }
    }

    fn start_turn(&mut self, content: String, attachments: Vec<String>) {
        if self.busy() {
            self.reject(&Error::Protocol("a turn is already in progress".to_string()));
            return;
        }

        let session = self.session();
        let events = self.events.clone();
        let id = self.id.clone();
        self.turn = Some(tokio::spawn(async move {
            let mut session = session.lock().await;
            if let Err(e) = session.run_turn(&content, &attachments, &events).await {
                debug!(connection = %id, code = e.code(), "Turn ended with error");
            }
        }));
    }

    /// Abort the in-flight turn and report it cancelled.
    ///
    /// The abort, the session reset and the `done` event run in a task of
    /// their own so the select loop keeps draining events meanwhile.
    fn stop_turn(&mut self) {
        let Some(turn) = self.turn.take().filter(|turn| !turn.is_finished()) else {
            debug!(connection = %self.id, "Stop received with no turn in flight");
            return;
        };

        turn.abort();
        let registry = self.shared.registry.clone();
        let events = self.events.clone();
        let id = self.id.clone();
        self.turn = Some(tokio::spawn(async move {
            let _ = turn.await;
            if let Some(session) = registry.get(&id) {
                session.lock().await.cancel();
            }
            let _ = events.send(AgentEvent::Done {
                status: TurnStatus::Cancelled,
                iterations: 0,
                usage: Usage::default(),
            });
        }));
    }

    async fn teardown(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.abort();
            let _ = turn.await;
        }
        self.shared.registry.remove(&self.id);
        info!(connection = %self.id, label = ?self.label, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FakeLlmClient;
    use crate::agent::test_registry;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_tungstenite::connect_async;

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start(tmp: &TempDir, llm: FakeLlmClient) -> (Arc<Gateway>, SocketAddr) {
        start_shared(tmp, Arc::new(llm)).await
    }

    async fn start_shared(tmp: &TempDir, llm: Arc<FakeLlmClient>) -> (Arc<Gateway>, SocketAddr) {
        let registry = Arc::new(test_registry(tmp.path(), llm));
        let gateway = Arc::new(Gateway::new(
            registry,
            "127.0.0.1:0",
            tmp.path(),
            "http://localhost:3000/static",
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = gateway.clone();
        tokio::spawn(async move { server.serve(listener).await });
        (gateway, addr)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws?device_id=test-device", addr))
            .await
            .unwrap();
        client
    }

    async fn send(client: &mut Client, frame: Value) {
        client.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
    }

    async fn next_frame(client: &mut Client) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a frame")
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Frames up to and including the next one of type `until`.
    async fn frames_until(client: &mut Client, until: &str) -> Vec<Value> {
        let mut frames = Vec::new();
        loop {
            let frame = next_frame(client).await;
            let done = frame["type"] == until;
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition never held");
    }

    #[test]
    fn test_device_id() {
        assert_eq!(device_id(Some("device_id=abc&x=1")), Some("abc".to_string()));
        assert_eq!(device_id(Some("device_id=a%20b")), Some("a b".to_string()));
        assert_eq!(device_id(Some("device_id=")), None);
        assert_eq!(device_id(Some("other=1")), None);
        assert_eq!(device_id(None), None);
    }

    #[tokio::test]
    async fn test_hello_turn_over_websocket() {
        let tmp = TempDir::new().unwrap();
        let (_gateway, addr) = start(&tmp, FakeLlmClient::new(vec!["Hi there!"])).await;
        let mut client = connect(addr).await;

        send(&mut client, serde_json::json!({"type": "message", "content": "hello"})).await;
        let frames = frames_until(&mut client, "done").await;
        let types: Vec<&str> = frames.iter().filter_map(|f| f["type"].as_str()).collect();

        assert_eq!(types, ["thinking", "assistant_delta", "done"]);
        assert_eq!(frames[1]["payload"]["content"], "Hi there!");
        assert_eq!(frames[2]["payload"]["status"], "completed");
    }

    #[tokio::test]
    async fn test_control_frames() {
        let tmp = TempDir::new().unwrap();
        let (gateway, addr) = start(&tmp, FakeLlmClient::new(vec![])).await;
        let mut client = connect(addr).await;

        send(&mut client, serde_json::json!({"type": "init_agent"})).await;
        let reply = next_frame(&mut client).await;
        assert_eq!(reply["type"], "agent_initialized");
        assert_eq!(reply["payload"]["model"], "fake-model");
        assert_eq!(gateway.registry().len(), 1);

        send(&mut client, serde_json::json!({"type": "workspace_info"})).await;
        let reply = next_frame(&mut client).await;
        assert_eq!(reply["type"], "workspace_info");
        assert_eq!(reply["payload"]["path"], tmp.path().display().to_string());
        assert_eq!(reply["payload"]["static_base_url"], "http://localhost:3000/static");
    }

    #[tokio::test]
    async fn test_malformed_frame_is_protocol_error() {
        let tmp = TempDir::new().unwrap();
        let (gateway, addr) = start(&tmp, FakeLlmClient::new(vec!["ok"])).await;
        let mut client = connect(addr).await;

        client.send(WsMessage::Text("{not json".into())).await.unwrap();
        let reply = next_frame(&mut client).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["payload"]["code"], "protocol_error");

        // The connection survives.
        send(&mut client, serde_json::json!({"type": "message", "content": "hi"})).await;
        let frames = frames_until(&mut client, "done").await;
        assert_eq!(frames.last().unwrap()["payload"]["status"], "completed");
        assert_eq!(gateway.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_message_while_busy_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let slow = FakeLlmClient::new(vec!["first", "second"]).with_delay(Duration::from_millis(300));
        let (_gateway, addr) = start(&tmp, slow).await;
        let mut client = connect(addr).await;

        send(&mut client, serde_json::json!({"type": "message", "content": "one"})).await;
        assert_eq!(next_frame(&mut client).await["type"], "thinking");
        send(&mut client, serde_json::json!({"type": "message", "content": "two"})).await;

        let frames = frames_until(&mut client, "done").await;
        let rejected = frames
            .iter()
            .find(|f| f["type"] == "error")
            .expect("no rejection");
        assert_eq!(rejected["payload"]["code"], "protocol_error");
        let answer = frames.iter().find(|f| f["type"] == "assistant_delta").unwrap();
        assert_eq!(answer["payload"]["content"], "first");
    }

    #[tokio::test]
    async fn test_stop_cancels_turn() {
        let tmp = TempDir::new().unwrap();
        let slow = FakeLlmClient::new(vec!["too late", "fresh"]).with_delay(Duration::from_secs(2));
        let (gateway, addr) = start(&tmp, slow).await;
        let mut client = connect(addr).await;

        send(&mut client, serde_json::json!({"type": "init_agent"})).await;
        let init = next_frame(&mut client).await;
        let session_id = init["payload"]["session_id"].as_str().unwrap().to_string();

        send(&mut client, serde_json::json!({"type": "message", "content": "slow"})).await;
        assert_eq!(next_frame(&mut client).await["type"], "thinking");
        send(&mut client, serde_json::json!({"type": "stop"})).await;

        let frames = frames_until(&mut client, "done").await;
        assert!(frames.iter().all(|f| f["type"] != "assistant_delta"));
        assert_eq!(frames.last().unwrap()["payload"]["status"], "cancelled");

        // Still registered and idle.
        assert_eq!(gateway.registry().len(), 1);
        let session = gateway.registry().get(&session_id).unwrap();
        let session = session.lock().await;
        assert_eq!(session.state(), crate::agent::SessionState::Idle);
        assert_eq!(session.label(), Some("test-device"));
    }

    #[tokio::test]
    async fn test_disconnect_removes_session() {
        let tmp = TempDir::new().unwrap();
        let slow = Arc::new(FakeLlmClient::new(vec!["never seen"]).with_delay(Duration::from_millis(400)));
        let (gateway, addr) = start_shared(&tmp, slow.clone()).await;
        let mut client = connect(addr).await;

        send(&mut client, serde_json::json!({"type": "message", "content": "hang"})).await;
        assert_eq!(next_frame(&mut client).await["type"], "thinking");
        assert_eq!(gateway.registry().len(), 1);
        assert_eq!(slow.calls(), 1);

        client.close(None).await.unwrap();
        let mut late = Vec::new();
        while let Ok(Some(Ok(frame))) = tokio::time::timeout(Duration::from_secs(2), client.next()).await {
            if let WsMessage::Text(text) = frame {
                late.push(text.to_string());
            }
        }
        assert!(late.is_empty(), "frames after close: {late:?}");

        let registry = gateway.registry().clone();
        wait_until(|| registry.is_empty()).await;

        // Well past the fake's delay: the in-flight call was dropped, not finished.
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(slow.answered(), 0);
        assert_eq!(slow.calls(), 1);
        // Only the test and the session factory still hold the client.
        assert_eq!(Arc::strong_count(&slow), 2);
    }

    #[tokio::test]
    async fn test_connections_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let (gateway, addr) = start(&tmp, FakeLlmClient::new(vec!["a", "b"])).await;
        let mut first = connect(addr).await;
        let mut second = connect(addr).await;

        send(&mut first, serde_json::json!({"type": "init_agent"})).await;
        send(&mut second, serde_json::json!({"type": "init_agent"})).await;
        let a = next_frame(&mut first).await;
        let b = next_frame(&mut second).await;

        assert_ne!(a["payload"]["session_id"], b["payload"]["session_id"]);
        assert_eq!(gateway.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_ends_serve() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(test_registry(tmp.path(), Arc::new(FakeLlmClient::new(vec![]))));
        let gateway = Arc::new(Gateway::new(registry, "127.0.0.1:0", tmp.path(), ""));

        let server = gateway.clone();
        let handle = tokio::spawn(async move { server.start().await });
        gateway.stop().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(gateway.name(), "websocket");
    }
}
