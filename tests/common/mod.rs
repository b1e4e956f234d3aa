//! In-memory transport for driving the client from tests
//!
//! [`pair`] returns a [`MockTransport`] for the client and a [`MockPeer`]
//! that plays the agent: it reads the frames the client wrote, injects
//! inbound lines and simulates process exit.

#![allow(dead_code)]

use agent_control_client::transport::{CloseMode, Transport, TransportEvent};
use agent_control_client::{AgentError, ClientOptions, ControlClient, Result, SpawnSpec};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const FRAME_WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn spawn_spec() -> SpawnSpec {
    SpawnSpec::new("mock-agent")
}

pub struct MockTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    connected: bool,
    close_mode: Arc<Mutex<Option<CloseMode>>>,
}

pub struct MockPeer {
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    close_mode: Arc<Mutex<Option<CloseMode>>>,
}

pub fn pair() -> (MockTransport, MockPeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let close_mode = Arc::new(Mutex::new(None));
    (
        MockTransport {
            outbound: outbound_tx,
            inbound: inbound_tx.clone(),
            events: Some(inbound_rx),
            connected: false,
            close_mode: Arc::clone(&close_mode),
        },
        MockPeer {
            outbound: outbound_rx,
            inbound: inbound_tx,
            close_mode,
        },
    )
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn write(&mut self, line: &str) -> Result<()> {
        if !self.connected {
            return Err(AgentError::connection_closed("mock transport closed"));
        }
        self.outbound
            .send(line.to_string())
            .map_err(|_| AgentError::connection_closed("peer gone"))
    }

    async fn end_input(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn read_events(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events
            .take()
            .ok_or_else(|| AgentError::connection("events already taken"))
    }

    fn is_ready(&self) -> bool {
        self.connected
    }

    async fn close(&mut self, mode: CloseMode) -> Result<()> {
        self.connected = false;
        *self.close_mode.lock().unwrap() = Some(mode);
        let _ = self.inbound.send(TransportEvent::Closed { exit_code: Some(0) });
        Ok(())
    }
}

impl MockPeer {
    /// Next frame the client wrote, parsed
    pub async fn next_frame(&mut self) -> Value {
        let line = tokio::time::timeout(FRAME_WAIT, self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("client dropped the transport");
        serde_json::from_str(&line).expect("client wrote invalid JSON")
    }

    /// Next frame, if one arrives within `wait`
    pub async fn try_next_frame(&mut self, wait: Duration) -> Option<Value> {
        match tokio::time::timeout(wait, self.outbound.recv()).await {
            Ok(Some(line)) => serde_json::from_str(&line).ok(),
            _ => None,
        }
    }

    /// Next frame, which must be a control request of `subtype`; returns its id and body
    pub async fn expect_request(&mut self, subtype: &str) -> (String, Value) {
        let frame = self.next_frame().await;
        assert_eq!(frame["type"], "control_request", "unexpected frame: {frame}");
        assert_eq!(frame["request"]["subtype"], subtype, "unexpected frame: {frame}");
        let id = frame["request_id"].as_str().unwrap().to_string();
        (id, frame["request"].clone())
    }

    /// Next frame, which must answer `request_id`; returns the response body
    pub async fn expect_response(&mut self, request_id: &str) -> Value {
        let frame = self.next_frame().await;
        assert_eq!(frame["type"], "control_response", "unexpected frame: {frame}");
        assert_eq!(frame["response"]["request_id"], request_id, "unexpected frame: {frame}");
        frame["response"].clone()
    }

    /// Answer the `initialize` request; returns its body
    pub async fn handshake(&mut self) -> Value {
        let (id, body) = self.expect_request("initialize").await;
        self.respond(&id, json!({"commands": []}));
        body
    }

    pub fn send(&self, message: Value) {
        self.send_line(&message.to_string());
    }

    pub fn send_line(&self, line: &str) {
        let _ = self.inbound.send(TransportEvent::Line(line.to_string()));
    }

    pub fn respond(&self, request_id: &str, payload: Value) {
        self.send(json!({
            "type": "control_response",
            "response": {"subtype": "success", "request_id": request_id, "response": payload}
        }));
    }

    pub fn respond_error(&self, request_id: &str, error: &str) {
        self.send(json!({
            "type": "control_response",
            "response": {"subtype": "error", "request_id": request_id, "error": error}
        }));
    }

    /// Send an agent-initiated control request
    pub fn request(&self, request_id: &str, body: Value) {
        self.send(json!({"type": "control_request", "request_id": request_id, "request": body}));
    }

    pub fn cancel(&self, request_id: &str) {
        self.send(json!({"type": "control_cancel_request", "request_id": request_id}));
    }

    /// Simulate the process exiting
    pub fn exit(&self, exit_code: Option<i32>) {
        let _ = self.inbound.send(TransportEvent::Closed { exit_code });
    }

    pub fn close_mode(&self) -> Option<CloseMode> {
        *self.close_mode.lock().unwrap()
    }
}

/// Connect a client over a mock transport, answering `initialize`
///
/// Returns the client, the peer and the `initialize` body.
pub async fn connect(options: ClientOptions) -> (ControlClient, MockPeer, Value) {
    init_tracing();
    let (transport, mut peer) = pair();
    let (client, init) = tokio::join!(
        ControlClient::connect_with_transport(options, Box::new(transport)),
        peer.handshake()
    );
    (client.expect("connect failed"), peer, init)
}

pub fn assistant(text: &str) -> Value {
    json!({
        "type": "assistant",
        "message": {"model": "sonnet", "content": [{"type": "text", "text": text}]},
        "session_id": "sess-1"
    })
}

pub fn result() -> Value {
    json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "session_id": "sess-1",
        "duration_ms": 12,
        "num_turns": 1,
        "result": "done"
    })
}
