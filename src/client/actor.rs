//! The client actor
//!
//! One task owns every piece of mutable session state: the pending table,
//! the current model and mode, the subscriber list. Everything else talks to
//! it through channels:
//!
//! - [`Command`]s from [`ClientHandle`](super::ClientHandle)s
//! - [`TransportEvent`]s from the transport's read side
//! - [`Internal`] notices from the writer task and from spawned callbacks
//!
//! A separate writer task owns the transport itself, so a slow write never
//! stalls the loop and the final close is ordered after every frame that was
//! queued before it.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::pending::{PendingRequest, PendingTable};
use super::router::{Reply, Router, SessionInfo};
use crate::control::{
    Inbound, InboundRequest, OutboundRequest, RequestIdGenerator, decode, encode_error,
    encode_request, encode_success, encode_user_message,
};
use crate::error::{AgentError, Result};
use crate::streaming::StreamAccumulator;
use crate::transport::{CloseMode, Transport, TransportEvent};
use crate::types::{
    ClientEvent, ClientState, CloseReason, DispatchFailure, Message, PermissionMode, RequestId,
    SessionId, SessionSnapshot, SubscriberId,
};
use crate::utils::truncate_for_display;

const LOG_PREVIEW_BYTES: usize = 200;

/// Operation requested by a handle
pub(crate) enum Command {
    SendMessage {
        content: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Request {
        request: OutboundRequest,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Value>>,
    },
    Subscribe {
        id: SubscriberId,
        tx: mpsc::UnboundedSender<ClientEvent>,
    },
    Unsubscribe {
        id: SubscriberId,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Notices from tasks the actor spawned
pub(crate) enum Internal {
    /// A callback finished; answer the agent
    Reply { request_id: RequestId, outcome: Reply },
    /// A request frame could not be written
    WriteFailed {
        request_id: RequestId,
        error: AgentError,
    },
    /// The writer closed the transport and exited
    TransportClosed,
}

enum WriterCommand {
    Frame {
        line: String,
        ack: Option<oneshot::Sender<Result<()>>>,
        request_id: Option<RequestId>,
    },
    Close(CloseMode),
}

/// Settings the actor needs from `ClientOptions`
pub(crate) struct ActorConfig {
    pub(crate) router: Arc<Router>,
    pub(crate) model: Option<String>,
    pub(crate) permission_mode: Option<PermissionMode>,
    pub(crate) include_partial_messages: bool,
    pub(crate) request_timeout: Duration,
    pub(crate) close_grace_period: Duration,
}

/// Start the writer and actor tasks
///
/// The transport must already be connected. `primary` is registered before
/// the first line is read so it sees every message.
pub(crate) fn start(
    mut transport: Box<dyn Transport>,
    config: ActorConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<SessionSnapshot>,
    primary: (SubscriberId, mpsc::UnboundedSender<ClientEvent>),
) -> Result<()> {
    let events = transport.read_events()?;
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_writer(transport, writer_rx, internal_tx.clone()));

    let actor = Actor {
        state: ClientState::Starting,
        snapshot,
        model: config.model,
        permission_mode: config.permission_mode,
        session_id: None,
        cwd: None,
        close_reason: None,
        pending: PendingTable::new(),
        subscribers: vec![primary],
        writer: writer_tx,
        internal_tx,
        router: config.router,
        in_flight: HashMap::new(),
        shutdown: CancellationToken::new(),
        ids: RequestIdGenerator::new(),
        request_timeout: config.request_timeout,
        grace: config.close_grace_period,
        stream: config
            .include_partial_messages
            .then(StreamAccumulator::new),
        close_waiters: Vec::new(),
    };
    tokio::spawn(actor.run(events, commands, internal_rx));
    Ok(())
}

/// Writes frames in submission order, then closes the transport
async fn run_writer(
    mut transport: Box<dyn Transport>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    internal: mpsc::UnboundedSender<Internal>,
) {
    let mut mode = CloseMode::Force;

    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Frame {
                line,
                ack,
                request_id,
            } => {
                tracing::trace!(frame = %truncate_for_display(&line, LOG_PREVIEW_BYTES), "Outbound frame");
                let result = transport.write(&line).await;
                match (result, ack, request_id) {
                    (result, Some(ack), _) => {
                        let _ = ack.send(result);
                    }
                    (Err(error), None, Some(request_id)) => {
                        tracing::error!(request_id = %request_id, error = %error, "Failed to write request");
                        let _ = internal.send(Internal::WriteFailed { request_id, error });
                    }
                    (Err(error), None, None) => {
                        tracing::error!(error = %error, "Failed to write frame");
                    }
                    (Ok(()), None, _) => {}
                }
            }
            WriterCommand::Close(requested) => {
                mode = requested;
                break;
            }
        }
    }

    rx.close();
    while let Ok(command) = rx.try_recv() {
        if let WriterCommand::Frame { ack: Some(ack), .. } = command {
            let _ = ack.send(Err(AgentError::connection_closed("transport closed")));
        }
    }

    if let Err(e) = transport.close(mode).await {
        tracing::warn!(error = %e, "Error while closing transport");
    }
    drop(transport);
    let _ = internal.send(Internal::TransportClosed);
}

enum Step {
    Transport(Option<TransportEvent>),
    Command(Option<Command>),
    Internal(Internal),
    Expired(RequestId, PendingRequest),
}

struct Actor {
    state: ClientState,
    snapshot: watch::Sender<SessionSnapshot>,
    model: Option<String>,
    permission_mode: Option<PermissionMode>,
    session_id: Option<SessionId>,
    cwd: Option<String>,
    close_reason: Option<CloseReason>,
    pending: PendingTable,
    subscribers: Vec<(SubscriberId, mpsc::UnboundedSender<ClientEvent>)>,
    writer: mpsc::UnboundedSender<WriterCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    router: Arc<Router>,
    /// Agent-initiated requests still being answered, with their tokens
    in_flight: HashMap<RequestId, CancellationToken>,
    /// Parent of every in-flight token; cancelled when shutdown begins
    shutdown: CancellationToken,
    ids: RequestIdGenerator,
    request_timeout: Duration,
    grace: Duration,
    /// Present in partial-message mode
    stream: Option<StreamAccumulator>,
    close_waiters: Vec<oneshot::Sender<()>>,
}

impl Actor {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut events_open = true;
        let mut commands_open = true;
        self.publish();

        while self.state != ClientState::Closed {
            let step = tokio::select! {
                event = events.recv(), if events_open => Step::Transport(event),
                command = commands.recv(), if commands_open => Step::Command(command),
                Some(notice) = internal.recv() => Step::Internal(notice),
                Some((request_id, entry)) = self.pending.next_expired(), if !self.pending.is_empty() => {
                    Step::Expired(request_id, entry)
                }
                else => break,
            };

            match step {
                Step::Transport(Some(TransportEvent::Line(line))) => self.on_line(&line),
                Step::Transport(Some(TransportEvent::Closed { exit_code })) => {
                    events_open = false;
                    self.on_transport_closed(CloseReason::ProcessExited { exit_code });
                }
                Step::Transport(None) => {
                    events_open = false;
                    self.on_transport_closed(CloseReason::TransportFailed(
                        "event stream ended".to_string(),
                    ));
                }
                Step::Command(Some(command)) => self.on_command(command),
                Step::Command(None) => {
                    commands_open = false;
                    tracing::debug!("All client handles dropped, closing");
                    self.begin_close(None);
                }
                Step::Internal(notice) => self.on_internal(notice),
                Step::Expired(request_id, entry) => self.on_expired(&request_id, entry),
            }
        }

        tracing::debug!(reason = ?self.close_reason, "Client actor stopped");
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    fn transition(&mut self, next: ClientState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Client state changed");
            self.state = next;
        }
    }

    fn accepting(&self) -> bool {
        matches!(
            self.state,
            ClientState::Starting | ClientState::Initializing | ClientState::Ready
        )
    }

    fn publish(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            state: self.state,
            model: self.model.clone(),
            permission_mode: self.permission_mode,
            session_id: self.session_id.clone(),
            pending_requests: self.pending.len(),
            close_reason: self.close_reason.clone(),
        });
    }

    fn broadcast(&mut self, event: &ClientEvent) {
        self.subscribers.retain(|(id, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                tracing::trace!(subscriber = %id, "Dropping gone subscriber");
            }
            alive
        });
    }

    /// Queue a frame for the writer; gives the ack back if the writer is gone
    fn write(
        &self,
        line: String,
        ack: Option<oneshot::Sender<Result<()>>>,
        request_id: Option<RequestId>,
    ) -> std::result::Result<(), Option<oneshot::Sender<Result<()>>>> {
        self.writer
            .send(WriterCommand::Frame {
                line,
                ack,
                request_id,
            })
            .map_err(|mpsc::error::SendError(command)| match command {
                WriterCommand::Frame { ack, .. } => ack,
                WriterCommand::Close(_) => None,
            })
    }

    // ------------------------------------------------------------------
    // Inbound lines
    // ------------------------------------------------------------------

    fn on_line(&mut self, line: &str) {
        tracing::trace!(frame = %truncate_for_display(line, LOG_PREVIEW_BYTES), "Inbound frame");

        match decode(line) {
            Ok(Inbound::ControlResponse {
                request_id,
                outcome,
            }) => self.on_response(&request_id, outcome),
            Ok(Inbound::ControlRequest {
                request_id,
                request,
            }) => self.on_request(request_id, request),
            Ok(Inbound::ControlCancel { request_id }) => self.on_cancel(&request_id),
            Ok(Inbound::Message(value)) => self.on_message(value),
            Ok(Inbound::Unknown { message_type }) => {
                tracing::warn!(message_type = %message_type, "Ignoring unknown envelope");
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    preview = %truncate_for_display(line, LOG_PREVIEW_BYTES),
                    "Skipping undecodable line"
                );
            }
        }
    }

    fn on_response(&mut self, request_id: &RequestId, outcome: std::result::Result<Value, String>) {
        let Some(entry) = self.pending.take(request_id) else {
            tracing::debug!(request_id = %request_id, "Discarding response for unknown or expired request");
            return;
        };

        let subtype = entry.subtype();
        tracing::debug!(
            request_id = %request_id,
            subtype,
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Control response"
        );

        // The waiter must observe a snapshot that already includes its change
        let outcome = match outcome {
            Ok(payload) => {
                match &entry.request {
                    OutboundRequest::Initialize { .. } => self.transition(ClientState::Ready),
                    OutboundRequest::SetModel { model } => self.model.clone_from(model),
                    OutboundRequest::SetPermissionMode { mode } => {
                        self.permission_mode = Some(*mode);
                    }
                    OutboundRequest::Interrupt | OutboundRequest::RewindFiles { .. } => {}
                }
                Ok(payload)
            }
            Err(message) => Err(AgentError::control_response(subtype, message)),
        };
        self.publish();
        entry.resolve(outcome);
    }

    fn on_request(&mut self, request_id: RequestId, request: InboundRequest) {
        if !self.accepting() {
            tracing::debug!(request_id = %request_id, subtype = request.subtype(), "Ignoring control request during shutdown");
            return;
        }

        let token = self.shutdown.child_token();
        self.in_flight.insert(request_id.clone(), token.clone());

        let router = Arc::clone(&self.router);
        let internal = self.internal_tx.clone();
        let session = SessionInfo {
            session_id: self.session_id.as_ref().map(|id| id.to_string()),
            cwd: self.cwd.clone(),
        };

        tokio::spawn(async move {
            let outcome = router.handle(&request_id, request, session, &token).await;
            let _ = internal.send(Internal::Reply {
                request_id,
                outcome,
            });
        });
    }

    fn on_cancel(&mut self, request_id: &RequestId) {
        match self.in_flight.get(request_id) {
            Some(token) => {
                tracing::debug!(request_id = %request_id, "Agent cancelled control request");
                token.cancel();
            }
            None => {
                tracing::debug!(request_id = %request_id, "Cancel for unknown control request");
            }
        }
    }

    fn on_message(&mut self, value: Value) {
        let message_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if message_type == "system"
            && value.get("subtype").and_then(Value::as_str) == Some("init")
        {
            self.learn_from_init(&value);
        }

        if message_type == "stream_event" {
            if let Some(accumulator) = self.stream.as_mut() {
                let events = accumulator.feed(value.get("event").unwrap_or(&Value::Null));
                for event in events {
                    self.broadcast(&ClientEvent::Stream(event));
                }
                return;
            }
        }

        match serde_json::from_value::<Message>(value) {
            Ok(message) => {
                if self.session_id.is_none() {
                    if let Some(session_id) = message.session_id() {
                        self.session_id = Some(session_id.clone());
                        self.publish();
                    }
                }
                self.broadcast(&ClientEvent::Message(message));
            }
            Err(e) => {
                tracing::warn!(message_type = %message_type, error = %e, "Skipping message that failed to parse");
            }
        }
    }

    fn learn_from_init(&mut self, value: &Value) {
        if let Some(session_id) = value.get("session_id").and_then(Value::as_str) {
            self.session_id = Some(SessionId::new(session_id));
        }
        if self.model.is_none() {
            self.model = value.get("model").and_then(Value::as_str).map(String::from);
        }
        if let Some(cwd) = value.get("cwd").and_then(Value::as_str) {
            self.cwd = Some(cwd.to_string());
        }
        tracing::debug!(session_id = ?self.session_id, model = ?self.model, "Session initialized");
        self.publish();
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SendMessage { content, reply } => {
                if !self.accepting() {
                    let _ = reply.send(Err(AgentError::Closing));
                    return;
                }
                let line = match encode_user_message(content) {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                if let Err(Some(reply)) = self.write(line, Some(reply), None) {
                    let _ = reply.send(Err(AgentError::connection_closed("writer stopped")));
                }
            }
            Command::Request {
                request,
                timeout,
                reply,
            } => self.send_request(request, timeout, reply),
            Command::Subscribe { id, tx } => {
                tracing::debug!(subscriber = %id, "Subscriber added");
                self.subscribers.push((id, tx));
            }
            Command::Unsubscribe { id } => {
                tracing::debug!(subscriber = %id, "Subscriber removed");
                self.subscribers.retain(|(existing, _)| *existing != id);
            }
            Command::Close { reply } => self.begin_close(Some(reply)),
        }
    }

    fn send_request(
        &mut self,
        request: OutboundRequest,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Value>>,
    ) {
        if !self.accepting() {
            let _ = reply.send(Err(AgentError::Closing));
            return;
        }

        let request_id = self.ids.next_id();
        let line = match encode_request(&request_id, &request) {
            Ok(line) => line,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        if matches!(request, OutboundRequest::Initialize { .. }) {
            self.transition(ClientState::Initializing);
        }

        let timeout = timeout.unwrap_or(self.request_timeout);
        tracing::debug!(
            request_id = %request_id,
            subtype = request.subtype(),
            timeout_ms = timeout.as_millis() as u64,
            "Sending control request"
        );
        self.pending.insert(request_id.clone(), request, timeout, reply);

        if self.write(line, None, Some(request_id.clone())).is_err() {
            if let Some(entry) = self.pending.take(&request_id) {
                entry.resolve(Err(AgentError::connection_closed("writer stopped")));
            }
        }
        self.publish();
    }

    // ------------------------------------------------------------------
    // Internal notices and timers
    // ------------------------------------------------------------------

    fn on_internal(&mut self, notice: Internal) {
        match notice {
            Internal::Reply {
                request_id,
                outcome,
            } => self.answer(request_id, outcome),
            Internal::WriteFailed { request_id, error } => {
                if let Some(entry) = self.pending.take(&request_id) {
                    entry.resolve(Err(error));
                    self.publish();
                }
            }
            Internal::TransportClosed => match self.state {
                ClientState::Closing => self.finalize(CloseReason::Shutdown),
                ClientState::Closed => {}
                _ => self.finalize(CloseReason::TransportFailed(
                    "writer stopped".to_string(),
                )),
            },
        }
    }

    fn answer(&mut self, request_id: RequestId, outcome: Reply) {
        let token = self.in_flight.remove(&request_id);
        if !self.accepting() {
            tracing::debug!(request_id = %request_id, "Dropping callback answer after shutdown began");
            return;
        }

        let outcome = if token.is_some_and(|t| t.is_cancelled()) {
            Err(DispatchFailure::Cancelled.to_string())
        } else {
            outcome
        };

        let encoded = match outcome {
            Ok(response) => encode_success(&request_id, response),
            Err(message) => {
                tracing::debug!(request_id = %request_id, error = %message, "Answering control request with error");
                encode_error(&request_id, &message)
            }
        };
        match encoded {
            Ok(line) => {
                if self.write(line, None, None).is_err() {
                    tracing::debug!(request_id = %request_id, "Writer gone, answer dropped");
                }
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Failed to encode answer");
            }
        }
    }

    fn on_expired(&mut self, request_id: &RequestId, entry: PendingRequest) {
        let subtype = entry.subtype();
        tracing::warn!(
            request_id = %request_id,
            subtype,
            timeout_ms = entry.timeout.as_millis() as u64,
            "Control request timed out"
        );
        let error = AgentError::control_timeout(entry.timeout, subtype);
        self.publish();
        entry.resolve(Err(error));
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    fn on_transport_closed(&mut self, reason: CloseReason) {
        match self.state {
            ClientState::Closing => {
                tracing::debug!(reason = %reason, "Transport ended during shutdown");
            }
            ClientState::Closed => {}
            _ => {
                tracing::warn!(reason = %reason, pending = self.pending.len(), "Agent process went away");
                let _ = self.writer.send(WriterCommand::Close(CloseMode::Force));
                self.finalize(reason);
            }
        }
    }

    fn begin_close(&mut self, waiter: Option<oneshot::Sender<()>>) {
        match self.state {
            ClientState::Closed => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(());
                }
                return;
            }
            ClientState::Closing => {
                self.close_waiters.extend(waiter);
                return;
            }
            _ => {}
        }

        self.close_waiters.extend(waiter);
        self.transition(ClientState::Closing);
        self.shutdown.cancel();
        self.pending.fail_all(|| AgentError::Closing);
        self.publish();

        let close = WriterCommand::Close(CloseMode::Graceful { grace: self.grace });
        if self.writer.send(close).is_err() {
            self.finalize(CloseReason::Shutdown);
        }
    }

    fn finalize(&mut self, reason: CloseReason) {
        self.shutdown.cancel();
        self.in_flight.clear();
        self.pending
            .fail_all(|| AgentError::connection_closed("connection closed"));
        self.close_reason = Some(reason.clone());
        self.transition(ClientState::Closed);
        self.publish();

        let closed = ClientEvent::Closed(reason);
        for (_, tx) in self.subscribers.drain(..) {
            let _ = tx.send(closed.clone());
        }
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        lines: Arc<Mutex<Vec<String>>>,
        closed_with: Arc<Mutex<Option<CloseMode>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn write(&mut self, line: &str) -> Result<()> {
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        async fn end_input(&mut self) -> Result<()> {
            Ok(())
        }

        fn read_events(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
            Err(AgentError::connection("not used"))
        }

        fn is_ready(&self) -> bool {
            true
        }

        async fn close(&mut self, mode: CloseMode) -> Result<()> {
            *self.closed_with.lock().unwrap() = Some(mode);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writer_rejects_frames_after_close() {
        let transport = RecordingTransport::default();
        let lines = Arc::clone(&transport.lines);
        let closed_with = Arc::clone(&transport.closed_with);
        let (tx, rx) = mpsc::unbounded_channel();
        let (internal_tx, mut internal_rx) = mpsc::unbounded_channel();

        let (first_ack, first) = oneshot::channel();
        let (late_ack, late) = oneshot::channel();
        tx.send(WriterCommand::Frame {
            line: "first".into(),
            ack: Some(first_ack),
            request_id: None,
        })
        .unwrap();
        tx.send(WriterCommand::Close(CloseMode::Force)).unwrap();
        tx.send(WriterCommand::Frame {
            line: "late".into(),
            ack: Some(late_ack),
            request_id: None,
        })
        .unwrap();

        run_writer(Box::new(transport), rx, internal_tx).await;

        assert!(first.await.unwrap().is_ok());
        assert!(matches!(
            late.await.unwrap(),
            Err(AgentError::ConnectionClosed(_))
        ));
        assert_eq!(*lines.lock().unwrap(), vec!["first".to_string()]);
        assert_eq!(*closed_with.lock().unwrap(), Some(CloseMode::Force));
        assert!(matches!(
            internal_rx.recv().await,
            Some(Internal::TransportClosed)
        ));
    }
}
