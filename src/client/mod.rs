//! Bidirectional session with the agent process
//!
//! [`ControlClient::connect`] spawns the agent, performs the `initialize`
//! handshake and returns once the session is ready. From then on:
//!
//! - control operations (`send_message`, `set_model`, `interrupt`, ...) go
//!   through the [`ClientHandle`], which is cheap to clone and can be moved
//!   into other tasks
//! - conversation output arrives on [`Subscription`]s; the client owns a
//!   primary one and more can be created with [`ClientHandle::subscribe`]
//! - hook, permission and tool-server requests from the agent are answered
//!   in the background from the callbacks in [`ClientOptions`]
//!
//! # Example
//!
//! ```no_run
//! use agent_control_client::{ClientEvent, ClientOptions, ControlClient, Message, SpawnSpec};
//!
//! # async fn example() -> agent_control_client::Result<()> {
//! let spawn = SpawnSpec::builder()
//!     .program("claude")
//!     .args(vec![
//!         "--input-format".into(), "stream-json".into(),
//!         "--output-format".into(), "stream-json".into(),
//!         "--verbose".into(),
//!     ])
//!     .build();
//! let options = ClientOptions::builder().spawn(spawn).build();
//!
//! let mut client = ControlClient::connect(options).await?;
//! client.send_message("What is 2 + 2?").await?;
//!
//! while let Some(event) = client.events().recv().await {
//!     match event {
//!         ClientEvent::Message(Message::Assistant { message, .. }) => println!("{}", message.text()),
//!         ClientEvent::Message(Message::Result { .. }) | ClientEvent::Closed(_) => break,
//!         _ => {}
//!     }
//! }
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod actor;
mod pending;
mod router;

use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use crate::control::OutboundRequest;
use crate::error::{AgentError, Result};
use crate::hooks::HookRegistry;
use crate::permissions::PermissionManager;
use crate::transport::{SubprocessTransport, Transport};
use crate::types::{
    ClientEvent, ClientOptions, ClientState, PermissionMode, SessionId, SessionSnapshot,
    SubscriberId,
};
use actor::{ActorConfig, Command};
use router::Router;

/// A connected session
///
/// Dereferences to [`ClientHandle`] for the control operations.
pub struct ControlClient {
    handle: ClientHandle,
    events: Subscription,
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("snapshot", &self.handle.snapshot())
            .field("subscription", &self.events.id())
            .finish()
    }
}

impl ControlClient {
    /// Spawn the agent described by `options.spawn` and initialize a session
    ///
    /// Credentials from `options.credentials` are applied to the spawn
    /// environment before the process starts.
    ///
    /// # Errors
    /// - `Authentication` if the credential source fails
    /// - `CliNotFound`, `Connection` or `InvalidConfig` if the process cannot be spawned
    /// - `ControlTimeout` or `ControlResponse` if `initialize` fails
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let mut spawn = options.spawn.clone();
        if let Some(credentials) = &options.credentials {
            credentials.apply(&mut spawn.env)?;
        }
        Self::connect_with_transport(options, Box::new(SubprocessTransport::new(spawn))).await
    }

    /// Initialize a session over an already constructed transport
    ///
    /// The transport is connected here. `options.spawn` and
    /// `options.credentials` are not used.
    ///
    /// # Errors
    /// Returns the transport's connect error, or the `initialize` failure.
    pub async fn connect_with_transport(
        options: ClientOptions,
        mut transport: Box<dyn Transport>,
    ) -> Result<Self> {
        transport.connect().await?;

        let hooks = HookRegistry::from_config(options.hooks.clone().unwrap_or_default());
        let permissions = PermissionManager::new(
            options.allowed_tools.iter().cloned(),
            options.disallowed_tools.iter().cloned(),
            options.can_use_tool.clone(),
        )
        .with_timeout(options.permission_timeout);
        let router = Arc::new(Router::new(
            hooks,
            permissions,
            options.sdk_mcp_servers.iter().cloned(),
        ));
        let initialize = OutboundRequest::Initialize {
            hooks: router.hooks().initialize_config(),
            sdk_mcp_servers: router.server_names(),
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::starting(
            options.model.clone(),
            options.permission_mode,
        ));
        let handle = ClientHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            next_subscriber: Arc::new(AtomicU64::new(0)),
        };

        let primary_id = handle.next_subscriber_id();
        let (primary_tx, primary_rx) = mpsc::unbounded_channel();
        actor::start(
            transport,
            ActorConfig {
                router,
                model: options.model.clone(),
                permission_mode: options.permission_mode,
                include_partial_messages: options.include_partial_messages,
                request_timeout: options.request_timeout,
                close_grace_period: options.close_grace_period,
            },
            commands_rx,
            snapshot_tx,
            (primary_id, primary_tx),
        )?;
        let events = Subscription::new(primary_id, primary_rx, &handle.commands);

        tracing::debug!(
            timeout_ms = options.initialize_timeout.as_millis() as u64,
            "Initializing session"
        );
        if let Err(e) = handle
            .request(initialize, Some(options.initialize_timeout))
            .await
        {
            tracing::warn!(error = %e, "Initialize failed, closing");
            let _ = handle.close().await;
            return Err(e);
        }

        Ok(Self { handle, events })
    }

    /// The primary subscription, created before initialization
    pub fn events(&mut self) -> &mut Subscription {
        &mut self.events
    }

    /// A clone of the control handle
    #[must_use]
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Events up to and including the next `result` message
    ///
    /// Ends early with the terminal [`ClientEvent::Closed`] if the session
    /// goes away first.
    pub fn receive_response(&mut self) -> impl Stream<Item = ClientEvent> + '_ {
        async_stream::stream! {
            while let Some(event) = self.events.recv().await {
                let done = event.is_result() || event.is_closed();
                yield event;
                if done {
                    break;
                }
            }
        }
    }

    /// Split into the control handle and the primary subscription
    #[must_use]
    pub fn into_parts(self) -> (ClientHandle, Subscription) {
        (self.handle, self.events)
    }
}

impl std::ops::Deref for ControlClient {
    type Target = ClientHandle;

    fn deref(&self) -> &ClientHandle {
        &self.handle
    }
}

/// Cloneable handle for control operations
///
/// Accessors read the latest published [`SessionSnapshot`] and never wait
/// on the client.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    next_subscriber: Arc<AtomicU64>,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl ClientHandle {
    fn next_subscriber_id(&self) -> SubscriberId {
        SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed))
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| AgentError::connection_closed("client is closed"))
    }

    async fn request(&self, request: OutboundRequest, timeout: Option<Duration>) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Request {
            request,
            timeout,
            reply,
        })?;
        rx.await
            .map_err(|_| AgentError::connection_closed("client stopped before answering"))?
    }

    /// Send a user message with plain text content
    ///
    /// # Errors
    /// Returns `Closing` during shutdown, `ConnectionClosed` once closed, or
    /// the transport's write error.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<()> {
        self.send_content(Value::String(content.into())).await
    }

    /// Send a user message with structured content (e.g. content blocks)
    ///
    /// # Errors
    /// Same as [`send_message`](Self::send_message).
    pub async fn send_content(&self, content: Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::SendMessage { content, reply })?;
        rx.await
            .map_err(|_| AgentError::connection_closed("client stopped before writing"))?
    }

    /// Switch the model for following turns
    ///
    /// The snapshot's model changes once the agent confirms.
    ///
    /// # Errors
    /// `ControlResponse` if the agent refuses, `ControlTimeout`, or
    /// `ConnectionClosed` if the process exits first.
    pub async fn set_model(&self, model: impl Into<String>) -> Result<()> {
        self.request(
            OutboundRequest::SetModel {
                model: Some(model.into()),
            },
            None,
        )
        .await
        .map(drop)
    }

    /// Go back to the agent's default model
    ///
    /// # Errors
    /// Same as [`set_model`](Self::set_model).
    pub async fn reset_model(&self) -> Result<()> {
        self.request(OutboundRequest::SetModel { model: None }, None)
            .await
            .map(drop)
    }

    /// Switch the permission mode
    ///
    /// # Errors
    /// Same as [`set_model`](Self::set_model).
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.request(OutboundRequest::SetPermissionMode { mode }, None)
            .await
            .map(drop)
    }

    /// Stop the current turn
    ///
    /// # Errors
    /// Same as [`set_model`](Self::set_model).
    pub async fn interrupt(&self) -> Result<()> {
        self.request(OutboundRequest::Interrupt, None).await.map(drop)
    }

    /// Restore files to their state at the given user message
    ///
    /// # Errors
    /// Same as [`set_model`](Self::set_model).
    pub async fn rewind_files(&self, user_message_id: impl Into<String>) -> Result<Value> {
        self.request(
            OutboundRequest::RewindFiles {
                user_message_id: user_message_id.into(),
            },
            None,
        )
        .await
    }

    /// Create a new subscription
    ///
    /// It receives every event broadcast after this call returns.
    ///
    /// # Errors
    /// `ConnectionClosed` if the client is closed.
    pub fn subscribe(&self) -> Result<Subscription> {
        let id = self.next_subscriber_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.submit(Command::Subscribe { id, tx })?;
        Ok(Subscription::new(id, rx, &self.commands))
    }

    /// Shut the session down and wait until it is closed
    ///
    /// Pending requests fail with `Closing`. Calling this on a closed client
    /// is a no-op.
    ///
    /// # Errors
    /// Currently always succeeds; the `Result` leaves room for transport
    /// errors surfaced during shutdown.
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.submit(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
        Ok(())
    }

    /// Wait until the session is closed, for whatever reason
    pub async fn closed(&self) {
        let mut snapshot = self.snapshot.clone();
        let _ = snapshot
            .wait_for(|s| s.state == ClientState::Closed)
            .await;
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.snapshot.borrow().state
    }

    /// Current model
    #[must_use]
    pub fn model(&self) -> Option<String> {
        self.snapshot.borrow().model.clone()
    }

    /// Current permission mode
    #[must_use]
    pub fn permission_mode(&self) -> Option<PermissionMode> {
        self.snapshot.borrow().permission_mode
    }

    /// Session id reported by the agent
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.snapshot.borrow().session_id.clone()
    }

    /// True once the session is closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ClientState::Closed
    }
}

/// Stream of [`ClientEvent`]s for one subscriber
///
/// The last item before the stream ends is always [`ClientEvent::Closed`].
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<ClientEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Subscription {
    fn new(
        id: SubscriberId,
        rx: mpsc::UnboundedReceiver<ClientEvent>,
        commands: &mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            rx,
            commands: commands.downgrade(),
        }
    }

    /// Next event, or `None` after the terminal event
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    /// Subscriber id
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Stream for Subscription {
    type Item = ClientEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ClientEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Unsubscribe { id: self.id });
        }
    }
}
