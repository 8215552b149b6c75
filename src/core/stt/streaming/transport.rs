//! Stream transport: the WebSocket connection state machine.
//!
//! ```text
//!   StreamTransport (handle, Clone)          TransportActor (one task)
//!  ┌────────────────────────────┐  command  ┌──────────────────────────────┐
//!  │ connect / write_data /     │ ────────► │ ConnectionState              │
//!  │ send_end_of_stream_marker /│  channel  │ pending write buffer         │
//!  │ disconnect / reconnect     │           │ connect future, sink, stream │
//!  └────────────────────────────┘           │ inactivity deadline          │
//!               ▲ watch<ConnectionState>    └──────────────┬───────────────┘
//!               └──────────────────────────────────────────┤ TransportEvent
//!                                                          ▼
//!                                                   event receiver
//! ```
//!
//! Every public operation is marshalled onto the actor task, which is the only
//! place that mutates the connection state and the pending write buffer.
//!
//! On entering `Open` the actor sends, in order: the JSON start message, the
//! pending write buffer in FIFO order, then a deferred end-of-stream marker.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use super::config::{DEFAULT_MAX_PENDING_BYTES, EndOfStreamMarker, SessionConfig};
use super::connector::{ConnectRequest, Connector, FrameSink, FrameStream, redacted_url};
use super::messages::ResultFrame;
use crate::auth::Authorization;
use crate::core::stt::base::STTError;

// =============================================================================
// Connection State
// =============================================================================

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect` was called with this reason
    Requested(String),
    /// No traffic within the inactivity window
    Inactivity,
    /// Handshake rejected for bad credentials
    AuthFailed,
    /// Socket-level failure
    TransportError(String),
    /// The server closed the connection
    ServerClosed { code: Option<u16>, reason: String },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested(reason) => write!(f, "{reason}"),
            CloseReason::Inactivity => write!(f, "inactivity"),
            CloseReason::AuthFailed => write!(f, "authentication failed"),
            CloseReason::TransportError(msg) => write!(f, "transport error: {msg}"),
            CloseReason::ServerClosed { code, reason } => match code {
                Some(code) => write!(f, "server closed ({code}): {reason}"),
                None => write!(f, "server closed: {reason}"),
            },
        }
    }
}

/// Connection state owned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed(CloseReason),
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }

    /// Writes are buffered rather than sent or dropped.
    fn buffers_writes(&self) -> bool {
        matches!(
            self,
            ConnectionState::Idle
                | ConnectionState::Connecting
                | ConnectionState::Closed(CloseReason::AuthFailed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed(reason) => write!(f, "Closed({reason})"),
        }
    }
}

/// Events emitted by the transport, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection state changed
    StateChanged(ConnectionState),
    /// A decoded result frame, or the error that replaced it
    Result(Result<ResultFrame, STTError>),
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    Connect {
        config: Box<SessionConfig>,
        authorization: Authorization,
    },
    Write(Bytes),
    EndOfStream(oneshot::Sender<bool>),
    Disconnect(String),
    Reconnect(Option<Authorization>),
}

/// Handle to a transport actor.
///
/// None of the methods block. The actor stops when every handle is dropped.
#[derive(Clone)]
pub struct StreamTransport {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl StreamTransport {
    /// Spawn a transport on the current runtime.
    ///
    /// Returns the handle and the receiver for [`TransportEvent`]s.
    pub fn new(
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let actor = TransportActor {
            connector,
            commands: command_rx,
            events: event_tx,
            state_tx,
            state: ConnectionState::Idle,
            config: None,
            authorization: None,
            connecting: None,
            sink: None,
            stream: None,
            pending: VecDeque::new(),
            pending_bytes: 0,
            overflowed: false,
            eos_pending: false,
            eos_sent: false,
            inactivity_deadline: None,
        };
        tokio::spawn(actor.run());

        (
            Self {
                commands: command_tx,
                state: state_rx,
            },
            event_rx,
        )
    }

    /// Open a connection (Idle -> Connecting).
    pub fn connect(&self, config: SessionConfig, authorization: Authorization) {
        self.send(Command::Connect {
            config: Box::new(config),
            authorization,
        });
    }

    /// Send an audio chunk, or buffer it until the connection is open.
    pub fn write_data(&self, data: impl Into<Bytes>) {
        self.send(Command::Write(data.into()));
    }

    /// Send the end-of-stream marker.
    ///
    /// Returns `true` if the transport was open and the marker went out
    /// directly, `false` if it was deferred until the connection opens.
    pub async fn send_end_of_stream_marker(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.send(Command::EndOfStream(tx));
        rx.await.unwrap_or(false)
    }

    /// Close the connection. No-op when already closed.
    pub fn disconnect(&self, reason: impl Into<String>) {
        self.send(Command::Disconnect(reason.into()));
    }

    /// Open a new connection with the last configuration and authorization.
    pub fn reconnect(&self) {
        self.send(Command::Reconnect(None));
    }

    /// Open a new connection with the last configuration and a new authorization.
    pub fn reconnect_with(&self, authorization: Authorization) {
        self.send(Command::Reconnect(Some(authorization)));
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_open()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Transport task has stopped, dropping command");
        }
    }
}

// =============================================================================
// Actor
// =============================================================================

type ConnectFuture =
    Pin<Box<dyn Future<Output = Result<(FrameSink, FrameStream), STTError>> + Send>>;

struct TransportActor {
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    config: Option<SessionConfig>,
    authorization: Option<Authorization>,
    connecting: Option<ConnectFuture>,
    sink: Option<FrameSink>,
    stream: Option<FrameStream>,
    pending: VecDeque<Bytes>,
    pending_bytes: usize,
    /// An overflow has been reported since the buffer last drained
    overflowed: bool,
    eos_pending: bool,
    eos_sent: bool,
    inactivity_deadline: Option<Instant>,
}

async fn poll_connect(connecting: &mut Option<ConnectFuture>) -> Result<(FrameSink, FrameStream), STTError> {
    match connecting {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(stream: &mut Option<FrameStream>) -> Option<Result<Message, WsError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn inactivity(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl TransportActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                result = poll_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }

                incoming = next_frame(&mut self.stream) => self.on_incoming(incoming).await,

                _ = inactivity(self.inactivity_deadline) => self.on_inactivity().await,
            }
        }

        if self.sink.is_some() {
            self.close_socket("client shutdown").await;
        }
        debug!("Transport task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                config,
                authorization,
            } => self.on_connect(*config, authorization),
            Command::Write(data) => self.on_write(data).await,
            Command::EndOfStream(reply) => {
                let sent = self.on_end_of_stream().await;
                let _ = reply.send(sent);
            }
            Command::Disconnect(reason) => self.on_disconnect(reason).await,
            Command::Reconnect(authorization) => self.on_reconnect(authorization),
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn on_connect(&mut self, config: SessionConfig, authorization: Authorization) {
        if self.state != ConnectionState::Idle {
            warn!(state = %self.state, "connect() ignored, transport is not idle");
            return;
        }

        if let Err(e) = config.validate() {
            error!("Refusing to connect: {}", e);
            self.emit(TransportEvent::Result(Err(e)));
            return;
        }

        self.config = Some(config);
        self.authorization = Some(authorization);
        self.start_connect();
    }

    fn on_reconnect(&mut self, authorization: Option<Authorization>) {
        if !self.state.is_closed() {
            warn!(state = %self.state, "reconnect() ignored, transport is not closed");
            return;
        }
        if self.config.is_none() {
            warn!("reconnect() ignored, transport was never connected");
            return;
        }
        if let Some(authorization) = authorization {
            self.authorization = Some(authorization);
        }
        self.start_connect();
    }

    fn start_connect(&mut self) {
        let (Some(config), Some(authorization)) = (&self.config, &self.authorization) else {
            return;
        };

        let url = match config.websocket_url(authorization) {
            Ok(url) => url,
            Err(e) => {
                self.emit(TransportEvent::Result(Err(e.clone())));
                self.enter_closed(CloseReason::TransportError(e.to_string()));
                return;
            }
        };

        let request = ConnectRequest {
            url,
            authorization: authorization.header_value(),
            insecure: config.certificate_validation_disabled,
            timeout: config.connect_timeout(),
        };
        info!(url = %redacted_url(&request.url), auth = authorization.kind(), "Connecting");

        let connector = self.connector.clone();
        self.connecting = Some(Box::pin(async move { connector.connect(request).await }));
        self.eos_sent = false;
        self.set_state(ConnectionState::Connecting);
    }

    async fn on_write(&mut self, data: Bytes) {
        if data.is_empty() {
            // An empty binary frame would read as end-of-stream
            debug!("Ignoring empty audio chunk");
            return;
        }

        if self.state.is_open() {
            let len = data.len();
            if self.send_frame(Message::Binary(data)).await {
                debug!(bytes = len, "Sent audio frame");
            }
        } else if self.state.buffers_writes() {
            self.enqueue(data);
        } else {
            debug!(state = %self.state, bytes = data.len(), "Dropping audio chunk");
        }
    }

    async fn on_end_of_stream(&mut self) -> bool {
        if self.state.is_open() {
            if !self.eos_sent {
                self.send_end_of_stream().await;
            }
            true
        } else {
            if self.state.buffers_writes() {
                debug!(state = %self.state, "Deferring end-of-stream marker");
                self.eos_pending = true;
            }
            false
        }
    }

    async fn on_disconnect(&mut self, reason: String) {
        match self.state {
            ConnectionState::Closed(CloseReason::AuthFailed) => {
                // Parked for an auth retry; settle as a requested close
                self.enter_closed(CloseReason::Requested(reason));
            }
            ConnectionState::Closed(_) => {}
            ConnectionState::Idle | ConnectionState::Connecting => {
                self.connecting = None;
                self.enter_closed(CloseReason::Requested(reason));
            }
            ConnectionState::Open | ConnectionState::Closing => {
                self.set_state(ConnectionState::Closing);
                self.close_socket(&reason).await;
                self.enter_closed(CloseReason::Requested(reason));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Socket events
    // -------------------------------------------------------------------------

    async fn on_connect_result(&mut self, result: Result<(FrameSink, FrameStream), STTError>) {
        match result {
            Ok((sink, stream)) => {
                self.sink = Some(sink);
                self.stream = Some(stream);
                self.set_state(ConnectionState::Open);
                self.touch();
                self.on_open().await;
            }
            Err(STTError::AuthFailed(msg)) => {
                warn!("Connection rejected: {}", msg);
                self.emit(TransportEvent::Result(Err(STTError::AuthFailed(msg))));
                self.enter_closed(CloseReason::AuthFailed);
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                let msg = e.to_string();
                self.emit(TransportEvent::Result(Err(e)));
                self.enter_closed(CloseReason::TransportError(msg));
            }
        }
    }

    async fn on_open(&mut self) {
        let start = match &self.config {
            Some(config) => config.build_start_message().to_string(),
            None => return,
        };
        if !self.send_frame(Message::Text(start.into())).await {
            return;
        }
        debug!("Sent start message");

        let flushed = self.pending.len();
        while let Some(chunk) = self.pending.pop_front() {
            self.pending_bytes -= chunk.len();
            if !self.send_frame(Message::Binary(chunk)).await {
                return;
            }
        }
        self.overflowed = false;
        if flushed > 0 {
            debug!(chunks = flushed, "Flushed pending audio");
        }

        if self.eos_pending {
            self.eos_pending = false;
            self.send_end_of_stream().await;
        }
    }

    async fn on_incoming(&mut self, incoming: Option<Result<Message, WsError>>) {
        match incoming {
            Some(Ok(Message::Text(text))) => {
                self.touch();
                let result = ResultFrame::parse(&text);
                if let Err(ref e) = result {
                    warn!("{}", e);
                }
                self.emit(TransportEvent::Result(result));
            }
            Some(Ok(Message::Binary(data))) => {
                self.touch();
                debug!(bytes = data.len(), "Ignoring binary frame from server");
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                    None => (None, String::new()),
                };
                info!(?code, reason = %reason, "Server closed the connection");
                self.drop_socket();
                self.enter_closed(CloseReason::ServerClosed { code, reason });
            }
            Some(Ok(_)) => self.touch(),
            Some(Err(e)) => self.fail(format!("WebSocket error: {e}")),
            None => self.fail("Connection closed without a close frame".to_string()),
        }
    }

    async fn on_inactivity(&mut self) {
        let seconds = self
            .config
            .as_ref()
            .map(|c| c.inactivity_timeout)
            .unwrap_or_default();
        warn!(seconds, "No traffic within inactivity window, closing");

        self.emit(TransportEvent::Result(Err(STTError::InactivityTimeout(
            seconds,
        ))));
        self.set_state(ConnectionState::Closing);
        self.close_socket("inactivity").await;
        self.enter_closed(CloseReason::Inactivity);
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn enqueue(&mut self, data: Bytes) {
        let limit = self
            .config
            .as_ref()
            .map_or(DEFAULT_MAX_PENDING_BYTES, |c| c.max_pending_bytes);

        if limit > 0 && self.pending_bytes + data.len() > limit {
            if !self.overflowed {
                self.overflowed = true;
                warn!(limit, "Pending write buffer full, rejecting audio");
                self.emit(TransportEvent::Result(Err(STTError::BufferOverflow { limit })));
            }
            return;
        }

        self.pending_bytes += data.len();
        self.pending.push_back(data);
    }

    fn clear_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!(chunks = self.pending.len(), "Discarding pending audio");
        }
        self.pending.clear();
        self.pending_bytes = 0;
        self.overflowed = false;
    }

    async fn send_end_of_stream(&mut self) {
        let marker = match self.config.as_ref().map(|c| &c.end_of_stream) {
            Some(EndOfStreamMarker::Text(text)) => Message::Text(text.clone().into()),
            _ => Message::Binary(Bytes::new()),
        };
        if self.send_frame(marker).await {
            self.eos_sent = true;
            debug!("Sent end-of-stream marker");
        }
    }

    /// Send one frame. On failure the transport is closed and `false` returned.
    async fn send_frame(&mut self, message: Message) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };
        match sink.send(message).await {
            Ok(()) => {
                self.touch();
                true
            }
            Err(e) => {
                self.fail(format!("Failed to send frame: {e}"));
                false
            }
        }
    }

    async fn close_socket(&mut self, reason: &str) {
        if let Some(mut sink) = self.sink.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: reason.to_string().into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                debug!("Close frame not delivered: {}", e);
            }
            let _ = sink.close().await;
        }
        self.stream = None;
    }

    fn drop_socket(&mut self) {
        self.sink = None;
        self.stream = None;
        self.connecting = None;
    }

    /// Report a socket-level failure once and close.
    fn fail(&mut self, msg: String) {
        if self.state.is_closed() {
            return;
        }
        error!("{}", msg);
        self.drop_socket();
        self.emit(TransportEvent::Result(Err(STTError::TransportError(
            msg.clone(),
        ))));
        self.enter_closed(CloseReason::TransportError(msg));
    }

    fn enter_closed(&mut self, reason: CloseReason) {
        self.drop_socket();
        self.inactivity_deadline = None;
        if reason != CloseReason::AuthFailed {
            self.clear_pending();
            self.eos_pending = false;
        }
        self.set_state(ConnectionState::Closed(reason));
    }

    /// Restart the inactivity window.
    fn touch(&mut self) {
        if !self.state.is_open() {
            return;
        }
        self.inactivity_deadline = self
            .config
            .as_ref()
            .and_then(SessionConfig::inactivity_window)
            .map(|window| Instant::now() + window);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "Connection state changed");
        self.state = state.clone();
        self.state_tx.send_replace(state.clone());
        self.emit(TransportEvent::StateChanged(state));
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Transport event receiver dropped");
        }
    }
}
