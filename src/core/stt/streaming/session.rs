//! Recognition session: the caller-facing orchestrator.
//!
//! A session binds a [`CredentialProvider`], a [`SessionConfig`] and a
//! [`StreamTransport`]. All sink invocations happen on one driver task, so
//! callers never see two callbacks run concurrently.
//!
//! Authentication failures get exactly one automatic retry: the cached token
//! is invalidated, a new one requested, and the connection reopened. A second
//! failure is delivered to the result sink as a terminal `AuthFailed`.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::audio::{AudioSource, CaptureEvent};
use super::config::SessionConfig;
use super::connector::{Connector, TungsteniteConnector};
use super::transport::{CloseReason, ConnectionState, StreamTransport, TransportEvent};
use crate::auth::{Authorization, CredentialProvider};
use crate::core::stt::base::{STTError, SessionSinks};

enum Control {
    Start,
    Authorized {
        retry: bool,
        result: Result<Authorization, STTError>,
    },
    Audio(Bytes),
    Power(f32),
}

/// Pushes audio into the transport and mirrors it to the driver.
#[derive(Clone)]
struct AudioInput {
    transport: StreamTransport,
    control: mpsc::UnboundedSender<Control>,
}

impl AudioInput {
    fn push(&self, data: Bytes) {
        self.transport.write_data(data.clone());
        let _ = self.control.send(Control::Audio(data));
    }

    fn power(&self, level: f32) {
        let _ = self.control.send(Control::Power(level));
    }
}

/// A streaming recognition session.
///
/// # Example
///
/// ```rust,no_run
/// use asr_stream::auth::{CredentialProvider, Credentials, StaticToken};
/// use asr_stream::core::stt::streaming::{RecognitionSession, SessionConfig};
/// use asr_stream::core::stt::SessionSinks;
/// use std::sync::Arc;
///
/// # async fn run() {
/// let credentials = CredentialProvider::new(Credentials::bearer(StaticToken::new("token")));
/// let sinks = SessionSinks::new(Arc::new(|result| {
///     Box::pin(async move {
///         match result {
///             Ok(frame) => println!("{:?}", frame.transcript()),
///             Err(e) => eprintln!("{e}"),
///         }
///     })
/// }));
///
/// let session = RecognitionSession::new(
///     SessionConfig::new("https://asr.example.com/client/ws/speech"),
///     credentials,
///     sinks,
/// );
/// session.recognize();
/// session.write_audio(vec![0u8; 320]);
/// session.end_transmission().await;
/// session.wait_finished().await;
/// # }
/// ```
pub struct RecognitionSession {
    id: Uuid,
    config: SessionConfig,
    transport: StreamTransport,
    input: AudioInput,
    capture: Mutex<Option<CancellationToken>>,
    ended: Arc<AtomicBool>,
    finished: watch::Receiver<bool>,
}

impl RecognitionSession {
    /// Create a session that connects with [`TungsteniteConnector`].
    pub fn new(config: SessionConfig, credentials: CredentialProvider, sinks: SessionSinks) -> Self {
        Self::with_connector(
            config,
            credentials,
            sinks,
            Arc::new(TungsteniteConnector::new()),
        )
    }

    /// Create a session over a custom connector.
    pub fn with_connector(
        config: SessionConfig,
        credentials: CredentialProvider,
        sinks: SessionSinks,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (transport, events) = StreamTransport::new(connector);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = watch::channel(false);
        let ended = Arc::new(AtomicBool::new(false));

        let driver = SessionDriver {
            config: config.clone(),
            credentials,
            transport: transport.clone(),
            sinks,
            control: control_tx.downgrade(),
            ended: ended.clone(),
            finished: finished_tx,
            started: false,
            connected_once: false,
            retry_used: false,
        };
        let span = info_span!("recognition_session", session_id = %id);
        tokio::spawn(driver.run(events, control_rx).instrument(span));

        Self {
            id,
            config,
            input: AudioInput {
                transport: transport.clone(),
                control: control_tx,
            },
            transport,
            capture: Mutex::new(None),
            ended,
            finished: finished_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start recognition: request a token, then open the connection.
    ///
    /// Calling it again on a started session has no effect.
    pub fn recognize(&self) {
        let _ = self.input.control.send(Control::Start);
    }

    /// Push one PCM chunk.
    ///
    /// Chunks pushed before the connection opens are buffered and flushed in
    /// order once it does.
    pub fn write_audio(&self, data: impl Into<Bytes>) {
        self.input.push(data.into());
    }

    /// Report an input power level (dBFS) to the power sink.
    pub fn report_power(&self, level: f32) {
        self.input.power(level);
    }

    /// Pump audio from `source` until it is exhausted or
    /// [`end_recognize`](Self::end_recognize) is called.
    ///
    /// Replaces any capture already running. The handle resolves to the
    /// number of audio bytes pumped.
    pub fn start_capture<S>(&self, mut source: S) -> JoinHandle<u64>
    where
        S: AudioSource + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.capture.lock().replace(token.clone()) {
            previous.cancel();
        }

        let input = self.input.clone();
        let span = info_span!("capture", session_id = %self.id);
        tokio::spawn(
            async move {
                let mut total = 0u64;
                loop {
                    let event = tokio::select! {
                        _ = token.cancelled() => {
                            debug!("Capture stopped");
                            break;
                        }
                        event = source.next_event() => event,
                    };
                    match event {
                        Some(CaptureEvent::Audio(chunk)) => {
                            total += chunk.len() as u64;
                            input.push(chunk);
                        }
                        Some(CaptureEvent::Power(level)) => input.power(level),
                        None => break,
                    }
                }
                debug!(bytes = total, "Capture finished");
                total
            }
            .instrument(span),
        )
    }

    /// Stop local capture. The connection stays open so trailing results
    /// can still arrive.
    pub fn end_recognize(&self) {
        if let Some(token) = self.capture.lock().take() {
            token.cancel();
        }
    }

    /// Send the end-of-stream marker.
    ///
    /// Returns `true` if it was sent immediately, `false` if it will be sent
    /// once the connection opens.
    pub async fn end_transmission(&self) -> bool {
        self.transport.send_end_of_stream_marker().await
    }

    /// Close the connection regardless of pending results. Idempotent.
    pub fn end_connection(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            info!(session_id = %self.id, "Ending connection");
        }
        self.transport.disconnect("end connection");
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Subscribe to transport state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    /// Wait until the session has reached a terminal state.
    pub async fn wait_finished(&self) {
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        if let Some(token) = self.capture.get_mut().take() {
            token.cancel();
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

struct SessionDriver {
    config: SessionConfig,
    credentials: CredentialProvider,
    transport: StreamTransport,
    sinks: SessionSinks,
    control: mpsc::WeakUnboundedSender<Control>,
    ended: Arc<AtomicBool>,
    finished: watch::Sender<bool>,
    started: bool,
    connected_once: bool,
    retry_used: bool,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => break,
                },
                message = control.recv() => match message {
                    Some(message) => self.on_control(message).await,
                    None => break,
                },
            }
        }
        debug!("Session driver stopped");
    }

    async fn on_control(&mut self, message: Control) {
        match message {
            Control::Start => self.start().await,
            Control::Authorized { retry, result } => self.on_authorized(retry, result).await,
            Control::Audio(data) => {
                if let Some(ref audio) = self.sinks.audio {
                    audio(data).await;
                }
            }
            Control::Power(level) => {
                if let Some(ref power) = self.sinks.power {
                    power(level).await;
                }
            }
        }
    }

    async fn start(&mut self) {
        if self.started {
            warn!("recognize() called on a started session");
            return;
        }
        self.started = true;

        if let Err(e) = self.config.validate() {
            warn!("Invalid session configuration: {}", e);
            (self.sinks.result)(Err(e)).await;
            self.finish();
            return;
        }

        info!(endpoint = %self.config.api_endpoint, "Starting recognition");
        self.request_token(false);
    }

    fn request_token(&self, retry: bool) {
        let Some(control) = self.control.upgrade() else {
            return;
        };
        let credentials = self.credentials.clone();
        tokio::spawn(
            async move {
                let result = credentials.request_token().await;
                let _ = control.send(Control::Authorized { retry, result });
            }
            .in_current_span(),
        );
    }

    async fn on_authorized(&mut self, retry: bool, result: Result<Authorization, STTError>) {
        if self.ended.load(Ordering::SeqCst) {
            debug!("Session ended before authorization completed");
            self.finish();
            return;
        }

        match result {
            Ok(authorization) => {
                if self.connected_once {
                    self.transport.reconnect_with(authorization);
                } else {
                    self.connected_once = true;
                    self.transport.connect(self.config.clone(), authorization);
                }
            }
            Err(e) if !retry => {
                warn!("Token request failed, retrying once: {}", e);
                self.retry_auth();
            }
            Err(e) => self.fail_auth(e).await,
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Result(Err(STTError::AuthFailed(msg)))
                if !self.retry_used && !self.ended.load(Ordering::SeqCst) =>
            {
                warn!("Connection rejected ({}), refreshing credentials", msg);
                self.retry_auth();
            }
            TransportEvent::Result(Err(e @ STTError::AuthFailed(_))) => self.fail_auth(e).await,
            TransportEvent::Result(result) => (self.sinks.result)(result).await,
            TransportEvent::StateChanged(state) => {
                debug!(state = %state, "Transport state");
                if let ConnectionState::Closed(ref reason) = state
                    && *reason != CloseReason::AuthFailed
                {
                    self.finish();
                }
            }
        }
    }

    fn retry_auth(&mut self) {
        self.retry_used = true;
        self.credentials.invalidate_token();
        self.request_token(true);
    }

    async fn fail_auth(&mut self, error: STTError) {
        warn!("Authentication failed permanently: {}", error);
        let error = match error {
            STTError::AuthFailed(msg) => STTError::AuthFailed(msg),
            other => STTError::AuthFailed(other.to_string()),
        };
        (self.sinks.result)(Err(error)).await;
        // Releases audio held for the retry
        self.transport.disconnect("authentication failed");
        self.finish();
    }

    fn finish(&self) {
        self.finished.send_replace(true);
    }
}
