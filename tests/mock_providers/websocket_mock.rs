//! WebSocket mock recognizer
//!
//! Accepts the handshake (optionally checking the `Authorization` header),
//! answers every audio chunk with an interim result and the end-of-stream
//! marker with a final result followed by a normal close.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Transcript sent with the final result.
pub const FINAL_TRANSCRIPT: &str = "labdien , pasaule .";

/// One frame as seen by the server, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedFrame {
    Start(Value),
    Audio(usize),
    EndOfStream,
    Text(String),
}

/// Everything recorded for one accepted or rejected handshake.
#[derive(Debug, Clone, Default)]
pub struct ConnectionLog {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub rejected: bool,
    pub frames: Vec<ReceivedFrame>,
}

impl ConnectionLog {
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn audio_bytes(&self) -> usize {
        self.frames
            .iter()
            .map(|f| match f {
                ReceivedFrame::Audio(n) => *n,
                _ => 0,
            })
            .sum()
    }
}

/// Mock server state
pub struct MockAsrState {
    /// Required `Authorization` header value; `None` accepts anything
    pub expected_auth: Option<String>,
    /// Number of upcoming handshakes to reject with 401
    pub reject_next: AtomicU32,
    /// Text frame treated as end of stream in addition to an empty binary frame
    pub text_end_of_stream: Option<String>,
    pub connection_count: AtomicU64,
    pub connections: Mutex<Vec<ConnectionLog>>,
}

impl MockAsrState {
    pub fn new() -> Self {
        Self {
            expected_auth: None,
            reject_next: AtomicU32::new(0),
            text_end_of_stream: None,
            connection_count: AtomicU64::new(0),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn with_expected_auth(mut self, value: impl Into<String>) -> Self {
        self.expected_auth = Some(value.into());
        self
    }

    pub fn rejecting(self, count: u32) -> Self {
        self.reject_next.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_text_end_of_stream(mut self, marker: impl Into<String>) -> Self {
        self.text_end_of_stream = Some(marker.into());
        self
    }

    pub fn logs(&self) -> Vec<ConnectionLog> {
        self.connections.lock().clone()
    }

    fn should_reject(&self, authorization: Option<&str>) -> bool {
        let counted = self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let mismatched = match self.expected_auth {
            Some(ref expected) => authorization != Some(expected.as_str()),
            None => false,
        };
        counted || mismatched
    }
}

impl Default for MockAsrState {
    fn default() -> Self {
        Self::new()
    }
}

/// Running mock server
pub struct MockAsrServer {
    pub addr: SocketAddr,
    pub state: Arc<MockAsrState>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockAsrServer {
    /// Bind to an ephemeral port and start accepting connections.
    pub async fn start(state: MockAsrState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(state);

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        eprintln!("Mock recognizer connection error: {e}");
                    }
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// HTTP endpoint for `SessionConfig::api_endpoint`.
    pub fn endpoint(&self) -> String {
        format!("http://{}/client/ws/speech", self.addr)
    }
}

impl Drop for MockAsrServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn interim(n: usize) -> Value {
    json!({
        "status": 0,
        "segment": 0,
        "result": {
            "hypotheses": [{ "transcript": format!("chunk {n}") }],
            "final": false
        }
    })
}

fn final_result() -> Value {
    json!({
        "status": 0,
        "segment": 0,
        "result": {
            "hypotheses": [
                { "transcript": FINAL_TRANSCRIPT, "confidence": 0.92 },
                { "transcript": "labdien pasaule", "confidence": 0.41 }
            ],
            "final": true
        }
    })
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockAsrState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    state.connection_count.fetch_add(1, Ordering::SeqCst);

    // Logged before the response goes out so the client never sees a
    // handshake result the log does not have yet
    let position = Arc::new(Mutex::new(None));
    let handshake_position = position.clone();
    let handshake_state = state.clone();
    let callback = move |request: &Request, response: Response| {
        let authorization = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let reject = handshake_state.should_reject(authorization.as_deref());

        let entry = ConnectionLog {
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            authorization,
            rejected: reject,
            frames: Vec::new(),
        };
        let mut connections = handshake_state.connections.lock();
        connections.push(entry);
        *handshake_position.lock() = Some(connections.len() - 1);

        if reject {
            let mut error = ErrorResponse::new(Some("unauthorized".to_string()));
            *error.status_mut() = StatusCode::UNAUTHORIZED;
            Err(error)
        } else {
            Ok(response)
        }
    };

    let result = accept_hdr_async(stream, callback).await;
    let ws_stream = result?;
    let position = position.lock().ok_or("handshake was not logged")?;
    let (mut write, mut read) = ws_stream.split();

    let mut chunks = 0usize;
    while let Some(message) = read.next().await {
        let frame = match message? {
            Message::Text(text) => {
                let text = text.as_str();
                if state.text_end_of_stream.as_deref() == Some(text) {
                    ReceivedFrame::EndOfStream
                } else {
                    match serde_json::from_str::<Value>(text) {
                        Ok(value) if value["action"] == "start" => ReceivedFrame::Start(value),
                        _ => ReceivedFrame::Text(text.to_string()),
                    }
                }
            }
            Message::Binary(data) if data.is_empty() => ReceivedFrame::EndOfStream,
            Message::Binary(data) => ReceivedFrame::Audio(data.len()),
            Message::Close(_) => break,
            _ => continue,
        };

        state.connections.lock()[position]
            .frames
            .push(frame.clone());

        match frame {
            ReceivedFrame::Audio(_) => {
                chunks += 1;
                write
                    .send(Message::Text(interim(chunks).to_string().into()))
                    .await?;
            }
            ReceivedFrame::EndOfStream => {
                write
                    .send(Message::Text(final_result().to_string().into()))
                    .await?;
                write
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "recognition finished".into(),
                    })))
                    .await?;
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
