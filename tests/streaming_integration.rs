//! End-to-end tests of the streaming client against a mock WebSocket recognizer.
//!
//! These use the real `TungsteniteConnector` over plain `ws://` on localhost.

mod mock_providers;

use asr_stream::auth::{
    CredentialProvider, Credentials, FnTokenGenerator, Secret, StaticToken, TokenFuture,
    hmac_sha256_hex,
};
use asr_stream::core::stt::streaming::{
    CloseReason, ConnectionState, EndOfStreamMarker, ReaderAudioSource, RecognitionSession,
    ResultFrame, SessionConfig, StreamTransport, TransportEvent, TungsteniteConnector,
};
use asr_stream::core::stt::{STTError, SessionSinks};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mock_providers::websocket_mock::FINAL_TRANSCRIPT;
use mock_providers::{MockAsrServer, MockAsrState, ReceivedFrame};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn init_crypto() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn config_for(server: &MockAsrServer) -> SessionConfig {
    SessionConfig::new(server.endpoint())
}

fn channel_sinks() -> (
    SessionSinks,
    mpsc::UnboundedReceiver<Result<ResultFrame, STTError>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sinks = SessionSinks::new(Arc::new(move |result| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(result);
        })
    }));
    (sinks, rx)
}

fn collect(rx: &mut mpsc::UnboundedReceiver<Result<ResultFrame, STTError>>) -> Vec<Result<ResultFrame, STTError>> {
    let mut results = Vec::new();
    while let Ok(result) = rx.try_recv() {
        results.push(result);
    }
    results
}

#[tokio::test]
async fn test_stream_audio_end_to_end() {
    init_crypto();
    let server = MockAsrServer::start(MockAsrState::new().with_expected_auth("Bearer good-token")).await;

    let credentials = CredentialProvider::new(Credentials::bearer(StaticToken::new("good-token")));
    let (sinks, mut results) = channel_sinks();
    let session = RecognitionSession::new(config_for(&server), credentials, sinks);

    session.recognize();
    for _ in 0..5 {
        session.write_audio(vec![0u8; 320]);
    }
    session.end_transmission().await;
    timeout(WAIT, session.wait_finished()).await.unwrap();

    let results = collect(&mut results);
    assert_eq!(results.len(), 6);
    for (i, result) in results[..5].iter().enumerate() {
        let frame = result.as_ref().unwrap();
        assert!(!frame.is_final());
        assert_eq!(frame.transcript(), Some(format!("chunk {}", i + 1).as_str()));
    }
    let last = results[5].as_ref().unwrap();
    assert!(last.is_final());
    assert_eq!(last.transcript(), Some(FINAL_TRANSCRIPT));
    assert_eq!(last.confidence(), Some(0.92));

    assert_eq!(
        session.state(),
        ConnectionState::Closed(CloseReason::ServerClosed {
            code: Some(1000),
            reason: "recognition finished".to_string(),
        })
    );

    let logs = server.state.logs();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.path, "/client/ws/speech");
    assert_eq!(log.authorization.as_deref(), Some("Bearer good-token"));
    assert!(
        log.query_param("content-type")
            .unwrap()
            .starts_with("audio/x-raw, rate=(int)16000")
    );

    // Start message first, then the audio in order, then the marker
    assert!(matches!(log.frames[0], ReceivedFrame::Start(_)));
    assert_eq!(log.frames[1..6], vec![ReceivedFrame::Audio(320); 5][..]);
    assert_eq!(log.frames[6], ReceivedFrame::EndOfStream);
}

#[tokio::test]
async fn test_start_message_carries_options() {
    init_crypto();
    let server = MockAsrServer::start(MockAsrState::new()).await;

    let config = SessionConfig {
        interim_results: false,
        max_alternatives: 3,
        keywords_threshold: Some(0.5),
        timestamps: true,
        ..config_for(&server)
    };
    let credentials = CredentialProvider::new(Credentials::bearer(StaticToken::new("t")));
    let (sinks, _results) = channel_sinks();
    let session = RecognitionSession::new(config, credentials, sinks);

    session.recognize();
    session.end_transmission().await;
    timeout(WAIT, session.wait_finished()).await.unwrap();

    let logs = server.state.logs();
    let ReceivedFrame::Start(ref start) = logs[0].frames[0] else {
        panic!("first frame was not the start message: {:?}", logs[0].frames);
    };
    assert_eq!(start["action"], "start");
    assert_eq!(start["interim_results"], false);
    assert_eq!(start["max_alternatives"], 3);
    assert_eq!(start["keywords_threshold"], 0.5);
    assert_eq!(start["timestamps"], true);
}

#[tokio::test]
async fn test_basic_auth_header() {
    init_crypto();
    let expected = format!("Basic {}", STANDARD.encode("user:pa55"));
    let server = MockAsrServer::start(MockAsrState::new().with_expected_auth(expected.clone())).await;

    let credentials = CredentialProvider::new(Credentials::basic("user", "pa55"));
    let (sinks, mut results) = channel_sinks();
    let session = RecognitionSession::new(config_for(&server), credentials, sinks);

    session.recognize();
    session.write_audio(vec![1u8; 64]);
    session.end_transmission().await;
    timeout(WAIT, session.wait_finished()).await.unwrap();

    assert!(collect(&mut results).iter().all(Result::is_ok));
    assert_eq!(server.state.logs()[0].authorization.as_deref(), Some(expected.as_str()));
}

#[tokio::test]
async fn test_signed_url_authentication() {
    init_crypto();
    let server = MockAsrServer::start(MockAsrState::new()).await;

    let credentials =
        CredentialProvider::new(Credentials::app_secret("demo-app", "demo-secret"));
    let (sinks, _results) = channel_sinks();
    let session = RecognitionSession::new(config_for(&server), credentials, sinks);

    session.recognize();
    session.end_transmission().await;
    timeout(WAIT, session.wait_finished()).await.unwrap();

    let log = &server.state.logs()[0];
    assert!(log.authorization.is_none());
    assert_eq!(log.query_param("appID").as_deref(), Some("demo-app"));

    let timestamp = log.query_param("timestamp").unwrap();
    let expected = hmac_sha256_hex(b"demo-secret", &format!("{timestamp}demo-app")).unwrap();
    assert_eq!(log.query_param("appKey"), Some(expected));
}

#[tokio::test]
async fn test_text_end_of_stream_marker() {
    init_crypto();
    let server = MockAsrServer::start(MockAsrState::new().with_text_end_of_stream("EOS")).await;

    let config = SessionConfig {
        end_of_stream: EndOfStreamMarker::Text("EOS".to_string()),
        ..config_for(&server)
    };
    let credentials = CredentialProvider::new(Credentials::bearer(StaticToken::new("t")));
    let (sinks, mut results) = channel_sinks();
    let session = RecognitionSession::new(config, credentials, sinks);

    session.recognize();
    session.end_transmission().await;
    timeout(WAIT, session.wait_finished()).await.unwrap();

    let results = collect(&mut results);
    assert!(results.last().unwrap().as_ref().unwrap().is_final());
}

#[tokio::test]
async fn test_auth_rejection_refreshes_token_once() {
    init_crypto();
    let server = MockAsrServer::start(MockAsrState::new().rejecting(1)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let generator = {
        let calls = calls.clone();
        FnTokenGenerator::new(move || -> TokenFuture {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(Secret::new(format!("token-{n}"))) })
        })
    };
    let credentials = CredentialProvider::new(Credentials::bearer(generator));
    let (sinks, mut results) = channel_sinks();
    let session = RecognitionSession::new(config_for(&server), credentials, sinks);

    session.recognize();
    session.write_audio(vec![0u8; 320]);
    session.end_transmission().await;
    timeout(WAIT, session.wait_finished()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let logs = server.state.logs();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].rejected);
    assert_eq!(logs[0].authorization.as_deref(), Some("Bearer token-0"));
    assert!(!logs[1].rejected);
    assert_eq!(logs[1].authorization.as_deref(), Some("Bearer token-1"));

    // Audio written during the failed attempt reached the second connection
    assert_eq!(logs[1].audio_bytes(), 320);
    assert!(collect(&mut results).iter().all(Result::is_ok));
}

#[tokio::test]
async fn test_repeated_auth_rejection_is_terminal() {
    init_crypto();
    let server = MockAsrServer::start(MockAsrState::new().with_expected_auth("Bearer other")).await;

    let credentials = CredentialProvider::new(Credentials::bearer(StaticToken::new("wrong")));
    let (sinks, mut results) = channel_sinks();
    let session = RecognitionSession::new(config_for(&server), credentials, sinks);

    session.recognize();
    timeout(WAIT, session.wait_finished()).await.unwrap();

    let results = collect(&mut results);
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(STTError::AuthFailed(_))));
    assert_eq!(server.state.logs().len(), 2);
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    init_crypto();
    // Bind then drop to get a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let credentials = CredentialProvider::new(Credentials::bearer(StaticToken::new("t")));
    let (sinks, mut results) = channel_sinks();
    let session = RecognitionSession::new(
        SessionConfig::new(format!("http://127.0.0.1:{port}/speech")),
        credentials,
        sinks,
    );

    session.recognize();
    timeout(WAIT, session.wait_finished()).await.unwrap();

    let results = collect(&mut results);
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(STTError::TransportError(_))));
    assert!(matches!(
        session.state(),
        ConnectionState::Closed(CloseReason::TransportError(_))
    ));
}

#[tokio::test]
async fn test_capture_from_reader_source() {
    init_crypto();
    let server = MockAsrServer::start(MockAsrState::new()).await;

    let config = config_for(&server);
    let credentials = CredentialProvider::new(Credentials::bearer(StaticToken::new("t")));
    let (sinks, _results) = channel_sinks();
    let session = RecognitionSession::new(config.clone(), credentials, sinks);

    let pcm: &'static [u8] = &[0u8; 1000];
    session.recognize();
    let pumped = session
        .start_capture(ReaderAudioSource::for_config(pcm, &config))
        .await
        .unwrap();
    assert_eq!(pumped, 1000);

    session.end_transmission().await;
    timeout(WAIT, session.wait_finished()).await.unwrap();

    let log = &server.state.logs()[0];
    assert_eq!(log.audio_bytes(), 1000);
    assert_eq!(
        &log.frames[1..5],
        &[
            ReceivedFrame::Audio(320),
            ReceivedFrame::Audio(320),
            ReceivedFrame::Audio(320),
            ReceivedFrame::Audio(40),
        ][..]
    );
}

#[tokio::test]
async fn test_transport_disconnect_sends_close() {
    init_crypto();
    let server = MockAsrServer::start(MockAsrState::new()).await;

    let (transport, mut events) = StreamTransport::new(Arc::new(TungsteniteConnector::new()));
    transport.write_data(vec![5u8; 100]);
    transport.connect(
        config_for(&server),
        asr_stream::auth::Authorization::Bearer(Secret::new("t")),
    );

    let mut state = transport.watch_state();
    timeout(WAIT, state.wait_for(ConnectionState::is_open))
        .await
        .unwrap()
        .unwrap();

    // The buffered chunk is answered with an interim result
    let first = loop {
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            TransportEvent::Result(result) => break result,
            TransportEvent::StateChanged(_) => continue,
        }
    };
    assert_eq!(first.unwrap().transcript(), Some("chunk 1"));

    transport.disconnect("client done");
    transport.disconnect("client done");
    timeout(WAIT, state.wait_for(ConnectionState::is_closed))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        transport.state(),
        ConnectionState::Closed(CloseReason::Requested("client done".to_string()))
    );
    let log = &server.state.logs()[0];
    assert_eq!(log.frames[1], ReceivedFrame::Audio(100));
}
