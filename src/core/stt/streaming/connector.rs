//! Socket seam between the transport state machine and the network.
//!
//! [`Connector`] opens one WebSocket connection and hands back its two halves
//! as boxed frame sink/stream. [`TungsteniteConnector`] is the production
//! implementation; tests substitute in-memory connectors.

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use http::StatusCode;
use http::header::{AUTHORIZATION, HeaderValue};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{Connector as TlsConnector, connect_async_tls_with_config};
use tracing::{debug, info, warn};
use url::Url;

use crate::core::stt::base::STTError;

/// Outgoing half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Incoming half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Everything needed to open one connection.
#[derive(Clone)]
pub struct ConnectRequest {
    pub url: Url,
    /// Value for the `Authorization` header, if any
    pub authorization: Option<String>,
    /// Skip TLS certificate validation
    pub insecure: bool,
    pub timeout: Duration,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &redacted_url(&self.url))
            .field("authorization", &self.authorization.as_ref().map(|_| "***"))
            .field("insecure", &self.insecure)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// URL with its query string removed, safe for logs.
pub(crate) fn redacted_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

/// Opens WebSocket connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake.
    ///
    /// A handshake rejected with 401/403 must fail with
    /// [`STTError::AuthFailed`]; any other failure is a
    /// [`STTError::TransportError`].
    async fn connect(&self, request: ConnectRequest) -> Result<(FrameSink, FrameStream), STTError>;
}

/// Connector backed by `tokio-tungstenite` with rustls.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<(FrameSink, FrameStream), STTError> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| STTError::TransportError(format!("Invalid WebSocket request: {e}")))?;

        if let Some(ref value) = request.authorization {
            let header = HeaderValue::from_str(value).map_err(|e| {
                STTError::InvalidConfiguration(format!("Invalid authorization header: {e}"))
            })?;
            ws_request.headers_mut().insert(AUTHORIZATION, header);
        }

        let tls = if request.insecure {
            warn!("TLS certificate validation is disabled for this connection");
            Some(TlsConnector::Rustls(Arc::new(insecure::client_config()?)))
        } else {
            None
        };

        debug!(url = %redacted_url(&request.url), "Opening WebSocket connection");

        let (ws_stream, response) = timeout(
            request.timeout,
            connect_async_tls_with_config(ws_request, None, false, tls),
        )
        .await
        .map_err(|_| {
            STTError::TransportError(format!(
                "Connection timed out after {}s",
                request.timeout.as_secs()
            ))
        })?
        .map_err(map_handshake_error)?;

        info!(
            url = %redacted_url(&request.url),
            status = %response.status(),
            "Connected to recognition service"
        );

        let (sink, stream) = ws_stream.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Classify a failed handshake.
pub(crate) fn map_handshake_error(error: WsError) -> STTError {
    match error {
        WsError::Http(response) => status_error(response.status()),
        other => STTError::TransportError(format!("Failed to connect: {other}")),
    }
}

/// 401 and 403 are credential rejections, anything else is a transport failure.
fn status_error(status: StatusCode) -> STTError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        STTError::AuthFailed(format!("Handshake rejected with HTTP {status}"))
    } else {
        STTError::TransportError(format!("Handshake failed with HTTP {status}"))
    }
}

mod insecure {
    //! Certificate verifier that accepts any server certificate.

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
    use std::sync::Arc;

    use crate::core::stt::base::STTError;

    #[derive(Debug)]
    struct AcceptAnyCertificate(Arc<CryptoProvider>);

    impl ServerCertVerifier for AcceptAnyCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        // Handshake signatures are still checked
        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    pub(super) fn client_config() -> Result<ClientConfig, STTError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| STTError::TransportError(format!("TLS setup failed: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_401_is_auth_failure() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED),
            STTError::AuthFailed(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN),
            STTError::AuthFailed(_)
        ));
    }

    #[test]
    fn test_handshake_other_status_is_transport_error() {
        if let STTError::TransportError(msg) = status_error(StatusCode::SERVICE_UNAVAILABLE) {
            assert!(msg.contains("503"));
        } else {
            panic!("Expected TransportError");
        }
        assert!(matches!(
            map_handshake_error(WsError::ConnectionClosed),
            STTError::TransportError(_)
        ));
    }

    #[test]
    fn test_insecure_config_builds() {
        assert!(insecure::client_config().is_ok());
    }

    #[test]
    fn test_request_debug_hides_credentials() {
        let request = ConnectRequest {
            url: Url::parse("wss://asr.example.com/speech?appKey=secret-sig").unwrap(),
            authorization: Some("Bearer secret-token".to_string()),
            insecure: false,
            timeout: Duration::from_secs(5),
        };
        let debug = format!("{request:?}");
        assert!(!debug.contains("secret-sig"));
        assert!(!debug.contains("secret-token"));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let request = ConnectRequest {
            url: Url::parse("ws://127.0.0.1:1/speech").unwrap(),
            authorization: None,
            insecure: false,
            timeout: Duration::from_secs(5),
        };
        let result = TungsteniteConnector::new().connect(request).await;
        assert!(matches!(result, Err(STTError::TransportError(_))));
    }
}
