//! Credential provider with single-flight token refresh.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::credentials::{Authorization, Credentials};
use crate::core::stt::base::STTError;

type HmacSha256 = Hmac<Sha256>;

type RefreshFuture = Shared<BoxFuture<'static, Result<Authorization, STTError>>>;

/// Compute a lowercase hex HMAC-SHA256 of `text` keyed by `secret`.
pub fn hmac_sha256_hex(secret: &[u8], text: &str) -> Result<String, STTError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| STTError::InvalidConfiguration(format!("Invalid signing key: {e}")))?;
    mac.update(text.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

#[derive(Default)]
struct TokenState {
    cached: Option<Authorization>,
    in_flight: Option<InFlight>,
    next_flight_id: u64,
}

struct Inner {
    credentials: Credentials,
    state: Mutex<TokenState>,
}

/// Hands out connection authorizations and refreshes them on demand.
///
/// Cloning is cheap; clones share the cached token and any in-flight refresh.
/// At most one refresh runs at a time per provider. Every caller that asks for
/// a token while a refresh is running awaits that same refresh and receives the
/// same token or the same error.
#[derive(Clone)]
pub struct CredentialProvider {
    inner: Arc<Inner>,
}

impl CredentialProvider {
    pub fn new(credentials: Credentials) -> Self {
        let mut state = TokenState::default();

        // Basic auth needs no exchange, so it is usable from the start
        if let Credentials::Basic { username, password } = &credentials {
            state.cached = Some(Authorization::Basic {
                username: username.clone(),
                password: password.clone(),
            });
        }

        Self {
            inner: Arc::new(Inner {
                credentials,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    /// The cached authorization, if one is present and not invalidated.
    pub fn current_token(&self) -> Option<Authorization> {
        self.inner.state.lock().cached.clone()
    }

    /// Return the cached authorization or run (or join) a refresh.
    ///
    /// Refresh failures are reported as [`STTError::AuthFailed`].
    pub async fn request_token(&self) -> Result<Authorization, STTError> {
        let (flight_id, flight) = {
            let mut state = self.inner.state.lock();
            if let Some(auth) = &state.cached {
                return Ok(auth.clone());
            }

            match &state.in_flight {
                Some(in_flight) => {
                    debug!(flight = in_flight.id, "Joining in-flight token refresh");
                    (in_flight.id, in_flight.future.clone())
                }
                None => {
                    let id = state.next_flight_id;
                    state.next_flight_id += 1;
                    let future = refresh(self.inner.credentials.clone()).boxed().shared();
                    state.in_flight = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    debug!(
                        flight = id,
                        kind = self.inner.credentials.kind(),
                        "Starting token refresh"
                    );
                    (id, future)
                }
            }
        };

        let result = flight.await;

        let mut state = self.inner.state.lock();
        if state.in_flight.as_ref().is_some_and(|f| f.id == flight_id) {
            state.in_flight = None;
            match &result {
                Ok(auth) => {
                    info!(kind = auth.kind(), "Token refreshed");
                    state.cached = Some(auth.clone());
                }
                Err(e) => warn!("Token refresh failed: {}", e),
            }
        }

        result
    }

    /// Drop the cached authorization so the next request refreshes.
    ///
    /// A refresh already running is left alone and still completes.
    pub fn invalidate_token(&self) {
        let mut state = self.inner.state.lock();
        if state.cached.take().is_some() {
            debug!("Cached token invalidated");
        }
    }

    /// Hex HMAC-SHA256 of `text` keyed by the app secret.
    pub fn sign(&self, text: &str) -> Result<String, STTError> {
        match &self.inner.credentials {
            Credentials::AppSecret { app_secret, .. } => {
                hmac_sha256_hex(app_secret.expose().as_bytes(), text)
            }
            other => Err(STTError::InvalidConfiguration(format!(
                "{} credentials carry no signing secret",
                other.kind()
            ))),
        }
    }

    /// Check a signature produced by [`sign`](Self::sign) in constant time.
    pub fn verify(&self, text: &str, signature: &str) -> bool {
        match self.sign(text) {
            Ok(expected) => expected.as_bytes().ct_eq(signature.as_bytes()).into(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("credentials", &self.inner.credentials)
            .finish_non_exhaustive()
    }
}

async fn refresh(credentials: Credentials) -> Result<Authorization, STTError> {
    match credentials {
        Credentials::Basic { username, password } => {
            Ok(Authorization::Basic { username, password })
        }
        Credentials::Bearer(generator) => {
            let token = generator.generate().await.map_err(|e| match e {
                STTError::AuthFailed(msg) => STTError::AuthFailed(msg),
                other => STTError::AuthFailed(other.to_string()),
            })?;
            if token.is_empty() {
                return Err(STTError::AuthFailed(
                    "Token generator returned an empty token".to_string(),
                ));
            }
            Ok(Authorization::Bearer(token))
        }
        Credentials::AppSecret { app_id, app_secret } => {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| STTError::AuthFailed(format!("System clock error: {e}")))?
                .as_secs();
            let signature = hmac_sha256_hex(
                app_secret.expose().as_bytes(),
                &format!("{timestamp}{app_id}"),
            )
            .map_err(|e| STTError::AuthFailed(e.to_string()))?;
            Ok(Authorization::Signed {
                app_id,
                timestamp,
                signature,
            })
        }
    }
}
