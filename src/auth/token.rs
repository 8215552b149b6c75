//! Token generators used by bearer credentials.
//!
//! A generator performs one token exchange per call. Deduplication of
//! concurrent refreshes happens in [`CredentialProvider`](super::CredentialProvider),
//! so implementations stay simple.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use url::form_urlencoded;

use super::credentials::Secret;
use crate::core::stt::base::STTError;

/// Default grant type sent to the token exchange endpoint.
pub const DEFAULT_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Produces bearer tokens on demand.
#[async_trait]
pub trait TokenGenerator: Send + Sync {
    /// Obtain a fresh token.
    async fn generate(&self) -> Result<Secret, STTError>;
}

/// Always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticToken(Secret);

impl StaticToken {
    pub fn new(token: impl Into<Secret>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenGenerator for StaticToken {
    async fn generate(&self) -> Result<Secret, STTError> {
        Ok(self.0.clone())
    }
}

/// Boxed future returned by closure-based generators.
pub type TokenFuture = Pin<Box<dyn Future<Output = Result<Secret, STTError>> + Send>>;

/// Adapts a closure returning a future into a [`TokenGenerator`].
pub struct FnTokenGenerator<F>(F);

impl<F> FnTokenGenerator<F>
where
    F: Fn() -> TokenFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> TokenGenerator for FnTokenGenerator<F>
where
    F: Fn() -> TokenFuture + Send + Sync,
{
    async fn generate(&self) -> Result<Secret, STTError> {
        (self.0)().await
    }
}

/// Token exchange response body.
#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges an API key for a bearer token over HTTP.
///
/// Sends `grant_type=<grant>&apikey=<key>` as a form body and expects a JSON
/// body with an `access_token` field.
pub struct HttpTokenGenerator {
    client: reqwest::Client,
    token_url: String,
    api_key: Secret,
    grant_type: String,
}

impl HttpTokenGenerator {
    pub fn new(token_url: impl Into<String>, api_key: impl Into<Secret>) -> Result<Self, STTError> {
        // Explicit timeouts so a stuck exchange cannot hold the refresh forever
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| STTError::AuthFailed(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            api_key: api_key.into(),
            grant_type: DEFAULT_GRANT_TYPE.to_string(),
        })
    }

    pub fn with_grant_type(mut self, grant_type: impl Into<String>) -> Self {
        self.grant_type = grant_type.into();
        self
    }
}

#[async_trait]
impl TokenGenerator for HttpTokenGenerator {
    async fn generate(&self) -> Result<Secret, STTError> {
        let body: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", &self.grant_type)
            .append_pair("apikey", self.api_key.expose())
            .finish();

        let response = self
            .client
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| STTError::AuthFailed(format!("Failed to request token: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(STTError::AuthFailed(format!(
                "Token request failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| STTError::AuthFailed(format!("Failed to parse token response: {e}")))?;

        tracing::debug!(url = %self.token_url, "Token exchange succeeded");
        Ok(Secret::new(token.access_token))
    }
}
