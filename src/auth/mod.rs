//! Client-side authentication for the recognition service.
//!
//! Three credential schemes are supported:
//!
//! - **Basic**: a static username/password pair sent as an `Authorization` header
//! - **Bearer**: a token produced by a [`TokenGenerator`], for example an
//!   [`HttpTokenGenerator`] exchanging an API key at a token endpoint
//! - **App secret**: an application id plus shared secret; each connection URL
//!   carries `appID`, `timestamp` and an HMAC-SHA256 signature (`appKey`)
//!
//! [`CredentialProvider`] caches the resulting [`Authorization`] and collapses
//! concurrent refreshes into one exchange.
//!
//! # Example
//! ```rust,no_run
//! use asr_stream::auth::{CredentialProvider, Credentials, StaticToken};
//!
//! # async fn run() -> Result<(), asr_stream::STTError> {
//! let provider = CredentialProvider::new(Credentials::bearer(StaticToken::new("token")));
//! let auth = provider.request_token().await?;
//! println!("authorized with {}", auth.kind());
//! # Ok(())
//! # }
//! ```

mod credentials;
mod provider;
mod token;

pub use credentials::{Authorization, Credentials, Secret};
pub use provider::{CredentialProvider, hmac_sha256_hex};
pub use token::{
    DEFAULT_GRANT_TYPE, FnTokenGenerator, HttpTokenGenerator, StaticToken, TokenFuture,
    TokenGenerator,
};
