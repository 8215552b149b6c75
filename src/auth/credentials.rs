//! Credential material and the connection authorization derived from it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::token::TokenGenerator;

/// A secret string that is wiped from memory when dropped and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// How a client proves its identity to the recognition service.
#[derive(Clone)]
pub enum Credentials {
    /// Static HTTP basic-auth pair
    Basic { username: String, password: Secret },
    /// Bearer token obtained from an async generator
    Bearer(Arc<dyn TokenGenerator>),
    /// Application id and shared secret for the signed-URL scheme
    AppSecret { app_id: String, app_secret: Secret },
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<Secret>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(generator: impl TokenGenerator + 'static) -> Self {
        Self::Bearer(Arc::new(generator))
    }

    pub fn app_secret(app_id: impl Into<String>, app_secret: impl Into<Secret>) -> Self {
        Self::AppSecret {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::Bearer(_) => "bearer",
            Self::AppSecret { .. } => "app-secret",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Bearer(_) => f.write_str("Bearer(..)"),
            Self::AppSecret { app_id, .. } => f
                .debug_struct("AppSecret")
                .field("app_id", app_id)
                .finish_non_exhaustive(),
        }
    }
}

/// A ready-to-use authorization for one connection attempt.
///
/// Header-based variants go into the handshake request; the signed variant is
/// carried as URL query parameters.
#[derive(Clone, PartialEq, Eq)]
pub enum Authorization {
    Basic { username: String, password: Secret },
    Bearer(Secret),
    Signed {
        app_id: String,
        /// Unix time in seconds at which the signature was made
        timestamp: u64,
        /// Hex HMAC-SHA256 over `timestamp + app_id`
        signature: String,
    },
}

impl Authorization {
    /// Value for the `Authorization` header, if this variant uses one.
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::Basic { username, password } => {
                let encoded = BASE64.encode(format!("{username}:{}", password.expose()));
                Some(format!("Basic {encoded}"))
            }
            Self::Bearer(token) => Some(format!("Bearer {}", token.expose())),
            Self::Signed { .. } => None,
        }
    }

    /// Query parameters to append to the connection URL.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Signed {
                app_id,
                timestamp,
                signature,
            } => vec![
                ("appID", app_id.clone()),
                ("timestamp", timestamp.to_string()),
                ("appKey", signature.clone()),
            ],
            _ => Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::Bearer(_) => "bearer",
            Self::Signed { .. } => "signed",
        }
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::Signed {
                app_id, timestamp, ..
            } => f
                .debug_struct("Signed")
                .field("app_id", app_id)
                .field("timestamp", timestamp)
                .finish_non_exhaustive(),
        }
    }
}
