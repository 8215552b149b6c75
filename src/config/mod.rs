//! Configuration module for the ASR streaming client
//!
//! Configuration comes from .env files, environment variables and an optional
//! YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: `ASR_*` environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use asr_stream::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(&PathBuf::from("config.yaml"))?;
//! let credentials = config.build_credentials()?;
//! println!("Using {} credentials", credentials.kind());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;

mod env;
mod yaml;

pub use yaml::{AuthYaml, RecognitionYaml, ServerYaml, YamlConfig};

use crate::auth::{Credentials, HttpTokenGenerator, StaticToken};
use crate::core::stt::base::STTError;
use crate::core::stt::streaming::SessionConfig;

/// Credential settings
///
/// Secrets are zeroized when the settings are dropped.
#[derive(Clone, Default)]
pub struct AuthSettings {
    pub token: Option<String>,
    pub token_url: Option<String>,
    pub api_key: Option<String>,
    pub grant_type: Option<String>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Drop for AuthSettings {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut token) = self.token {
            token.zeroize();
        }
        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
        if let Some(ref mut secret) = self.app_secret {
            secret.zeroize();
        }
        if let Some(ref mut password) = self.password {
            password.zeroize();
        }
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> Option<&'static str> {
            value.as_ref().map(|_| "[REDACTED]")
        }

        f.debug_struct("AuthSettings")
            .field("token", &redact(&self.token))
            .field("token_url", &self.token_url)
            .field("api_key", &redact(&self.api_key))
            .field("grant_type", &self.grant_type)
            .field("app_id", &self.app_id)
            .field("app_secret", &redact(&self.app_secret))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

/// Client configuration
///
/// Contains the recognition session parameters and the credential settings
/// used to build a [`Credentials`] value.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub session: SessionConfig,
    pub auth: AuthSettings,
}

impl ClientConfig {
    /// Load configuration from environment variables over defaults.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or the resulting
    /// session configuration is invalid.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge_config(None)?;
        config.session.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - The merged session configuration is invalid
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs at startup
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge_config(Some(yaml_config))?;
        config.session.validate()?;
        Ok(config)
    }

    /// Build credentials from the configured settings.
    ///
    /// Schemes are tried in this order: app id/secret pair, static token,
    /// token exchange, basic auth.
    ///
    /// # Errors
    /// `InvalidConfiguration` when no scheme is configured or one is only
    /// partially configured.
    pub fn build_credentials(&self) -> Result<Credentials, STTError> {
        let auth = &self.auth;

        match (&auth.app_id, &auth.app_secret) {
            (Some(app_id), Some(app_secret)) => {
                return Ok(Credentials::app_secret(app_id.clone(), app_secret.clone()));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(STTError::InvalidConfiguration(
                    "app_id and app_secret must be set together".to_string(),
                ));
            }
            (None, None) => {}
        }

        if let Some(ref token) = auth.token {
            return Ok(Credentials::bearer(StaticToken::new(token.clone())));
        }

        match (&auth.token_url, &auth.api_key) {
            (Some(token_url), Some(api_key)) => {
                let mut generator = HttpTokenGenerator::new(token_url.clone(), api_key.clone())?;
                if let Some(ref grant_type) = auth.grant_type {
                    generator = generator.with_grant_type(grant_type.clone());
                }
                return Ok(Credentials::bearer(generator));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(STTError::InvalidConfiguration(
                    "token_url and api_key must be set together".to_string(),
                ));
            }
            (None, None) => {}
        }

        match (&auth.username, &auth.password) {
            (Some(username), Some(password)) => {
                Ok(Credentials::basic(username.clone(), password.clone()))
            }
            (Some(_), None) | (None, Some(_)) => Err(STTError::InvalidConfiguration(
                "username and password must be set together".to_string(),
            )),
            (None, None) => Err(STTError::InvalidConfiguration(
                "No credentials configured".to_string(),
            )),
        }
    }
}

/// Merge environment variables (base) with YAML overrides.
fn merge_config(yaml: Option<YamlConfig>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let env = env::EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();
    let server = yaml.server.unwrap_or_default();
    let recognition = yaml.recognition.unwrap_or_default();
    let auth = yaml.auth.unwrap_or_default();

    let mut session = SessionConfig::default();

    if let Some(endpoint) = server.endpoint.or(env.endpoint) {
        session.api_endpoint = endpoint;
    }
    session.system = server.system.or(env.system);
    if let Some(timeout) = server.inactivity_timeout.or(env.inactivity_timeout) {
        session.inactivity_timeout = timeout;
    }
    if let Some(timeout) = server.connect_timeout_seconds {
        session.connect_timeout_secs = timeout;
    }
    if let Some(insecure) = server.insecure_skip_verify.or(env.insecure_skip_verify) {
        session.certificate_validation_disabled = insecure;
    }

    session.audio_codec = recognition.audio_codec;
    if let Some(sample_rate) = recognition.sample_rate {
        session.sample_rate = sample_rate;
    }
    if let Some(frame_size) = recognition.frame_size {
        session.frame_size = frame_size;
    }
    if let Some(interim_results) = recognition.interim_results {
        session.interim_results = interim_results;
    }
    if let Some(continuous) = recognition.continuous {
        session.continuous = continuous;
    }
    if let Some(max_alternatives) = recognition.max_alternatives {
        session.max_alternatives = max_alternatives;
    }
    session.keywords_threshold = recognition.keywords_threshold;
    session.word_alternatives_threshold = recognition.word_alternatives_threshold;
    if let Some(timestamps) = recognition.timestamps {
        session.timestamps = timestamps;
    }
    if let Some(postprocessors) = recognition.postprocessors {
        session.postprocessors = postprocessors;
    }
    if let Some(end_of_stream) = recognition.end_of_stream {
        session.end_of_stream = end_of_stream;
    }
    if let Some(max_pending_bytes) = recognition.max_pending_bytes {
        session.max_pending_bytes = max_pending_bytes;
    }

    let settings = AuthSettings {
        token: auth.token.or(env.token),
        token_url: auth.token_url.or(env.token_url),
        api_key: auth.api_key.or(env.api_key),
        grant_type: auth.grant_type,
        app_id: auth.app_id.or(env.app_id),
        app_secret: auth.app_secret.or(env.app_secret),
        username: auth.username.or(env.username),
        password: auth.password.or(env.password),
    };

    Ok(ClientConfig {
        session,
        auth: settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "ASR_ENDPOINT",
        "ASR_SYSTEM",
        "ASR_APP_ID",
        "ASR_APP_SECRET",
        "ASR_TOKEN",
        "ASR_TOKEN_URL",
        "ASR_API_KEY",
        "ASR_BASIC_USERNAME",
        "ASR_BASIC_PASSWORD",
        "ASR_INACTIVITY_TIMEOUT",
        "ASR_INSECURE_SKIP_VERIFY",
    ];

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        for name in ENV_VARS {
            unsafe {
                env::remove_var(name);
            }
        }
    }

    fn write_config(dir: &TempDir, yaml: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        fs::write(&path, yaml).unwrap();
        path
    }

    /// Config with the given `(field, value)` auth settings.
    fn with_auth(fields: &[(&str, &str)]) -> ClientConfig {
        let mut config = ClientConfig::default();
        for (field, value) in fields {
            let value = Some(value.to_string());
            match *field {
                "token" => config.auth.token = value,
                "token_url" => config.auth.token_url = value,
                "api_key" => config.auth.api_key = value,
                "grant_type" => config.auth.grant_type = value,
                "app_id" => config.auth.app_id = value,
                "app_secret" => config.auth.app_secret = value,
                "username" => config.auth.username = value,
                "password" => config.auth.password = value,
                other => panic!("unknown auth field {other}"),
            }
        }
        config
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ClientConfig::from_env().unwrap();

        assert_eq!(config.session, SessionConfig::default());
        assert!(config.auth.token.is_none());
        assert!(config.build_credentials().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var("ASR_ENDPOINT", "https://asr.env.local/client/ws/speech");
            env::set_var("ASR_SYSTEM", "LVASR-ONLINE");
            env::set_var("ASR_INACTIVITY_TIMEOUT", "12");
            env::set_var("ASR_INSECURE_SKIP_VERIFY", "true");
            env::set_var("ASR_TOKEN", "env-token");
        }

        let config = ClientConfig::from_env().unwrap();

        assert_eq!(
            config.session.api_endpoint,
            "https://asr.env.local/client/ws/speech"
        );
        assert_eq!(config.session.system.as_deref(), Some("LVASR-ONLINE"));
        assert_eq!(config.session.inactivity_timeout, 12);
        assert!(config.session.certificate_validation_disabled);
        assert_eq!(config.auth.token.as_deref(), Some("env-token"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_timeout() {
        cleanup_env_vars();
        unsafe {
            env::set_var("ASR_INACTIVITY_TIMEOUT", "soon");
        }

        let result = ClientConfig::from_env();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid ASR_INACTIVITY_TIMEOUT")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("ASR_ENDPOINT", "https://env.local/speech");
            env::set_var("ASR_SYSTEM", "ENV-SYSTEM");
            env::set_var("ASR_TOKEN", "env-token");
        }

        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            r#"
server:
  endpoint: "https://yaml.local/speech"

recognition:
  max_alternatives: 5
  postprocessors: ["numbers"]

auth:
  token: "yaml-token"
"#,
        );

        let config = ClientConfig::from_file(&path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.session.api_endpoint, "https://yaml.local/speech");
        assert_eq!(config.auth.token.as_deref(), Some("yaml-token"));
        // ENV fills what YAML leaves out
        assert_eq!(config.session.system.as_deref(), Some("ENV-SYSTEM"));
        // YAML only
        assert_eq!(config.session.max_alternatives, 5);
        assert_eq!(config.session.postprocessors, vec!["numbers".to_string()]);
        // Defaults
        assert_eq!(config.session.sample_rate, 16000);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = ClientConfig::from_file(&PathBuf::from("/nonexistent/config.yaml"));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_session() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "recognition:\n  sample_rate: 0\n");

        let result = ClientConfig::from_file(&path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid configuration")
        );
    }

    #[test]
    fn test_build_credentials_app_secret_wins() {
        let config = with_auth(&[("app_id", "app"), ("app_secret", "secret"), ("token", "t")]);
        assert_eq!(config.build_credentials().unwrap().kind(), "app_secret");
    }

    #[test]
    fn test_build_credentials_static_token() {
        let config = with_auth(&[("token", "token")]);
        assert_eq!(config.build_credentials().unwrap().kind(), "bearer");
    }

    #[test]
    fn test_build_credentials_token_exchange() {
        let config = with_auth(&[
            ("token_url", "https://auth.local/token"),
            ("api_key", "key"),
            ("grant_type", "client_credentials"),
        ]);
        assert_eq!(config.build_credentials().unwrap().kind(), "bearer");
    }

    #[test]
    fn test_build_credentials_basic() {
        let config = with_auth(&[("username", "user"), ("password", "pass")]);
        assert_eq!(config.build_credentials().unwrap().kind(), "basic");
    }

    #[test]
    fn test_build_credentials_partial_pairs() {
        for field in ["app_id", "app_secret", "token_url", "api_key", "username", "password"] {
            let result = with_auth(&[(field, "value")]).build_credentials();
            assert!(
                matches!(result, Err(STTError::InvalidConfiguration(_))),
                "{field} alone should be rejected"
            );
        }
    }

    #[test]
    fn test_build_credentials_none() {
        let result = with_auth(&[]).build_credentials();
        assert_eq!(
            result.unwrap_err(),
            STTError::InvalidConfiguration("No credentials configured".to_string())
        );
    }

    #[test]
    fn test_auth_settings_debug_redacts_secrets() {
        let config = with_auth(&[
            ("token", "super-secret-token"),
            ("app_id", "visible-app"),
            ("app_secret", "super-secret-key"),
        ]);

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("visible-app"));
        assert!(debug.contains("[REDACTED]"));
    }
}
