use std::env;

/// Settings read from `ASR_*` environment variables
///
/// `.env` files are loaded into the process environment by `main` before
/// this runs, so real environment variables win over `.env` values.
#[derive(Debug, Default)]
pub(super) struct EnvConfig {
    pub endpoint: Option<String>,
    pub system: Option<String>,
    pub inactivity_timeout: Option<u32>,
    pub insecure_skip_verify: Option<bool>,
    pub token: Option<String>,
    pub token_url: Option<String>,
    pub api_key: Option<String>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl EnvConfig {
    pub(super) fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            endpoint: var("ASR_ENDPOINT"),
            system: var("ASR_SYSTEM"),
            inactivity_timeout: var("ASR_INACTIVITY_TIMEOUT")
                .map(|v| {
                    v.parse::<u32>()
                        .map_err(|e| format!("Invalid ASR_INACTIVITY_TIMEOUT value '{v}': {e}"))
                })
                .transpose()?,
            insecure_skip_verify: var("ASR_INSECURE_SKIP_VERIFY")
                .map(|v| {
                    parse_bool(&v)
                        .ok_or_else(|| format!("Invalid ASR_INSECURE_SKIP_VERIFY value '{v}'"))
                })
                .transpose()?,
            token: var("ASR_TOKEN"),
            token_url: var("ASR_TOKEN_URL"),
            api_key: var("ASR_API_KEY"),
            app_id: var("ASR_APP_ID"),
            app_secret: var("ASR_APP_SECRET"),
            username: var("ASR_BASIC_USERNAME"),
            password: var("ASR_BASIC_PASSWORD"),
        })
    }
}

/// Non-empty value of an environment variable.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub(super) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
