use std::time::Duration;

pub const DEMO_KEY: &str = "DEMO_KEY";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

/// Runtime configuration, read from the environment (and `.env` via dotenv).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    /// `None` keeps the generation call unbounded.
    pub generation_timeout: Option<Duration>,
    pub max_upload_bytes: usize,
    /// Sessions untouched for this long are torn down. `None` disables the
    /// sweep.
    pub session_idle: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: get("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
            api_key: get("GEMINI_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .unwrap_or_else(|| DEMO_KEY.into()),
            api_base: get("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            generation_timeout: get("GENERATION_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            max_upload_bytes: get("MAX_UPLOAD_BYTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024),
            session_idle: match get("SESSION_IDLE_SECS").and_then(|v| v.parse::<u64>().ok()) {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => Some(DEFAULT_SESSION_IDLE),
            },
        }
    }

    pub fn is_demo(&self) -> bool {
        self.api_key == DEMO_KEY
    }

    /// First few characters of the key, for startup logging.
    pub fn key_preview(&self) -> String {
        self.api_key.chars().take(10).collect()
    }
}
