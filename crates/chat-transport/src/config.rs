use std::time::Duration;

use tracing::warn;

use crate::chunk::FrameMode;
use crate::errors::TransportError;

/// Base URL used when `CHAT_API_BASE` is not set.
pub const DEFAULT_API_BASE: &str = "http://localhost:8006";
/// Longest tolerated gap between two frames of a stream.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Configuration for [`crate::ChatClient`], resolved once by the host.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Base URL of the chat service, without a trailing slash.
    pub base_url: String,
    /// Path of the streaming send endpoint.
    pub send_path: String,
    /// Path of the agent directory endpoint.
    pub agents_path: String,
    /// Path prefix of the history endpoint; the agent id is appended.
    pub history_path: String,
    /// Maximum gap between frames before a stream closes itself.
    pub idle_timeout: Duration,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Optional whole-request timeout. Unset by default since streams are
    /// long-lived.
    pub request_timeout: Option<Duration>,
    /// How frame payloads are interpreted.
    pub frame_mode: FrameMode,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base(base_url.into()),
            send_path: "/api/chat/send".to_string(),
            agents_path: "/api/chat/agents".to_string(),
            history_path: "/api/chat/messages".to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            frame_mode: FrameMode::Auto,
        }
    }

    /// Builds a config from the process environment.
    ///
    /// - `CHAT_API_BASE`: service base URL (default `http://localhost:8006`).
    /// - `CHAT_IDLE_TIMEOUT_SECS`: idle window in seconds (default 90).
    pub fn from_env() -> Result<Self, TransportError> {
        let base = std::env::var("CHAT_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let mut config = Self::new(base.trim());
        if let Ok(raw) = std::env::var("CHAT_IDLE_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                TransportError::Config(format!("CHAT_IDLE_TIMEOUT_SECS must be an integer, got {raw:?}"))
            })?;
            config = config.idle_timeout(Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }

    /// Replaces only the hostname of the base URL, keeping scheme and port.
    ///
    /// An unparsable base URL is left as it is.
    pub fn with_host(mut self, host: &str) -> Self {
        match reqwest::Url::parse(&self.base_url) {
            Ok(mut url) => {
                if url.set_host(Some(host)).is_ok() {
                    self.base_url = normalize_base(url.to_string());
                } else {
                    warn!(base_url = %self.base_url, host, "cannot apply host override");
                }
            }
            Err(e) => warn!(base_url = %self.base_url, error = %e, "invalid API base URL"),
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base(base_url.into());
        self
    }

    pub fn idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn frame_mode(mut self, mode: FrameMode) -> Self {
        self.frame_mode = mode;
        self
    }

    /// Checks the config before a client is built from it.
    pub fn validate(&self) -> Result<(), TransportError> {
        reqwest::Url::parse(&self.base_url).map_err(|e| {
            TransportError::Config(format!("invalid base URL {:?}: {e}", self.base_url))
        })?;
        if self.idle_timeout.is_zero() {
            return Err(TransportError::Config(
                "idle timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn send_url(&self) -> String {
        self.url_for(&self.send_path)
    }

    pub fn agents_url(&self) -> String {
        self.url_for(&self.agents_path)
    }

    pub fn history_url(&self, agent: &str) -> String {
        format!(
            "{}/{}",
            self.url_for(&self.history_path).trim_end_matches('/'),
            urlencoding::encode(agent)
        )
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn normalize_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_trailing_slash() {
        let config = TransportConfig::new("http://example.test:8006/");
        assert_eq!(config.base_url, "http://example.test:8006");
        assert_eq!(config.send_url(), "http://example.test:8006/api/chat/send");
        assert_eq!(config.agents_url(), "http://example.test:8006/api/chat/agents");
    }

    #[test]
    fn history_url_encodes_agent() {
        let config = TransportConfig::new("http://h:1");
        assert_eq!(config.history_url("bot"), "http://h:1/api/chat/messages/bot");
        assert_eq!(
            config.history_url("my agent/2"),
            "http://h:1/api/chat/messages/my%20agent%2F2"
        );
    }

    #[test]
    fn host_override_keeps_scheme_and_port() {
        let config = TransportConfig::new("https://localhost:8006").with_host("192.168.1.20");
        assert_eq!(config.base_url, "https://192.168.1.20:8006");
    }

    #[test]
    fn host_override_ignores_invalid_base() {
        let config = TransportConfig::new("not a url").with_host("example.test");
        assert_eq!(config.base_url, "not a url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_idle_timeout_is_rejected() {
        let config = TransportConfig::default().idle_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(TransportError::Config(_))));
    }

    #[test]
    fn defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.frame_mode, FrameMode::Auto);
        assert!(config.request_timeout.is_none());
    }
}
