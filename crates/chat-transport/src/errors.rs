use std::fmt;
use std::time::Duration;

/// Where a transport-level failure happened.
///
/// Only used for diagnostics: both stages terminate a stream the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureStage {
    /// The request never produced a usable response.
    Connect,
    /// The response body failed while being read.
    Read,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Read => f.write_str("read"),
        }
    }
}

/// Terminal failure of a chat stream.
///
/// Every stream ends with exactly one terminal item; when it is not a
/// `done` chunk it is one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum StreamFailure {
    /// The request never got a successful response, or the body broke off.
    #[error("connection failure ({stage}): {message}")]
    Connect {
        stage: FailureStage,
        message: String,
        status_code: Option<u16>,
    },
    /// A frame payload could not be decoded as a chat chunk.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
    /// No frame arrived within the idle window.
    #[error("stream idle for more than {}s", idle.as_secs())]
    IdleTimeout { idle: Duration },
    /// The caller raised the cancellation signal.
    #[error("stream cancelled")]
    Cancelled,
    /// The server sent a chunk carrying an explicit error.
    #[error("upstream error: {message}")]
    Upstream { message: String },
}

impl StreamFailure {
    pub(crate) fn connect(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Connect {
            stage: FailureStage::Connect,
            message: message.into(),
            status_code,
        }
    }

    pub(crate) fn read(message: impl Into<String>) -> Self {
        Self::Connect {
            stage: FailureStage::Read,
            message: message.into(),
            status_code: None,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Protocol { .. } => "protocol",
            Self::IdleTimeout { .. } => "idle_timeout",
            Self::Cancelled => "cancelled",
            Self::Upstream { .. } => "upstream",
        }
    }

    /// HTTP status of a rejected request, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Connect { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

/// Errors from configuration and the plain request/response endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Invalid transport configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The request failed or returned a non-success status.
    #[error("request to {url} failed: {message}")]
    Request {
        url: String,
        message: String,
        status_code: Option<u16>,
    },
    /// The response body did not have the expected shape.
    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Extracts a human readable message from an error response body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and the
/// `{"detail": ..}` shape common to Python gateways, and otherwise falls back
/// to the raw body or the status' canonical reason.
pub(crate) fn error_message_from_body(status: reqwest::StatusCode, body: &str) -> String {
    let fallback = || {
        let reason = status.canonical_reason().unwrap_or("request failed");
        format!("HTTP {} {reason}", status.as_u16())
    };
    let body = body.trim();
    if body.is_empty() {
        return fallback();
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return format!("HTTP {}: {body}", status.as_u16());
    };
    let message = value
        .get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|v| v.as_str())
        .or_else(|| value.get("detail").and_then(|v| v.as_str()))
        .or_else(|| value.get("message").and_then(|v| v.as_str()));
    match message {
        Some(message) if !message.trim().is_empty() => {
            format!("HTTP {}: {message}", status.as_u16())
        }
        _ => format!("HTTP {}: {body}", status.as_u16()),
    }
}
