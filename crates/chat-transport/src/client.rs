use futures::TryStreamExt as _;
use tracing::debug;

use crate::config::TransportConfig;
use crate::errors::{StreamFailure, TransportError, error_message_from_body};
use crate::request::StreamRequest;
use crate::stream::{AbortSignal, ByteStream, ChatStream, ConnectFuture};

/// HTTP client for the chat service.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone, Debug)]
pub struct ChatClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: TransportConfig,
}

impl ChatClient {
    /// Creates a client from an explicit configuration.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Opens a chat stream against the configured send endpoint.
    pub fn open(&self, request: &StreamRequest, signal: AbortSignal) -> ChatStream {
        self.open_at(&self.config.send_url(), request, signal)
    }

    /// Opens a chat stream against an explicit endpoint URL.
    ///
    /// Nothing is sent until the returned stream is first polled.
    pub fn open_at(&self, endpoint: &str, request: &StreamRequest, signal: AbortSignal) -> ChatStream {
        debug!(endpoint, recipient = request.recipient(), "opening chat stream");
        let connect = self.connect(endpoint.to_string(), request.to_payload());
        ChatStream::connecting(connect, signal, self.config.idle_timeout, self.config.frame_mode)
    }

    fn connect(&self, url: String, payload: serde_json::Value) -> ConnectFuture {
        let http = self.http.clone();
        Box::pin(async move {
            let response = http
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| StreamFailure::connect(format!("request to {url} failed: {e}"), None))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(StreamFailure::connect(
                    error_message_from_body(status, &body),
                    Some(status.as_u16()),
                ));
            }

            let body: ByteStream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
            Ok(body)
        })
    }
}
