//! Streaming chat transport.
//!
//! Turns a long-lived chunked HTTP response carrying server-sent events into a
//! lazy, cancellable sequence of [`ChatChunk`]s that terminates exactly once.
//!
//! ```no_run
//! use chat_transport::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), TransportError> {
//! let client = ChatClient::new(TransportConfig::from_env()?)?;
//! let abort = AbortHandle::new();
//! let mut stream = client.open(&StreamRequest::new("hello", "bot"), abort.signal());
//!
//! while let Some(item) = stream.next_chunk().await {
//!     match item {
//!         Ok(chunk) => print!("{}", chunk.delta()),
//!         Err(failure) => eprintln!("stream failed: {failure}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Wire chunk type and frame payload classification.
pub mod chunk;
/// HTTP client owning the connection pool.
pub mod client;
/// Transport configuration.
pub mod config;
/// Agent directory and history endpoints.
pub mod directory;
/// Failure taxonomy.
pub mod errors;
/// Server-sent-events frame decoder.
pub mod frame;
/// Common imports for typical usage.
pub mod prelude;
/// Outgoing request body.
pub mod request;
/// The chunk stream and its cancellation handle.
pub mod stream;

pub use chunk::{ChatChunk, FrameMode, FramePayload, classify};
pub use client::ChatClient;
pub use config::{DEFAULT_API_BASE, DEFAULT_IDLE_TIMEOUT, TransportConfig};
pub use directory::HistoryRecord;
pub use errors::{FailureStage, StreamFailure, TransportError};
pub use frame::{Frame, FrameDecoder};
pub use request::StreamRequest;
pub use stream::{AbortHandle, AbortSignal, ChatStream, StreamItem, StreamState};
