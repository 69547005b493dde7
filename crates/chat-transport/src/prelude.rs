//! Common imports for typical transport usage.

pub use crate::{
    AbortHandle, AbortSignal, ChatChunk, ChatClient, ChatStream, StreamFailure, StreamRequest,
    TransportConfig, TransportError,
};
