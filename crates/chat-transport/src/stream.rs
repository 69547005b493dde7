use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chunk::{ChatChunk, FrameMode, classify};
use crate::errors::StreamFailure;
use crate::frame::{Frame, FrameDecoder};

pub(crate) type ByteStream =
    Pin<Box<dyn futures::Stream<Item = io::Result<Bytes>> + Send + 'static>>;
pub(crate) type ConnectFuture =
    Pin<Box<dyn Future<Output = Result<ByteStream, StreamFailure>> + Send + 'static>>;

/// Item produced by a [`ChatStream`].
pub type StreamItem = Result<ChatChunk, StreamFailure>;

/// Lifecycle of a single exchange. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    Closed,
}

/// Handle used to cancel a stream from the outside.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Requests cancellation.
    ///
    /// Streams observe it at their next suspension point and close with
    /// [`StreamFailure::Cancelled`].
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// A signal observing this handle.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of an [`AbortHandle`].
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is raised. Never resolves if every handle is
    /// dropped without aborting.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Lazy, cancellable sequence of chat chunks for one request.
///
/// The request is sent on the first call to [`ChatStream::next_chunk`].
/// Every stream yields exactly one terminal item, either a chunk with
/// `done = true` or a single [`StreamFailure`], and `None` afterwards.
pub struct ChatStream {
    stream_id: uuid::Uuid,
    state: StreamState,
    connect: Option<ConnectFuture>,
    body: Option<ByteStream>,
    decoder: FrameDecoder,
    queue: VecDeque<StreamItem>,
    signal: AbortSignal,
    idle: Duration,
    deadline: Instant,
    mode: FrameMode,
    frames: u64,
}

impl ChatStream {
    pub(crate) fn connecting(
        connect: ConnectFuture,
        signal: AbortSignal,
        idle: Duration,
        mode: FrameMode,
    ) -> Self {
        Self::with_parts(Some(connect), signal, idle, mode)
    }

    /// A stream whose response headers have already been received.
    pub(crate) fn streaming(
        body: ByteStream,
        signal: AbortSignal,
        idle: Duration,
        mode: FrameMode,
    ) -> Self {
        let mut stream = Self::with_parts(None, signal, idle, mode);
        stream.start_streaming(body);
        stream
    }

    fn with_parts(
        connect: Option<ConnectFuture>,
        signal: AbortSignal,
        idle: Duration,
        mode: FrameMode,
    ) -> Self {
        Self {
            stream_id: uuid::Uuid::new_v4(),
            state: StreamState::Connecting,
            connect,
            body: None,
            decoder: FrameDecoder::default(),
            queue: VecDeque::new(),
            signal,
            idle,
            deadline: Instant::now() + idle,
            mode,
            frames: 0,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.stream_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether the stream still owns a pending request or an open response.
    pub fn holds_connection(&self) -> bool {
        self.connect.is_some() || self.body.is_some()
    }

    /// Waits for the next item.
    ///
    /// Returns `None` once the terminal item has been yielded.
    pub async fn next_chunk(&mut self) -> Option<StreamItem> {
        if self.state != StreamState::Closed && self.signal.is_aborted() {
            self.queue.clear();
            self.close(Err(StreamFailure::Cancelled));
        }
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Some(item);
            }
            match self.state {
                StreamState::Closed => return None,
                StreamState::Connecting => self.await_response().await,
                StreamState::Streaming => self.read_body().await,
            }
        }
    }

    /// Adapts the stream to [`futures::Stream`].
    pub fn into_stream(self) -> impl futures::Stream<Item = StreamItem> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_chunk().await.map(|item| (item, stream))
        })
    }

    async fn await_response(&mut self) {
        let Some(connect) = self.connect.take() else {
            self.close(Err(StreamFailure::connect("request was never issued", None)));
            return;
        };
        debug!(stream_id = %self.stream_id, "awaiting response headers");

        let deadline = Instant::now() + self.idle;
        let outcome = tokio::select! {
            biased;
            _ = self.signal.aborted() => None,
            response = tokio::time::timeout_at(deadline, connect) => Some(response),
        };
        match outcome {
            None => self.close(Err(StreamFailure::Cancelled)),
            Some(Ok(Ok(body))) => self.start_streaming(body),
            Some(Ok(Err(failure))) => self.close(Err(failure)),
            Some(Err(_elapsed)) => self.close(Err(StreamFailure::connect(
                format!("no response within {}s", self.idle.as_secs()),
                None,
            ))),
        };
    }

    fn start_streaming(&mut self, body: ByteStream) {
        self.body = Some(body);
        self.state = StreamState::Streaming;
        self.deadline = Instant::now() + self.idle;
        info!(stream_id = %self.stream_id, "stream open");
    }

    async fn read_body(&mut self) {
        let deadline = self.deadline;
        let Some(body) = self.body.as_mut() else {
            self.close(Err(StreamFailure::read("response body missing")));
            return;
        };
        let outcome = tokio::select! {
            biased;
            _ = self.signal.aborted() => None,
            next = tokio::time::timeout_at(deadline, body.next()) => Some(next),
        };

        match outcome {
            None => {
                self.queue.clear();
                self.close(Err(StreamFailure::Cancelled));
            }
            Some(Err(_elapsed)) => {
                self.close(Err(StreamFailure::IdleTimeout { idle: self.idle }));
            }
            Some(Ok(Some(Ok(bytes)))) => {
                for frame in self.decoder.push_chunk(&bytes) {
                    self.handle_frame(frame);
                }
            }
            Some(Ok(Some(Err(e)))) => {
                self.close(Err(StreamFailure::read(format!("stream read failed: {e}"))));
            }
            Some(Ok(None)) => {
                if self.decoder.has_pending() {
                    debug!(stream_id = %self.stream_id, "discarding incomplete trailing frame");
                }
                self.close(Ok(ChatChunk::done()));
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        if self.state == StreamState::Closed {
            debug!(stream_id = %self.stream_id, "dropping frame after close");
            return;
        }
        let item = classify(&frame.data, self.mode).and_then(|p| p.into_chunk().into_result());
        match item {
            Ok(chunk) => {
                self.frames += 1;
                self.deadline = Instant::now() + self.idle;
                if chunk.is_done() {
                    self.close(Ok(chunk));
                } else {
                    self.queue.push_back(Ok(chunk));
                }
            }
            Err(failure) => {
                self.close(Err(failure));
            }
        }
    }

    /// Moves to `Closed` and queues the terminal item. Only the first call
    /// has any effect.
    fn close(&mut self, terminal: StreamItem) {
        if self.state == StreamState::Closed {
            debug!(stream_id = %self.stream_id, "ignoring completion after close");
            return;
        }
        self.state = StreamState::Closed;
        self.connect = None;
        self.body = None;

        match &terminal {
            Ok(_) => info!(stream_id = %self.stream_id, frames = self.frames, "stream completed"),
            Err(StreamFailure::Cancelled) => {
                info!(stream_id = %self.stream_id, frames = self.frames, "stream cancelled")
            }
            Err(failure) => warn!(
                stream_id = %self.stream_id,
                frames = self.frames,
                kind = failure.kind(),
                error = %failure,
                "stream failed"
            ),
        }
        self.queue.push_back(terminal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, stream};

    fn body_of(parts: Vec<io::Result<&'static str>>) -> ByteStream {
        Box::pin(stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(|s| Bytes::from_static(s.as_bytes())))
                .collect::<Vec<_>>(),
        ))
    }

    fn stalled_after(parts: Vec<&'static str>) -> ByteStream {
        Box::pin(
            stream::iter(
                parts
                    .into_iter()
                    .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                    .collect::<Vec<_>>(),
            )
            .chain(stream::pending()),
        )
    }

    async fn drain(stream: &mut ChatStream) -> Vec<StreamItem> {
        let mut out = Vec::new();
        while let Some(item) = stream.next_chunk().await {
            out.push(item);
        }
        out
    }

    fn open(body: ByteStream) -> ChatStream {
        ChatStream::streaming(body, AbortSignal::never(), Duration::from_secs(90), FrameMode::Auto)
    }

    #[tokio::test]
    async fn yields_chunks_then_done_exactly_once() {
        let mut stream = open(body_of(vec![
            Ok("data: {\"data\":\"He\"}\n\ndata: {\"da"),
            Ok("ta\":\"llo\"}\n\n"),
            Ok("data: {\"data\":\"\",\"done\":true}\n\n"),
        ]));

        let items = drain(&mut stream).await;
        assert_eq!(
            items,
            vec![
                Ok(ChatChunk { data: Some("He".into()), ..ChatChunk::default() }),
                Ok(ChatChunk { data: Some("llo".into()), ..ChatChunk::default() }),
                Ok(ChatChunk { data: Some(String::new()), done: Some(true), error: None }),
            ]
        );
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(!stream.holds_connection());
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn frames_after_done_are_discarded() {
        let mut stream = open(body_of(vec![Ok(
            "data: {\"done\":true}\n\ndata: late\n\n",
        )]));
        let items = drain(&mut stream).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Ok(chunk) if chunk.is_done()));
    }

    #[tokio::test]
    async fn body_end_without_done_synthesizes_done() {
        let mut stream = open(body_of(vec![Ok("data: raw text\n\ndata: partial")]));
        let items = drain(&mut stream).await;
        assert_eq!(items, vec![Ok(ChatChunk::text("raw text")), Ok(ChatChunk::done())]);
    }

    #[tokio::test]
    async fn malformed_chunk_is_terminal_protocol_failure() {
        let mut stream = open(body_of(vec![Ok(
            "data: ok\n\ndata: {\"done\":\"yes\"}\n\ndata: never\n\n",
        )]));
        let items = drain(&mut stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(ChatChunk::text("ok")));
        assert!(matches!(items[1], Err(StreamFailure::Protocol { .. })));
    }

    #[tokio::test]
    async fn error_chunk_becomes_upstream_failure() {
        let mut stream = open(body_of(vec![Ok("data: {\"error\":\"model crashed\"}\n\n")]));
        let items = drain(&mut stream).await;
        assert_eq!(
            items,
            vec![Err(StreamFailure::Upstream { message: "model crashed".into() })]
        );
    }

    #[tokio::test]
    async fn read_error_is_terminal() {
        let mut stream = open(body_of(vec![
            Ok("data: a\n\n"),
            Err(io::Error::other("connection reset")),
            Ok("data: b\n\n"),
        ]));
        let items = drain(&mut stream).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(
            &items[1],
            Err(StreamFailure::Connect { stage: crate::FailureStage::Read, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_window_closes_a_stalled_stream() {
        let mut stream = open(stalled_after(vec!["data: first\n\n"]));
        let started = Instant::now();

        assert_eq!(stream.next_chunk().await, Some(Ok(ChatChunk::text("first"))));
        let last = stream.next_chunk().await;
        assert_eq!(
            last,
            Some(Err(StreamFailure::IdleTimeout { idle: Duration::from_secs(90) }))
        );
        assert!(started.elapsed() >= Duration::from_secs(90));
        assert!(!stream.holds_connection());
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_window_is_measured_from_last_frame() {
        let body: ByteStream = Box::pin(stream::unfold(0u8, |step| async move {
            match step {
                0 => Some((Ok(Bytes::from_static(b"data: a\n\n")), 1)),
                1 => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Some((Ok(Bytes::from_static(b"data: b\n\n")), 2))
                }
                2 => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Some((Ok(Bytes::from_static(b"data: c\n\n")), 3))
                }
                _ => None,
            }
        }));
        let mut stream = open(body);
        let items = drain(&mut stream).await;
        assert_eq!(
            items,
            vec![
                Ok(ChatChunk::text("a")),
                Ok(ChatChunk::text("b")),
                Ok(ChatChunk::text("c")),
                Ok(ChatChunk::done()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bytes_without_frames_do_not_reset_idle_window() {
        let body: ByteStream = Box::pin(stream::unfold(0u8, |step| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Some((Ok(Bytes::from_static(b": ping\n")), step.wrapping_add(1)))
        }));
        let mut stream = open(body);
        let started = Instant::now();
        let items = drain(&mut stream).await;
        assert!(matches!(items.as_slice(), [Err(StreamFailure::IdleTimeout { .. })]));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(90) && waited < Duration::from_secs(120));
    }

    #[tokio::test]
    async fn cancellation_stops_a_pending_read() {
        let handle = AbortHandle::new();
        let mut stream = ChatStream::streaming(
            stalled_after(vec!["data: one\n\n"]),
            handle.signal(),
            Duration::from_secs(90),
            FrameMode::Auto,
        );
        assert_eq!(stream.next_chunk().await, Some(Ok(ChatChunk::text("one"))));

        let aborter = handle.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            aborter.abort();
        });
        assert_eq!(stream.next_chunk().await, Some(Err(StreamFailure::Cancelled)));
        assert!(!stream.holds_connection());
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_discards_queued_chunks() {
        let handle = AbortHandle::new();
        let mut stream = ChatStream::streaming(
            stalled_after(vec!["data: one\n\ndata: two\n\ndata: three\n\n"]),
            handle.signal(),
            Duration::from_secs(90),
            FrameMode::Auto,
        );
        assert_eq!(stream.next_chunk().await, Some(Ok(ChatChunk::text("one"))));
        handle.abort();
        assert_eq!(drain(&mut stream).await, vec![Err(StreamFailure::Cancelled)]);
    }

    #[tokio::test]
    async fn cancel_after_done_is_a_no_op() {
        let handle = AbortHandle::new();
        let mut stream = ChatStream::streaming(
            body_of(vec![Ok("data: {\"data\":\"x\",\"done\":true}\n\n")]),
            handle.signal(),
            Duration::from_secs(90),
            FrameMode::Auto,
        );
        let first = stream.next_chunk().await;
        handle.abort();
        assert!(matches!(first, Some(Ok(ref chunk)) if chunk.is_done()));
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn connect_phase_honours_cancellation() {
        let handle = AbortHandle::new();
        handle.abort();
        let mut stream = ChatStream::connecting(
            Box::pin(futures::future::pending()),
            handle.signal(),
            Duration::from_secs(90),
            FrameMode::Auto,
        );
        assert_eq!(stream.state(), StreamState::Connecting);
        assert_eq!(drain(&mut stream).await, vec![Err(StreamFailure::Cancelled)]);
        assert!(!stream.holds_connection());
    }

    #[tokio::test]
    async fn connect_failure_is_the_only_item() {
        let mut stream = ChatStream::connecting(
            Box::pin(async { Err(StreamFailure::connect("refused", None)) }),
            AbortSignal::never(),
            Duration::from_secs(90),
            FrameMode::Auto,
        );
        let items = drain(&mut stream).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            Err(StreamFailure::Connect { stage: crate::FailureStage::Connect, .. })
        ));
    }

    #[tokio::test]
    async fn into_stream_preserves_items() {
        let stream = open(body_of(vec![Ok("data: a\n\ndata: [DONE]\n\n")]));
        let items: Vec<StreamItem> = stream.into_stream().collect().await;
        assert_eq!(items, vec![Ok(ChatChunk::text("a")), Ok(ChatChunk::done())]);
    }
}
