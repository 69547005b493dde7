//! Incremental server-sent-events frame decoder.
//!
//! Bytes are buffered until a full line is available, so reads may split a
//! frame (or a multi-byte character) anywhere without corrupting the output.
//! Only the in-flight partial line and the frame being assembled are kept.

/// One dispatched event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Value of the last `event:` field, if any.
    pub event: Option<String>,
    /// Value of the last `id:` field, if any.
    pub id: Option<String>,
    /// All `data:` lines of the frame joined by `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl PendingFrame {
    fn take(&mut self) -> Option<Frame> {
        let pending = std::mem::take(self);
        if pending.data.is_empty() {
            return None;
        }
        Some(Frame {
            event: pending.event,
            id: pending.id,
            data: pending.data.join("\n"),
        })
    }
}

/// Splits an arbitrarily chunked byte stream into [`Frame`]s.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    pending: PendingFrame,
    dispatched: u64,
}

impl FrameDecoder {
    /// Feeds one read into the decoder, calling `on_frame` synchronously for
    /// every frame completed by it, in arrival order.
    pub fn feed(&mut self, chunk: &[u8], mut on_frame: impl FnMut(Frame)) {
        self.buf.extend_from_slice(chunk);

        let mut start = 0;
        while let Some((end, next)) = find_line_end(&self.buf[start..]) {
            let line_end = start + end;
            let line = String::from_utf8_lossy(&self.buf[start..line_end]).into_owned();
            start += next;
            if let Some(frame) = self.process_line(&line) {
                self.dispatched += 1;
                on_frame(frame);
            }
        }
        self.buf.drain(..start);
    }

    /// Collecting variant of [`FrameDecoder::feed`].
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.feed(chunk, |frame| frames.push(frame));
        frames
    }

    /// Whether a partial line or an undispatched frame is buffered.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
            || !self.pending.data.is_empty()
            || self.pending.event.is_some()
            || self.pending.id.is_some()
    }

    /// Number of frames dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.pending.take();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.pending.data.push(value.to_string()),
            "event" => self.pending.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.pending.id = Some(value.to_string()),
            _ => {}
        }
        None
    }
}

/// Finds the end of the first complete line in `buf`.
///
/// Returns the index where the line's content ends and the index where the
/// next line starts. A lone `\r` at the very end of the buffer is not treated
/// as a terminator yet, since the next read may continue it with `\n`.
fn find_line_end(buf: &[u8]) -> Option<(usize, usize)> {
    let pos = buf.iter().position(|b| *b == b'\n' || *b == b'\r')?;
    if buf[pos] == b'\n' {
        return Some((pos, pos + 1));
    }
    match buf.get(pos + 1) {
        Some(b'\n') => Some((pos, pos + 2)),
        Some(_) => Some((pos, pos + 1)),
        None => None,
    }
}
