//! SSE frame decoder: raw byte chunks in, ordered [`StreamEvent`]s out.
//!
//! Chunk boundaries are arbitrary. A multi-byte character split across two
//! chunks is held back until its remaining bytes arrive, and a line is only
//! parsed once its terminating `\n` has been seen. Whatever is left unterminated
//! when the stream ends is dropped.

use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::client::ClientError;
use crate::messages::StreamEvent;

/// Marker that starts every event line.
pub const EVENT_PREFIX: &str = "data:";

/// Incremental UTF-8 decoder. Invalid sequences become U+FFFD; an incomplete
/// trailing sequence is kept for the next call.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, prefixed by any bytes held back from the previous call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[..valid]) {
                        out.push_str(text);
                    }
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes currently held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Parse one complete line. `None` for non-event lines and malformed payloads.
pub fn parse_event_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(EVENT_PREFIX)?.trim();
    if payload.is_empty() {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "dropping undecodable frame");
            return None;
        }
    };
    match StreamEvent::from_json(&value) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed frame");
            None
        }
    }
}

/// Rolling line buffer over a chunked byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    utf8: Utf8Accumulator,
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if chunk.is_empty() {
            return Vec::new();
        }
        let text = self.utf8.decode(chunk);
        self.buffer.push_str(&text);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        complete.lines().filter_map(parse_event_line).collect()
    }

    /// End of stream. Any unterminated fragment is discarded, never parsed.
    pub fn finish(&mut self) {
        let leftover = self.buffer.len() + self.utf8.pending_len();
        if leftover > 0 {
            tracing::debug!(bytes = leftover, "discarding unterminated trailing fragment");
        }
        self.buffer.clear();
        self.utf8 = Utf8Accumulator::new();
    }

    /// Text received but not yet terminated by a newline.
    #[cfg(test)]
    fn buffered(&self) -> &str {
        &self.buffer
    }
}

/// Lazy, forward-only sequence of decoded events.
pub type EventStream = BoxStream<'static, Result<StreamEvent, ClientError>>;

struct DecodeState<S> {
    source: S,
    decoder: FrameDecoder,
    ready: VecDeque<StreamEvent>,
    ended: bool,
}

/// Wrap a byte-chunk source in a [`FrameDecoder`]. A transport error is
/// yielded once, after every event decoded before it, and ends the stream.
pub fn decode_stream<S>(source: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, ClientError>> + Send + Unpin + 'static,
{
    let state = DecodeState {
        source,
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        ended: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.ended {
                return None;
            }
            match state.source.next().await {
                Some(Ok(chunk)) => state.ready.extend(state.decoder.push(&chunk)),
                Some(Err(e)) => {
                    state.ended = true;
                    state.decoder.finish();
                    return Some((Err(e), state));
                }
                None => {
                    state.ended = true;
                    state.decoder.finish();
                }
            }
        }
    })
    .boxed()
}
