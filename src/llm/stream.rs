//! Streaming response decoding.
//!
//! Providers answer a streaming request with server-sent-event style lines:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hi"}}]}
//!
//! data: [DONE]
//! ```
//!
//! [`FrameDecoder`] turns arbitrary byte reads into complete `data: ` payloads,
//! and [`decode_stream`] drives it over a byte stream, parses each payload as
//! JSON and hands the extracted text to a [`ChunkSink`].

use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use super::ChunkSink;
use crate::error::TransportError;

const DATA_PREFIX: &str = "data: ";

/// Payload that marks the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental line splitter for SSE frames.
///
/// Bytes are buffered until a `\n` arrives, so a frame (or a multi-byte
/// character) split across reads is reassembled before it is decoded.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes, returning the payloads of every
    /// `data: ` line completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if let Some(payload) = frame_payload(&self.buffer[start..end]) {
                payloads.push(payload);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        payloads
    }

    /// Flush a final line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        frame_payload(&rest)
    }

    /// Number of bytes waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn frame_payload(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    text.trim_end_matches('\r')
        .strip_prefix(DATA_PREFIX)
        .map(str::to_string)
}

/// What happened while decoding one stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Non-empty chunks delivered to the sink
    pub chunks: usize,
    /// Frames skipped because they were not valid JSON
    pub skipped: usize,
    /// Whether the `[DONE]` sentinel was seen
    pub done: bool,
    /// Whether reading the source failed part-way
    pub failed: bool,
}

/// Decode a streamed response body, delivering text increments in order.
///
/// `extract` pulls the provider-specific text field out of one decoded
/// event. Malformed frames are logged and skipped. After `[DONE]` no further
/// frames are dispatched, but the source is still drained to completion.
/// A read error is reported once through [`ChunkSink::on_error`] and ends
/// decoding.
pub async fn decode_stream<S, B, E, X, K>(stream: S, extract: X, sink: &mut K) -> DecodeSummary
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    X: Fn(&serde_json::Value) -> Option<&str>,
    K: ChunkSink + ?Sized,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = FrameDecoder::new();
    let mut summary = DecodeSummary::default();

    while let Some(read) = stream.next().await {
        match read {
            Ok(bytes) => {
                for payload in decoder.feed(bytes.as_ref()) {
                    dispatch(&payload, &extract, sink, &mut summary);
                }
            }
            Err(e) => {
                warn!(error = %e, "stream read failed");
                sink.on_error(TransportError::Read(e.to_string()).to_string());
                summary.failed = true;
                return summary;
            }
        }
    }

    if let Some(payload) = decoder.finish() {
        dispatch(&payload, &extract, sink, &mut summary);
    }

    debug!(
        chunks = summary.chunks,
        skipped = summary.skipped,
        done = summary.done,
        "stream finished"
    );
    summary
}

fn dispatch<X, K>(payload: &str, extract: &X, sink: &mut K, summary: &mut DecodeSummary)
where
    X: Fn(&serde_json::Value) -> Option<&str>,
    K: ChunkSink + ?Sized,
{
    if summary.done {
        return;
    }
    if payload.trim() == DONE_SENTINEL {
        summary.done = true;
        return;
    }

    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(event) => {
            if let Some(text) = extract(&event).filter(|text| !text.is_empty()) {
                summary.chunks += 1;
                sink.on_chunk(text);
            }
        }
        Err(e) => {
            summary.skipped += 1;
            warn!(error = %e, frame = payload, "skipping malformed stream frame");
        }
    }
}
