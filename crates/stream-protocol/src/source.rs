//! Source adapters: every native transport becomes one pull-based sequence of
//! opaque JSON chunks.
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt as _, stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::errors::ProviderError;
use crate::frame::DONE_SENTINEL;
use crate::model::ProviderId;
use crate::vendors::nonstream;

type BoxedChunks = Pin<Box<dyn Stream<Item = Result<Value, ProviderError>> + Send + 'static>>;

/// Uniform sequence of native chunks.
///
/// Text-framed vendors receive their raw units as `Value::String`.
pub struct ChunkSource {
    inner: BoxedChunks,
}

impl ChunkSource {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, ProviderError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Pull-style source over already-decoded chunks.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(chunks.into_iter().map(Ok)))
    }

    pub fn from_results<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<Value, ProviderError>>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(items))
    }

    /// Push-style source; the producer side owns the sender.
    pub fn from_receiver(rx: mpsc::Receiver<Result<Value, ProviderError>>) -> Self {
        Self::from_stream(ReceiverStream::new(rx))
    }

    /// Creates a bounded push-style source and its producer handle.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<Value, ProviderError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::from_receiver(rx))
    }

    /// Synthesized stream for a backend that only answers synchronously.
    pub fn from_completion(completion: &Value) -> Self {
        Self::from_chunks(nonstream::completion_to_chunks(completion))
    }

    /// Decodes an SSE body into JSON chunks.
    ///
    /// Frames whose data is not JSON are passed through as strings so the
    /// transform stage reports them per chunk.
    pub fn from_sse_bytes<S, E>(provider: ProviderId, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
        E: fmt::Display + Send + 'static,
    {
        Self::from_stream(decode_body(provider, body, BodyFraming::Sse(SseDecoder::default())))
    }

    /// Decodes a newline-delimited JSON body (one chunk per line).
    pub fn from_ndjson_bytes<S, E>(provider: ProviderId, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
        E: fmt::Display + Send + 'static,
    {
        Self::from_stream(decode_body(provider, body, BodyFraming::Ndjson(Vec::new())))
    }

    /// Forwards each network read as one raw text unit.
    pub fn from_text_bytes<S, E>(provider: ProviderId, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
        E: fmt::Display + Send + 'static,
    {
        Self::from_stream(decode_body(provider, body, BodyFraming::Raw(Vec::new())))
    }

    /// Adapts an HTTP response; a non-success status becomes the first item's error.
    pub async fn from_response(
        provider: ProviderId,
        response: reqwest::Response,
        framing: ResponseFraming,
    ) -> Self {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
            let message = body
                .pointer("/error/message")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("request failed with status {status}"));
            let err = ProviderError::provider(provider, message, Some(status.as_u16())).with_body(body);
            return Self::from_results([Err(err)]);
        }
        let body = response.bytes_stream().boxed();
        match framing {
            ResponseFraming::Sse => Self::from_sse_bytes(provider, body),
            ResponseFraming::Ndjson => Self::from_ndjson_bytes(provider, body),
            ResponseFraming::Text => Self::from_text_bytes(provider, body),
        }
    }
}

impl Stream for ChunkSource {
    type Item = Result<Value, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// How an HTTP body is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFraming {
    Sse,
    Ndjson,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Parses whatever is left once the body ends without a final blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_sse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

fn frame_to_chunk(frame: SseFrame) -> Option<Value> {
    let data = frame.data.trim();
    if data.is_empty() || data == DONE_SENTINEL {
        return None;
    }
    let mut chunk = match serde_json::from_str::<Value>(data) {
        Ok(chunk) => chunk,
        Err(_) => return Some(Value::String(frame.data)),
    };
    // Typed-event bodies may carry the type only on the `event:` line.
    if let (Value::Object(map), Some(event)) = (&mut chunk, frame.event)
        && event != "message"
        && !map.contains_key("type")
    {
        map.insert("type".into(), Value::String(event));
    }
    Some(chunk)
}

enum BodyFraming {
    Sse(SseDecoder),
    Ndjson(Vec<u8>),
    /// Bytes of a character split across reads wait here.
    Raw(Vec<u8>),
}

impl BodyFraming {
    fn push(&mut self, chunk: &[u8], out: &mut VecDeque<Value>) {
        match self {
            Self::Sse(decoder) => out.extend(decoder.push_chunk(chunk).into_iter().filter_map(frame_to_chunk)),
            Self::Ndjson(buf) => {
                buf.extend_from_slice(chunk);
                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    out.extend(ndjson_line(&line));
                }
            }
            Self::Raw(carry) => {
                carry.extend_from_slice(chunk);
                let text = drain_utf8(carry);
                if !text.is_empty() {
                    out.push_back(Value::String(text));
                }
            }
        }
    }

    fn finish(&mut self, out: &mut VecDeque<Value>) {
        match self {
            Self::Sse(decoder) => out.extend(decoder.finish().and_then(frame_to_chunk)),
            Self::Ndjson(buf) => {
                let rest = std::mem::take(buf);
                out.extend(ndjson_line(&rest));
            }
            Self::Raw(carry) => {
                if !carry.is_empty() {
                    let rest = std::mem::take(carry);
                    out.push_back(Value::String(String::from_utf8_lossy(&rest).into_owned()));
                }
            }
        }
    }
}

/// Decodes `buf` up to a trailing incomplete character, which stays buffered.
fn drain_utf8(buf: &mut Vec<u8>) -> String {
    let keep = match std::str::from_utf8(buf) {
        Err(err) if err.error_len().is_none() => buf.len() - err.valid_up_to(),
        _ => 0,
    };
    let tail = buf.split_off(buf.len() - keep);
    let text = String::from_utf8_lossy(buf).into_owned();
    *buf = tail;
    text
}

fn ndjson_line(line: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

struct BodyState<S> {
    provider: ProviderId,
    body: S,
    framing: BodyFraming,
    pending: VecDeque<Value>,
    done: bool,
}

fn decode_body<S, E>(
    provider: ProviderId,
    body: S,
    framing: BodyFraming,
) -> impl Stream<Item = Result<Value, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send + 'static,
{
    stream::try_unfold(
        BodyState {
            provider,
            body,
            framing,
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Ok(Some((chunk, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.body.next().await {
                    Some(Ok(bytes)) => {
                        state.framing.push(&bytes, &mut state.pending);
                    }
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(
                            state.provider,
                            format!("streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        debug!(provider = %state.provider, "response body ended");
                        state.framing.finish(&mut state.pending);
                        state.done = true;
                    }
                }
            }
        },
    )
}
