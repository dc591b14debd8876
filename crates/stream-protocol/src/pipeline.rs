//! Stage composition: native chunks in, wire lines out.
//!
//! Every stage is a pull-based stream adapter, so a native chunk is read only
//! after all lines derived from the previous one were consumed.
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt as _, stream};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::callbacks::with_callbacks;
use crate::context::StreamContext;
use crate::envelope::{
    ErrorClassifier, chunk_fault_event, first_chunk_event, source_failure_event,
    unexpected_end_event,
};
use crate::errors::{ProviderError, StreamError};
use crate::event::{CanonicalEvent, EventKind};
use crate::frame::encode_event_bytes;
use crate::options::StreamOptions;
use crate::source::ChunkSource;
use crate::speed::{SPEED_EVENT_ID, with_speed};
use crate::vendors;

/// Handle used to stop reading from the source of a running stream.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The source ends at the next pull; events already derived still flush
    /// and completion callbacks fire with the partial aggregate.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Normalized output: one `Bytes` item per wire line.
pub struct ProtocolStream {
    inner: BoxStream<'static, Bytes>,
    abort_handle: AbortHandle,
}

impl ProtocolStream {
    /// Returns a handle that can cancel the stream.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }
}

impl Stream for ProtocolStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Builds the normalization pipeline for one stream.
pub fn protocol_stream(source: ChunkSource, options: StreamOptions) -> ProtocolStream {
    let (abort_tx, mut abort_rx) = watch::channel(false);
    let aborted = async move {
        let _ = abort_rx.wait_for(|aborted| *aborted).await;
    };
    let chunks = source.take_until(aborted).boxed();

    let stage = TransformStage {
        chunks,
        ctx: StreamContext::new(options.vendor, options.provider.clone()),
        classifier: options.error_classifier.clone(),
        debug_chunks: options.debug_chunks,
        first: true,
        done: false,
    };
    let mut events = stream::unfold(stage, |mut stage| async move {
        let batch = stage.pull().await?;
        Some((batch, stage))
    })
    .flat_map(stream::iter)
    .boxed();

    if let Some(start) = options.input_start_at {
        events = with_speed(events, start).boxed();
    }

    let mut lines = encode(events, options.require_terminal_event).boxed();
    if let Some(callbacks) = options.callbacks {
        lines = with_callbacks(lines, callbacks).boxed();
    }

    ProtocolStream {
        inner: lines,
        abort_handle: AbortHandle { tx: abort_tx },
    }
}

/// Validates `options` before building the pipeline.
pub fn try_protocol_stream(
    source: ChunkSource,
    options: StreamOptions,
) -> Result<ProtocolStream, StreamError> {
    options.validate()?;
    Ok(protocol_stream(source, options))
}

struct TransformStage {
    chunks: BoxStream<'static, Result<Value, ProviderError>>,
    ctx: StreamContext,
    classifier: Option<ErrorClassifier>,
    debug_chunks: bool,
    first: bool,
    done: bool,
}

impl TransformStage {
    /// Events derived from the next source item; `None` once the source ends.
    async fn pull(&mut self) -> Option<Vec<CanonicalEvent>> {
        if self.done {
            return None;
        }
        let item = self.chunks.next().await?;
        let first = std::mem::replace(&mut self.first, false);
        match item {
            Ok(chunk) => Some(self.transform(&chunk)),
            Err(err) => {
                self.done = true;
                if first {
                    error!(provider = %err.provider_id(), error = %err, "stream failed before the first chunk");
                    Some(vec![first_chunk_event(&err, self.classifier.as_ref())])
                } else {
                    error!(provider = %err.provider_id(), id = %self.ctx.id, error = %err, "stream source failed");
                    Some(vec![source_failure_event(&self.ctx.id, &err)])
                }
            }
        }
    }

    fn transform(&mut self, chunk: &Value) -> Vec<CanonicalEvent> {
        if self.debug_chunks {
            debug!(vendor = %self.ctx.vendor, chunk = %chunk, "native chunk");
        }
        match vendors::transform(chunk, &mut self.ctx) {
            Ok(events) => events,
            Err(fault) => {
                error!(
                    vendor = %self.ctx.vendor,
                    fault = fault.name(),
                    error = %fault,
                    chunk = %chunk,
                    "chunk transform failed"
                );
                vec![chunk_fault_event(&self.ctx.id, &fault, chunk)]
            }
        }
    }
}

struct EncodeState<S> {
    events: Option<S>,
    require_terminal: bool,
    saw_terminal: bool,
    last_id: String,
}

/// Serializes events into wire lines, appending `unexpected_end` when required.
fn encode<S>(events: S, require_terminal: bool) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = CanonicalEvent> + Send + Unpin,
{
    let state = EncodeState {
        events: Some(events),
        require_terminal,
        saw_terminal: false,
        last_id: String::new(),
    };
    stream::unfold(state, |mut state| async move {
        let next = state.events.as_mut()?.next().await;
        let event = match next {
            Some(event) => {
                let kind = event.kind();
                state.saw_terminal |= kind.is_terminal();
                if kind != EventKind::Speed && event.id != SPEED_EVENT_ID {
                    state.last_id.clone_from(&event.id);
                }
                event
            }
            None => {
                state.events = None;
                if !state.require_terminal || state.saw_terminal {
                    return None;
                }
                warn!(id = %state.last_id, "stream ended without a terminal event");
                unexpected_end_event(&state.last_id)
            }
        };
        let lines = match encode_event_bytes(&event) {
            Ok(lines) => lines.to_vec(),
            Err(err) => {
                error!(kind = %event.kind(), error = %err, "event did not serialize");
                Vec::new()
            }
        };
        Some((lines, state))
    })
    .flat_map(stream::iter)
}

/// Drains a line stream into owned strings.
pub async fn collect_lines<S>(stream: S) -> Vec<String>
where
    S: Stream<Item = Bytes>,
{
    stream
        .map(|line| String::from_utf8_lossy(&line).into_owned())
        .collect()
        .await
}

/// Drains a line stream into one string.
pub async fn collect_string<S>(stream: S) -> String
where
    S: Stream<Item = Bytes>,
{
    collect_lines(stream).await.concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use futures::StreamExt as _;
    use serde_json::json;

    use crate::callbacks::tests::Recorder;
    use crate::envelope::FirstChunkError;
    use crate::errors::{ChatErrorType, ProviderError};
    use crate::model::Vendor;

    fn openai_chunk(id: &str, delta: Value, finish: Value) -> Value {
        json!({"id": id, "choices": [{"delta": delta, "finish_reason": finish, "index": 0}]})
    }

    #[tokio::test]
    async fn simple_completion_is_six_lines() {
        let source = ChunkSource::from_chunks([
            openai_chunk("1", json!({"content": "Hello"}), Value::Null),
            openai_chunk("1", json!({}), json!("stop")),
        ]);
        let lines = collect_lines(protocol_stream(source, StreamOptions::new(Vendor::OpenAi))).await;
        assert_eq!(
            lines,
            vec![
                "id: 1\n",
                "event: text\n",
                "data: \"Hello\"\n\n",
                "id: 1\n",
                "event: stop\n",
                "data: \"stop\"\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn simple_completion_drives_text_callbacks() {
        let recorder = Arc::new(Recorder::default());
        let source = ChunkSource::from_chunks([
            openai_chunk("1", json!({"content": "Hello"}), Value::Null),
            openai_chunk("1", json!({"content": " world!"}), Value::Null),
            openai_chunk("1", json!({}), json!("stop")),
        ]);
        let options = StreamOptions::new(Vendor::OpenAi).callbacks(recorder.clone());
        let lines = collect_lines(protocol_stream(source, options)).await;

        assert_eq!(lines.len(), 9);
        assert_eq!(lines[5], "data: \" world!\"\n\n");
        assert_eq!(
            recorder.calls(),
            vec!["start", "text:\"Hello\"", "text:\" world!\"", "completion", "final"]
        );
        let aggregate = recorder.completion().expect("completion");
        assert_eq!(aggregate.text, "Hello world!");
        assert_eq!(aggregate.thinking, None);
        assert_eq!(aggregate.tool_calls_count, 0);
    }

    #[tokio::test]
    async fn malformed_chunk_becomes_error_and_stream_continues() {
        let source = ChunkSource::from_chunks([
            openai_chunk("1", json!({"content": "a"}), Value::Null),
            json!({"id": "1", "object": "chat.completion.chunk"}),
            openai_chunk("1", json!({"content": "b"}), Value::Null),
            openai_chunk("1", json!({}), json!("stop")),
        ]);
        let lines = collect_lines(protocol_stream(source, StreamOptions::new(Vendor::OpenAi))).await;
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[4], "event: error\n");
        assert_eq!(
            lines[5],
            "data: {\"body\":{\"message\":\"chat response streaming chunk parse error, please contact your API Provider to fix it.\",\"context\":{\"error\":{\"message\":\"chunk is missing required field `choices`\",\"name\":\"MissingField\"},\"chunk\":{\"id\":\"1\",\"object\":\"chat.completion.chunk\"}}},\"type\":\"StreamChunkError\"}\n\n"
        );
        assert_eq!(lines[8], "data: \"b\"\n\n");
        assert_eq!(lines[11], "data: \"stop\"\n\n");
    }

    #[tokio::test]
    async fn parallel_tool_calls_reach_callbacks() {
        let call = |index: u32, id: Option<&str>, name: Option<&str>, args: &str| {
            let mut function = json!({"arguments": args});
            if let Some(name) = name {
                function["name"] = json!(name);
            }
            let mut call = json!({"index": index, "function": function});
            if let Some(id) = id {
                call["id"] = json!(id);
                call["type"] = json!("function");
            }
            call
        };
        let source = ChunkSource::from_chunks([
            openai_chunk("2", json!({"tool_calls": [call(0, Some("call_a"), Some("search"), "")]}), Value::Null),
            openai_chunk("2", json!({"tool_calls": [call(1, Some("call_b"), Some("crawl"), "")]}), Value::Null),
            openai_chunk("2", json!({"tool_calls": [call(0, None, None, "{\"q\":1}")]}), Value::Null),
            openai_chunk("2", json!({"tool_calls": [call(1, None, None, "{\"u\":2}")]}), Value::Null),
            openai_chunk("2", json!({}), json!("tool_calls")),
        ]);
        let recorder = Arc::new(Recorder::default());
        let options = StreamOptions::new(Vendor::OpenAi).callbacks(recorder.clone());
        let lines = collect_lines(protocol_stream(source, options)).await;

        let tool_lines: Vec<_> = lines.iter().filter(|l| *l == "event: tool_calls\n").collect();
        assert_eq!(tool_lines.len(), 4);
        assert!(lines[8].contains("\"id\":\"call_a\",\"index\":0"));
        assert!(lines[11].contains("\"id\":\"call_b\",\"index\":1"));

        let calls = recorder.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("tools:")).count(), 4);
        assert_eq!(calls.first().map(String::as_str), Some("start"));
        assert_eq!(&calls[calls.len() - 2..], &["completion", "final"]);
        let completion = recorder.completion().expect("completion");
        assert_eq!(completion.tool_calls_count, 4);
    }

    #[tokio::test]
    async fn abort_flushes_partial_aggregate() {
        let (tx, source) = ChunkSource::channel(8);
        let recorder = Arc::new(Recorder::default());
        let options = StreamOptions::new(Vendor::OpenAi).callbacks(recorder.clone());
        let mut stream = protocol_stream(source, options);
        let handle = stream.abort_handle();

        tx.send(Ok(openai_chunk("3", json!({"content": "partial"}), Value::Null)))
            .await
            .expect("send");
        let mut lines = Vec::new();
        for _ in 0..3 {
            let line = stream.next().await.expect("line");
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        assert_eq!(lines[2], "data: \"partial\"\n\n");

        handle.abort();
        assert!(handle.is_aborted());
        let rest = tokio::time::timeout(Duration::from_secs(1), collect_lines(stream))
            .await
            .expect("aborted stream ends");
        assert!(rest.is_empty());
        drop(tx);

        let completion = recorder.completion().expect("completion fired");
        assert_eq!(completion.text, "partial");
        assert_eq!(recorder.calls().last().map(String::as_str), Some("final"));
    }

    #[tokio::test]
    async fn first_chunk_error_closes_the_stream() {
        let err = ProviderError::provider("openai", "Invalid API key", Some(401));
        let source = ChunkSource::from_results([
            Err(err),
            Ok(openai_chunk("4", json!({"content": "never"}), Value::Null)),
        ]);
        let lines = collect_lines(protocol_stream(source, StreamOptions::new(Vendor::OpenAi))).await;
        assert_eq!(
            lines,
            vec![
                "id: first_chunk_error\n",
                "event: error\n",
                "data: {\"body\":{\"errorType\":\"InvalidProviderAPIKey\",\"message\":\"Invalid API key\"},\"type\":\"InvalidProviderAPIKey\"}\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn classifier_overrides_first_chunk_type() {
        let classifier: ErrorClassifier = Arc::new(|err: &FirstChunkError| {
            (err.name == "TransportError").then_some(ChatErrorType::ProviderServiceUnavailable)
        });
        let source = ChunkSource::from_results([Err(ProviderError::transport("grok", "reset"))]);
        let options = StreamOptions::new(Vendor::OpenAi).error_classifier(classifier);
        let lines = collect_lines(protocol_stream(source, options)).await;
        assert_eq!(
            lines[2],
            "data: {\"body\":{\"message\":\"reset\",\"errorType\":\"ProviderServiceUnavailable\",\"provider\":\"grok\"},\"type\":\"ProviderServiceUnavailable\"}\n\n"
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_is_typed_and_final() {
        let source = ChunkSource::from_results([
            Ok(openai_chunk("5", json!({"content": "a"}), Value::Null)),
            Err(ProviderError::transport("openai", "streaming read failed: reset")),
            Ok(openai_chunk("5", json!({"content": "b"}), Value::Null)),
        ]);
        let lines = collect_lines(protocol_stream(source, StreamOptions::new(Vendor::OpenAi))).await;
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[3], "id: 5\n");
        assert_eq!(
            lines[5],
            "data: {\"body\":{\"message\":\"streaming read failed: reset\",\"name\":\"TransportError\",\"provider\":\"openai\"},\"type\":\"ProviderBizError\"}\n\n"
        );
    }

    #[tokio::test]
    async fn missing_terminal_is_reported_when_required() {
        let source = ChunkSource::from_chunks([openai_chunk("6", json!({"content": "cut"}), Value::Null)]);
        let options = StreamOptions::new(Vendor::OpenAi).require_terminal_event(true);
        let lines = collect_lines(protocol_stream(source, options)).await;
        assert_eq!(
            &lines[3..],
            &[
                "id: 6\n",
                "event: error\n",
                "data: {\"body\":{\"name\":\"Stream parsing error\",\"reason\":\"unexpected_end\"},\"message\":\"Stream ended unexpectedly\",\"name\":\"Stream parsing error\",\"type\":\"StreamChunkError\"}\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn terminal_check_is_off_by_default() {
        let source = ChunkSource::from_chunks([openai_chunk("7", json!({"content": "cut"}), Value::Null)]);
        let text = collect_string(protocol_stream(source, StreamOptions::new(Vendor::OpenAi))).await;
        assert_eq!(text, "id: 7\nevent: text\ndata: \"cut\"\n\n");
    }

    #[tokio::test]
    async fn speed_follows_usage_bearing_streams() {
        let source = ChunkSource::from_chunks([
            openai_chunk("8", json!({"content": "hi"}), Value::Null),
            json!({"id": "8", "choices": [], "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}}),
            openai_chunk("8", json!({}), json!("stop")),
        ]);
        let options = StreamOptions::new(Vendor::OpenAi).input_start_at(Instant::now());
        let lines = collect_lines(protocol_stream(source, options)).await;
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[9], "id: output_speed\n");
        assert_eq!(lines[10], "event: speed\n");
        assert!(lines[11].contains("\"ttft\":"));
    }

    #[tokio::test]
    async fn empty_provider_is_rejected() {
        let source = ChunkSource::from_chunks(Vec::<Value>::new());
        let options = StreamOptions::new(Vendor::OpenAi).provider("");
        assert!(matches!(
            try_protocol_stream(source, options),
            Err(StreamError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn anthropic_stream_through_the_pipeline() {
        let source = ChunkSource::from_chunks([
            json!({"type": "message_start", "message": {"id": "message_1", "metadata": {}}}),
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hello"}}),
            json!({"type": "message_stop"}),
        ]);
        let lines = collect_lines(protocol_stream(source, StreamOptions::new(Vendor::Anthropic))).await;
        assert_eq!(
            lines,
            vec![
                "id: message_1\n",
                "event: data\n",
                "data: {\"id\":\"message_1\",\"metadata\":{}}\n\n",
                "id: message_1\n",
                "event: text\n",
                "data: \"Hello\"\n\n",
                "id: message_1\n",
                "event: stop\n",
                "data: \"message_stop\"\n\n",
            ]
        );
    }
}
