//! Wire framing: the three-line encoder and its inverse extractor.
use bytes::Bytes;
use futures::{Stream, StreamExt as _, stream};
use serde_json::Value;
use tracing::warn;

use crate::event::CanonicalEvent;

/// Prefix of a data line.
pub const DATA_MARKER: &str = "data:";
/// Upstream end-of-stream sentinel payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Serializes one event into its `id:`, `event:` and `data:` lines.
///
/// The data line carries the blank separator.
pub fn encode_event(event: &CanonicalEvent) -> Result<[String; 3], serde_json::Error> {
    let payload = event.data.to_json()?;
    Ok([
        format!("id: {}\n", event.id),
        format!("event: {}\n", event.kind()),
        format!("data: {payload}\n\n"),
    ])
}

/// Encodes one event as three byte items, one per wire line.
pub fn encode_event_bytes(event: &CanonicalEvent) -> Result<[Bytes; 3], serde_json::Error> {
    Ok(encode_event(event)?.map(Bytes::from))
}

/// Truncates a raw text unit at its second line-start data marker when it
/// holds exactly two.
///
/// Markers embedded mid-line (inside a JSON string, say) do not count.
pub fn dedupe_double_data(unit: &str) -> &str {
    let starts: Vec<usize> = unit
        .match_indices(DATA_MARKER)
        .map(|(idx, _)| idx)
        .filter(|&idx| idx == 0 || unit.as_bytes()[idx - 1] == b'\n')
        .collect();
    match starts.as_slice() {
        [_, second] => &unit[..*second],
        _ => unit,
    }
}

/// Line-buffered reader that pulls structured payloads out of framed bytes.
#[derive(Default)]
pub struct FrameExtractor {
    buf: Vec<u8>,
}

impl FrameExtractor {
    /// Feeds raw bytes; returns payloads of every complete data line.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(value) = parse_data_line(&line[..line.len() - 1]) {
                out.push(value);
            }
        }
        out
    }

    /// Flushes a trailing line that had no newline terminator.
    pub fn finish(&mut self) -> Option<Value> {
        if self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        parse_data_line(&line)
    }
}

fn parse_data_line(raw: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches('\r');
    let payload = line.strip_prefix(DATA_MARKER)?.trim();
    if payload.is_empty() || payload == DONE_SENTINEL {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, line = %line, "skipping unparseable data line");
            None
        }
    }
}

/// Extracts every data payload from a framed byte body in one pass.
pub fn extract_data(body: &[u8]) -> Vec<Value> {
    let mut extractor = FrameExtractor::default();
    let mut out = extractor.push_chunk(body);
    out.extend(extractor.finish());
    out
}

/// Streaming form of [`extract_data`].
///
/// Pulls one upstream chunk at a time; chunk errors end extraction.
pub fn extract_data_stream<S, B, E>(body: S) -> impl Stream<Item = Value> + Send
where
    S: Stream<Item = Result<B, E>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    stream::unfold(
        (body, FrameExtractor::default(), false),
        |(mut body, mut extractor, done)| async move {
            if done {
                return None;
            }
            match body.next().await {
                Some(Ok(chunk)) => {
                    let values = extractor.push_chunk(chunk.as_ref());
                    Some((values, (body, extractor, false)))
                }
                Some(Err(err)) => {
                    warn!(error = %err, "framed body read failed");
                    let tail: Vec<Value> = extractor.finish().into_iter().collect();
                    Some((tail, (body, extractor, true)))
                }
                None => {
                    let tail: Vec<Value> = extractor.finish().into_iter().collect();
                    Some((tail, (body, extractor, true)))
                }
            }
        },
    )
    .flat_map(stream::iter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CanonicalEvent, EventData, Grounding};
    use serde_json::json;

    #[test]
    fn encodes_three_lines_with_trailing_blank() {
        let lines = encode_event(&CanonicalEvent::text("chat_1", "Hello")).expect("encode");
        assert_eq!(lines, ["id: chat_1\n", "event: text\n", "data: \"Hello\"\n\n"]);
    }

    #[test]
    fn extractor_round_trips_encoded_payloads() {
        let payload = json!({"b": [1, 2], "a": {"nested": true}});
        let events = [
            CanonicalEvent::data("1", payload.clone()),
            CanonicalEvent::new("1", EventData::Grounding(Grounding::default())),
        ];
        let wire: String = events
            .iter()
            .flat_map(|e| encode_event(e).expect("encode"))
            .collect();
        let values = extract_data(wire.as_bytes());
        assert_eq!(values, vec![payload, json!({"citations": []})]);
    }

    #[test]
    fn extractor_skips_heartbeats_and_bad_lines() {
        let body = b": keep-alive\ndata: {\"a\":1}\ndata: [DONE]\ndata: {oops\ndata:\n\nevent: text\ndata: {\"b\":2}";
        let values = extract_data(body);
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn extractor_handles_split_lines() {
        let mut extractor = FrameExtractor::default();
        assert!(extractor.push_chunk(b"data: {\"te").is_empty());
        let values = extractor.push_chunk(b"xt\":\"hi\"}\r\n");
        assert_eq!(values, vec![json!({"text": "hi"})]);
    }

    #[test]
    fn double_data_unit_is_cut_at_second_marker() {
        let unit = "data: {\"response\":\"a\"}\n\ndata: {\"response\":\"a\"}\n\n";
        let cut = dedupe_double_data(unit);
        assert_eq!(cut, "data: {\"response\":\"a\"}\n\n");
        assert_eq!(extract_data(cut.as_bytes()), extract_data(b"data: {\"response\":\"a\"}\n\n"));
    }

    #[test]
    fn embedded_marker_is_not_a_frame_start() {
        let unit = "data: {\"key\": \"value\", \"response\": \"data: a\"}";
        assert_eq!(dedupe_double_data(unit), unit);
    }

    #[test]
    fn three_markers_are_left_alone() {
        let unit = "data: 1\ndata: 2\ndata: 3\n";
        assert_eq!(dedupe_double_data(unit), unit);
    }

    #[tokio::test]
    async fn stream_extraction_flushes_tail() {
        let body = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"data: {\"a\":")),
            Ok(Bytes::from_static(b"1}\ndata: {\"b\":2}")),
        ]);
        let values: Vec<Value> = extract_data_stream(body).collect().await;
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }
}
