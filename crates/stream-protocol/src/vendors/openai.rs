//! OpenAI-compatible chat completion chunks.
//!
//! This is the widest adapter: most hosted backends speak this shape with
//! their own additions (reasoning fields, inline images, citation arrays,
//! annotations), all of which are handled here.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};

use super::{TransformResult, as_object, str_field, usage_event};
use crate::context::StreamContext;
use crate::errors::TransformFault;
use crate::event::{CanonicalEvent, Citation, EventData, Grounding};
use crate::tool_calls::RawToolCall;
use crate::usage;

static MARKDOWN_BASE64_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[[^\]]*\]\(\s*(data:image/[\d+.A-Za-z-]+;base64,[^\s)]+)\s*\)")
        .expect("markdown image pattern is valid")
});

static THINK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?think>").expect("think tag pattern is valid"));

pub fn transform(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let obj = as_object(chunk)?;
    if let Some(id) = str_field(chunk, "id") {
        ctx.capture_id(id);
    }
    let id = ctx.id.clone();
    let choices = obj
        .get("choices")
        .ok_or(TransformFault::MissingField("choices"))?
        .as_array()
        .ok_or_else(|| TransformFault::UnexpectedShape("`choices` is not an array".into()))?;
    let chunk_usage = obj.get("usage").filter(|u| u.is_object());

    let Some(item) = choices.first() else {
        if let Some(raw) = chunk_usage {
            return Ok(usage_event(ctx, usage::from_openai(raw)));
        }
        return Ok(vec![CanonicalEvent::data(id, chunk.clone())]);
    };
    let delta = item.get("delta").filter(|d| d.is_object());

    if let Some(calls) = delta
        .and_then(|d| d.get("tool_calls"))
        .and_then(Value::as_array)
        .filter(|calls| !calls.is_empty())
    {
        let raws: Vec<RawToolCall> = calls
            .iter()
            .filter(|c| c.get("index").and_then(Value::as_i64).is_none_or(|i| i >= 0))
            .map(RawToolCall::from_openai)
            .collect();
        if !raws.is_empty() {
            let fragments = ctx.tool_calls.resolve(raws);
            return Ok(vec![CanonicalEvent::new(id, EventData::ToolCalls(fragments))]);
        }
    }

    if let Some(images) = delta
        .and_then(|d| d.get("images"))
        .and_then(Value::as_array)
        .filter(|images| !images.is_empty())
    {
        return Ok(images
            .iter()
            .filter_map(image_url)
            .map(|url| CanonicalEvent::new(id.clone(), EventData::Base64Image(url)))
            .collect());
    }

    if let Some(reason) = str_field(item, "finish_reason").filter(|r| !r.is_empty()) {
        return Ok(finish_events(ctx, chunk, item, delta, reason));
    }

    if let Some(delta) = delta
        && let Some(events) = delta_events(ctx, chunk, delta)
    {
        return Ok(events);
    }

    if let Some(delta) = delta
        && delta.get("content").is_some_and(Value::is_null)
    {
        return Ok(vec![CanonicalEvent::data(id, delta.clone())]);
    }

    if let Some(raw) = chunk_usage {
        return Ok(usage_event(ctx, usage::from_openai(raw)));
    }

    let mut fallback = Map::new();
    fallback.insert("delta".into(), delta.cloned().unwrap_or(Value::Null));
    fallback.insert("id".into(), Value::String(id.clone()));
    fallback.insert("index".into(), item.get("index").cloned().unwrap_or(Value::Null));
    Ok(vec![CanonicalEvent::data(id, Value::Object(fallback))])
}

fn image_url(image: &Value) -> Option<String> {
    image
        .pointer("/image_url/url")
        .or_else(|| image.pointer("/image_url/image_url/url"))
        .or_else(|| image.get("url"))
        .and_then(Value::as_str)
        .or_else(|| image.as_str())
        .filter(|url| !url.is_empty())
        .map(ToOwned::to_owned)
}

fn finish_events(
    ctx: &mut StreamContext,
    chunk: &Value,
    item: &Value,
    delta: Option<&Value>,
    reason: &str,
) -> Vec<CanonicalEvent> {
    let id = ctx.id.clone();

    if let Some(content) = delta
        .and_then(|d| str_field(d, "content"))
        .filter(|c| !c.is_empty())
    {
        // Built-in search on some backends echoes its sources as tool content.
        if delta.and_then(|d| str_field(d, "role")) == Some("tool") {
            return vec![CanonicalEvent::data(id, Value::Null)];
        }
        return split_markdown_images(&id, content)
            .unwrap_or_else(|| vec![CanonicalEvent::text(id, content)]);
    }

    if let Some(annotations) = delta
        .and_then(|d| d.get("annotations"))
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
    {
        let citations = annotations
            .iter()
            .filter_map(|a| {
                let cite = a.get("url_citation")?;
                Some(Citation::new(
                    str_field(cite, "title").map(ToOwned::to_owned),
                    str_field(cite, "url")?,
                ))
            })
            .collect();
        return vec![grounding(&id, citations)];
    }

    if let Some(annotations) = item
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|m| m.last())
        .and_then(|m| m.get("annotations"))
        .and_then(Value::as_array)
    {
        let citations = annotations
            .iter()
            .filter_map(|a| str_field(a, "url"))
            .map(|url| Citation::new(Some(url.to_string()), url))
            .collect();
        return vec![grounding(&id, citations)];
    }

    if let Some(raw) = chunk.get("usage").filter(|u| u.is_object()) {
        return usage_event(ctx, usage::from_openai(raw));
    }

    if let Some(urls) = chunk.get("citations").and_then(Value::as_array) {
        let citations = urls
            .iter()
            .filter_map(Value::as_str)
            .map(|url| Citation::new(Some(url.to_string()), url))
            .collect();
        return vec![grounding(&id, citations)];
    }

    vec![CanonicalEvent::stop(id, reason)]
}

fn grounding(id: &str, citations: Vec<Citation>) -> CanonicalEvent {
    CanonicalEvent::new(id, EventData::Grounding(Grounding::from_citations(citations)))
}

/// Reasoning and content of a delta; `None` when neither is a string.
fn delta_events(ctx: &mut StreamContext, chunk: &Value, delta: &Value) -> Option<Vec<CanonicalEvent>> {
    let id = ctx.id.clone();

    if let Some(parts) = delta.get("content").and_then(Value::as_array) {
        return Some(content_parts(&id, parts));
    }

    let mut reasoning = ["reasoning_content", "reasoning"]
        .iter()
        .find_map(|key| delta.get(*key))
        .and_then(Value::as_str);
    let mut content = str_field(delta, "content");
    if let (Some(c), Some(r)) = (content, reasoning) {
        if c.is_empty() && r.is_empty() {
            content = None;
        } else if r.is_empty() {
            reasoning = None;
        }
    }

    if let Some(reasoning) = reasoning {
        return Some(vec![CanonicalEvent::reasoning(id, reasoning)]);
    }
    let content = content?;

    let stripped = THINK_TAG.replace_all(content, "").into_owned();
    if content.contains("<think>") {
        ctx.thinking_in_content = true;
    } else if content.contains("</think>") {
        ctx.thinking_in_content = false;
    }

    if content.is_empty()
        && let Some(raw) = chunk.get("usage").filter(|u| u.is_object())
    {
        return Some(usage_event(ctx, usage::from_openai(raw)));
    }

    let content_event = |ctx: &StreamContext, text: String| {
        if ctx.thinking_in_content {
            CanonicalEvent::reasoning(id.clone(), text)
        } else {
            CanonicalEvent::text(id.clone(), text)
        }
    };

    if !ctx.citation_emitted
        && let Some(citations) = search_citations(chunk)
    {
        ctx.citation_emitted = true;
        return Some(vec![grounding(&id, citations), content_event(ctx, stripped)]);
    }

    if !ctx.thinking_in_content
        && let Some(events) = split_markdown_images(&id, &stripped)
    {
        return Some(events);
    }

    Some(vec![content_event(ctx, stripped)])
}

/// Citation arrays that several backends repeat on every chunk.
fn search_citations(chunk: &Value) -> Option<Vec<Citation>> {
    let raw = chunk
        .get("citations")
        .or_else(|| chunk.pointer("/search_info/search_results"))
        .or_else(|| chunk.get("search_results"))
        .or_else(|| chunk.get("web_search"))
        .and_then(Value::as_array)?;
    Some(
        raw.iter()
            .filter_map(|item| {
                let (title, url) = match item {
                    Value::String(s) => (Some(s.as_str()), Some(s.as_str())),
                    other => (
                        str_field(other, "title"),
                        str_field(other, "url").or_else(|| str_field(other, "link")),
                    ),
                };
                let title = title.filter(|t| !t.is_empty())?;
                let url = url.filter(|u| !u.is_empty())?;
                Some(Citation::new(Some(title.to_string()), url))
            })
            .collect(),
    )
}

/// Array-form content: thinking blocks become reasoning, text and image parts
/// become text with images as markdown directives, in order.
fn content_parts(id: &str, parts: &[Value]) -> Vec<CanonicalEvent> {
    let mut events = Vec::new();
    let thinking: String = parts
        .iter()
        .filter(|p| str_field(p, "type") == Some("thinking"))
        .filter_map(|p| p.get("thinking").and_then(Value::as_array))
        .flatten()
        .filter(|t| str_field(t, "type") == Some("text"))
        .filter_map(|t| str_field(t, "text"))
        .collect();
    if !thinking.is_empty() {
        events.push(CanonicalEvent::reasoning(id, thinking));
    }
    for part in parts {
        match str_field(part, "type") {
            Some("text") => {
                if let Some(text) = str_field(part, "text") {
                    events.push(CanonicalEvent::text(id, text));
                }
            }
            Some("image_url") => {
                if let Some(url) = image_url(part) {
                    events.push(CanonicalEvent::text(id, format!("![image]({url})")));
                }
            }
            _ => {}
        }
    }
    if events.is_empty() {
        events.push(CanonicalEvent::data(id, json!({"content": parts})));
    }
    events
}

/// Pulls `![…](data:image/…;base64,…)` segments out of answer text.
///
/// Returns `None` when the text holds no such image.
pub(crate) fn split_markdown_images(id: &str, text: &str) -> Option<Vec<CanonicalEvent>> {
    let urls: Vec<String> = MARKDOWN_BASE64_IMAGE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    if urls.is_empty() {
        return None;
    }
    let cleaned = MARKDOWN_BASE64_IMAGE.replace_all(text, "");
    let cleaned = cleaned.trim();
    let mut events = Vec::with_capacity(urls.len() + 1);
    if !cleaned.is_empty() {
        events.push(CanonicalEvent::text(id, cleaned));
    }
    events.extend(
        urls.into_iter()
            .map(|url| CanonicalEvent::new(id, EventData::Base64Image(url))),
    );
    Some(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vendor;
    use crate::vendors::test_support::{ctx, run};

    fn chunk(delta: Value) -> Value {
        json!({"id": "1", "choices": [{"delta": delta, "index": 0}]})
    }

    #[test]
    fn simple_completion_yields_text_then_stop() {
        let out = run(
            Vendor::OpenAi,
            &[
                chunk(json!({"content": "Hello"})),
                chunk(json!({"content": " world!"})),
                json!({"id": "1", "choices": [{"delta": {}, "finish_reason": "stop", "index": 0}]}),
            ],
        );
        assert_eq!(out, vec!["text:\"Hello\"", "text:\" world!\"", "stop:\"stop\""]);
    }

    #[test]
    fn missing_choices_is_a_fault_but_id_is_kept() {
        let mut ctx = ctx(Vendor::OpenAi);
        let err = transform(&json!({"id": "1"}), &mut ctx).expect_err("fault");
        assert!(matches!(err, TransformFault::MissingField("choices")));
        assert_eq!(ctx.id, "1");
    }

    #[test]
    fn unknown_delta_falls_back_to_data_with_index() {
        let out = run(
            Vendor::OpenAi,
            &[json!({"id": "4", "choices": [{"delta": {"custom_field": "custom_value"}, "index": 0}]})],
        );
        assert_eq!(
            out,
            vec![r#"data:{"delta":{"custom_field":"custom_value"},"id":"4","index":0}"#]
        );
    }

    #[test]
    fn null_content_is_forwarded_as_data() {
        let out = run(Vendor::OpenAi, &[chunk(json!({"content": null}))]);
        assert_eq!(out, vec![r#"data:{"content":null}"#]);
    }

    #[test]
    fn empty_choices_with_usage_yields_usage_once() {
        let usage_chunk = json!({
            "id": "1", "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 5, "total_tokens": 10}
        });
        let out = run(Vendor::OpenAi, &[usage_chunk.clone(), usage_chunk]);
        assert_eq!(
            out,
            vec![r#"usage:{"inputTextTokens":5,"outputTextTokens":5,"totalInputTokens":5,"totalOutputTokens":5,"totalTokens":10}"#]
        );
    }

    #[test]
    fn reasoning_content_then_content() {
        let out = run(
            Vendor::OpenAi,
            &[
                chunk(json!({"content": null, "reasoning_content": "think"})),
                chunk(json!({"content": "", "reasoning_content": ""})),
                chunk(json!({"content": "answer", "reasoning_content": ""})),
            ],
        );
        assert_eq!(out, vec!["reasoning:\"think\"", "reasoning:\"\"", "text:\"answer\""]);
    }

    #[test]
    fn think_tags_switch_content_to_reasoning() {
        let out = run(
            Vendor::OpenAi,
            &[
                chunk(json!({"content": "<think>"})),
                chunk(json!({"content": "hmm"})),
                chunk(json!({"content": "</think>"})),
                chunk(json!({"content": "done"})),
            ],
        );
        assert_eq!(out, vec!["reasoning:\"\"", "reasoning:\"hmm\"", "text:\"\"", "text:\"done\""]);
    }

    #[test]
    fn tool_calls_without_index_use_position() {
        let out = run(
            Vendor::OpenAi,
            &[chunk(json!({"tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "tool1", "arguments": "{}"}},
                {"id": "call_2", "type": "function", "function": {"name": "tool2", "arguments": "{}"}}
            ]}))],
        );
        assert_eq!(
            out,
            vec![r#"tool_calls:[{"function":{"arguments":"{}","name":"tool1"},"id":"call_1","index":0,"type":"function"},{"function":{"arguments":"{}","name":"tool2"},"id":"call_2","index":1,"type":"function"}]"#]
        );
    }

    #[test]
    fn negative_tool_index_is_ignored() {
        let out = run(
            Vendor::OpenAi,
            &[chunk(json!({"content": "x", "tool_calls": [{"index": -1, "function": {"arguments": ""}}]}))],
        );
        assert_eq!(out, vec!["text:\"x\""]);
    }

    #[test]
    fn delta_images_become_base64_events() {
        let out = run(
            Vendor::OpenAi,
            &[chunk(json!({"images": [
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAA"}},
                "data:image/png;base64,BBB"
            ]}))],
        );
        assert_eq!(out, vec![
            "base64_image:\"data:image/png;base64,AAA\"",
            "base64_image:\"data:image/png;base64,BBB\"",
        ]);
    }

    #[test]
    fn markdown_base64_image_is_split_from_text() {
        let out = run(
            Vendor::OpenAi,
            &[chunk(json!({"content": "Look: ![cat](data:image/png;base64,QUJD) nice"}))],
        );
        assert_eq!(out, vec!["text:\"Look:  nice\"", "base64_image:\"data:image/png;base64,QUJD\""]);
    }

    #[test]
    fn array_content_renders_images_as_markdown_in_order() {
        let out = run(
            Vendor::OpenAi,
            &[chunk(json!({"content": [
                {"type": "text", "text": "before"},
                {"type": "image_url", "image_url": {"url": "https://x/y.png"}},
                {"type": "text", "text": "after"}
            ]}))],
        );
        assert_eq!(out, vec!["text:\"before\"", "text:\"![image](https://x/y.png)\"", "text:\"after\""]);
    }

    #[test]
    fn thinking_blocks_in_array_content_become_reasoning() {
        let out = run(
            Vendor::OpenAi,
            &[chunk(json!({"content": [
                {"type": "thinking", "thinking": [{"type": "text", "text": "step"}]}
            ]}))],
        );
        assert_eq!(out, vec!["reasoning:\"step\""]);
    }

    #[test]
    fn repeated_citations_surface_once() {
        let with_citations = |content: &str| {
            json!({
                "id": "1",
                "citations": ["https://a.example", "https://b.example"],
                "choices": [{"delta": {"content": content}, "index": 0}]
            })
        };
        let out = run(Vendor::OpenAi, &[with_citations("a"), with_citations("b")]);
        assert_eq!(out, vec![
            r#"grounding:{"citations":[{"title":"https://a.example","url":"https://a.example"},{"title":"https://b.example","url":"https://b.example"}]}"#,
            "text:\"a\"",
            "text:\"b\"",
        ]);
    }

    #[test]
    fn search_results_skip_entries_without_link() {
        let out = run(
            Vendor::OpenAi,
            &[json!({
                "id": "1",
                "web_search": [{"title": "ok", "link": "https://ok"}, {"title": "bad", "link": ""}],
                "choices": [{"delta": {"content": "x"}, "index": 0}]
            })],
        );
        assert_eq!(out[0], r#"grounding:{"citations":[{"title":"ok","url":"https://ok"}]}"#);
    }

    #[test]
    fn finish_with_content_yields_text_and_tool_role_yields_null_data() {
        let out = run(
            Vendor::OpenAi,
            &[
                json!({"id": "1", "choices": [{"delta": {"content": "bye"}, "finish_reason": "stop", "index": 0}]}),
                json!({"id": "1", "choices": [{"delta": {"content": "[sources]", "role": "tool"}, "finish_reason": "stop", "index": 0}]}),
            ],
        );
        assert_eq!(out, vec!["text:\"bye\"", "data:null"]);
    }

    #[test]
    fn finish_with_annotations_yields_grounding() {
        let out = run(
            Vendor::OpenAi,
            &[json!({"id": "1", "choices": [{
                "delta": {"annotations": [{"type": "url_citation", "url_citation": {"title": "Lego", "url": "https://lego"}}]},
                "finish_reason": "stop", "index": 0
            }]})],
        );
        assert_eq!(out, vec![r#"grounding:{"citations":[{"title":"Lego","url":"https://lego"}]}"#]);
    }

    #[test]
    fn finish_with_usage_yields_usage_instead_of_stop() {
        let out = run(
            Vendor::OpenAi,
            &[json!({
                "id": "1",
                "choices": [{"delta": {"content": ""}, "finish_reason": "stop", "index": 0}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
            })],
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("usage:"));
    }
}
