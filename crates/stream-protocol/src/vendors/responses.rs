//! OpenAI Responses API event stream.
use serde_json::Value;

use super::{TransformResult, as_object, str_field, usage_event};
use crate::context::StreamContext;
use crate::errors::{ChatErrorType, ChatMessageError, TransformFault};
use crate::event::{CanonicalEvent, Citation, EventData, Grounding};
use crate::tool_calls::RawToolCall;
use crate::usage;

pub fn transform(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let obj = as_object(chunk)?;
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(TransformFault::MissingField("type"))?;
    if let Some(id) = obj.get("response").and_then(|r| str_field(r, "id")) {
        ctx.capture_id(id);
    }
    let id = ctx.id.clone();

    let events = match kind {
        "response.created" => {
            vec![CanonicalEvent::data(id, obj.get("response").cloned().unwrap_or(Value::Null))]
        }
        "response.output_item.added" => {
            let item = obj.get("item").ok_or(TransformFault::MissingField("item"))?;
            if str_field(item, "type") == Some("function_call") {
                let call = RawToolCall::start(
                    str_field(item, "call_id").map(ToOwned::to_owned),
                    str_field(item, "name").unwrap_or_default(),
                    str_field(item, "arguments").unwrap_or_default(),
                );
                let fragments = ctx.tool_calls.resolve(vec![call]);
                vec![CanonicalEvent::new(id, EventData::ToolCalls(fragments))]
            } else {
                vec![CanonicalEvent::data(id, item.clone())]
            }
        }
        "response.function_call_arguments.delta" => {
            let delta = str_field(chunk, "delta").unwrap_or_default();
            let fragments = ctx.tool_calls.resolve(vec![RawToolCall::continuation(delta)]);
            vec![CanonicalEvent::new(id, EventData::ToolCalls(fragments))]
        }
        "response.output_text.delta" => {
            vec![CanonicalEvent::text(id, str_field(chunk, "delta").unwrap_or_default())]
        }
        "response.reasoning_summary_part.added" => {
            let separator = if ctx.reasoning_parts == 0 { "" } else { "\n" };
            ctx.reasoning_parts += 1;
            vec![CanonicalEvent::reasoning(id, separator)]
        }
        "response.reasoning_summary_text.delta" => {
            vec![CanonicalEvent::reasoning(id, str_field(chunk, "delta").unwrap_or_default())]
        }
        "response.output_text.annotation.added" => {
            if let Some(annotation) = obj.get("annotation")
                && let Some(url) = str_field(annotation, "url")
            {
                let title = str_field(annotation, "title").map(ToOwned::to_owned);
                ctx.citations.push(Citation::new(title, url));
            }
            vec![CanonicalEvent::data(id, chunk.clone())]
        }
        "response.output_item.done" => {
            if !ctx.citations.is_empty() && ctx.take_citation_slot() {
                let grounding = Grounding::from_citations(ctx.citations.clone());
                vec![CanonicalEvent::new(id, EventData::Grounding(grounding))]
            } else {
                vec![CanonicalEvent::data(id, chunk.clone())]
            }
        }
        "response.completed" => {
            let response = obj.get("response");
            let status = response
                .and_then(|r| str_field(r, "status"))
                .unwrap_or("completed");
            let mut events = vec![CanonicalEvent::stop(id, status)];
            if let Some(raw) = response.and_then(|r| r.get("usage")).filter(|u| u.is_object()) {
                events.extend(usage_event(ctx, usage::from_responses(raw)));
            }
            events
        }
        "response.failed" | "error" => {
            let body = obj
                .get("response")
                .and_then(|r| r.get("error"))
                .filter(|e| !e.is_null())
                .cloned()
                .unwrap_or_else(|| chunk.clone());
            let error = ChatMessageError::new(ChatErrorType::ProviderBizError, body);
            vec![CanonicalEvent::new(id, EventData::Error(error))]
        }
        _ => vec![CanonicalEvent::data(id, chunk.clone())],
    };
    Ok(events)
}

#[cfg(test)]
mod tests {
    use crate::model::Vendor;
    use crate::vendors::test_support::run;
    use serde_json::{Value, json};

    fn created(id: &str) -> Value {
        json!({"type": "response.created", "response": {"id": id, "status": "in_progress"}})
    }

    #[test]
    fn reasoning_parts_are_separated() {
        let out = run(
            Vendor::OpenAiResponses,
            &[
                created("resp_1"),
                json!({"type": "response.reasoning_summary_part.added", "item_id": "rs", "summary_index": 0}),
                json!({"type": "response.reasoning_summary_text.delta", "delta": "first"}),
                json!({"type": "response.reasoning_summary_part.added", "item_id": "rs", "summary_index": 1}),
                json!({"type": "response.reasoning_summary_text.delta", "delta": "second"}),
                json!({"type": "response.output_text.delta", "delta": "answer"}),
            ],
        );
        assert_eq!(
            out,
            vec![
                r#"data:{"id":"resp_1","status":"in_progress"}"#,
                "reasoning:\"\"",
                "reasoning:\"first\"",
                "reasoning:\"\\n\"",
                "reasoning:\"second\"",
                "text:\"answer\"",
            ]
        );
    }

    #[test]
    fn function_call_and_argument_deltas() {
        let out = run(
            Vendor::OpenAiResponses,
            &[
                created("resp_2"),
                json!({"type": "response.output_item.added", "output_index": 0, "item": {
                    "type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "search", "arguments": ""
                }}),
                json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1", "delta": "{\"q\":"}),
            ],
        );
        assert_eq!(
            &out[1..],
            &[
                r#"tool_calls:[{"function":{"arguments":"","name":"search"},"id":"call_1","index":0,"type":"function"}]"#,
                r#"tool_calls:[{"function":{"arguments":"{\"q\":"},"id":"call_1","index":0,"type":"function"}]"#,
            ]
        );
    }

    #[test]
    fn citations_flush_once_on_item_done() {
        let annotation = |n: u32| {
            json!({"type": "response.output_text.annotation.added", "annotation": {
                "type": "url_citation", "title": format!("Source {n}"), "url": format!("https://example{n}.com")
            }})
        };
        let done = json!({"type": "response.output_item.done", "item": {"id": "msg", "type": "message"}});
        let out = run(
            Vendor::OpenAiResponses,
            &[created("resp_3"), annotation(1), annotation(2), done.clone(), done],
        );
        assert_eq!(
            out[3],
            r#"grounding:{"citations":[{"title":"Source 1","url":"https://example1.com"},{"title":"Source 2","url":"https://example2.com"}]}"#
        );
        assert!(out[4].starts_with("data:"));
    }

    #[test]
    fn completed_yields_stop_then_usage() {
        let out = run(
            Vendor::OpenAiResponses,
            &[
                created("resp_4"),
                json!({"type": "response.completed", "response": {"id": "resp_4", "status": "completed", "usage": {
                    "input_tokens": 2391,
                    "input_tokens_details": {"cached_tokens": 2298},
                    "output_tokens": 144,
                    "output_tokens_details": {"reasoning_tokens": 128},
                    "total_tokens": 2535
                }}}),
            ],
        );
        assert_eq!(out[1], "stop:\"completed\"");
        assert_eq!(
            out[2],
            r#"usage:{"inputCacheMissTokens":93,"inputCachedTokens":2298,"inputTextTokens":2391,"outputReasoningTokens":128,"outputTextTokens":16,"totalInputTokens":2391,"totalOutputTokens":144,"totalTokens":2535}"#
        );
    }

    #[test]
    fn failure_events_become_errors() {
        let out = run(
            Vendor::OpenAiResponses,
            &[json!({"type": "error", "code": "rate_limit", "message": "slow down"})],
        );
        assert_eq!(
            out,
            vec![r#"error:{"body":{"type":"error","code":"rate_limit","message":"slow down"},"type":"ProviderBizError"}"#]
        );
    }

    #[test]
    fn unknown_events_pass_through() {
        let out = run(
            Vendor::OpenAiResponses,
            &[json!({"type": "response.unknown_event", "data": "some data"})],
        );
        assert_eq!(out, vec![r#"data:{"type":"response.unknown_event","data":"some data"}"#]);
    }
}
