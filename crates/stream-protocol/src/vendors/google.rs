//! Gemini `GenerateContentResponse` chunks (Google AI and Vertex AI).
use serde_json::{Value, json};

use super::{TransformResult, as_object, str_field, usage_event};
use crate::context::StreamContext;
use crate::errors::{ChatErrorType, ChatMessageError};
use crate::event::{CanonicalEvent, Citation, EventData, Grounding};
use crate::tool_calls::{RawToolCall, arguments_text, generate_tool_call_id};
use crate::usage;

fn block_message(reason: &str) -> String {
    match reason {
        "PROHIBITED_CONTENT" => "Your request may contain prohibited content. Please adjust your request to comply with the usage guidelines.".to_string(),
        "SAFETY" => "Your request was blocked by safety filters. Please adjust your request and try again.".to_string(),
        other => format!("Your request was blocked by the provider ({other})."),
    }
}

pub fn transform(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let obj = as_object(chunk)?;
    if let Some(id) = obj.get("responseId").and_then(Value::as_str) {
        ctx.capture_id(id);
    }
    let id = ctx.ensure_id();

    if let Some(feedback) = obj.get("promptFeedback")
        && let Some(reason) = str_field(feedback, "blockReason")
    {
        let body = json!({
            "context": {"promptFeedback": feedback},
            "message": block_message(reason),
            "provider": ctx.provider.as_str(),
        });
        let error = ChatMessageError::new(ChatErrorType::ProviderBizError, body);
        return Ok(vec![CanonicalEvent::new(id, EventData::Error(error))]);
    }

    let candidate = obj
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first());
    let parts = candidate
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let finish = candidate.and_then(|c| str_field(c, "finishReason"));

    let mut events = part_events(&id, parts, ctx);

    if let Some(reason) = finish {
        if let Some(grounding) = candidate.and_then(|c| c.get("groundingMetadata"))
            && let Some(grounding) = grounding_of(grounding)
            && ctx.take_citation_slot()
        {
            events.push(CanonicalEvent::new(id.clone(), EventData::Grounding(grounding)));
        }
        events.push(CanonicalEvent::stop(id.clone(), reason));
        if let Some(meta) = obj.get("usageMetadata").filter(|m| m.is_object()) {
            events.extend(usage_event(ctx, usage::from_google(meta)));
        }
        return Ok(events);
    }

    if parts.is_empty() {
        events.push(CanonicalEvent::text(id, ""));
    }
    Ok(events)
}

fn part_events(id: &str, parts: &[Value], ctx: &mut StreamContext) -> Vec<CanonicalEvent> {
    let mut events = Vec::new();
    let mut calls = Vec::new();
    for part in parts {
        if let Some(call) = part.get("functionCall") {
            let index = u32::try_from(calls.len()).unwrap_or(u32::MAX);
            let name = str_field(call, "name").unwrap_or_default();
            let arguments = call.get("args").and_then(arguments_text).unwrap_or_else(|| "{}".to_string());
            calls.push(
                RawToolCall::start(Some(generate_tool_call_id(index, Some(name))), name, arguments)
                    .with_index(index),
            );
            continue;
        }
        if let Some(inline) = part.get("inlineData") {
            let mime = str_field(inline, "mimeType").unwrap_or("image/png");
            let data = str_field(inline, "data").unwrap_or_default();
            events.push(CanonicalEvent::new(
                id,
                EventData::Base64Image(format!("data:{mime};base64,{data}")),
            ));
            continue;
        }
        if let Some(text) = str_field(part, "text") {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                events.push(CanonicalEvent::reasoning(id, text));
            } else {
                events.push(CanonicalEvent::text(id, text));
            }
        }
    }
    if !calls.is_empty() {
        let fragments = ctx.tool_calls.resolve(calls);
        events.push(CanonicalEvent::new(id, EventData::ToolCalls(fragments)));
    }
    events
}

fn grounding_of(metadata: &Value) -> Option<Grounding> {
    let chunks = metadata
        .get("groundingChunks")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())?;
    let citations = chunks
        .iter()
        .filter_map(|chunk| chunk.get("web"))
        .map(|web| {
            let title = str_field(web, "title").map(ToOwned::to_owned);
            Citation {
                favicon: title.clone(),
                title,
                url: str_field(web, "uri").unwrap_or_default().to_string(),
            }
        })
        .collect();
    let search_queries = metadata
        .get("webSearchQueries")
        .and_then(Value::as_array)
        .map(|q| q.iter().filter_map(Value::as_str).map(ToOwned::to_owned).collect());
    Some(Grounding {
        citations,
        search_queries,
    })
}

#[cfg(test)]
mod tests {
    use crate::model::Vendor;
    use crate::vendors::test_support::run;
    use serde_json::json;

    #[test]
    fn text_function_call_then_finish() {
        let out = run(
            Vendor::Google,
            &[
                json!({"responseId": "resp_g", "candidates": [{"content": {"parts": [{"text": "Hello"}], "role": "model"}}]}),
                json!({"candidates": [{"content": {"parts": [{"functionCall": {"name": "testFunction", "args": {"arg1": "value1"}}}], "role": "model"}}]}),
                json!({
                    "candidates": [{"content": {"parts": [{"text": " world!"}], "role": "model"}, "finishReason": "STOP"}],
                    "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 122, "totalTokenCount": 131,
                        "promptTokensDetails": [{"modality": "TEXT", "tokenCount": 9}]}
                }),
            ],
        );
        assert_eq!(
            out,
            vec![
                "text:\"Hello\"",
                r#"tool_calls:[{"function":{"arguments":"{\"arg1\":\"value1\"}","name":"testFunction"},"id":"testFunction_0","index":0,"type":"function"}]"#,
                "text:\" world!\"",
                "stop:\"STOP\"",
                r#"usage:{"inputTextTokens":9,"outputTextTokens":122,"totalInputTokens":9,"totalOutputTokens":122,"totalTokens":131}"#,
            ]
        );
    }

    #[test]
    fn thoughts_and_inline_images() {
        let out = run(
            Vendor::VertexAi,
            &[json!({"candidates": [{"content": {"parts": [
                {"text": "pondering", "thought": true},
                {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgoAA"}},
                {"text": "done"}
            ]}}]})],
        );
        assert_eq!(
            out,
            vec![
                "reasoning:\"pondering\"",
                "base64_image:\"data:image/png;base64,iVBORw0KGgoAA\"",
                "text:\"done\"",
            ]
        );
    }

    #[test]
    fn grounding_precedes_stop() {
        let out = run(
            Vendor::Google,
            &[json!({"candidates": [{
                "content": {"parts": [{"text": "45678"}], "role": "model"},
                "finishReason": "STOP",
                "groundingMetadata": {
                    "groundingChunks": [
                        {"web": {"uri": "https://a.example/1", "title": "npmjs.com"}},
                        {"web": {"uri": "https://a.example/2", "title": "google.dev"}}
                    ],
                    "webSearchQueries": ["sdk latest version"]
                }
            }]})],
        );
        assert_eq!(
            out,
            vec![
                "text:\"45678\"",
                r#"grounding:{"citations":[{"favicon":"npmjs.com","title":"npmjs.com","url":"https://a.example/1"},{"favicon":"google.dev","title":"google.dev","url":"https://a.example/2"}],"searchQueries":["sdk latest version"]}"#,
                "stop:\"STOP\"",
            ]
        );
    }

    #[test]
    fn empty_grounding_is_skipped() {
        let out = run(
            Vendor::Google,
            &[json!({"candidates": [{"content": {"parts": [{"text": "x"}]}, "finishReason": "STOP", "groundingMetadata": {}}]})],
        );
        assert_eq!(out, vec!["text:\"x\"", "stop:\"STOP\""]);
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let out = run(
            Vendor::Google,
            &[json!({"promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}, "responseId": "THOU"})],
        );
        assert_eq!(
            out,
            vec![r#"error:{"body":{"context":{"promptFeedback":{"blockReason":"PROHIBITED_CONTENT"}},"message":"Your request may contain prohibited content. Please adjust your request to comply with the usage guidelines.","provider":"google"},"type":"ProviderBizError"}"#]
        );
    }

    #[test]
    fn chunk_without_parts_is_empty_text() {
        let out = run(Vendor::Google, &[json!({"candidates": [{"content": {"role": "model"}}]})]);
        assert_eq!(out, vec!["text:\"\""]);
    }
}
