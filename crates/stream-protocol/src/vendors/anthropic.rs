//! Anthropic Messages events; Bedrock Claude streams share the shape.
use serde_json::Value;

use super::{TransformResult, as_object, str_field, usage_event};
use crate::context::StreamContext;
use crate::errors::TransformFault;
use crate::event::{CanonicalEvent, Citation, EventData, Grounding};
use crate::tool_calls::RawToolCall;
use crate::usage;

pub fn transform(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let obj = as_object(chunk)?;
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(TransformFault::MissingField("type"))?;

    match kind {
        "message_start" => {
            let message = obj.get("message").ok_or(TransformFault::MissingField("message"))?;
            if let Some(id) = str_field(message, "id") {
                ctx.capture_id(id);
            }
            ctx.input_usage = message.get("usage").cloned();
            Ok(vec![CanonicalEvent::data(ctx.id.clone(), message.clone())])
        }
        "content_block_start" => block_start(chunk, ctx),
        "content_block_delta" => block_delta(chunk, ctx),
        "message_delta" => {
            let id = ctx.id.clone();
            let reason = obj
                .get("delta")
                .and_then(|d| str_field(d, "stop_reason"))
                .unwrap_or("stop")
                .to_string();
            let mut events = vec![CanonicalEvent::stop(id, reason)];
            if let Some(output) = obj.get("usage").filter(|u| u.is_object()) {
                let usage = usage::from_anthropic(ctx.input_usage.as_ref(), output);
                events.extend(usage_event(ctx, usage));
            }
            Ok(events)
        }
        "message_stop" => Ok(vec![CanonicalEvent::stop(ctx.id.clone(), "message_stop")]),
        _ => Ok(vec![CanonicalEvent::data(ctx.id.clone(), chunk.clone())]),
    }
}

fn block_start(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let id = ctx.id.clone();
    let block = chunk
        .get("content_block")
        .ok_or(TransformFault::MissingField("content_block"))?;

    let event = match str_field(block, "type") {
        Some("text") => CanonicalEvent::data(id, Value::String(String::new())),
        Some("thinking") => CanonicalEvent::reasoning(id, ""),
        Some("redacted_thinking") => CanonicalEvent::new(
            id,
            EventData::FlaggedReasoningSignature(str_field(block, "data").unwrap_or_default().to_string()),
        ),
        Some("tool_use") => {
            let name = str_field(block, "name").unwrap_or_default();
            let call = RawToolCall::start(str_field(block, "id").map(ToOwned::to_owned), name, "");
            let fragments = ctx.tool_calls.resolve(vec![call]);
            CanonicalEvent::new(id, EventData::ToolCalls(fragments))
        }
        _ => CanonicalEvent::data(id, chunk.clone()),
    };
    Ok(vec![event])
}

fn block_delta(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let id = ctx.id.clone();
    let delta = chunk.get("delta").ok_or(TransformFault::MissingField("delta"))?;
    let text_of = |key: &str| str_field(delta, key).unwrap_or_default().to_string();

    let event = match str_field(delta, "type") {
        Some("text_delta") => CanonicalEvent::text(id, text_of("text")),
        Some("thinking_delta") => CanonicalEvent::reasoning(id, text_of("thinking")),
        Some("signature_delta") => {
            CanonicalEvent::new(id, EventData::ReasoningSignature(text_of("signature")))
        }
        Some("input_json_delta") => {
            let fragments = ctx
                .tool_calls
                .resolve(vec![RawToolCall::continuation(text_of("partial_json"))]);
            CanonicalEvent::new(id, EventData::ToolCalls(fragments))
        }
        Some("citations_delta") => {
            if let Some(citation) = delta.get("citation") {
                let url = str_field(citation, "url").unwrap_or_default();
                let title = str_field(citation, "title").map(ToOwned::to_owned);
                ctx.citations.push(Citation::new(title, url));
            }
            CanonicalEvent::new(id, EventData::Grounding(Grounding::from_citations(ctx.citations.clone())))
        }
        _ => CanonicalEvent::data(id, chunk.clone()),
    };
    Ok(vec![event])
}
