//! Ollama `/api/chat` NDJSON chunks.
//!
//! Ollama interleaves `thinking` and `content` without boundaries; reasoning is
//! forwarded as text wrapped in a synthesized `<think>` section.
use serde_json::Value;

use super::{TransformResult, as_object, str_field, usage_event};
use crate::context::StreamContext;
use crate::event::{CanonicalEvent, EventData};
use crate::tool_calls::RawToolCall;
use crate::usage;

pub fn transform(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let obj = as_object(chunk)?;
    let id = ctx.ensure_id();
    let message = obj.get("message");
    let mut events = Vec::new();

    if let Some(calls) = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
    {
        let raws = calls.iter().map(RawToolCall::from_openai).collect();
        let fragments = ctx.tool_calls.resolve(raws);
        events.push(CanonicalEvent::new(id.clone(), EventData::ToolCalls(fragments)));
    }

    if let Some(thinking) = message
        .and_then(|m| str_field(m, "thinking"))
        .filter(|t| !t.is_empty())
    {
        events.push(CanonicalEvent::text(id.clone(), ctx.reasoning_delta(thinking)));
    }

    let content = message.and_then(|m| str_field(m, "content")).unwrap_or_default();
    let done = obj.get("done").and_then(Value::as_bool).unwrap_or(false);

    if !content.is_empty() {
        events.push(CanonicalEvent::text(id.clone(), ctx.answer_delta(content)));
    } else if !done && events.is_empty() {
        events.push(CanonicalEvent::text(id.clone(), ""));
    }

    if done {
        let reason = str_field(chunk, "done_reason").unwrap_or("finished");
        events.push(CanonicalEvent::stop(id, reason));
        let prompt = obj.get("prompt_eval_count").and_then(Value::as_u64);
        let completion = obj.get("eval_count").and_then(Value::as_u64);
        if prompt.is_some() || completion.is_some() {
            let usage = usage::from_counts(prompt.unwrap_or(0), completion.unwrap_or(0));
            events.extend(usage_event(ctx, usage));
        }
    }
    Ok(events)
}
