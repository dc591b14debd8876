//! Azure OpenAI SDK chunks: the OpenAI shape with camelCase field names.
use serde_json::{Map, Value};

use super::{TransformResult, as_object, str_field};
use crate::context::StreamContext;
use crate::errors::TransformFault;
use crate::event::{CanonicalEvent, EventData};
use crate::tool_calls::RawToolCall;

pub fn transform(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let obj = as_object(chunk)?;
    if let Some(id) = str_field(chunk, "id") {
        ctx.capture_id(id);
    }
    let id = ctx.id.clone();
    let item = obj
        .get("choices")
        .and_then(Value::as_array)
        .ok_or(TransformFault::MissingField("choices"))?
        .first();
    let Some(item) = item else {
        return Ok(vec![CanonicalEvent::data(id, chunk.clone())]);
    };
    let delta = item.get("delta").filter(|d| d.is_object());

    if let Some(calls) = delta
        .and_then(|d| d.get("toolCalls"))
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
    {
        let raws = calls.iter().map(RawToolCall::from_openai).collect();
        let fragments = ctx.tool_calls.resolve(raws);
        return Ok(vec![CanonicalEvent::new(id, EventData::ToolCalls(fragments))]);
    }

    if let Some(reason) = str_field(item, "finishReason").filter(|r| !r.is_empty()) {
        return Ok(vec![CanonicalEvent::stop(id, reason)]);
    }

    if let Some(content) = delta.and_then(|d| str_field(d, "content")) {
        return Ok(vec![CanonicalEvent::text(id, content)]);
    }

    if let Some(delta) = delta
        && delta.get("content").is_some_and(Value::is_null)
    {
        return Ok(vec![CanonicalEvent::data(id, delta.clone())]);
    }

    let mut fallback = Map::new();
    fallback.insert("delta".into(), delta.cloned().unwrap_or(Value::Null));
    fallback.insert("id".into(), Value::String(id.clone()));
    fallback.insert("index".into(), item.get("index").cloned().unwrap_or(Value::Null));
    Ok(vec![CanonicalEvent::data(id, Value::Object(fallback))])
}
