//! Replays a synchronous OpenAI-style completion as a short chunk stream.
use serde_json::{Map, Value, json};

/// Splits a `chat.completion` body into delta, optional usage, and finish chunks.
///
/// The chunks use the OpenAI streaming shape, so they run through the
/// [`openai`](super::openai) transformer like any live stream.
pub fn completion_to_chunks(completion: &Value) -> Vec<Value> {
    let id = completion.get("id").cloned().unwrap_or(Value::Null);
    let model = completion.get("model").cloned().unwrap_or(Value::Null);
    let created = completion.get("created").cloned().unwrap_or(Value::Null);
    let choice = completion
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first());
    let message = choice.and_then(|c| c.get("message"));
    let index = choice.and_then(|c| c.get("index")).cloned().unwrap_or(json!(0));
    let role = message
        .and_then(|m| m.get("role"))
        .cloned()
        .unwrap_or_else(|| json!("assistant"));

    let mut delta = Map::new();
    delta.insert(
        "content".into(),
        message.and_then(|m| m.get("content")).cloned().unwrap_or(Value::Null),
    );
    if let Some(reasoning) = message
        .and_then(|m| m.get("reasoning_content"))
        .filter(|r| !r.is_null())
    {
        delta.insert("reasoning_content".into(), reasoning.clone());
    }
    delta.insert("role".into(), role.clone());
    if let Some(calls) = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
    {
        let indexed = calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                let mut call = call.clone();
                if let Some(obj) = call.as_object_mut() {
                    obj.insert("index".into(), json!(i));
                }
                call
            })
            .collect();
        delta.insert("tool_calls".into(), Value::Array(indexed));
    }

    let chunk = |choices: Value| {
        json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": choices,
        })
    };

    let mut chunks = vec![chunk(json!([{
        "delta": Value::Object(delta),
        "finish_reason": null,
        "index": index,
    }]))];
    if let Some(usage) = completion.get("usage").filter(|u| u.is_object()) {
        let mut usage_chunk = chunk(json!([]));
        usage_chunk["usage"] = usage.clone();
        chunks.push(usage_chunk);
    }
    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .cloned()
        .unwrap_or_else(|| json!("stop"));
    chunks.push(chunk(json!([{
        "delta": {"content": null, "role": role},
        "finish_reason": finish_reason,
        "index": index,
    }])));
    chunks
}
