//! Bedrock Llama invoke chunks and Converse stream events.
//!
//! Neither shape carries a message id, so the context assigns one on the
//! first chunk.
use serde_json::Value;

use super::{TransformResult, as_object, str_field, usage_event};
use crate::context::StreamContext;
use crate::event::{CanonicalEvent, EventData};
use crate::tool_calls::{RawToolCall, arguments_text};
use crate::usage;

pub fn transform_llama(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    as_object(chunk)?;
    let id = ctx.ensure_id();

    if let Some(reason) = str_field(chunk, "stop_reason").filter(|r| !r.is_empty()) {
        let mut events = vec![CanonicalEvent::stop(id, reason)];
        let prompt = chunk.get("prompt_token_count").and_then(Value::as_u64);
        let completion = chunk.get("generation_token_count").and_then(Value::as_u64);
        if prompt.is_some() || completion.is_some() {
            let usage = usage::from_counts(prompt.unwrap_or(0), completion.unwrap_or(0));
            events.extend(usage_event(ctx, usage));
        }
        return Ok(events);
    }

    Ok(vec![CanonicalEvent::text(id, str_field(chunk, "generation").unwrap_or_default())])
}

pub fn transform_converse(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let obj = as_object(chunk)?;
    let id = ctx.ensure_id();

    if let Some(start) = obj.get("contentBlockStart").and_then(|b| b.get("start"))
        && let Some(tool) = start.get("toolUse")
    {
        let call = RawToolCall::start(
            str_field(tool, "toolUseId").map(ToOwned::to_owned),
            str_field(tool, "name").unwrap_or_default(),
            "",
        );
        let fragments = ctx.tool_calls.resolve(vec![call]);
        return Ok(vec![CanonicalEvent::new(id, EventData::ToolCalls(fragments))]);
    }

    if let Some(delta) = obj.get("contentBlockDelta").and_then(|b| b.get("delta")) {
        if let Some(text) = str_field(delta, "text") {
            return Ok(vec![CanonicalEvent::text(id, text)]);
        }
        if let Some(text) = delta.get("reasoningContent").and_then(|r| str_field(r, "text")) {
            return Ok(vec![CanonicalEvent::reasoning(id, text)]);
        }
        if let Some(input) = delta.get("toolUse").and_then(|t| t.get("input")) {
            let arguments = arguments_text(input).unwrap_or_default();
            let fragments = ctx.tool_calls.resolve(vec![RawToolCall::continuation(arguments)]);
            return Ok(vec![CanonicalEvent::new(id, EventData::ToolCalls(fragments))]);
        }
    }

    if let Some(reason) = obj.get("messageStop").and_then(|m| str_field(m, "stopReason")) {
        return Ok(vec![CanonicalEvent::stop(id, reason)]);
    }

    if let Some(raw) = obj.get("metadata").and_then(|m| m.get("usage")) {
        let read = |key: &str| raw.get(key).and_then(Value::as_u64).unwrap_or(0);
        let usage = usage::from_counts(read("inputTokens"), read("outputTokens"));
        return Ok(usage_event(ctx, usage));
    }

    Ok(vec![CanonicalEvent::data(id, chunk.clone())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vendor;
    use crate::vendors::test_support::{ctx, render};
    use serde_json::json;

    #[test]
    fn llama_generations_then_stop_with_usage() {
        let mut ctx = ctx(Vendor::BedrockLlama);
        let chunks = [
            json!({"generation": "Hello", "generation_token_count": 1, "prompt_token_count": null, "stop_reason": null}),
            json!({"generation": "", "generation_token_count": 13, "prompt_token_count": 12, "stop_reason": "stop"}),
        ];
        let events: Vec<_> = chunks
            .iter()
            .flat_map(|c| transform_llama(c, &mut ctx).expect("transform"))
            .collect();

        assert!(ctx.id.starts_with("chat_"));
        assert!(events.iter().all(|e| e.id == ctx.id));
        let rendered: Vec<_> = events.iter().map(render).collect();
        assert_eq!(
            rendered,
            vec![
                "text:\"Hello\"".to_string(),
                "stop:\"stop\"".to_string(),
                r#"usage:{"inputTextTokens":12,"outputTextTokens":13,"totalInputTokens":12,"totalOutputTokens":13,"totalTokens":25}"#.to_string(),
            ]
        );
    }

    #[test]
    fn converse_tool_use_reasoning_and_metadata() {
        let chunks = [
            json!({"messageStart": {"role": "assistant"}}),
            json!({"contentBlockDelta": {"contentBlockIndex": 0, "delta": {"reasoningContent": {"text": "hmm"}}}}),
            json!({"contentBlockStart": {"contentBlockIndex": 1, "start": {"toolUse": {"toolUseId": "tooluse_1", "name": "get_weather"}}}}),
            json!({"contentBlockDelta": {"contentBlockIndex": 1, "delta": {"toolUse": {"input": "{\"city\":\"Paris\"}"}}}}),
            json!({"messageStop": {"stopReason": "tool_use"}}),
            json!({"metadata": {"usage": {"inputTokens": 10, "outputTokens": 5, "totalTokens": 15}}}),
        ];
        let out = crate::vendors::test_support::run(Vendor::BedrockConverse, &chunks);
        assert_eq!(
            out,
            vec![
                r#"data:{"messageStart":{"role":"assistant"}}"#,
                "reasoning:\"hmm\"",
                r#"tool_calls:[{"function":{"arguments":"","name":"get_weather"},"id":"tooluse_1","index":0,"type":"function"}]"#,
                r#"tool_calls:[{"function":{"arguments":"{\"city\":\"Paris\"}"},"id":"tooluse_1","index":0,"type":"function"}]"#,
                "stop:\"tool_use\"",
                r#"usage:{"inputTextTokens":10,"outputTextTokens":5,"totalInputTokens":10,"totalOutputTokens":5,"totalTokens":15}"#,
            ]
        );
    }
}
