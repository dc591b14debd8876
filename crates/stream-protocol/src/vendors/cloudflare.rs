//! Cloudflare Workers AI: raw SSE text units instead of parsed chunks.
//!
//! Units may split a frame anywhere, so text is buffered in the context until
//! a blank-line terminator arrives.
use serde_json::Value;
use tracing::error;

use super::{TransformResult, str_field, usage_event};
use crate::context::StreamContext;
use crate::envelope::chunk_fault_event;
use crate::errors::TransformFault;
use crate::event::{CanonicalEvent, EventData};
use crate::frame::{DATA_MARKER, DONE_SENTINEL, dedupe_double_data};
use crate::tool_calls::{RawToolCall, arguments_text};
use crate::usage;

const FRAME_END: &str = "\n\n";
const END_OF_TURN: &str = "<|im_end|>";

pub fn transform(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    let id = ctx.ensure_id();
    let unit = match chunk {
        Value::String(unit) => unit,
        Value::Object(_) => return payload_events(&id, chunk, ctx),
        _ => {
            return Err(TransformFault::UnexpectedShape(
                "expected a raw text unit".to_string(),
            ));
        }
    };

    ctx.pending_text.push_str(unit);
    let mut frames = Vec::new();
    while let Some(end) = ctx.pending_text.find(FRAME_END) {
        let frame: String = ctx.pending_text.drain(..end + FRAME_END.len()).collect();
        frames.push(frame);
    }

    // A bad frame faults alone; its siblings in the same unit still emit.
    let mut events = Vec::new();
    for frame in frames {
        match frame_events(&id, &frame, ctx) {
            Ok(derived) => events.extend(derived),
            Err(fault) => {
                error!(fault = fault.name(), error = %fault, frame = %frame, "cloudflare frame failed");
                events.push(chunk_fault_event(&id, &fault, &Value::String(frame)));
            }
        }
    }
    Ok(events)
}

fn frame_events(id: &str, frame: &str, ctx: &mut StreamContext) -> TransformResult {
    let frame = dedupe_double_data(frame).trim();
    let payload = frame.strip_prefix(DATA_MARKER).unwrap_or(frame).trim();
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    if payload == DONE_SENTINEL {
        return Ok(vec![CanonicalEvent::stop(id, "finished")]);
    }
    let value: Value = serde_json::from_str(payload)?;
    payload_events(id, &value, ctx)
}

fn payload_events(id: &str, payload: &Value, ctx: &mut StreamContext) -> TransformResult {
    // Non-streaming responses wrap the payload in `result`.
    let payload = payload.get("result").filter(|r| r.is_object()).unwrap_or(payload);
    let raw_usage = payload.get("usage").filter(|u| u.is_object());
    let calls = payload
        .get("tool_calls")
        .and_then(Value::as_array)
        .filter(|calls| !calls.is_empty());
    let mut events = Vec::new();

    match str_field(payload, "response") {
        Some(END_OF_TURN) => events.push(CanonicalEvent::stop(id, END_OF_TURN)),
        Some(text) if !text.is_empty() || (raw_usage.is_none() && calls.is_none()) => {
            events.push(CanonicalEvent::text(id, text));
        }
        _ => {}
    }
    if let Some(calls) = calls {
        let raws = calls
            .iter()
            .map(|call| {
                let name = str_field(call, "name").unwrap_or_default();
                let arguments = call.get("arguments").and_then(arguments_text);
                RawToolCall::start(None, name, arguments.unwrap_or_default())
            })
            .collect();
        let fragments = ctx.tool_calls.resolve(raws);
        events.push(CanonicalEvent::new(id, EventData::ToolCalls(fragments)));
    }
    if let Some(raw) = raw_usage {
        events.extend(usage_event(ctx, usage::from_openai(raw)));
    }
    if events.is_empty() && raw_usage.is_none() {
        events.push(CanonicalEvent::data(id, payload.clone()));
    }
    Ok(events)
}
