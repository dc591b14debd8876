//! Per-vendor transformers.
//!
//! Each vendor is an independent function from one native chunk plus the
//! stream context to zero or more canonical events. [`transform`] selects the
//! function from the context's configured [`Vendor`].
use serde_json::{Map, Value};

use crate::context::StreamContext;
use crate::errors::TransformFault;
use crate::event::{CanonicalEvent, EventData};
use crate::model::Vendor;
use crate::usage::ModelUsage;

pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod cloudflare;
pub mod google;
pub mod nonstream;
pub mod ollama;
pub mod openai;
pub mod responses;

/// Events derived from one native chunk, in emission order.
pub type TransformResult = Result<Vec<CanonicalEvent>, TransformFault>;

/// Dispatches one chunk to the transformer of `ctx.vendor`.
pub fn transform(chunk: &Value, ctx: &mut StreamContext) -> TransformResult {
    match ctx.vendor {
        Vendor::OpenAi => openai::transform(chunk, ctx),
        Vendor::AzureOpenAi => azure::transform(chunk, ctx),
        Vendor::OpenAiResponses => responses::transform(chunk, ctx),
        Vendor::Anthropic | Vendor::BedrockClaude => anthropic::transform(chunk, ctx),
        Vendor::BedrockLlama => bedrock::transform_llama(chunk, ctx),
        Vendor::BedrockConverse => bedrock::transform_converse(chunk, ctx),
        Vendor::Google | Vendor::VertexAi => google::transform(chunk, ctx),
        Vendor::Ollama => ollama::transform(chunk, ctx),
        Vendor::Cloudflare => cloudflare::transform(chunk, ctx),
    }
}

pub(crate) fn as_object(chunk: &Value) -> Result<&Map<String, Value>, TransformFault> {
    chunk.as_object().ok_or_else(|| {
        TransformFault::UnexpectedShape(format!("expected a JSON object, got {}", type_name(chunk)))
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// A usage event, or nothing when it repeats the last forwarded record.
pub(crate) fn usage_event(ctx: &mut StreamContext, usage: ModelUsage) -> Vec<CanonicalEvent> {
    ctx.fresh_usage(usage)
        .map(|usage| CanonicalEvent::new(ctx.id.clone(), EventData::Usage(usage)))
        .into_iter()
        .collect()
}
