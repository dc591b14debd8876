//! Token usage record shared by every vendor, plus the per-vendor converters.
//!
//! Fields are declared alphabetically so serialized records are stable.
use serde_json::Value;

/// Normalized token accounting for one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_prediction_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cache_miss_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cached_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_image_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_text_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_image_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_text_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_prediction_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl ModelUsage {
    /// Output tokens used for throughput; falls back through the finer fields.
    pub fn output_tokens(&self) -> u64 {
        self.total_output_tokens.unwrap_or_else(|| {
            self.output_text_tokens.unwrap_or(0) + self.output_reasoning_tokens.unwrap_or(0)
        })
    }

    fn drop_zeros(mut self) -> Self {
        for field in [
            &mut self.accepted_prediction_tokens,
            &mut self.input_audio_tokens,
            &mut self.input_cache_miss_tokens,
            &mut self.input_cached_tokens,
            &mut self.input_cached_write_tokens,
            &mut self.input_image_tokens,
            &mut self.input_text_tokens,
            &mut self.output_audio_tokens,
            &mut self.output_image_tokens,
            &mut self.output_reasoning_tokens,
            &mut self.output_text_tokens,
            &mut self.rejected_prediction_tokens,
            &mut self.total_input_tokens,
            &mut self.total_output_tokens,
            &mut self.total_tokens,
        ] {
            if *field == Some(0) {
                *field = None;
            }
        }
        self
    }
}

fn count(value: &Value, path: &[&str]) -> Option<u64> {
    let mut cur = value;
    for key in path {
        cur = cur.get(*key)?;
    }
    cur.as_u64()
}

/// OpenAI-compatible `usage` object (`prompt_tokens`, `completion_tokens`, details).
pub fn from_openai(usage: &Value) -> ModelUsage {
    let prompt = count(usage, &["prompt_tokens"]).unwrap_or(0);
    let completion = count(usage, &["completion_tokens"]).unwrap_or(0);
    let cached = count(usage, &["prompt_cache_hit_tokens"])
        .or_else(|| count(usage, &["prompt_tokens_details", "cached_tokens"]));
    let cache_miss = count(usage, &["prompt_cache_miss_tokens"])
        .or_else(|| cached.map(|c| prompt.saturating_sub(c)));
    let reasoning = count(usage, &["completion_tokens_details", "reasoning_tokens"]).unwrap_or(0);
    let audio_out = count(usage, &["completion_tokens_details", "audio_tokens"]).unwrap_or(0);

    ModelUsage {
        accepted_prediction_tokens: count(
            usage,
            &["completion_tokens_details", "accepted_prediction_tokens"],
        ),
        input_audio_tokens: count(usage, &["prompt_tokens_details", "audio_tokens"]),
        input_cache_miss_tokens: cache_miss,
        input_cached_tokens: cached,
        input_text_tokens: Some(prompt),
        output_audio_tokens: Some(audio_out),
        output_reasoning_tokens: Some(reasoning),
        output_text_tokens: Some(completion.saturating_sub(reasoning + audio_out)),
        rejected_prediction_tokens: count(
            usage,
            &["completion_tokens_details", "rejected_prediction_tokens"],
        ),
        total_input_tokens: Some(prompt),
        total_output_tokens: Some(completion),
        total_tokens: count(usage, &["total_tokens"]).or(Some(prompt + completion)),
        ..ModelUsage::default()
    }
    .drop_zeros()
}

/// Google `usageMetadata`.
///
/// `outputTextTokens` is kept even when zero so a finished stream always
/// reports its output side.
pub fn from_google(meta: &Value) -> ModelUsage {
    let mut usage = ModelUsage::default();
    if let Some(details) = meta.get("promptTokensDetails").and_then(Value::as_array) {
        for detail in details {
            let tokens = detail.get("tokenCount").and_then(Value::as_u64);
            match detail.get("modality").and_then(Value::as_str) {
                Some("TEXT") => usage.input_text_tokens = tokens,
                Some("IMAGE") => usage.input_image_tokens = tokens,
                Some("AUDIO") => usage.input_audio_tokens = tokens,
                _ => {}
            }
        }
    }
    let prompt = count(meta, &["promptTokenCount"]).unwrap_or(0);
    let candidates = count(meta, &["candidatesTokenCount"]).unwrap_or(0);
    let thoughts = count(meta, &["thoughtsTokenCount"]).unwrap_or(0);
    usage.input_cached_tokens = count(meta, &["cachedContentTokenCount"]);
    if usage.input_text_tokens.is_none() && usage.input_image_tokens.is_none() {
        usage.input_text_tokens = Some(prompt);
    }
    usage.output_reasoning_tokens = Some(thoughts);
    usage.total_input_tokens = Some(prompt);
    usage.total_output_tokens = Some(candidates + thoughts);
    usage.total_tokens = count(meta, &["totalTokenCount"]).or(Some(prompt + candidates + thoughts));
    let kept_text = candidates;
    let mut usage = usage.drop_zeros();
    usage.output_text_tokens = Some(kept_text);
    usage
}

/// Anthropic split accounting: input from `message_start`, output from `message_delta`.
pub fn from_anthropic(input: Option<&Value>, output: &Value) -> ModelUsage {
    let read = |key: &str| {
        input
            .and_then(|v| count(v, &[key]))
            .or_else(|| count(output, &[key]))
            .unwrap_or(0)
    };
    let input_tokens = read("input_tokens");
    let cache_read = read("cache_read_input_tokens");
    let cache_write = read("cache_creation_input_tokens");
    let output_tokens = count(output, &["output_tokens"]).unwrap_or(0);
    let total_input = input_tokens + cache_read + cache_write;

    ModelUsage {
        input_cache_miss_tokens: Some(input_tokens),
        input_cached_tokens: Some(cache_read),
        input_cached_write_tokens: Some(cache_write),
        output_text_tokens: Some(output_tokens),
        total_input_tokens: Some(total_input),
        total_output_tokens: Some(output_tokens),
        total_tokens: Some(total_input + output_tokens),
        ..ModelUsage::default()
    }
    .drop_zeros()
}

/// Responses API `response.usage`.
pub fn from_responses(usage: &Value) -> ModelUsage {
    let input = count(usage, &["input_tokens"]).unwrap_or(0);
    let output = count(usage, &["output_tokens"]).unwrap_or(0);
    let cached = count(usage, &["input_tokens_details", "cached_tokens"]);
    let reasoning = count(usage, &["output_tokens_details", "reasoning_tokens"]).unwrap_or(0);

    ModelUsage {
        input_cache_miss_tokens: cached.map(|c| input.saturating_sub(c)),
        input_cached_tokens: cached,
        input_text_tokens: Some(input),
        output_reasoning_tokens: Some(reasoning),
        output_text_tokens: Some(output.saturating_sub(reasoning)),
        total_input_tokens: Some(input),
        total_output_tokens: Some(output),
        total_tokens: count(usage, &["total_tokens"]).or(Some(input + output)),
        ..ModelUsage::default()
    }
    .drop_zeros()
}

/// Plain prompt/completion counters (Ollama, Bedrock Llama, Converse metadata).
pub fn from_counts(prompt: u64, completion: u64) -> ModelUsage {
    ModelUsage {
        input_text_tokens: Some(prompt),
        output_text_tokens: Some(completion),
        total_input_tokens: Some(prompt),
        total_output_tokens: Some(completion),
        total_tokens: Some(prompt + completion),
        ..ModelUsage::default()
    }
    .drop_zeros()
}
