use std::fmt;
use std::str::FromStr;

use crate::errors::StreamError;

/// Stable identifier for the backend that produced a stream (for example `openai`).
///
/// Used for error attribution and usage conversion; distinct from [`Vendor`],
/// which selects the wire shape.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Creates a provider id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the provider id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Native wire shape a stream is decoded with.
///
/// Selected by the caller at subscription time; never inferred from chunks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    /// OpenAI-compatible chat completion chunks (also the target of synthesized
    /// non-streaming responses).
    OpenAi,
    /// Azure OpenAI SDK with camelCase fields.
    AzureOpenAi,
    /// OpenAI Responses API typed events.
    OpenAiResponses,
    Anthropic,
    /// Claude models served through Bedrock (Anthropic event shape).
    BedrockClaude,
    BedrockLlama,
    BedrockConverse,
    Google,
    VertexAi,
    /// Reasoning and answer text without boundary markers.
    Ollama,
    /// Raw text units that may duplicate the first data frame.
    Cloudflare,
}

impl Vendor {
    pub const ALL: [Vendor; 11] = [
        Vendor::OpenAi,
        Vendor::AzureOpenAi,
        Vendor::OpenAiResponses,
        Vendor::Anthropic,
        Vendor::BedrockClaude,
        Vendor::BedrockLlama,
        Vendor::BedrockConverse,
        Vendor::Google,
        Vendor::VertexAi,
        Vendor::Ollama,
        Vendor::Cloudflare,
    ];

    /// Returns the snake_case name used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::AzureOpenAi => "azure_openai",
            Self::OpenAiResponses => "openai_responses",
            Self::Anthropic => "anthropic",
            Self::BedrockClaude => "bedrock_claude",
            Self::BedrockLlama => "bedrock_llama",
            Self::BedrockConverse => "bedrock_converse",
            Self::Google => "google",
            Self::VertexAi => "vertex_ai",
            Self::Ollama => "ollama",
            Self::Cloudflare => "cloudflare",
        }
    }

    /// Provider id used when the caller does not supply one.
    pub fn default_provider(self) -> ProviderId {
        let name = match self {
            Self::OpenAi | Self::OpenAiResponses => "openai",
            Self::AzureOpenAi => "azure",
            Self::Anthropic => "anthropic",
            Self::BedrockClaude | Self::BedrockLlama | Self::BedrockConverse => "bedrock",
            Self::Google => "google",
            Self::VertexAi => "vertexai",
            Self::Ollama => "ollama",
            Self::Cloudflare => "cloudflare",
        };
        ProviderId::new(name)
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| StreamError::Config(format!("unknown vendor: {s}")))
    }
}
