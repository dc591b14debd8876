use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::errors::ChatMessageError;
use crate::tool_calls::ToolCallFragment;
use crate::usage::ModelUsage;

/// Event kind as written on the `event:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Text,
    Base64Image,
    ToolCalls,
    Reasoning,
    ReasoningSignature,
    FlaggedReasoningSignature,
    Grounding,
    Stop,
    Error,
    Usage,
    Speed,
    Data,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Base64Image => "base64_image",
            Self::ToolCalls => "tool_calls",
            Self::Reasoning => "reasoning",
            Self::ReasoningSignature => "reasoning_signature",
            Self::FlaggedReasoningSignature => "flagged_reasoning_signature",
            Self::Grounding => "grounding",
            Self::Stop => "stop",
            Self::Error => "error",
            Self::Usage => "usage",
            Self::Speed => "speed",
            Self::Data => "data",
        }
    }

    /// `stop` and `error` close a well-formed stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stop | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown event kind: {s}"))
    }
}

/// One source attribution inside a grounding record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
}

impl Citation {
    pub fn new(title: Option<String>, url: impl Into<String>) -> Self {
        Self {
            favicon: None,
            title,
            url: url.into(),
        }
    }
}

/// Search grounding attached to an answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Grounding {
    pub citations: Vec<Citation>,
    #[serde(
        default,
        rename = "searchQueries",
        skip_serializing_if = "Option::is_none"
    )]
    pub search_queries: Option<Vec<String>>,
}

impl Grounding {
    pub fn from_citations(citations: Vec<Citation>) -> Self {
        Self {
            citations,
            search_queries: None,
        }
    }
}

/// Output throughput computed at end of stream.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpeed {
    /// Output tokens per second after the first output event.
    pub tps: f64,
    /// Milliseconds from input start to first output event.
    pub ttft: u64,
}

/// Kind-dependent payload of a canonical event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Text(String),
    Base64Image(String),
    ToolCalls(Vec<ToolCallFragment>),
    Reasoning(String),
    ReasoningSignature(String),
    FlaggedReasoningSignature(String),
    Grounding(Grounding),
    Stop(String),
    Error(ChatMessageError),
    Usage(ModelUsage),
    Speed(ModelSpeed),
    /// Unclassified native content, forwarded as-is.
    Data(Value),
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Text(_) => EventKind::Text,
            Self::Base64Image(_) => EventKind::Base64Image,
            Self::ToolCalls(_) => EventKind::ToolCalls,
            Self::Reasoning(_) => EventKind::Reasoning,
            Self::ReasoningSignature(_) => EventKind::ReasoningSignature,
            Self::FlaggedReasoningSignature(_) => EventKind::FlaggedReasoningSignature,
            Self::Grounding(_) => EventKind::Grounding,
            Self::Stop(_) => EventKind::Stop,
            Self::Error(_) => EventKind::Error,
            Self::Usage(_) => EventKind::Usage,
            Self::Speed(_) => EventKind::Speed,
            Self::Data(_) => EventKind::Data,
        }
    }

    /// Serializes the payload alone, as written on the `data:` line.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Text(s)
            | Self::Base64Image(s)
            | Self::Reasoning(s)
            | Self::ReasoningSignature(s)
            | Self::FlaggedReasoningSignature(s)
            | Self::Stop(s) => serde_json::to_string(s),
            Self::ToolCalls(calls) => serde_json::to_string(calls),
            Self::Grounding(g) => serde_json::to_string(g),
            Self::Error(e) => serde_json::to_string(e),
            Self::Usage(u) => serde_json::to_string(u),
            Self::Speed(s) => serde_json::to_string(s),
            Self::Data(v) => serde_json::to_string(v),
        }
    }

    /// Rebuilds a typed payload from a decoded `event:`/`data:` pair.
    pub fn from_parts(kind: EventKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::Text => Self::Text(serde_json::from_value(value)?),
            EventKind::Base64Image => Self::Base64Image(serde_json::from_value(value)?),
            EventKind::ToolCalls => Self::ToolCalls(serde_json::from_value(value)?),
            EventKind::Reasoning => Self::Reasoning(serde_json::from_value(value)?),
            EventKind::ReasoningSignature => {
                Self::ReasoningSignature(serde_json::from_value(value)?)
            }
            EventKind::FlaggedReasoningSignature => {
                Self::FlaggedReasoningSignature(serde_json::from_value(value)?)
            }
            EventKind::Grounding => Self::Grounding(serde_json::from_value(value)?),
            EventKind::Stop => Self::Stop(serde_json::from_value(value)?),
            EventKind::Error => Self::Error(serde_json::from_value(value)?),
            EventKind::Usage => Self::Usage(serde_json::from_value(value)?),
            EventKind::Speed => Self::Speed(serde_json::from_value(value)?),
            EventKind::Data => Self::Data(value),
        })
    }
}

/// The unit flowing between pipeline stages.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub id: String,
    pub data: EventData,
}

impl CanonicalEvent {
    pub fn new(id: impl Into<String>, data: EventData) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, EventData::Text(text.into()))
    }

    pub fn reasoning(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, EventData::Reasoning(text.into()))
    }

    pub fn stop(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(id, EventData::Stop(reason.into()))
    }

    pub fn data(id: impl Into<String>, value: Value) -> Self {
        Self::new(id, EventData::Data(value))
    }

    pub fn usage(id: impl Into<String>, usage: ModelUsage) -> Self {
        Self::new(id, EventData::Usage(usage))
    }
}
