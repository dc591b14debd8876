use serde_json::Value;

use crate::model::ProviderId;

/// Errors yielded by a native chunk source before anything is normalized.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Provider returned an application-level failure (HTTP status, auth, etc.).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
        error_type: Option<ChatErrorType>,
        body: Option<Value>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// Provider response body could not be decoded into chunks.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

impl ProviderError {
    /// Creates a provider-level error.
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
            error_type: status_code.and_then(ChatErrorType::from_status),
            body: None,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Attaches the raw provider error payload. No-op for non-provider errors.
    pub fn with_body(mut self, value: Value) -> Self {
        if let Self::Provider { body, .. } = &mut self {
            *body = Some(value);
        }
        self
    }

    /// Overrides the error type. No-op for non-provider errors.
    pub fn with_error_type(mut self, kind: ChatErrorType) -> Self {
        if let Self::Provider { error_type, .. } = &mut self {
            *error_type = Some(kind);
        }
        self
    }

    /// Returns the provider associated with this error.
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Protocol { provider, .. } => provider,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }

    pub fn error_type(&self) -> Option<ChatErrorType> {
        match self {
            Self::Provider { error_type, .. } => *error_type,
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Provider { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// Short name of the variant, carried as `name` in error payloads.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Provider { .. } => "ProviderError",
            Self::Transport { .. } => "TransportError",
            Self::Protocol { .. } => "ProtocolError",
        }
    }
}

/// Shared error taxonomy attached to every `error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChatErrorType {
    ProviderBizError,
    StreamChunkError,
    PermissionDenied,
    #[serde(rename = "InvalidProviderAPIKey")]
    InvalidProviderApiKey,
    QuotaLimitReached,
    ExceededContextWindow,
    ProviderServiceUnavailable,
    AgentRuntimeError,
}

impl ChatErrorType {
    /// Default mapping for HTTP status codes returned by a backend.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(Self::InvalidProviderApiKey),
            403 => Some(Self::PermissionDenied),
            429 => Some(Self::QuotaLimitReached),
            502..=504 => Some(Self::ProviderServiceUnavailable),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProviderBizError => "ProviderBizError",
            Self::StreamChunkError => "StreamChunkError",
            Self::PermissionDenied => "PermissionDenied",
            Self::InvalidProviderApiKey => "InvalidProviderAPIKey",
            Self::QuotaLimitReached => "QuotaLimitReached",
            Self::ExceededContextWindow => "ExceededContextWindow",
            Self::ProviderServiceUnavailable => "ProviderServiceUnavailable",
            Self::AgentRuntimeError => "AgentRuntimeError",
        }
    }
}

/// Payload of an `error` event: `{"body":…,"type":…}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessageError {
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub error_type: ChatErrorType,
}

impl ChatMessageError {
    pub fn new(error_type: ChatErrorType, body: Value) -> Self {
        Self {
            body,
            message: None,
            name: None,
            error_type,
        }
    }

    pub fn with_summary(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.message = Some(message.into());
        self
    }
}

/// A transformer could not make sense of one native chunk.
///
/// Recoverable: the pipeline turns it into an in-band `error` event and keeps
/// reading.
#[derive(Debug, thiserror::Error)]
pub enum TransformFault {
    #[error("chunk is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unexpected chunk shape: {0}")]
    UnexpectedShape(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TransformFault {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "MissingField",
            Self::UnexpectedShape(_) => "UnexpectedShape",
            Self::Json(_) => "SyntaxError",
        }
    }
}

/// Configuration errors surfaced before a stream is started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid environment or option value.
    #[error("config error: {0}")]
    Config(String),
    /// Option combination that cannot produce a working pipeline.
    #[error("validation error: {0}")]
    Validation(String),
}
