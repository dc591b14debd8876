//! Error envelopes: faults become typed `error` events instead of aborting.
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::errors::{ChatErrorType, ChatMessageError, ProviderError, TransformFault};
use crate::event::{CanonicalEvent, EventData};
use crate::model::ProviderId;

/// Id carried by the error event of a stream that failed before any data.
pub const FIRST_CHUNK_ERROR_ID: &str = "first_chunk_error";

const CHUNK_PARSE_MESSAGE: &str =
    "chat response streaming chunk parse error, please contact your API Provider to fix it.";

/// Caller mapping from a startup failure to the shared error taxonomy.
pub type ErrorClassifier = Arc<dyn Fn(&FirstChunkError) -> Option<ChatErrorType> + Send + Sync>;

/// A startup failure tagged with the backend that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstChunkError {
    pub provider: ProviderId,
    pub message: String,
    pub name: &'static str,
    pub status_code: Option<u16>,
    pub error_type: Option<ChatErrorType>,
    /// Raw provider error payload, when the source captured one.
    pub body: Option<Value>,
}

impl From<&ProviderError> for FirstChunkError {
    fn from(err: &ProviderError) -> Self {
        let status_code = match err {
            ProviderError::Provider { status_code, .. } => *status_code,
            _ => None,
        };
        Self {
            provider: err.provider_id().clone(),
            message: err.message().to_string(),
            name: err.name(),
            status_code,
            error_type: err.error_type(),
            body: err.body().cloned(),
        }
    }
}

/// Wraps a failure of the very first source read.
///
/// A classifier decides the type and, when it does, the body is attributed to
/// the provider. Otherwise the error's own type is used, falling back to
/// `ProviderBizError`.
pub fn first_chunk_event(err: &ProviderError, classifier: Option<&ErrorClassifier>) -> CanonicalEvent {
    let tagged = FirstChunkError::from(err);
    let classified = classifier.and_then(|classify| classify(&tagged));

    // Fields of an object body sit next to the summary fields.
    let mut body = Map::new();
    match tagged.body {
        Some(Value::Object(raw)) => body.extend(raw),
        Some(raw) => {
            body.insert("error".into(), raw);
        }
        None => {}
    }
    let error_type = match classified {
        Some(kind) => {
            body.insert("message".into(), Value::String(tagged.message.clone()));
            body.insert("errorType".into(), Value::String(kind.as_str().into()));
            body.insert("provider".into(), Value::String(tagged.provider.to_string()));
            kind
        }
        None => {
            let kind = tagged.error_type.unwrap_or(ChatErrorType::ProviderBizError);
            body.insert("errorType".into(), Value::String(kind.as_str().into()));
            body.insert("message".into(), Value::String(tagged.message.clone()));
            kind
        }
    };
    CanonicalEvent::new(
        FIRST_CHUNK_ERROR_ID,
        EventData::Error(ChatMessageError::new(error_type, Value::Object(body))),
    )
}

/// Wraps a transformer fault on one native chunk; the stream keeps going.
pub fn chunk_fault_event(id: &str, fault: &TransformFault, chunk: &Value) -> CanonicalEvent {
    let body = json!({
        "message": CHUNK_PARSE_MESSAGE,
        "context": {
            "error": {"message": fault.to_string(), "name": fault.name()},
            "chunk": chunk,
        },
    });
    CanonicalEvent::new(
        id,
        EventData::Error(ChatMessageError::new(ChatErrorType::StreamChunkError, body)),
    )
}

/// Wraps a source failure after data already flowed.
pub fn source_failure_event(id: &str, err: &ProviderError) -> CanonicalEvent {
    let kind = err.error_type().unwrap_or(ChatErrorType::ProviderBizError);
    let mut body = json!({
        "message": err.message(),
        "name": err.name(),
        "provider": err.provider_id().as_str(),
    });
    if let (Some(raw), Value::Object(map)) = (err.body(), &mut body) {
        map.insert("error".into(), raw.clone());
    }
    CanonicalEvent::new(id, EventData::Error(ChatMessageError::new(kind, body)))
}

/// Appended when a stream that must terminate explicitly just stops.
pub fn unexpected_end_event(id: &str) -> CanonicalEvent {
    let body = json!({"name": "Stream parsing error", "reason": "unexpected_end"});
    let payload = ChatMessageError::new(ChatErrorType::StreamChunkError, body)
        .with_summary("Stream parsing error", "Stream ended unexpectedly");
    CanonicalEvent::new(id, EventData::Error(payload))
}
