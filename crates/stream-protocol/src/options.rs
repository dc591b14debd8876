use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::callbacks::StreamCallbacks;
use crate::envelope::ErrorClassifier;
use crate::errors::StreamError;
use crate::model::{ProviderId, Vendor};

pub(crate) fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn read_bool_env(key: &str) -> Result<Option<bool>, StreamError> {
    match std::env::var(key) {
        Ok(raw) => parse_bool_env(&raw)
            .map(Some)
            .ok_or_else(|| StreamError::Config(format!("{key} must be a boolean, got `{raw}`"))),
        Err(_) => Ok(None),
    }
}

/// Per-stream configuration.
///
/// Vendor selection is explicit; everything else is optional.
#[derive(Clone)]
pub struct StreamOptions {
    pub vendor: Vendor,
    /// Backend identity for usage conversion and error attribution.
    pub provider: ProviderId,
    pub callbacks: Option<Arc<dyn StreamCallbacks>>,
    /// Maps startup failures to the shared error taxonomy.
    pub error_classifier: Option<ErrorClassifier>,
    /// When set, a `speed` event is appended after usage-bearing streams.
    pub input_start_at: Option<Instant>,
    /// Append an `unexpected_end` error when no `stop`/`error` arrived.
    pub require_terminal_event: bool,
    /// Log every native chunk at debug level.
    pub debug_chunks: bool,
}

impl StreamOptions {
    pub fn new(vendor: Vendor) -> Self {
        Self {
            vendor,
            provider: vendor.default_provider(),
            callbacks: None,
            error_classifier: None,
            input_start_at: None,
            require_terminal_event: false,
            debug_chunks: false,
        }
    }

    /// Reads `STREAM_PROTOCOL_REQUIRE_TERMINAL` and `STREAM_PROTOCOL_DEBUG_CHUNKS`.
    pub fn from_env(vendor: Vendor) -> Result<Self, StreamError> {
        let mut options = Self::new(vendor);
        if let Some(flag) = read_bool_env("STREAM_PROTOCOL_REQUIRE_TERMINAL")? {
            options.require_terminal_event = flag;
        }
        if let Some(flag) = read_bool_env("STREAM_PROTOCOL_DEBUG_CHUNKS")? {
            options.debug_chunks = flag;
        }
        Ok(options)
    }

    pub fn provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn callbacks(mut self, callbacks: Arc<dyn StreamCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn error_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.error_classifier = Some(classifier);
        self
    }

    pub fn input_start_at(mut self, at: Instant) -> Self {
        self.input_start_at = Some(at);
        self
    }

    pub fn require_terminal_event(mut self, required: bool) -> Self {
        self.require_terminal_event = required;
        self
    }

    pub fn debug_chunks(mut self, enabled: bool) -> Self {
        self.debug_chunks = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.provider.as_str().trim().is_empty() {
            return Err(StreamError::Validation("provider must not be empty".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("vendor", &self.vendor)
            .field("provider", &self.provider)
            .field("callbacks", &self.callbacks.is_some())
            .field("error_classifier", &self.error_classifier.is_some())
            .field("input_start_at", &self.input_start_at)
            .field("require_terminal_event", &self.require_terminal_event)
            .field("debug_chunks", &self.debug_chunks)
            .finish()
    }
}
