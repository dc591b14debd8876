use serde_json::Value;

use crate::event::Citation;
use crate::model::{ProviderId, Vendor};
use crate::tool_calls::{ToolCallResolver, ToolCallSlot};
use crate::usage::ModelUsage;

/// Marker prefixed to the first reasoning delta of a boundary-less vendor.
pub const THINK_OPEN: &str = "<think>";
/// Marker prefixed to the first answer delta after reasoning.
pub const THINK_CLOSE: &str = "</think>";

/// Mutable state owned by exactly one stream's transform stage.
#[derive(Debug)]
pub struct StreamContext {
    /// Stream/message id; empty until a chunk carrying one is seen.
    pub id: String,
    pub vendor: Vendor,
    pub provider: ProviderId,
    pub tool_calls: ToolCallResolver,
    /// Repeated citation payloads surface only once.
    pub citation_emitted: bool,
    /// Synthesized reasoning boundary is open.
    pub reasoning_open: bool,
    reasoning_closed: bool,
    /// Content-embedded `<think>` section is in progress.
    pub thinking_in_content: bool,
    last_usage: Option<ModelUsage>,
    /// Partial raw text carried between units of text-framed vendors.
    pub pending_text: String,
    /// Citations accumulated from annotation events.
    pub citations: Vec<Citation>,
    /// Input-side usage captured at message start.
    pub input_usage: Option<Value>,
    /// Count of reasoning summary parts seen so far.
    pub reasoning_parts: u32,
}

impl StreamContext {
    pub fn new(vendor: Vendor, provider: ProviderId) -> Self {
        Self {
            id: String::new(),
            vendor,
            provider,
            tool_calls: ToolCallResolver::default(),
            citation_emitted: false,
            reasoning_open: false,
            reasoning_closed: false,
            thinking_in_content: false,
            last_usage: None,
            pending_text: String::new(),
            citations: Vec::new(),
            input_usage: None,
            reasoning_parts: 0,
        }
    }

    pub fn tool_call_slot(&self) -> Option<&ToolCallSlot> {
        self.tool_calls.slot()
    }

    /// Records the stream id the first time a chunk carries one.
    pub fn capture_id(&mut self, id: &str) {
        if self.id.is_empty() && !id.is_empty() {
            self.id = id.to_string();
        }
    }

    /// Assigns a `chat_` id for vendors that never send one.
    pub fn ensure_id(&mut self) -> String {
        if self.id.is_empty() {
            self.id = format!("chat_{}", uuid::Uuid::new_v4().simple());
        }
        self.id.clone()
    }

    /// Returns the usage when it differs from the last one forwarded.
    pub fn fresh_usage(&mut self, usage: ModelUsage) -> Option<ModelUsage> {
        if self.last_usage.as_ref() == Some(&usage) {
            return None;
        }
        self.last_usage = Some(usage.clone());
        Some(usage)
    }

    /// True exactly once per stream.
    pub fn take_citation_slot(&mut self) -> bool {
        !std::mem::replace(&mut self.citation_emitted, true)
    }

    /// Prefixes the opening marker onto the first reasoning delta.
    pub fn reasoning_delta(&mut self, text: &str) -> String {
        if !self.reasoning_open && !self.reasoning_closed {
            self.reasoning_open = true;
            return format!("{THINK_OPEN}{text}");
        }
        text.to_string()
    }

    /// Prefixes the closing marker onto the first answer delta after reasoning.
    pub fn answer_delta(&mut self, text: &str) -> String {
        if self.reasoning_open {
            self.reasoning_open = false;
            self.reasoning_closed = true;
            return format!("{THINK_CLOSE}{text}");
        }
        text.to_string()
    }
}
