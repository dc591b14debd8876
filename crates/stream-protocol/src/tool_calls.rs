//! Tool-call fragments and the continuity resolver that assigns them to slots.
//!
//! Vendors disagree on which of `id`, `index` and `type` they send with each
//! argument fragment. The resolver fills all three so every emitted fragment
//! names its slot, keeping a call's index stable for the whole stream.
use std::collections::HashMap;

use serde_json::Value;

/// Function part of a tool-call fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallFunction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A resolved, index-complete tool-call delta.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallFragment {
    pub function: ToolCallFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub index: u32,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// A fragment as a vendor delivered it, before slot resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawToolCall {
    pub id: Option<String>,
    pub index: Option<u32>,
    pub call_type: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl RawToolCall {
    /// Reads the OpenAI `{id, index, type, function: {name, arguments}}` shape.
    ///
    /// Non-string `arguments` (some vendors send an object) are re-serialized.
    pub fn from_openai(value: &Value) -> Self {
        let function = value.get("function");
        Self {
            id: value.get("id").and_then(Value::as_str).map(ToOwned::to_owned),
            index: value
                .get("index")
                .and_then(Value::as_u64)
                .and_then(|i| u32::try_from(i).ok()),
            call_type: value.get("type").and_then(Value::as_str).map(ToOwned::to_owned),
            name: function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            arguments: function.and_then(|f| f.get("arguments")).and_then(arguments_text),
        }
    }

    /// A call that opens with a name and an id, as block-start events do.
    pub fn start(id: Option<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            arguments: Some(arguments.into()),
            ..Self::default()
        }
    }

    /// Pure argument continuation of the current slot.
    pub fn continuation(arguments: impl Into<String>) -> Self {
        Self {
            arguments: Some(arguments.into()),
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }
}

/// Renders an `arguments` value as the string fragment consumers concatenate.
pub fn arguments_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Deterministic id for calls whose vendor sent none: `<name>_<index>`.
pub fn generate_tool_call_id(index: u32, name: Option<&str>) -> String {
    match name.filter(|n| !n.is_empty()) {
        Some(name) => format!("{name}_{index}"),
        None => format!("unknown_tool_call_{index}"),
    }
}

/// The call currently accumulating argument fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallSlot {
    pub id: String,
    pub index: u32,
    pub name: Option<String>,
}

/// Per-stream slot bookkeeping.
#[derive(Debug, Default)]
pub struct ToolCallResolver {
    slot: Option<ToolCallSlot>,
    index_by_id: HashMap<String, u32>,
    id_by_index: HashMap<u32, String>,
    /// Vendor index hints that were moved off an index already in use.
    displaced: HashMap<u32, u32>,
    next_index: u32,
}

impl ToolCallResolver {
    pub fn slot(&self) -> Option<&ToolCallSlot> {
        self.slot.as_ref()
    }

    /// Resolves every fragment of one native chunk, in array order.
    pub fn resolve(&mut self, raws: Vec<RawToolCall>) -> Vec<ToolCallFragment> {
        let multi = raws.len() > 1;
        raws.into_iter()
            .enumerate()
            .map(|(pos, raw)| {
                // Without an index, sibling fragments in one chunk are told
                // apart by position.
                let positional = if multi { u32::try_from(pos).ok() } else { None };
                self.resolve_one(raw, positional)
            })
            .collect()
    }

    fn resolve_one(&mut self, raw: RawToolCall, positional: Option<u32>) -> ToolCallFragment {
        let RawToolCall {
            id,
            index,
            call_type,
            name,
            arguments,
        } = raw;
        let id = id.filter(|id| !id.is_empty());
        let hinted = index.or(positional);

        let (id, index) = match id {
            Some(id) => match self.index_by_id.get(&id).copied() {
                Some(known) => (id, known),
                None => {
                    let index = match hinted {
                        Some(i) if !self.id_by_index.contains_key(&i) => i,
                        Some(i) => {
                            self.displaced.insert(i, self.next_index);
                            self.next_index
                        }
                        None => self.next_index,
                    };
                    (id, index)
                }
            },
            None => match hinted {
                Some(hint) => {
                    let i = self.displaced.get(&hint).copied().unwrap_or(hint);
                    match self.id_by_index.get(&i) {
                        Some(known) => (known.clone(), i),
                        None => (generate_tool_call_id(i, name.as_deref()), i),
                    }
                }
                None => match &self.slot {
                    Some(slot) => (slot.id.clone(), slot.index),
                    None => {
                        let i = self.next_index;
                        (generate_tool_call_id(i, name.as_deref()), i)
                    }
                },
            },
        };

        self.record(&id, index, name.as_deref());
        ToolCallFragment {
            function: ToolCallFunction {
                arguments: Some(arguments.unwrap_or_default()),
                name,
            },
            id: Some(id),
            index,
            call_type: call_type.unwrap_or_else(default_call_type),
        }
    }

    fn record(&mut self, id: &str, index: u32, name: Option<&str>) {
        self.index_by_id.entry(id.to_string()).or_insert(index);
        self.id_by_index.entry(index).or_insert_with(|| id.to_string());
        self.next_index = self.next_index.max(index + 1);
        let name = name
            .map(ToOwned::to_owned)
            .or_else(|| self.slot.as_ref().filter(|s| s.id == id).and_then(|s| s.name.clone()));
        self.slot = Some(ToolCallSlot {
            id: id.to_string(),
            index,
            name,
        });
    }
}
