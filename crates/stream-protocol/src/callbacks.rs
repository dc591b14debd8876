use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt as _, stream};
use tracing::warn;

use crate::event::{EventKind, Grounding};
use crate::tool_calls::ToolCallFragment;
use crate::usage::ModelUsage;

/// Lifecycle hooks invoked while a protocol stream is consumed.
///
/// Every method defaults to a no-op so implementors override only what they
/// need. `on_text` and `on_thinking` receive the raw JSON text of the data line
/// (a quoted string), not the decoded value.
#[async_trait::async_trait]
pub trait StreamCallbacks: Send + Sync {
    async fn on_start(&self) {}
    async fn on_text(&self, _json_text: &str) {}
    async fn on_thinking(&self, _json_text: &str) {}
    async fn on_tools_calling(&self, _fragments: &[ToolCallFragment]) {}
    async fn on_usage(&self, _usage: &ModelUsage) {}
    async fn on_grounding(&self, _grounding: &Grounding) {}
    async fn on_completion(&self, _aggregate: &LifecycleAggregate) {}
    async fn on_final(&self, _aggregate: &LifecycleAggregate) {}
}

/// Running totals delivered once at stream end.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LifecycleAggregate {
    pub text: String,
    /// `None` until the first reasoning event, so "never reasoned" differs
    /// from "reasoned with empty output".
    pub thinking: Option<String>,
    pub usage: Option<ModelUsage>,
    pub grounding: Option<Grounding>,
    pub tool_calls_count: usize,
}

/// State machine over encoded wire lines.
///
/// The `event:` line sets the current kind; the next `data:` line is
/// dispatched by it.
pub struct CallbackAggregator {
    callbacks: Arc<dyn StreamCallbacks>,
    kind: Option<EventKind>,
    aggregate: LifecycleAggregate,
    started: bool,
    finished: bool,
}

impl CallbackAggregator {
    pub fn new(callbacks: Arc<dyn StreamCallbacks>) -> Self {
        Self {
            callbacks,
            kind: None,
            aggregate: LifecycleAggregate::default(),
            started: false,
            finished: false,
        }
    }

    pub fn aggregate(&self) -> &LifecycleAggregate {
        &self.aggregate
    }

    pub async fn start(&mut self) {
        if !self.started {
            self.started = true;
            self.callbacks.on_start().await;
        }
    }

    /// Observes one wire line.
    pub async fn observe(&mut self, line: &str) {
        let line = line.trim_end_matches('\n');
        if let Some(kind) = line.strip_prefix("event: ") {
            self.kind = kind.parse().ok();
            return;
        }
        let Some(payload) = line.strip_prefix("data: ") else {
            return;
        };
        let Some(kind) = self.kind else {
            return;
        };
        self.dispatch(kind, payload).await;
    }

    async fn dispatch(&mut self, kind: EventKind, payload: &str) {
        match kind {
            EventKind::Text => {
                if let Some(text) = decode::<String>(kind, payload) {
                    self.aggregate.text.push_str(&text);
                }
                self.callbacks.on_text(payload).await;
            }
            EventKind::Reasoning => {
                let thinking = self.aggregate.thinking.get_or_insert_with(String::new);
                if let Some(text) = decode::<String>(kind, payload) {
                    thinking.push_str(&text);
                }
                self.callbacks.on_thinking(payload).await;
            }
            EventKind::Usage => {
                if let Some(usage) = decode::<ModelUsage>(kind, payload) {
                    self.callbacks.on_usage(&usage).await;
                    self.aggregate.usage = Some(usage);
                }
            }
            EventKind::Grounding => {
                if let Some(grounding) = decode::<Grounding>(kind, payload) {
                    self.callbacks.on_grounding(&grounding).await;
                    self.aggregate.grounding = Some(grounding);
                }
            }
            EventKind::ToolCalls => {
                if let Some(fragments) = decode::<Vec<ToolCallFragment>>(kind, payload) {
                    self.aggregate.tool_calls_count += fragments.len();
                    self.callbacks.on_tools_calling(&fragments).await;
                }
            }
            _ => {}
        }
    }

    /// Fires completion hooks exactly once.
    pub async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.start().await;
        self.callbacks.on_completion(&self.aggregate).await;
        self.callbacks.on_final(&self.aggregate).await;
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: EventKind, payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(kind = %kind, error = %err, "callback payload did not decode");
            None
        }
    }
}

/// Pass-through stage that feeds every wire line to the aggregator.
///
/// `on_start` fires on the first pull; completion hooks fire when the upstream
/// ends, before this stage reports its own end.
pub fn with_callbacks<S>(
    lines: S,
    callbacks: Arc<dyn StreamCallbacks>,
) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = Bytes> + Send + Unpin,
{
    stream::unfold(
        (lines, CallbackAggregator::new(callbacks)),
        |(mut lines, mut agg)| async move {
            agg.start().await;
            match lines.next().await {
                Some(line) => {
                    agg.observe(&String::from_utf8_lossy(&line)).await;
                    Some((line, (lines, agg)))
                }
                None => {
                    agg.finish().await;
                    None
                }
            }
        },
    )
}
