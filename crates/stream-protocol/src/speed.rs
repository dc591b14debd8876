//! Output throughput stage.
use std::time::Instant;

use futures::{Stream, StreamExt as _, stream};

use crate::event::{CanonicalEvent, EventData, EventKind, ModelSpeed};
use crate::usage::ModelUsage;

/// Id of the appended `speed` event.
pub const SPEED_EVENT_ID: &str = "output_speed";

/// Tracks first-output time and the last usage record of one stream.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    input_start_at: Instant,
    first_output_at: Option<Instant>,
    usage: Option<ModelUsage>,
}

impl SpeedMeter {
    pub fn new(input_start_at: Instant) -> Self {
        Self {
            input_start_at,
            first_output_at: None,
            usage: None,
        }
    }

    pub fn observe(&mut self, event: &CanonicalEvent, at: Instant) {
        match &event.data {
            EventData::Usage(usage) => self.usage = Some(usage.clone()),
            _ if is_output(event.kind()) && self.first_output_at.is_none() => {
                self.first_output_at = Some(at);
            }
            _ => {}
        }
    }

    /// The `speed` event for a stream ending at `end`; `None` without usage.
    pub fn finish(&self, end: Instant) -> Option<CanonicalEvent> {
        let usage = self.usage.as_ref()?;
        let first = self.first_output_at.unwrap_or(end);
        let ttft = first.saturating_duration_since(self.input_start_at).as_millis();
        let secs = end.saturating_duration_since(first).as_secs_f64();
        let tps = if secs > 0.0 {
            usage.output_tokens() as f64 / secs
        } else {
            0.0
        };
        let speed = ModelSpeed {
            tps,
            ttft: u64::try_from(ttft).unwrap_or(u64::MAX),
        };
        Some(CanonicalEvent::new(SPEED_EVENT_ID, EventData::Speed(speed)))
    }
}

fn is_output(kind: EventKind) -> bool {
    matches!(kind, EventKind::Text | EventKind::Reasoning | EventKind::ToolCalls)
}

/// Forwards events unchanged and appends one `speed` event at the end.
pub fn with_speed<S>(events: S, input_start_at: Instant) -> impl Stream<Item = CanonicalEvent> + Send
where
    S: Stream<Item = CanonicalEvent> + Send + Unpin,
{
    stream::unfold(
        (Some(events), SpeedMeter::new(input_start_at)),
        |(events, mut meter)| async move {
            let mut events = events?;
            match events.next().await {
                Some(event) => {
                    meter.observe(&event, Instant::now());
                    Some((event, (Some(events), meter)))
                }
                None => meter
                    .finish(Instant::now())
                    .map(|speed| (speed, (None, meter))),
            }
        },
    )
}
