//! Stream protocol normalization for chat-completion backends.
//!
//! Each supported vendor emits its own streaming shape. This crate turns any of
//! them into one canonical event sequence, encoded as three wire lines per event
//! (`id:`, `event:`, `data:`), with tool-call continuity, usage normalization,
//! in-band error envelopes and optional lifecycle callbacks.
//!
//! # Normalizing a captured stream
//!
//! ```no_run
//! use stream_protocol::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let source = ChunkSource::from_chunks([
//!     json!({"id": "1", "choices": [{"delta": {"content": "Hello"}, "index": 0}]}),
//!     json!({"id": "1", "choices": [{"delta": {}, "finish_reason": "stop", "index": 0}]}),
//! ]);
//! let text = collect_string(protocol_stream(source, StreamOptions::new(Vendor::OpenAi))).await;
//! print!("{text}");
//! # }
//! ```

/// Lifecycle callbacks and the line-observing aggregator.
pub mod callbacks;
/// Per-stream mutable state shared by a vendor's transformer.
pub mod context;
/// Error envelopes for first-chunk, per-chunk and mid-stream failures.
pub mod envelope;
/// Public error types and the shared error taxonomy.
pub mod errors;
/// Canonical event kinds and payloads.
pub mod event;
/// Wire encoder and data-line extractor.
pub mod frame;
/// Provider identifiers and vendor selection.
pub mod model;
/// Process-wide tracing setup for binaries.
pub mod observability;
/// Per-stream configuration.
pub mod options;
/// Stage composition and the output stream handle.
pub mod pipeline;
/// Common imports for typical usage.
pub mod prelude;
/// Native chunk sources over channels, iterators and HTTP bodies.
pub mod source;
/// Output throughput stage.
pub mod speed;
/// Tool-call fragments and slot resolution.
pub mod tool_calls;
/// Normalized token usage.
pub mod usage;
/// Per-vendor chunk transformers.
pub mod vendors;

pub use callbacks::{LifecycleAggregate, StreamCallbacks};
pub use envelope::{ErrorClassifier, FirstChunkError};
pub use errors::{ChatErrorType, ChatMessageError, ProviderError, StreamError, TransformFault};
pub use event::{CanonicalEvent, Citation, EventData, EventKind, Grounding, ModelSpeed};
pub use model::{ProviderId, Vendor};
pub use observability::init_observability;
pub use options::StreamOptions;
pub use pipeline::{
    AbortHandle, ProtocolStream, collect_lines, collect_string, protocol_stream,
    try_protocol_stream,
};
pub use source::{ChunkSource, ResponseFraming};
pub use tool_calls::{ToolCallFragment, ToolCallFunction};
pub use usage::ModelUsage;
