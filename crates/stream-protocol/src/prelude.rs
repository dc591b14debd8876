//! Common imports for typical stream normalization.
pub use crate::{
    AbortHandle, CanonicalEvent, ChatErrorType, ChunkSource, EventKind, LifecycleAggregate,
    ModelUsage, ProtocolStream, ProviderError, ProviderId, ResponseFraming, StreamCallbacks,
    StreamError, StreamOptions, Vendor, collect_lines, collect_string, init_observability,
    protocol_stream, try_protocol_stream,
};
