//! Replays a JSONL capture of native chunks through one vendor and prints the
//! normalized wire lines.
//!
//! ```text
//! cargo run -p stream-protocol --example normalize_jsonl -- \
//!     --vendor openai crates/stream-protocol/fixtures/openai_tool_calls.jsonl
//! ```
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use futures::StreamExt as _;
use stream_protocol::prelude::*;

#[derive(Parser)]
#[command(about = "Normalize a JSONL capture of native stream chunks")]
struct Args {
    /// Vendor shape of the capture (`openai`, `anthropic`, `google`, ...).
    #[arg(long)]
    vendor: Vendor,
    /// Append `unexpected_end` when the capture has no terminal event.
    #[arg(long)]
    require_terminal: bool,
    /// Append a `speed` event measured from now.
    #[arg(long)]
    speed: bool,
    /// One native chunk per line.
    path: PathBuf,
}

struct PrintAggregate;

#[async_trait::async_trait]
impl StreamCallbacks for PrintAggregate {
    async fn on_completion(&self, aggregate: &LifecycleAggregate) {
        match serde_json::to_string_pretty(aggregate) {
            Ok(json) => eprintln!("aggregate: {json}"),
            Err(err) => eprintln!("aggregate did not serialize: {err}"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_observability();
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.path)?;
    let mut chunks = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        chunks.push(serde_json::from_str::<serde_json::Value>(line)?);
    }

    let mut options = StreamOptions::from_env(args.vendor)?
        .callbacks(Arc::new(PrintAggregate))
        .require_terminal_event(args.require_terminal);
    if args.speed {
        options = options.input_start_at(Instant::now());
    }

    let mut stream = try_protocol_stream(ChunkSource::from_chunks(chunks), options)?;
    while let Some(line) = stream.next().await {
        print!("{}", String::from_utf8_lossy(&line));
    }
    Ok(())
}
