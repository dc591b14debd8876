use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::options::parse_bool_env;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "stream-protocol.logs.jsonl";

/// Crate diagnostics at `info`, everything else at `warn`.
const DEFAULT_FILTER: &str = "warn,stream_protocol=info";

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    /// Compact lines on stderr; stdout stays free for wire output.
    Console,
    JsonFile { dir: PathBuf, file_name: String },
}

fn observability_enabled() -> bool {
    std::env::var("STREAM_PROTOCOL_OBSERVABILITY")
        .ok()
        .and_then(|value| parse_bool_env(&value))
        .unwrap_or(true)
}

/// First directive that parses, in priority order.
fn filter_directive(level: Option<String>, rust_log: Option<String>) -> String {
    [level, rust_log]
        .into_iter()
        .flatten()
        .map(|d| d.trim().to_string())
        .find(|d| !d.is_empty() && EnvFilter::try_new(d).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

fn log_sink(json_path: Option<String>) -> LogSink {
    let Some(raw) = json_path.filter(|p| !p.trim().is_empty()) else {
        return LogSink::Console;
    };
    let path = PathBuf::from(raw);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    LogSink::JsonFile { dir, file_name }
}

/// Installs the process-wide tracing subscriber once.
///
/// Environment variables:
/// - `STREAM_PROTOCOL_OBSERVABILITY`: enable/disable flag (default enabled).
/// - `STREAM_PROTOCOL_LOG_LEVEL`: filter directive (`info`, `stream_protocol=debug`, ...).
/// - `RUST_LOG`: fallback filter. Without either, `warn,stream_protocol=info`.
/// - `STREAM_PROTOCOL_JSON_LOG_PATH`: JSONL log file. Without it, logs go to
///   stderr in compact console format.
///
/// Library code never calls this; binaries and examples opt in.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let directive = filter_directive(
            std::env::var("STREAM_PROTOCOL_LOG_LEVEL").ok(),
            std::env::var("RUST_LOG").ok(),
        );
        let env_filter = EnvFilter::new(directive);
        match log_sink(std::env::var("STREAM_PROTOCOL_JSON_LOG_PATH").ok()) {
            LogSink::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            LogSink::Console => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
