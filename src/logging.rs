//! Process-wide log setup for the binaries.
//!
//! Records are JSON lines. Every record carries the `job`, `file` and `chunk` spans it was
//! emitted under, and a record is written when each of those spans closes, so per-file and
//! per-chunk timings show up without extra instrumentation.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding filter directives, e.g. `scrivener=debug,tower_http=info`.
pub const LOG_ENV_VAR: &str = "SCRIVENER_LOG";

/// Install the JSON subscriber. Later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init();
}

/// Directives from [`LOG_ENV_VAR`], falling back to `info`. Invalid directives are dropped.
fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}
