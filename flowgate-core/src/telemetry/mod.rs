//! Run telemetry.
//!
//! By default, no telemetry is emitted unless a sink is installed via `set_telemetry_sink`.

pub mod types;

pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Implement this to receive run events.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `record_run` **may** be called from any thread; implementations should avoid panicking.
/// - Keep overhead minimal; this sits on the completion path.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_run(&self, log: RunLog);
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// Install a global telemetry sink. Returns `false` if a sink is already installed.
///
/// Notes:
/// - This is a write-once global for the process lifetime (backed by `OnceCell`).
/// - If you need to clear captured data in tests, clear it in your sink implementation.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

/// Emit a run event if a sink is installed. Providers call this once per run.
///
/// In tests, emission is suppressed unless explicitly enabled via `test_set_capture_enabled`.
#[inline]
pub(crate) fn emit_run(log: RunLog) {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return;
        }
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record_run(log);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable capture for the current test thread.
///
/// Spawned threads in a test must call this as well if they should emit.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}

/// Sink that forwards every run event to `tracing`. Failed runs log at warn,
/// successful ones at info.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record_run(&self, log: RunLog) {
        match &log.error_kind {
            Some(kind) => tracing::warn!(
                provider = log.provider.as_deref().unwrap_or(""),
                flow = log.flow.as_deref().unwrap_or(""),
                streaming = log.streaming.unwrap_or(false),
                error_kind = kind.as_str(),
                error_message = log.error_message.as_deref().unwrap_or(""),
                "flow run failed"
            ),
            None => tracing::info!(
                provider = log.provider.as_deref().unwrap_or(""),
                flow = log.flow.as_deref().unwrap_or(""),
                streaming = log.streaming.unwrap_or(false),
                history_component = log.history_component.as_deref().unwrap_or(""),
                latency_ms = log.latency_ms.unwrap_or(0),
                "flow run"
            ),
        }
    }
}
