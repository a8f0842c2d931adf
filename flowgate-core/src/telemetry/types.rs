use serde::Serialize;

/// Structured, provider-agnostic run event.
///
/// One of these is emitted per completion (with the final text and latency),
/// per accepted stream (when the line stream is handed to the caller), and
/// per failed run (with the error fields set instead).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunLog {
    pub provider: Option<String>,
    pub flow: Option<String>,
    pub streaming: Option<bool>,
    pub history_component: Option<String>,
    pub created_at_ms: Option<u64>,
    pub latency_ms: Option<u64>,

    pub finish_reason: Option<String>,
    pub text: Option<String>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl RunLog {
    pub fn new() -> Self { Self::default() }
    pub fn provider(mut self, v: &str) -> Self { self.provider = Some(v.to_string()); self }
    pub fn flow(mut self, v: &str) -> Self { self.flow = Some(v.to_string()); self }
    pub fn streaming(mut self, v: bool) -> Self { self.streaming = Some(v); self }
    pub fn history_component_opt(mut self, v: Option<&str>) -> Self { self.history_component = v.map(|s| s.to_string()); self }
    pub fn created_at_ms(mut self, v: u64) -> Self { self.created_at_ms = Some(v); self }
    pub fn latency_ms(mut self, v: u64) -> Self { self.latency_ms = Some(v); self }
    pub fn finish_reason_opt(mut self, v: Option<&str>) -> Self { self.finish_reason = v.map(|s| s.to_string()); self }
    pub fn text_opt(mut self, v: Option<&str>) -> Self { self.text = v.map(|s| s.to_string()); self }
    pub fn error_kind(mut self, v: &str) -> Self { self.error_kind = Some(v.to_string()); self }
    pub fn error_message(mut self, v: &str) -> Self { self.error_message = Some(v.to_string()); self }
}
