//! Langflow provider.
//!
//! Runs a flow through the Langflow REST API. Each run fetches the flow
//! definition to locate its history component, injects prior messages as a
//! tweak keyed by that component, then calls the run endpoint with `stream`
//! on or off. Streaming responses are translated line by line into
//! [`crate::stream::StreamingChunk`]s.

use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use once_cell::sync::OnceCell;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::{
    config::{Config, HttpCfg},
    error::{CoreResult, FlowgateError},
    http_client::{BlockingHttpClient, HttpClient},
    model::{RunCompletion, RunRequest},
    parser::{ChunkIter, ChunkStream, extract_run_response_text},
    provider::{BlockingFlowProvider, FlowProvider},
    request::build_request,
    resolver::{resolve_history_component, resolve_history_component_blocking},
    stream::{BoxChunkIter, BoxChunkStream},
    telemetry::RunLog,
};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Langflow {
    http: HttpClient,
    /// Built lazily on the first blocking call; constructing a blocking
    /// reqwest client inside an async runtime panics.
    blocking_http: OnceCell<BlockingHttpClient>,
    http_cfg: HttpCfg,
    api_key: SecretString,
    base: String,
    name: String,
}

impl Langflow {
    pub fn new(http: HttpClient, api_key: SecretString, base: String) -> Self {
        Self {
            http,
            blocking_http: OnceCell::new(),
            http_cfg: HttpCfg::default(),
            api_key,
            base: base.trim_end_matches('/').to_string(),
            name: "langflow".into(),
        }
    }

    /// Build a provider from configuration. The API key is read from the
    /// environment variable named in `langflow.api_key_env`.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let key = std::env::var(&cfg.langflow.api_key_env).map_err(|_| {
            FlowgateError::InvalidInput(format!(
                "environment variable {} is not set",
                cfg.langflow.api_key_env
            ))
        })?;
        let mut provider = Self::new(
            HttpClient::from_cfg(&cfg.http)?,
            SecretString::new(key.into()),
            cfg.langflow.base_url.clone(),
        );
        provider.http_cfg = cfg.http.clone();
        Ok(provider)
    }

    fn blocking_http(&self) -> CoreResult<&BlockingHttpClient> {
        self.blocking_http
            .get_or_try_init(|| BlockingHttpClient::from_cfg(&self.http_cfg))
    }

    /// Id of the flow's history component, if it has one.
    pub async fn history_component(&self, flow: &str) -> CoreResult<Option<String>> {
        resolve_history_component(&self.http, &self.base, flow, &self.api_key).await
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![(
            "x-api-key".to_string(),
            self.api_key.expose_secret().to_string(),
        )]
    }

    fn run_url(&self, flow: &str) -> String {
        format!("{}/api/v1/run/{}", self.base, flow)
    }

    /// Map a finished non-streaming run to a completion and emit its run log.
    fn finish_completion(
        &self,
        flow: String,
        history: Option<&str>,
        response: &Value,
        started: u64,
        latency_ms: u32,
    ) -> CoreResult<RunCompletion> {
        let text = extract_run_response_text(response)?;
        let done = RunCompletion {
            flow,
            text,
            finish_reason: "stop".into(),
            provider: self.name.clone(),
            created_at_ms: started as i64,
            latency_ms,
        };
        let rlog = RunLog::new()
            .provider(&self.name)
            .flow(&done.flow)
            .streaming(false)
            .history_component_opt(history)
            .created_at_ms(started)
            .latency_ms(latency_ms as u64)
            .finish_reason_opt(Some("stop"))
            .text_opt(Some(&done.text));
        crate::telemetry::emit_run(rlog);
        Ok(done)
    }

    fn log_stream_accepted(&self, flow: &str, history: Option<&str>, started: u64) {
        let rlog = RunLog::new()
            .provider(&self.name)
            .flow(flow)
            .streaming(true)
            .history_component_opt(history)
            .created_at_ms(started);
        crate::telemetry::emit_run(rlog);
    }

    fn log_failure(&self, flow: &str, streaming: bool, err: &FlowgateError) {
        let rlog = RunLog::new()
            .provider(&self.name)
            .flow(flow)
            .streaming(streaming)
            .error_kind(err.kind())
            .error_message(&err.to_string());
        crate::telemetry::emit_run(rlog);
    }

    async fn acompletion_inner(&self, req: RunRequest) -> CoreResult<RunCompletion> {
        let started = now_ms();
        let history =
            resolve_history_component(&self.http, &self.base, &req.flow, &self.api_key).await?;
        let body = build_request(&req.messages, history.as_deref())?;

        let headers = self.headers();
        let header_pairs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (response, latency_ms) = self
            .http
            .post_json::<_, Value>(
                &self.run_url(&req.flow),
                &body,
                &header_pairs,
                &[("stream", "false")],
            )
            .await?;
        self.finish_completion(req.flow, history.as_deref(), &response, started, latency_ms)
    }

    async fn astreaming_inner(&self, req: RunRequest) -> CoreResult<BoxChunkStream> {
        let started = now_ms();
        let history =
            resolve_history_component(&self.http, &self.base, &req.flow, &self.api_key).await?;
        let body = build_request(&req.messages, history.as_deref())?;

        let headers = self.headers();
        let header_pairs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let lines = self
            .http
            .post_sse_lines(
                &self.run_url(&req.flow),
                &body,
                &header_pairs,
                &[("stream", "true")],
            )
            .await?;
        self.log_stream_accepted(&req.flow, history.as_deref(), started);
        Ok(ChunkStream::new(lines).boxed())
    }

    fn completion_inner(&self, req: RunRequest) -> CoreResult<RunCompletion> {
        let started = now_ms();
        let http = self.blocking_http()?;
        let history =
            resolve_history_component_blocking(http, &self.base, &req.flow, &self.api_key)?;
        let body = build_request(&req.messages, history.as_deref())?;

        let headers = self.headers();
        let header_pairs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (response, latency_ms) = http.post_json::<_, Value>(
            &self.run_url(&req.flow),
            &body,
            &header_pairs,
            &[("stream", "false")],
        )?;
        self.finish_completion(req.flow, history.as_deref(), &response, started, latency_ms)
    }

    fn streaming_inner(&self, req: RunRequest) -> CoreResult<BoxChunkIter> {
        let started = now_ms();
        let http = self.blocking_http()?;
        let history =
            resolve_history_component_blocking(http, &self.base, &req.flow, &self.api_key)?;
        let body = build_request(&req.messages, history.as_deref())?;

        let headers = self.headers();
        let header_pairs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let lines = http.post_sse_lines(
            &self.run_url(&req.flow),
            &body,
            &header_pairs,
            &[("stream", "true")],
        )?;
        self.log_stream_accepted(&req.flow, history.as_deref(), started);
        Ok(Box::new(ChunkIter::new(lines)))
    }
}

#[async_trait]
impl FlowProvider for Langflow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acompletion(&self, req: RunRequest) -> CoreResult<RunCompletion> {
        let flow = req.flow.clone();
        match self.acompletion_inner(req).await {
            Ok(done) => Ok(done),
            Err(e) => {
                self.log_failure(&flow, false, &e);
                Err(e)
            }
        }
    }

    async fn astreaming(&self, req: RunRequest) -> CoreResult<BoxChunkStream> {
        let flow = req.flow.clone();
        match self.astreaming_inner(req).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.log_failure(&flow, true, &e);
                Err(e)
            }
        }
    }
}

impl BlockingFlowProvider for Langflow {
    fn name(&self) -> &str {
        &self.name
    }

    fn completion(&self, req: RunRequest) -> CoreResult<RunCompletion> {
        let flow = req.flow.clone();
        match self.completion_inner(req) {
            Ok(done) => Ok(done),
            Err(e) => {
                self.log_failure(&flow, false, &e);
                Err(e)
            }
        }
    }

    fn streaming(&self, req: RunRequest) -> CoreResult<BoxChunkIter> {
        let flow = req.flow.clone();
        match self.streaming_inner(req) {
            Ok(chunks) => Ok(chunks),
            Err(e) => {
                self.log_failure(&flow, true, &e);
                Err(e)
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatMessage, Role};
    use httpmock::prelude::*;
    use once_cell::sync::Lazy;
    use std::sync::{Arc, Mutex};

    // RunLog test sink & helpers
    static RUN_LOGS: Lazy<Mutex<Vec<RunLog>>> = Lazy::new(|| Mutex::new(Vec::new()));

    #[derive(Default)]
    struct RLTestSink;
    impl crate::telemetry::TelemetrySink for RLTestSink {
        fn record_run(&self, log: RunLog) {
            RUN_LOGS.lock().unwrap().push(log);
        }
    }

    fn ensure_rl_sink_installed() {
        let _ = crate::telemetry::set_telemetry_sink(Arc::new(RLTestSink));
    }

    fn logs_for(flow: &str) -> Vec<RunLog> {
        RUN_LOGS
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.flow.as_deref() == Some(flow))
            .cloned()
            .collect()
    }

    fn provider_for(server: &MockServer) -> Langflow {
        Langflow::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("test-key".into()),
            server.base_url(),
        )
    }

    fn messages() -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: Role::User,
                content: "Hi".into(),
            },
            ChatMessage {
                role: Role::Assistant,
                content: "Hello! How can I help?".into(),
            },
            ChatMessage {
                role: Role::User,
                content: "What is Langflow?".into(),
            },
        ]
    }

    fn flow_definition_with_history() -> Value {
        serde_json::json!({
            "data": {
                "nodes": [
                    { "id": "ChatInput-h3Dl2" },
                    { "id": "CompletionInterface-qNlsX" },
                ]
            }
        })
    }

    fn run_response(text: &str) -> Value {
        serde_json::json!({
            "outputs": [ { "outputs": [ { "results": {
                "message": { "data": { "text": text } }
            } } ] } ]
        })
    }

    fn mock_flow_definition<'a>(
        server: &'a MockServer,
        flow: &str,
        body: Value,
    ) -> httpmock::Mock<'a> {
        server.mock(|when, then| {
            when.method(GET)
                .path(format!("/api/v1/flows/{flow}"))
                .header("x-api-key", "test-key");
            then.status(200).json_body(body);
        })
    }

    #[tokio::test]
    async fn acompletion_resolves_history_and_runs_the_flow() {
        let server = MockServer::start();
        let flows = mock_flow_definition(&server, "flow-1", flow_definition_with_history());
        let run = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/run/flow-1")
                .query_param("stream", "false")
                .header("x-api-key", "test-key")
                // crude but reliable: the history tweak and the final message
                .body_contains("\"CompletionInterface-qNlsX\"")
                .body_contains("\"input_value\":\"What is Langflow?\"");
            then.status(200).json_body(run_response("Langflow is a flow builder."));
        });

        let provider = provider_for(&server);
        let done = provider
            .acompletion(RunRequest {
                flow: "flow-1".into(),
                messages: messages(),
            })
            .await
            .expect("completion ok");

        flows.assert();
        run.assert();
        assert_eq!(done.text, "Langflow is a flow builder.");
        assert_eq!(done.finish_reason, "stop");
        assert_eq!(done.provider, "langflow");
        assert_eq!(done.flow, "flow-1");
    }

    #[tokio::test]
    async fn acompletion_without_history_component_sends_empty_tweaks() {
        let server = MockServer::start();
        mock_flow_definition(
            &server,
            "flow-2",
            serde_json::json!({ "data": { "nodes": [ { "id": "ChatInput-aaa" } ] } }),
        );
        let run = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/run/flow-2")
                .body_contains("\"tweaks\":{}");
            then.status(200).json_body(run_response("ok"));
        });

        let provider = provider_for(&server);
        let done = provider
            .acompletion(RunRequest {
                flow: "flow-2".into(),
                messages: messages(),
            })
            .await
            .unwrap();

        run.assert();
        assert_eq!(done.text, "ok");
    }

    #[tokio::test]
    async fn acompletion_names_the_missing_link_when_the_response_is_malformed() {
        let server = MockServer::start();
        mock_flow_definition(&server, "flow-3", flow_definition_with_history());
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/run/flow-3");
            then.status(200).json_body(serde_json::json!({ "outputs": [] }));
        });

        let provider = provider_for(&server);
        let err = provider
            .acompletion(RunRequest {
                flow: "flow-3".into(),
                messages: messages(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 500);
        let msg = err.to_string();
        assert!(msg.contains("outputs[0]"), "got: {msg}");
    }

    #[tokio::test]
    async fn acompletion_propagates_upstream_status_and_headers() {
        let server = MockServer::start();
        mock_flow_definition(&server, "flow-4", flow_definition_with_history());
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/run/flow-4");
            then.status(429)
                .header("retry-after", "2")
                .body("rate limited");
        });

        let provider = provider_for(&server);
        let err = provider
            .acompletion(RunRequest {
                flow: "flow-4".into(),
                messages: messages(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 429);
        assert!(err.to_string().contains("rate limited"));
        let headers = err.headers().expect("upstream headers");
        assert_eq!(headers.get("retry-after").unwrap(), "2");
    }

    #[tokio::test]
    async fn astreaming_translates_token_lines_into_chunks() {
        let server = MockServer::start();
        mock_flow_definition(&server, "flow-5", flow_definition_with_history());
        let run = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/run/flow-5")
                .query_param("stream", "true");
            then.status(200).body(concat!(
                "{\"event\":\"token\",\"data\":{\"chunk\":\"Hel\"}}\n",
                "{\"event\":\"token\",\"data\":{\"chunk\":\"lo\"}}\n",
                "{\"event\":\"end\",\"data\":{}}\n",
            ));
        });

        let provider = provider_for(&server);
        let stream = provider
            .astreaming(RunRequest {
                flow: "flow-5".into(),
                messages: messages(),
            })
            .await
            .expect("stream accepted");
        let chunks: Vec<_> = stream.collect().await;

        run.assert();
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| c.as_ref().unwrap().text.clone())
            .collect();
        assert_eq!(texts, vec!["Hel", "lo", ""]);
        assert!(chunks.last().unwrap().as_ref().unwrap().is_finished);
    }

    #[tokio::test]
    async fn astreaming_aborts_before_the_run_when_the_resolver_fails() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/flows/flow-6");
            then.status(500).body("flow lookup exploded");
        });
        let run = server.mock(|when, then| {
            when.method(POST).path("/api/v1/run/flow-6");
            then.status(200).body("");
        });

        let provider = provider_for(&server);
        let err = provider
            .astreaming(RunRequest {
                flow: "flow-6".into(),
                messages: messages(),
            })
            .await
            .err()
            .expect("expected error");

        assert_eq!(err.status_code(), 500);
        run.assert_hits(0);
    }

    #[test]
    fn blocking_completion_round_trips() {
        let server = MockServer::start();
        let flows = mock_flow_definition(&server, "flow-7", flow_definition_with_history());
        let run = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/run/flow-7")
                .query_param("stream", "false")
                .body_contains("\"CompletionInterface-qNlsX\"");
            then.status(200).json_body(run_response("blocking ok"));
        });

        let provider = provider_for(&server);
        let done = provider
            .completion(RunRequest {
                flow: "flow-7".into(),
                messages: messages(),
            })
            .expect("completion ok");

        flows.assert();
        run.assert();
        assert_eq!(done.text, "blocking ok");
        assert_eq!(done.provider, "langflow");
    }

    #[test]
    fn blocking_streaming_yields_snapshot_deltas_then_the_terminal_text() {
        let server = MockServer::start();
        mock_flow_definition(&server, "flow-8", flow_definition_with_history());
        server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/run/flow-8")
                .query_param("stream", "true");
            then.status(200).body(concat!(
                "{\"event\":\"add_message\",\"data\":{\"text\":\"Hel\"}}\n",
                "{\"event\":\"add_message\",\"data\":{\"text\":\"Hello wor\"}}\n",
                "{\"event\":\"add_message\",\"data\":{\"text\":\"Hello world\"}}\n",
                "{\"event\":\"end\",\"data\":{\"result\":{\"outputs\":[{\"outputs\":[{\"results\":{\"message\":{\"text\":\"Hello world\"}}}]}]}}}\n",
            ));
        });

        let provider = provider_for(&server);
        let chunks: Vec<_> = provider
            .streaming(RunRequest {
                flow: "flow-8".into(),
                messages: messages(),
            })
            .expect("stream accepted")
            .collect();

        let texts: Vec<String> = chunks
            .iter()
            .map(|c| c.as_ref().unwrap().text.clone())
            .collect();
        assert_eq!(texts, vec!["Hel", "lo wor", "ld", "Hello world"]);
        assert!(chunks.last().unwrap().as_ref().unwrap().is_finished);
    }

    #[test]
    fn blocking_upstream_error_carries_the_status() {
        let server = MockServer::start();
        mock_flow_definition(&server, "flow-9", flow_definition_with_history());
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/run/flow-9");
            then.status(503).body("maintenance");
        });

        let provider = provider_for(&server);
        let err = provider
            .completion(RunRequest {
                flow: "flow-9".into(),
                messages: messages(),
            })
            .unwrap_err();

        assert_eq!(err.status_code(), 503);
        assert!(err.to_string().contains("maintenance"));
    }

    #[tokio::test]
    async fn successful_completion_emits_a_run_log() {
        ensure_rl_sink_installed();
        crate::telemetry::test_set_capture_enabled(true);

        let server = MockServer::start();
        mock_flow_definition(&server, "flow-logged-ok", flow_definition_with_history());
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/run/flow-logged-ok");
            then.status(200).json_body(run_response("Hello back"));
        });

        let provider = provider_for(&server);
        provider
            .acompletion(RunRequest {
                flow: "flow-logged-ok".into(),
                messages: messages(),
            })
            .await
            .unwrap();

        let logs = logs_for("flow-logged-ok");
        assert_eq!(logs.len(), 1, "expected 1 run log, got {:?}", logs);
        let log = &logs[0];
        assert_eq!(log.provider.as_deref(), Some("langflow"));
        assert_eq!(log.streaming, Some(false));
        assert_eq!(
            log.history_component.as_deref(),
            Some("CompletionInterface-qNlsX")
        );
        assert_eq!(log.finish_reason.as_deref(), Some("stop"));
        assert_eq!(log.text.as_deref(), Some("Hello back"));
        assert!(log.latency_ms.is_some());
        assert!(log.error_kind.is_none());
    }

    #[tokio::test]
    async fn failed_stream_emits_a_run_log_with_the_error_kind() {
        ensure_rl_sink_installed();
        crate::telemetry::test_set_capture_enabled(true);

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/flows/flow-logged-err");
            then.status(502).body("bad gateway");
        });

        let provider = provider_for(&server);
        let err = provider
            .astreaming(RunRequest {
                flow: "flow-logged-err".into(),
                messages: messages(),
            })
            .await
            .err()
            .expect("expected error");
        assert_eq!(err.status_code(), 502);

        let logs = logs_for("flow-logged-err");
        assert_eq!(logs.len(), 1, "expected 1 run log, got {:?}", logs);
        let log = &logs[0];
        assert_eq!(log.streaming, Some(true));
        assert_eq!(log.error_kind.as_deref(), Some("upstream"));
        assert!(
            log.error_message
                .as_deref()
                .unwrap_or("")
                .contains("bad gateway")
        );
    }

    #[test]
    fn from_config_requires_the_api_key_env() {
        let cfg = Config {
            langflow: crate::config::LangflowCfg {
                base_url: "http://localhost:7860".into(),
                api_key_env: "FLOWGATE_TEST_KEY_THAT_IS_NOT_SET".into(),
            },
            http: HttpCfg::default(),
        };
        let err = Langflow::from_config(&cfg).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(
            err.to_string()
                .contains("FLOWGATE_TEST_KEY_THAT_IS_NOT_SET")
        );
    }

    #[test]
    fn empty_messages_fail_before_the_run_call() {
        let server = MockServer::start();
        let flows = mock_flow_definition(&server, "flow-10", flow_definition_with_history());

        let provider = provider_for(&server);
        let err = provider
            .completion(RunRequest {
                flow: "flow-10".into(),
                messages: vec![],
            })
            .unwrap_err();

        assert_eq!(err.status_code(), 400);
        // The resolver runs first; only the run call is skipped.
        flows.assert();
    }
}
