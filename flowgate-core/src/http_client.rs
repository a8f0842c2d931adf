use std::io::BufRead;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::error::{CoreResult, FlowgateError};

/// Represents a single Server-Sent-Event-style line (already split on `\n`).
#[derive(Debug, Clone)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream =
    std::pin::Pin<Box<dyn futures_util::stream::Stream<Item = crate::error::CoreResult<SseLine>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(cap) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(cap);
        }
        let inner = builder
            .build()
            .map_err(|e| FlowgateError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "flowgate/0.1".to_string(),
        })
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> CoreResult<(R, u32)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .get(url)
            .query(query)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(send_error)?;
        let latency = start.elapsed().as_millis() as u32;
        let parsed = read_json(resp).await?;
        Ok((parsed, latency))
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> CoreResult<(R, u32)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .query(query)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(send_error)?;
        let latency = start.elapsed().as_millis() as u32;
        let parsed = read_json(resp).await?;
        Ok((parsed, latency))
    }

    /// POST JSON and return the response body as a line stream.
    /// Each yielded item is one raw line (trim not applied) from the channel.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> CoreResult<SseStream> {
        let mut req = self
            .inner
            .post(url)
            .query(query)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(upstream_error(status, headers, &body));
        }

        // Stream body as bytes and split on '\n'
        let byte_stream = resp.bytes_stream();
        let line_stream = LineStream::new(Box::pin(byte_stream));
        Ok(Box::pin(line_stream))
    }
}

/// Blocking twin of [`HttpClient`] for hosts that call from plain threads.
/// Must not be used inside an async runtime; construct it lazily on the
/// blocking call path only.
#[derive(Debug, Clone)]
pub struct BlockingHttpClient {
    inner: reqwest::blocking::Client,
    user_agent: String,
}

impl BlockingHttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(cap) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(cap);
        }
        let inner = builder
            .build()
            .map_err(|e| FlowgateError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "flowgate/0.1".to_string(),
        })
    }

    pub fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> CoreResult<(R, u32)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .get(url)
            .query(query)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().map_err(send_error_blocking)?;
        let latency = start.elapsed().as_millis() as u32;
        let parsed = read_json_blocking(resp)?;
        Ok((parsed, latency))
    }

    pub fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> CoreResult<(R, u32)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .query(query)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().map_err(send_error_blocking)?;
        let latency = start.elapsed().as_millis() as u32;
        let parsed = read_json_blocking(resp)?;
        Ok((parsed, latency))
    }

    /// POST JSON and return the response body as a blocking line iterator.
    pub fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> CoreResult<BlockingSseLines> {
        let mut req = self
            .inner
            .post(url)
            .query(query)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().map_err(send_error_blocking)?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().unwrap_or_default();
            return Err(upstream_error(status, headers, &body));
        }

        Ok(BlockingSseLines {
            reader: std::io::BufReader::new(resp),
            done: false,
        })
    }
}

async fn read_json<R: DeserializeOwned>(resp: reqwest::Response) -> CoreResult<R> {
    let status = resp.status();
    if !status.is_success() {
        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        return Err(upstream_error(status, headers, &body));
    }
    resp.json::<R>()
        .await
        .map_err(|e| FlowgateError::Parse(format!("json decode error: {e}")))
}

fn read_json_blocking<R: DeserializeOwned>(resp: reqwest::blocking::Response) -> CoreResult<R> {
    let status = resp.status();
    if !status.is_success() {
        let headers = resp.headers().clone();
        let body = resp.text().unwrap_or_default();
        return Err(upstream_error(status, headers, &body));
    }
    resp.json::<R>()
        .map_err(|e| FlowgateError::Parse(format!("json decode error: {e}")))
}

fn send_error(e: reqwest::Error) -> FlowgateError {
    FlowgateError::Upstream {
        status: 500,
        message: format!("request failed: {e}"),
        headers: None,
    }
}

fn send_error_blocking(e: reqwest::Error) -> FlowgateError {
    FlowgateError::Upstream {
        status: 500,
        message: format!("request failed: {e}"),
        headers: None,
    }
}

fn upstream_error(status: StatusCode, headers: http::HeaderMap, body: &str) -> FlowgateError {
    FlowgateError::Upstream {
        status: status.as_u16(),
        message: truncate(body, 300),
        headers: Some(headers),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut t = s[..end].to_string();
    t.push_str("...");
    t
}

/// Internal line splitter over a bytes stream; yields `SseLine`s separated by '\n'.
struct LineStream {
    inner: std::pin::Pin<
        Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buf: String,
    flushed_tail: bool,
}

impl LineStream {
    fn new(
        inner: std::pin::Pin<
            Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
        >,
    ) -> Self {
        Self {
            inner,
            buf: String::new(),
            flushed_tail: false,
        }
    }
}

impl futures_util::stream::Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        loop {
            // If we already have a newline in the buffer, split and yield immediately.
            if let Some(idx) = self.buf.find('\n') {
                let mut line = self.buf.drain(..=idx).collect::<String>();
                if line.ends_with('\n') {
                    if line.ends_with("\r\n") {
                        line.truncate(line.len() - 2);
                    } else {
                        line.truncate(line.len() - 1);
                    }
                }
                return Poll::Ready(Some(Ok(SseLine { line })));
            }

            // Otherwise, poll the inner stream for more bytes
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let s = String::from_utf8_lossy(&chunk);
                    self.buf.push_str(&s);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(FlowgateError::Upstream {
                        status: 500,
                        message: format!("stream read error: {e}"),
                        headers: None,
                    })));
                }
                Poll::Ready(None) => {
                    if !self.flushed_tail && !self.buf.is_empty() {
                        self.flushed_tail = true;
                        let line = std::mem::take(&mut self.buf);
                        return Poll::Ready(Some(Ok(SseLine { line })));
                    } else {
                        return Poll::Ready(None);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Blocking line iterator over a response body. Mirrors [`LineStream`]:
/// strips `\n` and `\r\n`, flushes an unterminated tail, lossy UTF-8.
pub struct BlockingSseLines {
    reader: std::io::BufReader<reqwest::blocking::Response>,
    done: bool,
}

impl Iterator for BlockingSseLines {
    type Item = CoreResult<SseLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if buf.ends_with(b"\n") {
                    buf.pop();
                    if buf.ends_with(b"\r") {
                        buf.pop();
                    }
                }
                Some(Ok(SseLine {
                    line: String::from_utf8_lossy(&buf).into_owned(),
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(FlowgateError::Upstream {
                    status: 500,
                    message: format!("stream read error: {e}"),
                    headers: None,
                }))
            }
        }
    }
}
