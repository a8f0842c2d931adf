//! Translation from Langflow's line-delimited event stream into generic
//! streaming chunks.
//!
//! Contract per line (see [`ChunkParser::parse_line`]):
//! - `token` events carry incremental text in `data.chunk`.
//! - `add_message` events carry the cumulative text so far in `data.text`;
//!   only the part beyond what was already surfaced is emitted.
//! - `end` terminates the stream. If no `token` event was ever seen the
//!   payload itself carries the whole response under
//!   `data.result.outputs[0].outputs[0].results.message.text`; otherwise the
//!   terminal chunk is empty because the tokens already carried the content.
//!
//! Structural failures never kill the parser itself: every call returns a
//! fresh verdict for its line, and the caller picks the abort-or-skip policy.
//! The pull sequences in this module ([`ChunkStream`], [`ChunkIter`]) abort.

use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;

use crate::error::{CoreResult, FlowgateError};
use crate::http_client::{SseLine, SseStream};
use crate::stream::StreamingChunk;

/// How the terminal `end` event is interpreted, decided once per stream.
///
/// Every stream starts in `Agentic`; the first `token` event switches the
/// stream to `Token` permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// All content is deferred to the terminal event.
    Agentic,
    /// Content arrives incrementally; the terminal event is just a marker.
    Token,
}

const AGENTIC_END_TEXT_PATH: &[&str] = &[
    "data", "result", "outputs", "0", "outputs", "0", "results", "message", "text",
];
const RUN_RESPONSE_TEXT_PATH: &[&str] = &[
    "outputs", "0", "outputs", "0", "results", "message", "data", "text",
];

/// Stateful per-stream translator from raw upstream lines to chunks.
///
/// One instance lives for the duration of one streaming response: state is
/// the [`StreamMode`] plus how many bytes of the cumulative `add_message`
/// snapshot have already been surfaced.
#[derive(Debug)]
pub struct ChunkParser {
    mode: StreamMode,
    emitted: usize,
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkParser {
    pub fn new() -> Self {
        Self {
            mode: StreamMode::Agentic,
            emitted: 0,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Translate one upstream line into exactly one chunk.
    ///
    /// An empty line yields [`StreamingChunk::empty`]. Anything structurally
    /// wrong returns a `Parse` error carrying enough of the line to debug it;
    /// the caller decides whether to skip the line or abort the stream.
    pub fn parse_line(&mut self, raw: &str) -> CoreResult<StreamingChunk> {
        if raw.is_empty() {
            return Ok(StreamingChunk::empty());
        }

        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(line = raw, "failed to parse stream line");
                return Err(FlowgateError::Parse(format!(
                    "invalid JSON in Langflow chunk: {raw}"
                )));
            }
        };
        let Some(obj) = value.as_object() else {
            tracing::warn!(line = raw, "stream line is not a JSON object");
            return Err(FlowgateError::Parse(format!(
                "Langflow chunk is not a JSON object: {raw}"
            )));
        };

        let Some(event_val) = obj.get("event").filter(|v| !v.is_null()) else {
            tracing::warn!(line = raw, "event type missing on chunk");
            return Err(FlowgateError::Parse(
                "missing event type in Langflow chunk".into(),
            ));
        };

        // Non-string event kinds fall through to the unexpected-event arm.
        match event_val.as_str().unwrap_or_default() {
            "token" => {
                self.mode = StreamMode::Token;
                let data = obj.get("data").filter(|v| !v.is_null()).ok_or_else(|| {
                    tracing::warn!(line = raw, "data missing on chunk");
                    FlowgateError::Parse("missing data on Langflow chunk".into())
                })?;
                let text = data.get("chunk").and_then(Value::as_str).ok_or_else(|| {
                    tracing::warn!(line = raw, "chunk text missing on chunk");
                    FlowgateError::Parse("missing token content in Langflow chunk".into())
                })?;
                Ok(StreamingChunk::token(text))
            }
            "add_message" => {
                let data = obj.get("data").filter(|v| !v.is_null()).ok_or_else(|| {
                    tracing::warn!(line = raw, "data missing on chunk");
                    FlowgateError::Parse("missing data on Langflow chunk".into())
                })?;
                let snapshot = data.get("text").and_then(Value::as_str).ok_or_else(|| {
                    tracing::warn!(line = raw, "message text missing on chunk");
                    FlowgateError::Parse("missing message text in Langflow chunk".into())
                })?;
                // A snapshot that shrank or diverged yields an empty delta
                // and resets the counter; never an error.
                let delta = snapshot.get(self.emitted..).unwrap_or("");
                let chunk = StreamingChunk::token(delta);
                self.emitted = snapshot.len();
                Ok(chunk)
            }
            "end" => match self.mode {
                StreamMode::Token => Ok(StreamingChunk::finished("")),
                StreamMode::Agentic => {
                    let text = extract_agentic_end_text(&value)?;
                    Ok(StreamingChunk::finished(text))
                }
            },
            _ => {
                tracing::warn!(line = raw, "unexpected event type on chunk");
                Err(FlowgateError::Parse(format!(
                    "unexpected event from Langflow: {event_val}"
                )))
            }
        }
    }
}

/// Pull the full response text out of an agentic `end` event.
pub fn extract_agentic_end_text(event: &Value) -> CoreResult<String> {
    let text = walk(event, AGENTIC_END_TEXT_PATH, "end event")?;
    text.as_str().map(str::to_owned).ok_or_else(|| {
        FlowgateError::Parse("message text in end event is not a string".into())
    })
}

/// Pull the response text out of a non-streaming run response body.
pub fn extract_run_response_text(body: &Value) -> CoreResult<String> {
    let text = walk(body, RUN_RESPONSE_TEXT_PATH, "run response")?;
    text.as_str().map(str::to_owned).ok_or_else(|| {
        FlowgateError::Parse("message text in run response is not a string".into())
    })
}

/// Walk `path` from `root`, treating numeric segments as array indexes.
/// The error names the first link that does not resolve.
fn walk<'a>(root: &'a Value, path: &[&str], what: &str) -> CoreResult<&'a Value> {
    let mut cur = root;
    for (i, seg) in path.iter().enumerate() {
        let next = match seg.parse::<usize>() {
            Ok(idx) => cur.get(idx),
            Err(_) => cur.get(*seg),
        };
        cur = next.ok_or_else(|| {
            tracing::warn!(link = %join_path(&path[..=i]), "missing link in {what}");
            FlowgateError::Parse(format!("missing {} in {what}", join_path(&path[..=i])))
        })?;
    }
    Ok(cur)
}

fn join_path(segs: &[&str]) -> String {
    let mut out = String::new();
    for seg in segs {
        if seg.parse::<usize>().is_ok() {
            out.push('[');
            out.push_str(seg);
            out.push(']');
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(seg);
        }
    }
    out
}

fn unterminated_stream_error() -> FlowgateError {
    FlowgateError::Parse("Langflow stream closed before end event".into())
}

/// Async pull sequence of parsed chunks over a line stream.
///
/// Ends after the first terminal chunk or the first error; nothing is ever
/// yielded past either. If the upstream closes before an `end` event, one
/// `Parse` error is surfaced and then the sequence ends. Dropping the
/// sequence drops the underlying response, which stops further reads.
pub struct ChunkStream {
    lines: SseStream,
    parser: ChunkParser,
    done: bool,
}

impl ChunkStream {
    pub fn new(lines: SseStream) -> Self {
        Self {
            lines,
            parser: ChunkParser::new(),
            done: false,
        }
    }
}

impl futures_util::stream::Stream for ChunkStream {
    type Item = CoreResult<StreamingChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        let item = match self.lines.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(SseLine { line }))) => self.parser.parse_line(&line),
            Poll::Ready(Some(Err(e))) => Err(e),
            Poll::Ready(None) => {
                tracing::warn!("stream closed before end event");
                Err(unterminated_stream_error())
            }
            Poll::Pending => return Poll::Pending,
        };
        match &item {
            Ok(chunk) if chunk.is_finished => {
                tracing::debug!(mode = ?self.parser.mode(), "stream reached end event");
                self.done = true;
            }
            Err(_) => self.done = true,
            Ok(_) => {}
        }
        Poll::Ready(Some(item))
    }
}

/// Blocking twin of [`ChunkStream`] over any line iterator.
pub struct ChunkIter<I> {
    lines: I,
    parser: ChunkParser,
    done: bool,
}

impl<I> ChunkIter<I>
where
    I: Iterator<Item = CoreResult<SseLine>>,
{
    pub fn new(lines: I) -> Self {
        Self {
            lines,
            parser: ChunkParser::new(),
            done: false,
        }
    }
}

impl<I> Iterator for ChunkIter<I>
where
    I: Iterator<Item = CoreResult<SseLine>>,
{
    type Item = CoreResult<StreamingChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.lines.next() {
            Some(Ok(SseLine { line })) => self.parser.parse_line(&line),
            Some(Err(e)) => Err(e),
            None => {
                tracing::warn!("stream closed before end event");
                Err(unterminated_stream_error())
            }
        };
        match &item {
            Ok(chunk) if chunk.is_finished => {
                tracing::debug!(mode = ?self.parser.mode(), "stream reached end event");
                self.done = true;
            }
            Err(_) => self.done = true,
            Ok(_) => {}
        }
        Some(item)
    }
}
