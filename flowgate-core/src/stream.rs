//! Streaming primitives exposed by flowgate.
//!
//! Contract:
//! - A chunk sequence carries 0..n chunks with `is_finished = false`, then exactly one
//!   terminal chunk with `is_finished = true` and `finish_reason = "stop"`.
//! - Within a single event family (token deltas, or message-snapshot diffs, or a
//!   lone agentic end), concatenating `text` up to and including the terminal chunk
//!   reconstructs the full response exactly once (no duplication, no gaps).
//! - The agentic terminal chunk always carries the entire response text; consumers
//!   of snapshot streams treat it as the finished whole, not another delta.
//! - After the terminal chunk, no further chunks are emitted.

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// What the caller receives per increment: the host-facing generic chunk.
///
/// `usage`, `index`, and `tool_use` are passthrough fields kept for the host
/// chunk shape; flowgate never populates them beyond their defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct StreamingChunk {
    /// Incremental content to append (may be empty).
    pub text: String,
    /// True exactly once, on the terminal chunk.
    pub is_finished: bool,
    /// Empty until terminal, then "stop".
    pub finish_reason: String,
    pub usage: Option<ChunkUsage>,
    pub index: u32,
    pub tool_use: Option<serde_json::Value>,
}

/// Token usage block in the host chunk shape. Present for wire compatibility;
/// flowgate does not compute usage.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl StreamingChunk {
    /// The no-visible-output chunk: empty text, not finished.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An incremental content chunk.
    pub fn token(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// The terminal chunk. `text` may be empty (token streams) or the full
    /// response (agentic streams).
    pub fn finished(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_finished: true,
            finish_reason: "stop".into(),
            ..Self::default()
        }
    }
}

/// Boxed async chunk sequence. Streaming operations return this.
pub type BoxChunkStream = futures::stream::BoxStream<'static, CoreResult<StreamingChunk>>;

/// Boxed blocking chunk sequence, the iterator twin of [`BoxChunkStream`].
pub type BoxChunkIter = Box<dyn Iterator<Item = CoreResult<StreamingChunk>> + Send>;
