//! Provider seams for flow execution.
//!
//! Each backend exposes the same four operations behind two traits: an async
//! pair for runtime-driven hosts and a blocking pair for hosts that call from
//! plain threads. Blocking implementations must not assume a runtime exists.

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{RunCompletion, RunRequest};
use crate::stream::{BoxChunkIter, BoxChunkStream};

/// Async face of a flow-execution backend.
#[async_trait]
pub trait FlowProvider: Send + Sync {
    /// Stable provider name, used in logs and completion metadata.
    fn name(&self) -> &str;

    /// Run the flow to completion and return the final text.
    async fn acompletion(&self, req: RunRequest) -> CoreResult<RunCompletion>;

    /// Run the flow and stream chunks as the backend produces them. The
    /// returned stream ends after the first terminal chunk or error.
    async fn astreaming(&self, req: RunRequest) -> CoreResult<BoxChunkStream>;
}

/// Blocking face with the same semantics as [`FlowProvider`].
pub trait BlockingFlowProvider: Send + Sync {
    fn name(&self) -> &str;

    fn completion(&self, req: RunRequest) -> CoreResult<RunCompletion>;

    fn streaming(&self, req: RunRequest) -> CoreResult<BoxChunkIter>;
}
