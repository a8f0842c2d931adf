use thiserror::Error;

/// Core error type for flowgate.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
///
/// Hosts consume failures through a uniform surface: an HTTP-like status
/// code (`status_code`), a message (`Display`), and the upstream response
/// headers when there were any (`headers`).
#[derive(Debug, Error)]
pub enum FlowgateError {
    /// Transport failure or non-2xx upstream response. Network errors that
    /// never produced a response carry status 500 and no headers.
    #[error("upstream error ({status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        headers: Option<http::HeaderMap>,
    },

    /// Malformed or structurally unexpected upstream payload.
    #[error("parse error: {0}")]
    Parse(String),

    /// Caller precondition violation, e.g. an empty message list.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowgateError {
    /// HTTP-like status code for the uniform host surface.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Upstream { status, .. } => *status,
            Self::InvalidInput(_) => 400,
            Self::Parse(_) | Self::Io(_) | Self::Other(_) => 500,
        }
    }

    /// Upstream response headers, when the failure came from an HTTP response.
    pub fn headers(&self) -> Option<&http::HeaderMap> {
        match self {
            Self::Upstream { headers, .. } => headers.as_ref(),
            _ => None,
        }
    }

    /// Short stable label for logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upstream { .. } => "upstream",
            Self::Parse(_) => "parse",
            Self::InvalidInput(_) => "invalid_input",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, FlowgateError>;
