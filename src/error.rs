// Library error type — every failure surfaced to callers is one of these kinds.

use thiserror::Error;

/// Terminal errors delivered through a cycle's completion handler, plus the
/// structural errors of the service-profile layer.
#[derive(Debug, Error)]
pub enum CycleError {
    /// A processor received an object of an unexpected kind.
    #[error("object kind does not match the processor")]
    ObjectKindNotMatch,

    /// The response status code was judged a failure by policy.
    #[error("status code {status} seems to have erred")]
    StatusCodeSeemsToHaveErred { status: u16 },

    /// A request processor failed before the transport task was created.
    #[error("request preparation failed: {message}")]
    PreparationFailure { message: String },

    /// The transport task was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The transport timed out.
    #[error("operation timed out")]
    TimedOut,

    /// Any other transport-level failure, passed through verbatim.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A codec-level processor failure, e.g. malformed JSON in a response.
    #[error("processor error: {message}")]
    Processor { message: String },

    /// The request URL could not be parsed.
    #[error("invalid URL: {message}")]
    InvalidUrl { message: String },

    /// A service profile is structurally invalid.
    #[error("profile error: {message}")]
    Profile { message: String },

    /// The session was invalidated and accepts no new work.
    #[error("session invalidated")]
    SessionInvalidated,
}

impl CycleError {
    /// Status code carried by a policy failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CycleError::StatusCodeSeemsToHaveErred { status } => Some(*status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CycleError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CycleError::TimedOut)
    }
}

impl From<reqwest::Error> for CycleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CycleError::TimedOut
        } else {
            CycleError::Transport {
                message: err.to_string(),
            }
        }
    }
}
