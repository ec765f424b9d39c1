use std::time::Duration;

use thiserror::Error;

use crate::media::MediaError;

/// Failure of a room operation.
///
/// `RequestRejected` is an answer from the server; `Media` is a failure inside
/// the local media stack.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("signaling channel failure: {0}")]
    ChannelFailure(String),

    #[error("'{method}' rejected by server: [{code}] {reason}")]
    RequestRejected {
        method: String,
        code: i64,
        reason: String,
    },

    #[error("'{method}' timed out after {}ms", timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    #[error("precondition not met: {0}")]
    PreconditionNotMet(&'static str),

    #[error("signaling channel closed")]
    ChannelClosed,

    #[error("malformed '{method}' payload: {detail}")]
    InvalidPayload { method: String, detail: String },

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl SessionError {
    pub(crate) fn invalid_payload(method: &str, err: impl std::fmt::Display) -> Self {
        SessionError::InvalidPayload {
            method: method.to_string(),
            detail: err.to_string(),
        }
    }
}
