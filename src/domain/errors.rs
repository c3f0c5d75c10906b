//! # Error Taxonomy
//!
//! Error kinds raised by the command execution layer.
//!
//! | Kind | Raised by | Recovered where |
//! |------|-----------|-----------------|
//! | [`WaitError::Timeout`] | event waiter | command logic, or surfaced as a notice |
//! | [`WaitError::ResourceGone`] | liveness check | command logic, or surfaced as a notice |
//! | [`WaitError::Interrupted`] | process kill | never; propagates out of the command body |
//! | [`CommandError::Failure`] | command logic | shown to the user verbatim |
//! | [`CommandError::Internal`] | anything unexpected | process wrapper, reported to operators |

use thiserror::Error;

/// Failures of a single handoff receive.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("timed out waiting for a value")]
    Timeout,
    /// The producer resolved the handoff with an error.
    #[error("producer failed: {0}")]
    Failed(String),
    /// Another receiver already consumed the value.
    #[error("value was already taken by another receiver")]
    AlreadyTaken,
    #[error("invalid timeout: {0}ms")]
    InvalidTimeout(i64),
}

/// Outcome of an event waiter request that did not produce an event.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("no matching event before the deadline")]
    Timeout,
    #[error("the watched resource no longer exists")]
    ResourceGone,
    #[error("the process was interrupted")]
    Interrupted,
}

/// Everything a command body can end with besides success.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("timed out")]
    Timeout,
    #[error("watched resource is gone")]
    ResourceGone,
    #[error("interrupted")]
    Interrupted,
    /// Domain failure with an author-supplied message.
    #[error("{message}")]
    Failure {
        message: String,
        counts_against_ratelimit: bool,
    },
    /// Silent cooperative early exit.
    #[error("exited")]
    Exit,
    /// Cooperative early exit with a notice.
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CommandError {
    /// Domain failure that still consumes the cooldown.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            counts_against_ratelimit: true,
        }
    }

    /// Domain failure that refunds the cooldown.
    pub fn failure_refunded(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            counts_against_ratelimit: false,
        }
    }

    /// Chat provider errors are plain strings; treat them as internal faults.
    pub fn chat(err: String) -> Self {
        Self::Internal(anyhow::anyhow!(err))
    }
}

impl From<WaitError> for CommandError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout => Self::Timeout,
            WaitError::ResourceGone => Self::ResourceGone,
            WaitError::Interrupted => Self::Interrupted,
        }
    }
}

pub type CommandResult = Result<(), CommandError>;
