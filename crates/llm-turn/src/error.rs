//! Error taxonomy for one conversational turn.
//!
//! Every fatal condition maps to a [`TurnError`] variant. The engine
//! returns it wrapped in a [`TurnFailure`] together with the transcript
//! as it stood when the turn was aborted, so callers can inspect what the
//! model saw:
//!
//! ```rust
//! use llm_turn::{TurnError, TurnFailure};
//!
//! fn describe(failure: &TurnFailure) -> String {
//!     match &failure.error {
//!         TurnError::Transport { retryable: true, .. } => "try again later".into(),
//!         TurnError::LimitExceeded(violation) => format!("limit hit: {violation}"),
//!         other => other.to_string(),
//!     }
//! }
//! ```
//!
//! Tool-level failures are deliberately absent here. A tool that errors
//! or a tool name the model made up is folded into the transcript as
//! diagnostic content and never ends the turn (see
//! [`dispatch`](crate::tool::dispatch)).

use std::fmt;

use crate::chat::Transcript;

/// A fatal error that aborts a turn.
///
/// Variants are `#[non_exhaustive]`; always include a wildcard arm.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TurnError {
    /// The execution context carries no conversation identity.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// The model invocation failed at the network or provider layer.
    ///
    /// Not retried by the engine. `status` is `None` when no response
    /// was received at all.
    #[error("transport error (status={status:?}): {message}")]
    Transport {
        /// The HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// A human-readable description of the failure.
        message: String,
        /// Whether a caller-level retry may succeed.
        retryable: bool,
    },

    /// The model kept returning zero choices.
    #[error("model returned no choices {retries} times (limit: {limit})")]
    EmptyResponseExceeded {
        /// Empty responses observed in this turn.
        retries: u32,
        /// The configured retry budget.
        limit: u32,
    },

    /// A transcript, tool-call, or nesting limit was exceeded.
    #[error("limit exceeded: {0}")]
    LimitExceeded(LimitViolation),

    /// The model requested unknown tools too many rounds in a row.
    #[error("too many unknown tool calls ({count}, limit: {limit})")]
    ToolNotFoundExceeded {
        /// Running not-found tally when the turn was aborted.
        count: usize,
        /// The configured tolerance.
        limit: usize,
    },

    /// The final content could not be decoded into the requested type.
    #[error("output decode error: {message}")]
    OutputDecode {
        /// What went wrong during decoding.
        message: String,
        /// The raw model content, kept for diagnostics.
        content: String,
    },

    /// The caller cancelled the turn.
    #[error("turn cancelled")]
    Cancelled,

    /// The message store failed to load or persist history.
    #[error("message store error: {0}")]
    Store(String),
}

impl TurnError {
    /// Returns `true` if a caller may reasonably retry the whole turn.
    ///
    /// Only transport errors flagged retryable qualify; limit violations
    /// and decode failures will recur on identical input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                retryable: true,
                ..
            }
        )
    }
}

/// Which limit a turn ran into, with the observed value and the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LimitViolation {
    /// Transcript length reached `max_messages`.
    Messages {
        /// Messages in the transcript.
        count: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// Transcript size exceeded `max_transcript_bytes`.
    TranscriptBytes {
        /// Transcript size in bytes.
        bytes: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// Cumulative tool calls reached `max_tool_calls_per_turn`.
    ToolCalls {
        /// Tool calls executed so far in this turn.
        count: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// A nested turn started at or beyond `max_depth`.
    Depth {
        /// Depth of the rejected turn.
        current: u32,
        /// Configured maximum.
        limit: u32,
    },
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Messages { count, limit } => {
                write!(f, "transcript has {count} messages (limit: {limit})")
            }
            Self::TranscriptBytes { bytes, limit } => {
                write!(f, "transcript is {bytes} bytes (limit: {limit})")
            }
            Self::ToolCalls { count, limit } => {
                write!(f, "{count} tool calls executed (limit: {limit})")
            }
            Self::Depth { current, limit } => {
                write!(f, "max nesting depth exceeded (current: {current}, limit: {limit})")
            }
        }
    }
}

impl From<LimitViolation> for TurnError {
    fn from(violation: LimitViolation) -> Self {
        Self::LimitExceeded(violation)
    }
}

/// The `Err` side of a turn: the fatal error and the partial transcript.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct TurnFailure {
    /// Why the turn was aborted.
    #[source]
    pub error: TurnError,
    /// The transcript at the moment of failure.
    pub transcript: Transcript,
}

impl TurnFailure {
    /// Pairs an error with the transcript it occurred on.
    pub fn new(error: TurnError, transcript: Transcript) -> Self {
        Self { error, transcript }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_transport() {
        let err = TurnError::Transport {
            status: Some(http::StatusCode::TOO_MANY_REQUESTS),
            message: "rate limited".into(),
            retryable: true,
        };
        let display = err.to_string();
        assert!(display.contains("429"));
        assert!(display.contains("rate limited"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_display_limit_violation() {
        let err = TurnError::from(LimitViolation::ToolCalls {
            count: 4,
            limit: 4,
        });
        assert_eq!(
            err.to_string(),
            "limit exceeded: 4 tool calls executed (limit: 4)"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_depth() {
        let err = TurnError::from(LimitViolation::Depth {
            current: 3,
            limit: 3,
        });
        let display = err.to_string();
        assert!(display.contains("max nesting depth exceeded"));
        assert!(display.contains("current: 3"));
    }

    #[test]
    fn test_output_decode_keeps_content() {
        let err = TurnError::OutputDecode {
            message: "expected value".into(),
            content: "not json".into(),
        };
        assert!(matches!(&err, TurnError::OutputDecode { content, .. } if content == "not json"));
    }

    #[test]
    fn test_failure_source_chain() {
        use std::error::Error;
        let failure = TurnFailure::new(TurnError::Cancelled, Transcript::new());
        let source = failure.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("turn cancelled"));
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TurnError>();
        assert_send_sync::<TurnFailure>();
    }
}
