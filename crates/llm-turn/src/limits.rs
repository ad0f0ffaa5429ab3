//! Resource bounds for one turn.
//!
//! [`LimitPolicy`] is plain data: the engine reads it, never writes it,
//! and evaluates it at fixed points of the loop.
//!
//! | Check | When | Fails if |
//! |-------|------|----------|
//! | messages | before each model call | `len >= max_messages` |
//! | transcript bytes | before each model call | `bytes > max_transcript_bytes` |
//! | empty responses | after an empty response | `count > max_empty_response_retries` |
//! | unknown tools | after each dispatch round | `tally > max_consecutive_tool_not_found` |
//! | tool calls | after each dispatch round | `total >= max_tool_calls_per_turn` |
//! | depth | at turn start | `depth >= max_depth` |

use serde::{Deserialize, Serialize};

use crate::chat::Transcript;
use crate::error::LimitViolation;

/// Bounds applied to a single turn.
///
/// Deserializes with defaults for missing fields, so a partial TOML or
/// JSON document is enough:
///
/// ```rust
/// use llm_turn::LimitPolicy;
///
/// let policy: LimitPolicy = serde_json::from_str(r#"{"max_tool_calls_per_turn": 8}"#).unwrap();
/// assert_eq!(policy.max_tool_calls_per_turn, 8);
/// assert_eq!(policy.max_messages, LimitPolicy::default().max_messages);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitPolicy {
    /// Maximum transcript length before a model call. Default: 200.
    pub max_messages: usize,
    /// Maximum tool calls across all rounds of a turn. Default: 64.
    pub max_tool_calls_per_turn: usize,
    /// Maximum transcript size in bytes before a model call. Default: 1 MiB.
    pub max_transcript_bytes: usize,
    /// Empty responses tolerated before the turn fails. Default: 2.
    pub max_empty_response_retries: u32,
    /// Unknown-tool requests tolerated across consecutive rounds.
    /// Default: 3.
    pub max_consecutive_tool_not_found: usize,
    /// Maximum nesting depth for nested assistants.
    ///
    /// - `Some(n)`: a turn at depth `>= n` fails at entry
    /// - `None`: no limit
    ///
    /// Default: `Some(3)`.
    pub max_depth: Option<u32>,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            max_messages: 200,
            max_tool_calls_per_turn: 64,
            max_transcript_bytes: 1024 * 1024,
            max_empty_response_retries: 2,
            max_consecutive_tool_not_found: 3,
            max_depth: Some(3),
        }
    }
}

impl LimitPolicy {
    /// Sets `max_messages`.
    #[must_use]
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    /// Sets `max_tool_calls_per_turn`.
    #[must_use]
    pub fn with_max_tool_calls(mut self, max: usize) -> Self {
        self.max_tool_calls_per_turn = max;
        self
    }

    /// Sets `max_transcript_bytes`.
    #[must_use]
    pub fn with_max_transcript_bytes(mut self, max: usize) -> Self {
        self.max_transcript_bytes = max;
        self
    }

    /// Sets `max_empty_response_retries`.
    #[must_use]
    pub fn with_max_empty_response_retries(mut self, max: u32) -> Self {
        self.max_empty_response_retries = max;
        self
    }

    /// Sets `max_consecutive_tool_not_found`.
    #[must_use]
    pub fn with_max_consecutive_tool_not_found(mut self, max: usize) -> Self {
        self.max_consecutive_tool_not_found = max;
        self
    }

    /// Sets `max_depth`.
    #[must_use]
    pub fn with_max_depth(mut self, max: Option<u32>) -> Self {
        self.max_depth = max;
        self
    }

    /// Checks transcript length and size before a model call.
    pub fn check_before_invoke(&self, transcript: &Transcript) -> Result<(), LimitViolation> {
        let count = transcript.len();
        if count >= self.max_messages {
            return Err(LimitViolation::Messages {
                count,
                limit: self.max_messages,
            });
        }
        let bytes = transcript.byte_size();
        if bytes > self.max_transcript_bytes {
            return Err(LimitViolation::TranscriptBytes {
                bytes,
                limit: self.max_transcript_bytes,
            });
        }
        Ok(())
    }

    /// Checks the cumulative tool-call count after a dispatch round.
    pub fn check_tool_calls(&self, executed: usize) -> Result<(), LimitViolation> {
        if executed >= self.max_tool_calls_per_turn {
            return Err(LimitViolation::ToolCalls {
                count: executed,
                limit: self.max_tool_calls_per_turn,
            });
        }
        Ok(())
    }

    /// Checks the nesting depth of a turn at entry.
    pub fn check_depth(&self, depth: u32) -> Result<(), LimitViolation> {
        match self.max_depth {
            Some(limit) if depth >= limit => Err(LimitViolation::Depth {
                current: depth,
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Whether `retries` empty responses exhaust the retry budget.
    pub fn empty_retries_exhausted(&self, retries: u32) -> bool {
        retries > self.max_empty_response_retries
    }

    /// Whether the running unknown-tool tally exceeds the tolerance.
    pub fn not_found_exceeded(&self, tally: usize) -> bool {
        tally > self.max_consecutive_tool_not_found
    }
}
