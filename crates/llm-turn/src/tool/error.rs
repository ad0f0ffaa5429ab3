//! Tool error types.

use serde::de::DeserializeOwned;

/// Error returned by a tool invocation.
///
/// None of these abort a turn. The dispatcher renders each one into the
/// tool message the model sees next, so the model can correct itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The arguments could not be decoded. The model is asked to retry
    /// with valid JSON.
    #[error("failed to unmarshal tool input: {0}")]
    FailedUnmarshalInput(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),

    /// The invocation was cancelled before it completed.
    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    /// Creates a [`ToolError::Failed`] with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Decodes raw model arguments, mapping any decode failure to
    /// [`ToolError::FailedUnmarshalInput`].
    ///
    /// ```rust
    /// use llm_turn::tool::ToolError;
    ///
    /// #[derive(Debug, serde::Deserialize)]
    /// struct Args { query: String }
    ///
    /// let args: Args = ToolError::parse_arguments(r#"{"query": "rust"}"#).unwrap();
    /// assert_eq!(args.query, "rust");
    ///
    /// let err = ToolError::parse_arguments::<Args>("{query:").unwrap_err();
    /// assert!(matches!(err, ToolError::FailedUnmarshalInput(_)));
    /// ```
    pub fn parse_arguments<T: DeserializeOwned>(arguments: &str) -> Result<T, Self> {
        // Models sometimes send an empty string for no-argument tools.
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        serde_json::from_str(arguments).map_err(|e| Self::FailedUnmarshalInput(e.to_string()))
    }

    /// Whether retrying the same call could change the outcome.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::FailedUnmarshalInput(err.to_string())
    }
}
