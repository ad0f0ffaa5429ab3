//! Engine configuration and per-call overrides.
//!
//! An [`Engine`](crate::Engine) holds one base [`TurnConfig`]. Each call
//! may pass a [`TurnOverrides`]; the engine derives the effective
//! configuration for that turn with [`TurnConfig::apply`] and leaves the
//! base untouched, so concurrent turns never observe each other's
//! settings.
//!
//! ```rust
//! use llm_turn::{ToolSelection, TurnConfig, TurnOverrides};
//!
//! let base = TurnConfig::default().with_temperature(0.2);
//! let overrides = TurnOverrides::default()
//!     .with_max_tool_calls(4)
//!     .with_tools(ToolSelection::only(["search"]));
//!
//! let effective = base.apply(&overrides);
//! assert_eq!(effective.limits.max_tool_calls_per_turn, 4);
//! assert_eq!(effective.temperature, Some(0.2));
//! assert_eq!(base.limits.max_tool_calls_per_turn, 64);
//! ```

use serde::{Deserialize, Serialize};

use crate::limits::LimitPolicy;

/// Which registered tools are offered to the model for a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "names", rename_all = "snake_case")]
pub enum ToolSelection {
    /// Every registered tool.
    #[default]
    All,
    /// Only the named tools.
    Only(Vec<String>),
    /// Every tool except the named ones.
    Without(Vec<String>),
}

impl ToolSelection {
    /// Selects only the named tools.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }

    /// Selects every tool except the named ones.
    pub fn without<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Without(names.into_iter().map(Into::into).collect())
    }
}

/// Base configuration for every turn an engine runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Resource bounds.
    pub limits: LimitPolicy,
    /// Sampling temperature passed to the model.
    pub temperature: Option<f32>,
    /// Maximum tokens the model may generate per call.
    pub max_tokens: Option<u32>,
    /// Tool set offered to the model.
    pub tools: ToolSelection,
    /// Neither load nor persist history through the message store.
    pub skip_history: bool,
}

impl TurnConfig {
    /// Replaces the limit policy.
    #[must_use]
    pub fn with_limits(mut self, limits: LimitPolicy) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the per-call token cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the tool selection.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolSelection) -> Self {
        self.tools = tools;
        self
    }

    /// Sets whether history is skipped.
    #[must_use]
    pub fn with_skip_history(mut self, skip: bool) -> Self {
        self.skip_history = skip;
        self
    }

    /// Returns the configuration with every present override applied.
    #[must_use]
    pub fn apply(&self, overrides: &TurnOverrides) -> Self {
        let mut limits = self.limits.clone();
        if let Some(v) = overrides.max_messages {
            limits.max_messages = v;
        }
        if let Some(v) = overrides.max_tool_calls_per_turn {
            limits.max_tool_calls_per_turn = v;
        }
        if let Some(v) = overrides.max_transcript_bytes {
            limits.max_transcript_bytes = v;
        }
        if let Some(v) = overrides.max_empty_response_retries {
            limits.max_empty_response_retries = v;
        }
        if let Some(v) = overrides.max_consecutive_tool_not_found {
            limits.max_consecutive_tool_not_found = v;
        }
        if let Some(v) = overrides.max_depth {
            limits.max_depth = v;
        }

        Self {
            limits,
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            tools: overrides.tools.clone().unwrap_or_else(|| self.tools.clone()),
            skip_history: overrides.skip_history.unwrap_or(self.skip_history),
        }
    }
}

/// Per-call overrides. Every `None` field inherits from the base config.
///
/// The same overrides are forwarded to tools that delegate to a nested
/// assistant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnOverrides {
    /// Overrides [`LimitPolicy::max_messages`].
    pub max_messages: Option<usize>,
    /// Overrides [`LimitPolicy::max_tool_calls_per_turn`].
    pub max_tool_calls_per_turn: Option<usize>,
    /// Overrides [`LimitPolicy::max_transcript_bytes`].
    pub max_transcript_bytes: Option<usize>,
    /// Overrides [`LimitPolicy::max_empty_response_retries`].
    pub max_empty_response_retries: Option<u32>,
    /// Overrides [`LimitPolicy::max_consecutive_tool_not_found`].
    pub max_consecutive_tool_not_found: Option<usize>,
    /// Overrides [`LimitPolicy::max_depth`]. `Some(None)` removes the limit.
    pub max_depth: Option<Option<u32>>,
    /// Overrides the sampling temperature.
    pub temperature: Option<f32>,
    /// Overrides the per-call token cap.
    pub max_tokens: Option<u32>,
    /// Overrides the tool selection.
    pub tools: Option<ToolSelection>,
    /// Overrides history skipping.
    pub skip_history: Option<bool>,
}

impl TurnOverrides {
    /// Overrides the message limit.
    #[must_use]
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = Some(max);
        self
    }

    /// Overrides the cumulative tool-call limit.
    #[must_use]
    pub fn with_max_tool_calls(mut self, max: usize) -> Self {
        self.max_tool_calls_per_turn = Some(max);
        self
    }

    /// Overrides the transcript byte limit.
    #[must_use]
    pub fn with_max_transcript_bytes(mut self, max: usize) -> Self {
        self.max_transcript_bytes = Some(max);
        self
    }

    /// Overrides the empty-response retry budget.
    #[must_use]
    pub fn with_max_empty_response_retries(mut self, max: u32) -> Self {
        self.max_empty_response_retries = Some(max);
        self
    }

    /// Overrides the unknown-tool tolerance.
    #[must_use]
    pub fn with_max_consecutive_tool_not_found(mut self, max: usize) -> Self {
        self.max_consecutive_tool_not_found = Some(max);
        self
    }

    /// Overrides the nesting depth limit.
    #[must_use]
    pub fn with_max_depth(mut self, max: Option<u32>) -> Self {
        self.max_depth = Some(max);
        self
    }

    /// Overrides the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Overrides the per-call token cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Overrides the tool selection.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolSelection) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Overrides history skipping.
    #[must_use]
    pub fn with_skip_history(mut self, skip: bool) -> Self {
        self.skip_history = Some(skip);
        self
    }
}
