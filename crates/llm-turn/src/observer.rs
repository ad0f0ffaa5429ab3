//! Side-effect-only hooks at each phase boundary of a turn.
//!
//! Observers see everything and change nothing: hooks take shared
//! references and return `()`, so they cannot alter control flow or the
//! values a turn returns. Every method has a no-op default, so an
//! observer implements only the hooks it cares about.
//!
//! ```text
//!   on_turn_start
//!   ├─ on_model_call_start / on_model_call_end      (every round)
//!   ├─ on_tool_start                                (every tool call, concurrently)
//!   │    └─ on_tool_end | on_tool_error | on_tool_not_found
//!   ├─ on_model_parse_error                         (typed output only)
//!   on_turn_end | on_turn_error
//! ```
//!
//! Tool hooks fire from inside concurrently running tasks, in completion
//! order. Observers must be `Send + Sync`.

use std::sync::Arc;
use std::time::Duration;

use crate::chat::{ModelResponse, ToolCallRequest};
use crate::context::TurnContext;
use crate::engine::TurnOutcome;
use crate::error::TurnError;
use crate::provider::ModelRequest;
use crate::structured::OutputError;
use crate::tool::ToolError;

/// Hooks notified during a turn.
#[allow(unused_variables)]
pub trait TurnObserver: Send + Sync {
    /// A turn is starting with the given user input.
    fn on_turn_start(&self, ctx: &TurnContext, input: &str) {}

    /// A turn completed successfully.
    fn on_turn_end(&self, ctx: &TurnContext, outcome: &TurnOutcome) {}

    /// A turn was aborted.
    fn on_turn_error(&self, ctx: &TurnContext, error: &TurnError) {}

    /// The model is about to be called.
    fn on_model_call_start(&self, ctx: &TurnContext, request: &ModelRequest) {}

    /// The model returned a response (possibly with zero choices).
    fn on_model_call_end(&self, ctx: &TurnContext, response: &ModelResponse, duration: Duration) {}

    /// The final content failed to decode into the requested type.
    fn on_model_parse_error(&self, ctx: &TurnContext, error: &OutputError, content: &str) {}

    /// A tool call is about to be dispatched.
    fn on_tool_start(&self, ctx: &TurnContext, call: &ToolCallRequest) {}

    /// A tool call succeeded.
    fn on_tool_end(&self, ctx: &TurnContext, call: &ToolCallRequest, output: &str, duration: Duration) {
    }

    /// A tool call returned an error. The turn continues.
    fn on_tool_error(
        &self,
        ctx: &TurnContext,
        call: &ToolCallRequest,
        error: &ToolError,
        duration: Duration,
    ) {
    }

    /// The model requested a tool that is not registered.
    fn on_tool_not_found(&self, ctx: &TurnContext, call: &ToolCallRequest) {}
}

/// An ordered list of observers notified as one.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn TurnObserver>>,
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("len", &self.observers.len())
            .finish()
    }
}

impl ObserverSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer. Observers are notified in insertion order.
    pub fn push(&mut self, observer: Arc<dyn TurnObserver>) {
        self.observers.push(observer);
    }

    /// Number of observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl TurnObserver for ObserverSet {
    fn on_turn_start(&self, ctx: &TurnContext, input: &str) {
        for o in &self.observers {
            o.on_turn_start(ctx, input);
        }
    }

    fn on_turn_end(&self, ctx: &TurnContext, outcome: &TurnOutcome) {
        for o in &self.observers {
            o.on_turn_end(ctx, outcome);
        }
    }

    fn on_turn_error(&self, ctx: &TurnContext, error: &TurnError) {
        for o in &self.observers {
            o.on_turn_error(ctx, error);
        }
    }

    fn on_model_call_start(&self, ctx: &TurnContext, request: &ModelRequest) {
        for o in &self.observers {
            o.on_model_call_start(ctx, request);
        }
    }

    fn on_model_call_end(&self, ctx: &TurnContext, response: &ModelResponse, duration: Duration) {
        for o in &self.observers {
            o.on_model_call_end(ctx, response, duration);
        }
    }

    fn on_model_parse_error(&self, ctx: &TurnContext, error: &OutputError, content: &str) {
        for o in &self.observers {
            o.on_model_parse_error(ctx, error, content);
        }
    }

    fn on_tool_start(&self, ctx: &TurnContext, call: &ToolCallRequest) {
        for o in &self.observers {
            o.on_tool_start(ctx, call);
        }
    }

    fn on_tool_end(&self, ctx: &TurnContext, call: &ToolCallRequest, output: &str, duration: Duration) {
        for o in &self.observers {
            o.on_tool_end(ctx, call, output, duration);
        }
    }

    fn on_tool_error(
        &self,
        ctx: &TurnContext,
        call: &ToolCallRequest,
        error: &ToolError,
        duration: Duration,
    ) {
        for o in &self.observers {
            o.on_tool_error(ctx, call, error, duration);
        }
    }

    fn on_tool_not_found(&self, ctx: &TurnContext, call: &ToolCallRequest) {
        for o in &self.observers {
            o.on_tool_not_found(ctx, call);
        }
    }
}

// ── TracingObserver ─────────────────────────────────────────────────

/// Verbosity level for [`TracingObserver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Turn boundaries and failures, with durations.
    #[default]
    Info,
    /// Adds model calls and every tool outcome.
    Debug,
    /// Adds tool arguments and tool starts.
    Trace,
}

/// Emits one `tracing` event per hook.
///
/// ```rust
/// use std::sync::Arc;
/// use llm_turn::observer::{LogLevel, ObserverSet, TracingObserver};
///
/// let mut observers = ObserverSet::new();
/// observers.push(Arc::new(TracingObserver::new(LogLevel::Debug)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    /// Verbosity level for log output.
    pub level: LogLevel,
}

impl TracingObserver {
    /// Creates a tracing observer with the given level.
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    fn verbose(&self) -> bool {
        self.level != LogLevel::Info
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl TurnObserver for TracingObserver {
    fn on_turn_start(&self, ctx: &TurnContext, input: &str) {
        tracing::info!(
            conversation = ctx.conversation_id().unwrap_or_default(),
            depth = ctx.depth(),
            input_bytes = input.len(),
            "turn started"
        );
    }

    fn on_turn_end(&self, ctx: &TurnContext, outcome: &TurnOutcome) {
        tracing::info!(
            conversation = ctx.conversation_id().unwrap_or_default(),
            model_calls = outcome.stats.model_calls,
            tool_calls = outcome.stats.tool_calls,
            messages = outcome.transcript.len(),
            "turn completed"
        );
    }

    fn on_turn_error(&self, ctx: &TurnContext, error: &TurnError) {
        tracing::warn!(
            conversation = ctx.conversation_id().unwrap_or_default(),
            error = %error,
            "turn failed"
        );
    }

    fn on_model_call_start(&self, _ctx: &TurnContext, request: &ModelRequest) {
        if self.verbose() {
            tracing::debug!(
                messages = request.messages.len(),
                tools = request.tools.as_ref().map_or(0, Vec::len),
                "model call starting"
            );
        }
    }

    fn on_model_call_end(&self, _ctx: &TurnContext, response: &ModelResponse, duration: Duration) {
        if self.verbose() {
            tracing::debug!(
                duration_ms = millis(duration),
                choices = response.choices.len(),
                tool_calls = response.tool_call_count(),
                "model call completed"
            );
        }
    }

    fn on_model_parse_error(&self, _ctx: &TurnContext, error: &OutputError, content: &str) {
        tracing::warn!(error = %error, content_bytes = content.len(), "output decode failed");
    }

    fn on_tool_start(&self, _ctx: &TurnContext, call: &ToolCallRequest) {
        if self.level == LogLevel::Trace {
            tracing::trace!(
                tool = %call.function_name,
                call_id = %call.id,
                arguments = %call.arguments,
                "tool call starting"
            );
        }
    }

    fn on_tool_end(&self, _ctx: &TurnContext, call: &ToolCallRequest, _output: &str, duration: Duration) {
        if self.verbose() {
            tracing::debug!(
                tool = %call.function_name,
                call_id = %call.id,
                duration_ms = millis(duration),
                success = true,
                "tool call completed"
            );
        }
    }

    fn on_tool_error(
        &self,
        _ctx: &TurnContext,
        call: &ToolCallRequest,
        error: &ToolError,
        duration: Duration,
    ) {
        if self.verbose() {
            tracing::debug!(
                tool = %call.function_name,
                call_id = %call.id,
                duration_ms = millis(duration),
                success = false,
                error = %error,
                "tool call completed"
            );
        }
    }

    fn on_tool_not_found(&self, _ctx: &TurnContext, call: &ToolCallRequest) {
        tracing::info!(tool = %call.function_name, call_id = %call.id, "unknown tool requested");
    }
}
