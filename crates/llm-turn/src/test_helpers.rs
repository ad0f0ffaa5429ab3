//! Pre-built helpers for testing code that drives turns.
//!
//! Available when the `test-utils` feature is enabled, allowing
//! downstream crates to reuse these utilities in their own test
//! suites. Also compiled during `#[cfg(test)]` for this crate's
//! own tests. Provides sample responses, canned tools, a recording
//! observer, and a quick [`MockProvider`] factory.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;

use crate::chat::{Choice, ModelResponse, ToolCallRequest};
use crate::context::TurnContext;
use crate::engine::TurnOutcome;
use crate::error::TurnError;
use crate::mock::MockProvider;
use crate::observer::TurnObserver;
use crate::provider::{Capability, JsonSchema, ModelRequest, ProviderMetadata, ToolDefinition};
use crate::structured::OutputError;
use crate::tool::{ToolError, ToolHandler, tool_fn};

/// Builds a [`ModelResponse`] with a single text choice.
pub fn sample_response(text: &str) -> ModelResponse {
    ModelResponse::text(text)
}

/// Builds a [`ModelResponse`] with one choice requesting the given tool calls.
pub fn sample_tool_response(calls: Vec<ToolCallRequest>) -> ModelResponse {
    ModelResponse {
        choices: vec![Choice {
            stop_reason: Some("tool_calls".into()),
            ..Choice::tool_calls(calls)
        }],
    }
}

/// Shorthand for [`ToolCallRequest::new`].
pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

/// Creates a [`MockProvider`] with the given name, model, and [`Capability::Tools`].
pub fn mock_for(provider_name: &str, model: &str) -> MockProvider {
    MockProvider::new(ProviderMetadata {
        name: provider_name.to_owned().into(),
        model: model.into(),
        capabilities: HashSet::from([Capability::Tools]),
    })
}

/// A permissive object schema for tools that do not care about their input.
pub fn any_object_schema() -> JsonSchema {
    JsonSchema::new(json!({"type": "object"}))
}

/// A tool that returns its raw arguments unchanged.
pub fn echo_tool(name: &str) -> impl ToolHandler + 'static {
    tool_fn(
        ToolDefinition::new(name, "Echoes its arguments", any_object_schema()),
        |arguments: String| async move { Ok::<_, ToolError>(arguments) },
    )
}

/// A tool that always fails with `message`.
pub fn failing_tool(name: &str, message: &str) -> impl ToolHandler + 'static {
    let message = message.to_owned();
    tool_fn(
        ToolDefinition::new(name, "Always fails", any_object_schema()),
        move |_arguments: String| {
            let message = message.clone();
            async move { Err::<String, _>(ToolError::new(message)) }
        },
    )
}

/// A tool that sleeps for `delay` and then returns `output`.
///
/// Pair with `#[tokio::test(start_paused = true)]` to make timing
/// assertions deterministic.
pub fn sleepy_tool(name: &str, delay: Duration, output: &str) -> impl ToolHandler + 'static {
    let output = output.to_owned();
    tool_fn(
        ToolDefinition::new(name, "Sleeps, then answers", any_object_schema()),
        move |_arguments: String| {
            let output = output.clone();
            async move {
                tokio::time::sleep(delay).await;
                Ok::<_, ToolError>(output)
            }
        },
    )
}

/// An observer that records one short string per hook, in call order.
///
/// Tool hooks are suffixed with the tool name (`"tool_end:search"`).
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events equal to `event`.
    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    fn record(&self, event: impl Into<String>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.into());
    }
}

impl TurnObserver for RecordingObserver {
    fn on_turn_start(&self, _ctx: &TurnContext, _input: &str) {
        self.record("turn_start");
    }

    fn on_turn_end(&self, _ctx: &TurnContext, _outcome: &TurnOutcome) {
        self.record("turn_end");
    }

    fn on_turn_error(&self, _ctx: &TurnContext, _error: &TurnError) {
        self.record("turn_error");
    }

    fn on_model_call_start(&self, _ctx: &TurnContext, _request: &ModelRequest) {
        self.record("model_call_start");
    }

    fn on_model_call_end(&self, _ctx: &TurnContext, _response: &ModelResponse, _duration: Duration) {
        self.record("model_call_end");
    }

    fn on_model_parse_error(&self, _ctx: &TurnContext, _error: &OutputError, _content: &str) {
        self.record("model_parse_error");
    }

    fn on_tool_start(&self, _ctx: &TurnContext, call: &ToolCallRequest) {
        self.record(format!("tool_start:{}", call.function_name));
    }

    fn on_tool_end(&self, _ctx: &TurnContext, call: &ToolCallRequest, _output: &str, _duration: Duration) {
        self.record(format!("tool_end:{}", call.function_name));
    }

    fn on_tool_error(
        &self,
        _ctx: &TurnContext,
        call: &ToolCallRequest,
        _error: &ToolError,
        _duration: Duration,
    ) {
        self.record(format!("tool_error:{}", call.function_name));
    }

    fn on_tool_not_found(&self, _ctx: &TurnContext, call: &ToolCallRequest) {
        self.record(format!("tool_not_found:{}", call.function_name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_tool_response() {
        let r = sample_tool_response(vec![tool_call("tc_1", "search", r#"{"q":"rust"}"#)]);
        assert_eq!(r.tool_call_count(), 1);
        assert_eq!(r.choices[0].stop_reason.as_deref(), Some("tool_calls"));
        assert!(r.joined_content().is_empty());
    }

    #[test]
    fn test_mock_for_has_tools() {
        use crate::provider::Provider;

        let meta = mock_for("openai", "gpt-test").metadata();
        assert!(meta.supports(Capability::Tools));
        assert_eq!(meta.model, "gpt-test");
    }

    #[tokio::test]
    async fn test_canned_tools() {
        let ctx = TurnContext::new();
        assert_eq!(echo_tool("e").call("{\"a\":1}", &ctx).await.unwrap(), "{\"a\":1}");
        assert_eq!(
            failing_tool("f", "boom").call("{}", &ctx).await.unwrap_err(),
            ToolError::new("boom")
        );
    }
}
