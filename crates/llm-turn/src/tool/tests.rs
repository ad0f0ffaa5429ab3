//! Tests for the tool module.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;

use super::*;
use crate::chat::{ChatRole, Choice, ModelResponse, Transcript};
use crate::config::{ToolSelection, TurnOverrides};
use crate::context::TurnContext;
use crate::observer::ObserverSet;
use crate::provider::{JsonSchema, ToolDefinition, ToolRetryConfig};
use crate::test_helpers::{
    RecordingObserver, any_object_schema, echo_tool, failing_tool, sample_tool_response,
    sleepy_tool, tool_call,
};

fn number_schema() -> JsonSchema {
    JsonSchema::new(json!({
        "type": "object",
        "properties": {
            "a": {"type": "number"},
            "b": {"type": "number"}
        },
        "required": ["a", "b"]
    }))
}

#[derive(Deserialize)]
struct AddInput {
    a: f64,
    b: f64,
}

fn add_tool() -> impl ToolHandler + 'static {
    typed_tool_fn(
        ToolDefinition::new("add", "Add two numbers", number_schema()),
        |input: AddInput| async move { Ok::<_, ToolError>(format!("{}", input.a + input.b)) },
    )
}

fn ctx() -> TurnContext {
    TurnContext::new().with_conversation("test")
}

fn dispatcher(registry: ToolRegistry) -> Dispatcher {
    Dispatcher::new(
        Arc::new(registry),
        Arc::new(ObserverSet::new()),
        Arc::new(TurnOverrides::default()),
    )
}

/// Contents of every tool message, in transcript order.
fn tool_contents(transcript: &Transcript) -> Vec<String> {
    transcript
        .messages()
        .iter()
        .filter(|m| m.role == ChatRole::Tool)
        .flat_map(|m| m.tool_results().map(|r| r.content.clone()).collect::<Vec<_>>())
        .collect()
}

/// A tool whose future panics when polled.
struct PanicTool;

fn explode() -> Result<String, ToolError> {
    panic!("tool exploded")
}

impl ToolHandler for PanicTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("panic", "Panics", any_object_schema())
    }

    fn call<'a>(&'a self, _arguments: &'a str, _ctx: &'a TurnContext) -> ToolFuture<'a> {
        Box::pin(async move { explode() })
    }
}

/// A nested assistant that reports what the dispatcher handed it.
struct ReportingAssistant;

impl ToolHandler for ReportingAssistant {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("delegate", "Nested assistant", any_object_schema())
    }

    fn call<'a>(&'a self, _arguments: &'a str, _ctx: &'a TurnContext) -> ToolFuture<'a> {
        Box::pin(async move { Ok("plain call".to_string()) })
    }

    fn as_nested_assistant(&self) -> Option<&dyn NestedAssistant> {
        Some(self)
    }
}

impl NestedAssistant for ReportingAssistant {
    fn call_as_nested_assistant<'a>(
        &'a self,
        input: &'a str,
        ctx: &'a TurnContext,
        overrides: &'a TurnOverrides,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            Ok(format!(
                "input={input} depth={} max_tokens={:?}",
                ctx.depth(),
                overrides.max_tokens
            ))
        })
    }
}

// ── ToolHandler tests ───────────────────────────────────────────

#[test]
fn test_tool_handler_is_object_safe() {
    let handler: Arc<dyn ToolHandler> = Arc::new(add_tool());
    assert_eq!(handler.definition().name, "add");
    assert!(handler.as_nested_assistant().is_none());
}

#[tokio::test]
async fn test_typed_tool_decodes_arguments() {
    let out = add_tool().call(r#"{"a": 2, "b": 3}"#, &ctx()).await.unwrap();
    assert_eq!(out, "5");
}

#[tokio::test]
async fn test_typed_tool_rejects_bad_arguments() {
    let err = add_tool().call("{not json", &ctx()).await.unwrap_err();
    assert!(matches!(err, ToolError::FailedUnmarshalInput(_)));
}

#[tokio::test]
async fn test_tool_fn_with_ctx_sees_context() {
    let tool = tool_fn_with_ctx(
        ToolDefinition::new("whoami", "Conversation id", any_object_schema()),
        |_args: String, ctx: TurnContext| async move {
            Ok::<_, ToolError>(ctx.conversation_id().unwrap_or_default().to_owned())
        },
    );
    assert_eq!(tool.call("{}", &ctx()).await.unwrap(), "test");
}

// ── ToolRegistry tests ──────────────────────────────────────────

#[test]
fn test_registry_lookup_is_case_insensitive() {
    let mut registry = ToolRegistry::new();
    registry.register(add_tool());

    assert!(registry.contains("add"));
    assert!(registry.contains("ADD"));
    assert!(registry.get("Add").is_some());
    assert!(registry.get("subtract").is_none());
}

#[test]
fn test_registry_replaces_same_name() {
    let mut registry = ToolRegistry::new();
    registry.register(echo_tool("search"));
    registry.register(failing_tool("SEARCH", "down"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_registry_names_and_definitions_sorted() {
    let mut registry = ToolRegistry::new();
    registry
        .register(echo_tool("zeta"))
        .register(echo_tool("alpha"))
        .register(add_tool());

    assert_eq!(registry.names(), vec!["add", "alpha", "zeta"]);
    let defs: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
    assert_eq!(defs, vec!["add", "alpha", "zeta"]);
}

#[test]
fn test_registry_scoping() {
    let mut registry = ToolRegistry::new();
    registry
        .register(echo_tool("a"))
        .register(echo_tool("b"))
        .register(echo_tool("c"));

    assert_eq!(registry.only(["A", "c"]).names(), vec!["a", "c"]);
    assert_eq!(registry.without(["b"]).names(), vec!["a", "c"]);
    assert_eq!(registry.select(&ToolSelection::All).len(), 3);
    assert_eq!(
        registry.select(&ToolSelection::only(["b"])).names(),
        vec!["b"]
    );
    assert_eq!(
        registry.select(&ToolSelection::without(["a", "b"])).names(),
        vec!["c"]
    );
    // Scoping never touches the original.
    assert_eq!(registry.len(), 3);
}

// ── Dispatcher tests ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_dispatch_preserves_request_order_and_runs_concurrently() {
    let mut registry = ToolRegistry::new();
    registry
        .register(sleepy_tool("slow", Duration::from_millis(100), "slow result"))
        .register(sleepy_tool("fast", Duration::from_millis(50), "fast result"));

    let response = sample_tool_response(vec![
        tool_call("call-1", "slow", "{}"),
        tool_call("call-2", "fast", "{}"),
    ]);

    let start = Instant::now();
    let outcome = dispatcher(registry)
        .dispatch(&ctx(), &Transcript::new(), &response)
        .await;
    let elapsed = start.elapsed();

    assert_eq!(tool_contents(&outcome.transcript), vec!["slow result", "fast result"]);
    let ids: Vec<String> = outcome
        .transcript
        .messages()
        .iter()
        .flat_map(|m| m.tool_results().map(|r| r.tool_call_id.clone()).collect::<Vec<_>>())
        .collect();
    assert_eq!(ids, vec!["call-1", "call-2"]);

    assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "elapsed {elapsed:?}");
    assert_eq!(outcome.tool_call_count, 2);
    assert_eq!(outcome.not_found_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_order_independent_of_latency() {
    let permutations = [[30, 10, 20], [10, 20, 30], [20, 30, 10], [30, 20, 10]];
    for delays in permutations {
        let mut registry = ToolRegistry::new();
        for (i, ms) in delays.iter().enumerate() {
            registry.register(sleepy_tool(
                &format!("t{i}"),
                Duration::from_millis(*ms),
                &format!("r{i}"),
            ));
        }
        let response = sample_tool_response(
            (0..3)
                .map(|i| tool_call(&format!("id{i}"), &format!("t{i}"), "{}"))
                .collect(),
        );
        let outcome = dispatcher(registry)
            .dispatch(&ctx(), &Transcript::new(), &response)
            .await;
        assert_eq!(
            tool_contents(&outcome.transcript),
            vec!["r0", "r1", "r2"],
            "delays {delays:?}"
        );
    }
}

#[tokio::test]
async fn test_dispatch_does_not_modify_input_transcript() {
    let mut registry = ToolRegistry::new();
    registry.register(echo_tool("echo"));
    let input: Transcript = vec![crate::chat::ChatMessage::human("hi")].into();

    let outcome = dispatcher(registry)
        .dispatch(&ctx(), &input, &sample_tool_response(vec![tool_call("1", "echo", "{}")]))
        .await;

    assert_eq!(input.len(), 1);
    // human, ai(tool calls), tool
    assert_eq!(outcome.transcript.len(), 3);
    assert_eq!(outcome.transcript.messages()[1].role, ChatRole::Ai);
    assert_eq!(outcome.transcript.messages()[2].role, ChatRole::Tool);
    assert!(outcome.transcript.check_pairing().is_ok());
}

#[tokio::test]
async fn test_dispatch_unknown_tool_lists_available() {
    let mut registry = ToolRegistry::new();
    registry.register(echo_tool("search")).register(add_tool());

    let response = sample_tool_response(vec![
        tool_call("1", "ghost", "{}"),
        tool_call("2", "search", r#"{"q":"x"}"#),
    ]);
    let outcome = dispatcher(registry)
        .dispatch(&ctx(), &Transcript::new(), &response)
        .await;

    let contents = tool_contents(&outcome.transcript);
    assert_eq!(
        contents[0],
        "Tool `ghost` not found. Available tools: add, search"
    );
    assert_eq!(contents[1], r#"{"q":"x"}"#);
    assert_eq!(outcome.not_found_count, 1);
    assert_eq!(outcome.tool_call_count, 2);
}

#[tokio::test]
async fn test_dispatch_unknown_tool_with_empty_registry() {
    let outcome = dispatcher(ToolRegistry::new())
        .dispatch(
            &ctx(),
            &Transcript::new(),
            &sample_tool_response(vec![tool_call("1", "ghost", "{}")]),
        )
        .await;
    assert_eq!(
        tool_contents(&outcome.transcript),
        vec!["Tool `ghost` not found. Available tools: (none)"]
    );
}

#[tokio::test]
async fn test_dispatch_bad_arguments_ask_for_retry() {
    let mut registry = ToolRegistry::new();
    registry.register(add_tool());

    let outcome = dispatcher(registry)
        .dispatch(
            &ctx(),
            &Transcript::new(),
            &sample_tool_response(vec![tool_call("1", "add", "{a: 1")]),
        )
        .await;

    let content = &tool_contents(&outcome.transcript)[0];
    assert!(content.starts_with("Invalid arguments for tool `add`:"), "{content}");
    assert!(content.contains("Retry the call with valid JSON arguments"), "{content}");
}

#[tokio::test]
async fn test_dispatch_tool_failure_becomes_content() {
    let mut registry = ToolRegistry::new();
    registry.register(failing_tool("fail", "disk full"));

    let outcome = dispatcher(registry)
        .dispatch(
            &ctx(),
            &Transcript::new(),
            &sample_tool_response(vec![tool_call("1", "fail", "{}")]),
        )
        .await;

    assert_eq!(tool_contents(&outcome.transcript), vec!["Tool call failed: disk full"]);
}

#[tokio::test]
async fn test_dispatch_panicking_tool_fills_its_slot() {
    let mut registry = ToolRegistry::new();
    registry.register(PanicTool).register(echo_tool("echo"));

    let response = sample_tool_response(vec![
        tool_call("1", "panic", "{}"),
        tool_call("2", "echo", "ok"),
    ]);
    let outcome = dispatcher(registry)
        .dispatch(&ctx(), &Transcript::new(), &response)
        .await;

    let contents = tool_contents(&outcome.transcript);
    assert_eq!(contents.len(), 2);
    assert_eq!(
        contents[0],
        "Tool call failed: tool task failed during execution"
    );
    assert_eq!(contents[1], "ok");
    assert!(outcome.transcript.check_pairing().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_cancellation_reported_after_join() {
    let mut registry = ToolRegistry::new();
    registry.register(sleepy_tool("slow", Duration::from_secs(60), "never"));

    let ctx = ctx();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let outcome = dispatcher(registry)
        .dispatch(
            &ctx,
            &Transcript::new(),
            &sample_tool_response(vec![tool_call("1", "slow", "{}")]),
        )
        .await;

    assert!(outcome.cancelled);
    assert!(start.elapsed() < Duration::from_secs(1));
    // The interrupted round is still folded into the transcript.
    assert_eq!(
        outcome.transcript.messages().iter().map(|m| m.role).collect::<Vec<_>>(),
        vec![ChatRole::Ai, ChatRole::Tool]
    );
    assert_eq!(
        tool_contents(&outcome.transcript),
        vec!["Tool call failed: tool call cancelled"]
    );
    assert!(outcome.transcript.check_pairing().is_ok());
}

#[tokio::test]
async fn test_dispatch_not_cancelled_by_default() {
    let mut registry = ToolRegistry::new();
    registry.register(echo_tool("echo"));
    let outcome = dispatcher(registry)
        .dispatch(
            &ctx(),
            &Transcript::new(),
            &sample_tool_response(vec![tool_call("1", "echo", "{}")]),
        )
        .await;
    assert!(!outcome.cancelled);
}

#[tokio::test]
async fn test_dispatch_groups_ai_messages_per_choice() {
    let mut registry = ToolRegistry::new();
    registry.register(echo_tool("echo"));

    let response = ModelResponse {
        choices: vec![
            Choice::tool_calls(vec![tool_call("a", "echo", "1"), tool_call("b", "echo", "2")]),
            Choice::text("no tools here"),
            Choice::tool_calls(vec![tool_call("c", "echo", "3")]),
        ],
    };
    let outcome = dispatcher(registry)
        .dispatch(&ctx(), &Transcript::new(), &response)
        .await;

    let roles: Vec<ChatRole> = outcome.transcript.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![ChatRole::Ai, ChatRole::Ai, ChatRole::Tool, ChatRole::Tool, ChatRole::Tool]
    );
    assert_eq!(outcome.transcript.messages()[0].tool_calls().count(), 2);
    assert_eq!(outcome.transcript.messages()[1].tool_calls().count(), 1);
    assert_eq!(tool_contents(&outcome.transcript), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_dispatch_synthesizes_missing_ids() {
    let mut registry = ToolRegistry::new();
    registry.register(echo_tool("echo"));

    let mut call = tool_call("", "echo", "{}");
    call.kind = String::new();
    let response = sample_tool_response(vec![tool_call("given", "echo", "{}"), call]);
    let outcome = dispatcher(registry)
        .dispatch(&ctx(), &Transcript::new(), &response)
        .await;

    let requested: Vec<(String, String)> = outcome.transcript.messages()[0]
        .tool_calls()
        .map(|c| (c.id.clone(), c.kind.clone()))
        .collect();
    assert_eq!(
        requested,
        vec![
            ("given".to_string(), "function".to_string()),
            ("echo_1".to_string(), "function".to_string()),
        ]
    );
    assert!(outcome.transcript.check_pairing().is_ok());
}

#[tokio::test]
async fn test_dispatch_prefers_nested_assistant_path() {
    let mut registry = ToolRegistry::new();
    registry.register(ReportingAssistant);

    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::new(ObserverSet::new()),
        Arc::new(TurnOverrides::default().with_max_tokens(42)),
    );
    let outcome = dispatcher
        .dispatch(
            &ctx(),
            &Transcript::new(),
            &sample_tool_response(vec![tool_call("1", "delegate", "sub-task")]),
        )
        .await;

    assert_eq!(
        tool_contents(&outcome.transcript),
        vec!["input=sub-task depth=1 max_tokens=Some(42)"]
    );
}

#[tokio::test]
async fn test_dispatch_notifies_observers() {
    let mut registry = ToolRegistry::new();
    registry
        .register(echo_tool("echo"))
        .register(failing_tool("fail", "nope"));

    let recorder = Arc::new(RecordingObserver::default());
    let mut observers = ObserverSet::new();
    observers.push(recorder.clone());
    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::new(observers),
        Arc::new(TurnOverrides::default()),
    );

    let response = sample_tool_response(vec![
        tool_call("1", "echo", "{}"),
        tool_call("2", "fail", "{}"),
        tool_call("3", "ghost", "{}"),
    ]);
    dispatcher
        .dispatch(&ctx(), &Transcript::new(), &response)
        .await;

    assert_eq!(recorder.count("tool_start:echo"), 1);
    assert_eq!(recorder.count("tool_end:echo"), 1);
    assert_eq!(recorder.count("tool_error:fail"), 1);
    assert_eq!(recorder.count("tool_not_found:ghost"), 1);
    assert_eq!(recorder.events().len(), 6);
}

// ── Retry tests ─────────────────────────────────────────────────

/// A tool that fails `failures` times with `message`, then succeeds.
fn flaky_tool(
    failures: u32,
    message: &'static str,
    retry: ToolRetryConfig,
) -> (impl ToolHandler + 'static, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let tool = tool_fn(
        ToolDefinition::new("flaky", "Fails a few times", any_object_schema()).with_retry(retry),
        move |_args: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < failures {
                    Err(ToolError::new(message))
                } else {
                    Ok("recovered".to_string())
                }
            }
        },
    );
    (tool, calls)
}

fn fast_retry() -> ToolRetryConfig {
    ToolRetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
        jitter: 0.0,
        ..ToolRetryConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_retries_failed_tool() {
    let (tool, calls) = flaky_tool(2, "temporarily unavailable", fast_retry());
    let mut registry = ToolRegistry::new();
    registry.register(tool);

    let outcome = dispatcher(registry)
        .dispatch(
            &ctx(),
            &Transcript::new(),
            &sample_tool_response(vec![tool_call("1", "flaky", "{}")]),
        )
        .await;

    assert_eq!(tool_contents(&outcome.transcript), vec!["recovered"]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_max_retries() {
    let (tool, calls) = flaky_tool(10, "still down", fast_retry());
    let mut registry = ToolRegistry::new();
    registry.register(tool);

    let outcome = dispatcher(registry)
        .dispatch(
            &ctx(),
            &Transcript::new(),
            &sample_tool_response(vec![tool_call("1", "flaky", "{}")]),
        )
        .await;

    assert_eq!(tool_contents(&outcome.transcript), vec!["Tool call failed: still down"]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_retry_predicate_can_refuse() {
    let retry = ToolRetryConfig {
        retry_if: Some(Arc::new(|msg: &str| msg.contains("timeout"))),
        ..fast_retry()
    };
    let (tool, calls) = flaky_tool(1, "permission denied", retry);
    let mut registry = ToolRegistry::new();
    registry.register(tool);

    dispatcher(registry)
        .dispatch(
            &ctx(),
            &Transcript::new(),
            &sample_tool_response(vec![tool_call("1", "flaky", "{}")]),
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
