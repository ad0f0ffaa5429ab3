//! Concurrent execution of one round of tool calls.
//!
//! One model response may request several tool calls, spread over
//! several choices. The dispatcher runs them all at once and folds the
//! results back into the transcript in a deterministic order:
//!
//! ```text
//!   response ──collect──▶ [req0, req1, req2]          (flat, positions remembered)
//!               │
//!               ├─ Ai(choice 0 requests)               (one message per choice)
//!               ├─ Ai(choice 1 requests)
//!               │
//!               ├─ spawn ─▶ unit0 ┐
//!               ├─ spawn ─▶ unit1 ├─ JoinSet barrier ─▶ slots[pos] = result
//!               └─ spawn ─▶ unit2 ┘
//!                                      │
//!               Tool(req0) Tool(req1) Tool(req2)       (request order, never finish order)
//! ```
//!
//! Nothing that happens inside a unit aborts the round. An unknown tool
//! name, a tool error, even a panicking tool all become diagnostic tool
//! content that the model reads on its next call. Cancellation of the
//! caller's context is reported through [`DispatchOutcome::cancelled`],
//! after every unit has returned, so the interrupted round still lands
//! in the transcript.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use super::retry::call_with_retry;
use super::{ToolError, ToolHandler, ToolRegistry};
use crate::chat::{ChatMessage, ModelResponse, ToolCallRequest, ToolCallResult, Transcript};
use crate::config::TurnOverrides;
use crate::context::TurnContext;
use crate::observer::{ObserverSet, TurnObserver};

/// What one dispatch round produced.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Tool-call requests processed this round.
    pub tool_call_count: usize,
    /// Requests naming a tool that is not registered.
    pub not_found_count: usize,
    /// The input transcript extended with this round's AI and tool
    /// messages.
    pub transcript: Transcript,
    /// The caller's context was cancelled during the round. The
    /// transcript is complete; interrupted calls carry a cancellation
    /// diagnostic.
    pub cancelled: bool,
}

/// How a single tool call ended.
#[derive(Debug)]
enum CallOutcome {
    Output(String),
    Failed(ToolError),
    NotFound { available: Vec<String> },
}

/// One slot of the pre-sized result vector.
#[derive(Debug)]
struct DispatchResult {
    request: ToolCallRequest,
    outcome: CallOutcome,
}

impl DispatchResult {
    /// Resolves the outcome into the text the model will read.
    fn content(&self) -> String {
        match &self.outcome {
            CallOutcome::Output(output) => output.clone(),
            CallOutcome::NotFound { available } => {
                let available = if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                };
                format!(
                    "Tool `{}` not found. Available tools: {available}",
                    self.request.function_name
                )
            }
            CallOutcome::Failed(ToolError::FailedUnmarshalInput(reason)) => format!(
                "Invalid arguments for tool `{}`: {reason}. \
                 Retry the call with valid JSON arguments that match the tool's parameter schema.",
                self.request.function_name
            ),
            CallOutcome::Failed(err) => format!("Tool call failed: {err}"),
        }
    }

    fn into_message(self) -> ChatMessage {
        let content = self.content();
        ChatMessage::tool_result(ToolCallResult {
            tool_call_id: self.request.id,
            function_name: self.request.function_name,
            content,
        })
    }
}

/// Runs the tool calls of one model response.
///
/// A dispatcher is built per turn from the turn's scoped registry, its
/// observers, and its overrides (forwarded to nested assistants). It
/// holds no per-round state, so the same value serves every round.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    observers: Arc<ObserverSet>,
    overrides: Arc<TurnOverrides>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`.
    pub fn new(
        registry: Arc<ToolRegistry>,
        observers: Arc<ObserverSet>,
        overrides: Arc<TurnOverrides>,
    ) -> Self {
        Self {
            registry,
            observers,
            overrides,
        }
    }

    /// Executes every tool call in `response` and returns the extended
    /// transcript.
    ///
    /// `transcript` is not modified; the returned transcript is a copy
    /// with one AI message per choice that requested tools, followed by
    /// one tool message per request in request order.
    ///
    /// Never fails. Cancellation is checked once all spawned units have
    /// finished and surfaces as [`DispatchOutcome::cancelled`].
    #[tracing::instrument(skip_all, fields(requests = response.tool_call_count()))]
    pub async fn dispatch(
        &self,
        ctx: &TurnContext,
        transcript: &Transcript,
        response: &ModelResponse,
    ) -> DispatchOutcome {
        let mut extended = transcript.clone();

        // Step 1: collect into a flat list, one AI message per choice.
        let mut requests: Vec<ToolCallRequest> = Vec::with_capacity(response.tool_call_count());
        for choice in &response.choices {
            if choice.tool_calls.is_empty() {
                continue;
            }
            let normalized: Vec<ToolCallRequest> = choice
                .tool_calls
                .iter()
                .enumerate()
                .map(|(position, call)| call.normalized(position))
                .collect();
            extended.push(ChatMessage::ai_tool_calls(normalized.iter().cloned()));
            requests.extend(normalized);
        }

        // Step 2: one unit of work per request.
        let not_found = Arc::new(AtomicUsize::new(0));
        let mut join_set = JoinSet::new();
        for (position, request) in requests.iter().cloned().enumerate() {
            let unit = Unit {
                request,
                ctx: ctx.child(),
                registry: Arc::clone(&self.registry),
                observers: Arc::clone(&self.observers),
                overrides: Arc::clone(&self.overrides),
                not_found: Arc::clone(&not_found),
            };
            join_set.spawn(async move { (position, unit.run().await) });
        }

        // Step 3: barrier. Results land in their original slot.
        let mut slots: Vec<Option<DispatchResult>> = (0..requests.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((position, result)) => slots[position] = Some(result),
                Err(e) if e.is_panic() => tracing::error!("tool task panicked: {e}"),
                Err(e) => tracing::error!("tool task aborted: {e}"),
            }
        }

        // Step 4: re-linearize by request position.
        for (slot, request) in slots.into_iter().zip(requests) {
            let result = slot.unwrap_or_else(|| DispatchResult {
                request,
                outcome: CallOutcome::Failed(ToolError::new("tool task failed during execution")),
            });
            extended.push(result.into_message());
        }

        DispatchOutcome {
            tool_call_count: response.tool_call_count(),
            not_found_count: not_found.load(Ordering::Acquire),
            transcript: extended,
            cancelled: ctx.is_cancelled(),
        }
    }
}

/// Everything one spawned tool call owns.
struct Unit {
    request: ToolCallRequest,
    ctx: TurnContext,
    registry: Arc<ToolRegistry>,
    observers: Arc<ObserverSet>,
    overrides: Arc<TurnOverrides>,
    not_found: Arc<AtomicUsize>,
}

impl Unit {
    async fn run(self) -> DispatchResult {
        let start = Instant::now();
        self.observers.on_tool_start(&self.ctx, &self.request);

        let Some(handler) = self.registry.get(&self.request.function_name).cloned() else {
            self.not_found.fetch_add(1, Ordering::AcqRel);
            self.observers.on_tool_not_found(&self.ctx, &self.request);
            tracing::debug!(tool = %self.request.function_name, "tool not found");
            return DispatchResult {
                outcome: CallOutcome::NotFound {
                    available: self.registry.names(),
                },
                request: self.request,
            };
        };

        let result = tokio::select! {
            biased;
            () = self.ctx.cancellation_token().cancelled() => Err(ToolError::Cancelled),
            result = self.invoke(handler.as_ref()) => result,
        };
        let duration = start.elapsed();

        let outcome = match result {
            Ok(output) => {
                self.observers
                    .on_tool_end(&self.ctx, &self.request, &output, duration);
                CallOutcome::Output(output)
            }
            Err(err) => {
                self.observers
                    .on_tool_error(&self.ctx, &self.request, &err, duration);
                tracing::debug!(
                    tool = %self.request.function_name,
                    duration_ms = millis(duration),
                    error = %err,
                    "tool call failed"
                );
                CallOutcome::Failed(err)
            }
        };

        DispatchResult {
            request: self.request,
            outcome,
        }
    }

    /// Prefers the nested-assistant path when the tool offers it.
    async fn invoke(&self, handler: &dyn ToolHandler) -> Result<String, ToolError> {
        if let Some(assistant) = handler.as_nested_assistant() {
            let nested = self.ctx.nested();
            return assistant
                .call_as_nested_assistant(&self.request.arguments, &nested, &self.overrides)
                .await;
        }
        let retry = handler.definition().retry;
        call_with_retry(handler, &self.request.arguments, &self.ctx, retry.as_ref()).await
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
