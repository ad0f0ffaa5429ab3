//! The execution loop: one conversational turn, driven to completion.
//!
//! ```text
//!   BuildContext ──▶ Invoke ──▶ empty? ──yes──▶ retry budget left? ──yes──▶ Invoke
//!                      ▲          │no                  │no
//!                      │          ▼                    ▼
//!                      │     tool calls? ──no──▶ Finalize ──▶ Persist ──▶ Done
//!                      │          │yes
//!                      │          ▼
//!                      └──── Dispatch (limits checked)            any fatal ──▶ Failed
//! ```
//!
//! An [`Engine`] is immutable once built and may run any number of turns
//! concurrently. Every turn gets its own run state: transcript,
//! counters, and the effective configuration derived from the base
//! config and the call's [`TurnOverrides`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use llm_turn::{Engine, TurnContext, TurnRequest};
//!
//! # async fn example(provider: Arc<dyn llm_turn::DynProvider>) -> Result<(), llm_turn::TurnFailure> {
//! let engine = Engine::builder(provider)
//!     .with_system_prompt("You are a terse assistant.")
//!     .build();
//!
//! let ctx = TurnContext::new().with_conversation("conv-1");
//! let outcome = engine.run(&ctx, TurnRequest::new("What is 2 + 2?")).await?;
//! println!("{}", outcome.text);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;

use crate::chat::{ChatMessage, ModelResponse, Transcript};
use crate::config::{TurnConfig, TurnOverrides};
use crate::context::TurnContext;
use crate::error::{TurnError, TurnFailure};
use crate::observer::{ObserverSet, TurnObserver};
use crate::provider::{Capability, DynProvider, JsonSchema, ModelRequest, ToolDefinition};
use crate::store::MessageStore;
use crate::structured::OutputParser;
use crate::tool::{Dispatcher, NestedAssistant, ToolError, ToolFuture, ToolHandler, ToolRegistry};

/// Rewrites the user input before it becomes the human message.
pub type InputTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

// ── Request / outcome ───────────────────────────────────────────────

/// The input to one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// Free-text user input.
    pub input: String,
    /// Pre-built messages spliced in after the human message.
    pub messages: Vec<ChatMessage>,
    /// Per-call configuration overrides.
    pub overrides: TurnOverrides,
}

impl TurnRequest {
    /// Creates a request for the given user input.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    /// Appends pre-built messages after the human message.
    #[must_use]
    pub fn with_messages(mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    /// Sets the per-call overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: TurnOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Counters for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnStats {
    /// Model invocations, including ones that returned no choices.
    pub model_calls: u32,
    /// Dispatch rounds.
    pub rounds: u32,
    /// Tool calls executed across all rounds.
    pub tool_calls: usize,
    /// Empty responses retried.
    pub empty_retries: u32,
    /// Tool calls that named an unknown tool, across all rounds.
    pub not_found: usize,
}

/// A successful turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The final raw model response.
    pub response: ModelResponse,
    /// Content of every choice in `response`, joined by a blank line.
    pub text: String,
    /// The full transcript, ending with the final AI message.
    pub transcript: Transcript,
    /// Counters for the turn.
    pub stats: TurnStats,
}

/// A successful turn whose final content was decoded into `T`.
#[derive(Debug, Clone)]
pub struct TypedTurnOutcome<T> {
    /// The decoded output.
    pub output: T,
    /// The untyped outcome.
    pub outcome: TurnOutcome,
}

// ── RunState ────────────────────────────────────────────────────────

/// Mutable state scoped to one turn. Never shared between turns.
#[derive(Debug, Default)]
struct RunState {
    transcript: Transcript,
    /// Index of the human message; everything from here on is persisted.
    persist_from: usize,
    tool_calls_executed: usize,
    empty_retries: u32,
    not_found_tally: usize,
    stats: TurnStats,
}

impl RunState {
    fn fail(self, error: impl Into<TurnError>) -> TurnFailure {
        TurnFailure::new(error.into(), self.transcript)
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Drives conversational turns against a model with tools.
///
/// Built with [`Engine::builder`]. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    provider: Arc<dyn DynProvider>,
    registry: ToolRegistry,
    config: TurnConfig,
    store: Option<Arc<dyn MessageStore>>,
    observers: Arc<ObserverSet>,
    system_prompt: String,
    examples: Vec<(String, String)>,
    input_transform: Option<InputTransform>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("provider", &self.provider.metadata().name)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("observers", &self.observers.len())
            .field("examples", &self.examples.len())
            .field("has_input_transform", &self.input_transform.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Starts building an engine around a model provider.
    pub fn builder(provider: Arc<dyn DynProvider>) -> EngineBuilder {
        EngineBuilder::new(provider)
    }

    /// The base configuration.
    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// The registered tools.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs one turn and returns the final response.
    ///
    /// On failure the partial transcript is returned inside the
    /// [`TurnFailure`] for diagnostics. Nothing is persisted.
    pub async fn run(
        &self,
        ctx: &TurnContext,
        request: TurnRequest,
    ) -> Result<TurnOutcome, TurnFailure> {
        self.observed(ctx, request, None::<&dyn OutputParser<()>>)
            .await
            .map(|(outcome, _)| outcome)
    }

    /// Runs one turn and decodes the final content with `parser`.
    ///
    /// A decode failure fails the turn with [`TurnError::OutputDecode`],
    /// which keeps the raw content.
    pub async fn run_with_output<T>(
        &self,
        ctx: &TurnContext,
        request: TurnRequest,
        parser: &dyn OutputParser<T>,
    ) -> Result<TypedTurnOutcome<T>, TurnFailure> {
        let (outcome, output) = self.observed(ctx, request, Some(parser)).await?;
        match output {
            Some(output) => Ok(TypedTurnOutcome { output, outcome }),
            // A parser was supplied, so a successful turn always decoded.
            None => Err(TurnFailure::new(
                TurnError::OutputDecode {
                    message: "no output decoded".into(),
                    content: outcome.text,
                },
                outcome.transcript,
            )),
        }
    }

    /// Wraps a turn with the turn-level observer hooks.
    #[tracing::instrument(
        name = "turn",
        skip_all,
        fields(conversation = ctx.conversation_id(), depth = ctx.depth())
    )]
    async fn observed<T>(
        &self,
        ctx: &TurnContext,
        request: TurnRequest,
        parser: Option<&dyn OutputParser<T>>,
    ) -> Result<(TurnOutcome, Option<T>), TurnFailure> {
        self.observers.on_turn_start(ctx, &request.input);
        let result = self.execute(ctx, request, parser).await;
        match &result {
            Ok((outcome, _)) => self.observers.on_turn_end(ctx, outcome),
            Err(failure) => {
                tracing::warn!(error = %failure.error, "turn aborted");
                self.observers.on_turn_error(ctx, &failure.error);
            }
        }
        result
    }

    async fn execute<T>(
        &self,
        ctx: &TurnContext,
        request: TurnRequest,
        parser: Option<&dyn OutputParser<T>>,
    ) -> Result<(TurnOutcome, Option<T>), TurnFailure> {
        let config = self.config.apply(&request.overrides);
        let limits = &config.limits;
        let mut state = RunState::default();

        if ctx.conversation_id().is_none() {
            return Err(state.fail(TurnError::InvalidContext(
                "no conversation id attached to the context".into(),
            )));
        }
        if let Err(violation) = limits.check_depth(ctx.depth()) {
            return Err(state.fail(violation));
        }

        // ── BuildContext ──
        let metadata = self.provider.metadata();
        let native_schema = metadata.supports(Capability::StructuredOutput);

        let mut system = self.system_prompt.clone();
        if let Some(parser) = parser.filter(|_| !native_schema) {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&parser.format_instructions());
        }
        if !system.is_empty() {
            state.transcript.push(ChatMessage::system(system));
        }
        for (human, ai) in &self.examples {
            state.transcript.push(ChatMessage::human(human.clone()));
            state.transcript.push(ChatMessage::ai(ai.clone()));
        }
        if let Some(store) = self.store.as_ref().filter(|_| !config.skip_history) {
            match store.messages(ctx).await {
                Ok(history) => state.transcript.extend(history),
                Err(e) => return Err(state.fail(e)),
            }
        }
        state.persist_from = state.transcript.len();
        let input = match &self.input_transform {
            Some(transform) => transform(&request.input),
            None => request.input.clone(),
        };
        state.transcript.push(ChatMessage::human(input));
        state.transcript.extend(request.messages.iter().cloned());

        let registry = self.registry.select(&config.tools);
        let tools = (metadata.supports(Capability::Tools) && !registry.is_empty())
            .then(|| registry.definitions());
        let structured_output = parser
            .and_then(|p| p.schema())
            .filter(|_| native_schema)
            .cloned();
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::clone(&self.observers),
            Arc::new(request.overrides),
        );

        // ── Invoke / Dispatch ──
        let response = loop {
            if let Err(violation) = limits.check_before_invoke(&state.transcript) {
                return Err(state.fail(violation));
            }
            let model_request = ModelRequest {
                messages: state.transcript.clone(),
                tools: tools.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                structured_output: structured_output.clone(),
                ..Default::default()
            };

            let response = match self.invoke(ctx, &model_request).await {
                Ok(response) => response,
                Err(e) => return Err(state.fail(e)),
            };
            state.stats.model_calls += 1;

            if response.is_empty() {
                state.empty_retries += 1;
                state.stats.empty_retries = state.empty_retries;
                if limits.empty_retries_exhausted(state.empty_retries) {
                    let error = TurnError::EmptyResponseExceeded {
                        retries: state.empty_retries,
                        limit: limits.max_empty_response_retries,
                    };
                    return Err(state.fail(error));
                }
                tracing::debug!(retries = state.empty_retries, "model returned no choices, retrying");
                continue;
            }

            if !response.has_tool_calls() {
                break response;
            }

            state.stats.rounds += 1;
            tracing::debug!(
                round = state.stats.rounds,
                requests = response.tool_call_count(),
                "dispatching tool calls"
            );
            let outcome = dispatcher.dispatch(ctx, &state.transcript, &response).await;
            state.transcript = outcome.transcript;
            state.tool_calls_executed += outcome.tool_call_count;
            state.stats.tool_calls = state.tool_calls_executed;
            state.stats.not_found += outcome.not_found_count;
            if outcome.cancelled {
                return Err(state.fail(TurnError::Cancelled));
            }

            if outcome.not_found_count == 0 {
                state.not_found_tally = 0;
            } else {
                state.not_found_tally += outcome.not_found_count;
                tracing::debug!(tally = state.not_found_tally, "unknown tools requested");
                if limits.not_found_exceeded(state.not_found_tally) {
                    let error = TurnError::ToolNotFoundExceeded {
                        count: state.not_found_tally,
                        limit: limits.max_consecutive_tool_not_found,
                    };
                    return Err(state.fail(error));
                }
            }
            if let Err(violation) = limits.check_tool_calls(state.tool_calls_executed) {
                return Err(state.fail(violation));
            }
        };

        // ── Finalize ──
        let text = response.joined_content();
        state.transcript.push(ChatMessage::ai(text.clone()));
        let output = match parser {
            Some(parser) => match parser.decode(&text) {
                Ok(output) => Some(output),
                Err(e) => {
                    self.observers.on_model_parse_error(ctx, &e, &text);
                    let error = TurnError::OutputDecode {
                        message: e.to_string(),
                        content: text,
                    };
                    return Err(state.fail(error));
                }
            },
            None => None,
        };

        // ── Persist ──
        if let Some(store) = self.store.as_ref().filter(|_| !config.skip_history) {
            let produced = state.transcript.since(state.persist_from).to_vec();
            if let Err(e) = store.append(ctx, produced).await {
                return Err(state.fail(e));
            }
        }

        let outcome = TurnOutcome {
            response,
            text,
            transcript: state.transcript,
            stats: state.stats,
        };
        Ok((outcome, output))
    }

    /// Calls the model, racing the call against cancellation.
    async fn invoke(
        &self,
        ctx: &TurnContext,
        request: &ModelRequest,
    ) -> Result<ModelResponse, TurnError> {
        self.observers.on_model_call_start(ctx, request);
        let start = Instant::now();
        let response = tokio::select! {
            biased;
            () = ctx.cancellation_token().cancelled() => return Err(TurnError::Cancelled),
            response = self.provider.generate_boxed(request, ctx) => response?,
        };
        self.observers
            .on_model_call_end(ctx, &response, start.elapsed());
        Ok(response)
    }
}

// ── EngineBuilder ───────────────────────────────────────────────────

/// Builder for [`Engine`].
pub struct EngineBuilder {
    provider: Arc<dyn DynProvider>,
    registry: ToolRegistry,
    config: TurnConfig,
    store: Option<Arc<dyn MessageStore>>,
    observers: ObserverSet,
    system_prompt: String,
    examples: Vec<(String, String)>,
    input_transform: Option<InputTransform>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    /// Starts a builder with default configuration and no tools.
    pub fn new(provider: Arc<dyn DynProvider>) -> Self {
        Self {
            provider,
            registry: ToolRegistry::new(),
            config: TurnConfig::default(),
            store: None,
            observers: ObserverSet::new(),
            system_prompt: String::new(),
            examples: Vec::new(),
            input_transform: None,
        }
    }

    /// Sets the tool registry.
    #[must_use]
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the base configuration.
    #[must_use]
    pub fn with_config(mut self, config: TurnConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the message store used for history.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Adds an observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Sets the base system instructions.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Adds a few-shot example pair, placed right after the system
    /// message.
    #[must_use]
    pub fn with_example(mut self, human: impl Into<String>, ai: impl Into<String>) -> Self {
        self.examples.push((human.into(), ai.into()));
        self
    }

    /// Sets a transform applied to user input before it becomes the
    /// human message.
    #[must_use]
    pub fn with_input_transform(mut self, transform: InputTransform) -> Self {
        self.input_transform = Some(transform);
        self
    }

    /// Builds the engine.
    pub fn build(self) -> Engine {
        Engine {
            provider: self.provider,
            registry: self.registry,
            config: self.config,
            store: self.store,
            observers: Arc::new(self.observers),
            system_prompt: self.system_prompt,
            examples: self.examples,
            input_transform: self.input_transform,
        }
    }
}

// ── AssistantTool ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct AssistantInput {
    input: String,
}

/// Exposes an [`Engine`] as a tool, so one assistant can delegate a
/// sub-conversation to another.
///
/// The model calls it with `{"input": "..."}`. The dispatcher runs it
/// through [`NestedAssistant`], one level deeper than the calling turn
/// and with the calling turn's overrides.
#[derive(Debug, Clone)]
pub struct AssistantTool {
    engine: Arc<Engine>,
    name: String,
    description: String,
}

impl AssistantTool {
    /// Wraps `engine` as a tool named `name`.
    pub fn new(engine: Arc<Engine>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
            description: description.into(),
        }
    }

    async fn delegate(
        &self,
        arguments: &str,
        ctx: &TurnContext,
        overrides: TurnOverrides,
    ) -> Result<String, ToolError> {
        let AssistantInput { input } = ToolError::parse_arguments(arguments)?;
        let request = TurnRequest::new(input).with_overrides(overrides);
        match self.engine.run(ctx, request).await {
            Ok(outcome) => Ok(outcome.text),
            Err(failure) if matches!(failure.error, TurnError::Cancelled) => Err(ToolError::Cancelled),
            Err(failure) => Err(ToolError::Failed(failure.error.to_string())),
        }
    }
}

impl ToolHandler for AssistantTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.name.clone(),
            self.description.clone(),
            JsonSchema::new(json!({
                "type": "object",
                "properties": {
                    "input": {
                        "type": "string",
                        "description": "The request to hand to the assistant"
                    }
                },
                "required": ["input"]
            })),
        )
    }

    fn call<'a>(&'a self, arguments: &'a str, ctx: &'a TurnContext) -> ToolFuture<'a> {
        Box::pin(async move {
            self.delegate(arguments, &ctx.nested(), TurnOverrides::default())
                .await
        })
    }

    fn as_nested_assistant(&self) -> Option<&dyn NestedAssistant> {
        Some(self)
    }
}

impl NestedAssistant for AssistantTool {
    fn call_as_nested_assistant<'a>(
        &'a self,
        input: &'a str,
        ctx: &'a TurnContext,
        overrides: &'a TurnOverrides,
    ) -> ToolFuture<'a> {
        Box::pin(self.delegate(input, ctx, overrides.clone()))
    }
}
