//! # llm-turn
//!
//! Drives one conversational turn against a language model: build the
//! transcript, call the model, run every requested tool call
//! concurrently, feed the results back, and repeat until the model
//! answers without tools. The answer can optionally be decoded into a
//! typed value.
//!
//! The crate contains no provider-specific code. A model backend
//! implements [`Provider`] (or its object-safe counterpart
//! [`DynProvider`]); tools implement [`ToolHandler`].
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────────────────────────────┐
//!   input ───▶ │ Engine                                   │ ───▶ TurnOutcome
//!              │   transcript ─▶ Provider ─▶ ModelResponse│      (or TurnFailure
//!              │        ▲                        │        │       with transcript)
//!              │        └──── Dispatcher ◀───────┘        │
//!              │              (JoinSet fan-out,           │
//!              │               request-order fan-in)      │
//!              └───────┬───────────────┬──────────────────┘
//!                      │               │
//!               MessageStore     TurnObserver hooks
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use llm_turn::{Engine, ToolRegistry, TurnContext, TurnRequest};
//!
//! # async fn example(provider: Arc<dyn llm_turn::DynProvider>) -> Result<(), llm_turn::TurnFailure> {
//! let engine = Engine::builder(provider)
//!     .with_registry(ToolRegistry::new())
//!     .with_system_prompt("You are a helpful assistant.")
//!     .build();
//!
//! let outcome = engine
//!     .run(&TurnContext::new().with_conversation("c-1"), TurnRequest::new("Explain ownership"))
//!     .await?;
//! println!("{}", outcome.text);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chat`] | Messages, tool-call requests and results, model responses |
//! | [`config`] | Per-engine configuration and per-call overrides |
//! | [`context`] | Conversation id, cancellation, nesting depth |
//! | [`engine`] | The turn state machine and nested-assistant tools |
//! | [`error`] | [`TurnError`] and [`TurnFailure`] |
//! | [`limits`] | Safety bounds checked during a turn |
//! | [`observer`] | Side-effect-only lifecycle hooks |
//! | [`provider`] | The [`Provider`] trait, requests, tool definitions |
//! | [`store`] | Conversation history persistence |
//! | [`structured`] | Typed decoding of the final answer |
//! | [`tool`] | Tool handlers, the registry, and the concurrent dispatcher |

#![warn(missing_docs)]

pub mod chat;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod limits;
pub mod observer;
pub mod provider;
pub mod store;
pub mod structured;
pub mod tool;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

// ── Core re-exports ────────────────────────────────────────────────
//
// Only the types that appear in nearly every program are re-exported
// at the crate root. Everything else lives in its submodule:
//
//   llm_turn::tool::*        - dispatcher, handler helpers, ToolError
//   llm_turn::observer::*    - TurnObserver, ObserverSet, TracingObserver
//   llm_turn::structured::*  - OutputParser, JsonOutputParser
//   llm_turn::store::*       - StoreError, StoreFuture
//   llm_turn::mock::*        - MockProvider (test-utils feature)

pub use chat::{ChatMessage, ChatRole, Choice, ModelResponse, ToolCallRequest, ToolCallResult, Transcript};
pub use config::{ToolSelection, TurnConfig, TurnOverrides};
pub use context::TurnContext;
pub use engine::{
    AssistantTool, Engine, EngineBuilder, TurnOutcome, TurnRequest, TurnStats, TypedTurnOutcome,
};
pub use error::{LimitViolation, TurnError, TurnFailure};
pub use limits::LimitPolicy;
pub use provider::{
    Capability, DynProvider, JsonSchema, ModelRequest, Provider, ProviderMetadata, ToolDefinition,
    ToolRetryConfig,
};
pub use store::{InMemoryStore, MessageStore};
pub use tool::{ToolHandler, ToolRegistry};
