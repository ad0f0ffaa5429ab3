//! Tools: the contract, the registry, and the concurrent dispatcher.
//!
//! # Architecture
//!
//! ```text
//!   ToolHandler        - one tool (definition + call)
//!   NestedAssistant    - optional capability: the tool runs a sub-conversation
//!       │
//!   ToolRegistry       - case-insensitive name lookup, scoping (only / without)
//!       │
//!   Dispatcher         - one round: fan out every requested call, join,
//!                        fold results back in request order
//! ```
//!
//! # Example
//!
//! ```rust
//! use llm_turn::tool::{ToolError, ToolRegistry, typed_tool_fn};
//! use llm_turn::{JsonSchema, ToolDefinition};
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Deserialize)]
//! struct Add {
//!     a: f64,
//!     b: f64,
//! }
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(typed_tool_fn(
//!     ToolDefinition::new(
//!         "add",
//!         "Add two numbers",
//!         JsonSchema::new(json!({
//!             "type": "object",
//!             "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
//!             "required": ["a", "b"]
//!         })),
//!     ),
//!     |input: Add| async move { Ok::<_, ToolError>(format!("{}", input.a + input.b)) },
//! ));
//! assert!(registry.contains("ADD"));
//! ```

pub mod dispatch;
mod error;
mod handler;
mod helpers;
mod registry;
mod retry;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::ToolError;
pub use handler::{NestedAssistant, ToolFuture, ToolHandler};
pub use helpers::{FnToolHandler, TypedToolHandler, tool_fn, tool_fn_with_ctx, typed_tool_fn};
pub use registry::ToolRegistry;

#[cfg(test)]
mod tests;
