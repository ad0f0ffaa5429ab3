//! Tool handler trait and the nested-assistant capability.

use std::future::Future;
use std::pin::Pin;

use super::ToolError;
use crate::config::TurnOverrides;
use crate::context::TurnContext;
use crate::provider::ToolDefinition;

/// Boxed future returned by tool invocations.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// A single tool the model can invoke.
///
/// Implement this trait for tools with their own state. For simple
/// tools, wrap a closure with [`super::tool_fn`] or
/// [`super::typed_tool_fn`].
///
/// The trait is object-safe (boxed futures) so handlers can be stored as
/// `Arc<dyn ToolHandler>` and shared across concurrent turns.
///
/// # Example
///
/// ```rust
/// use llm_turn::tool::{ToolError, ToolFuture, ToolHandler};
/// use llm_turn::{JsonSchema, ToolDefinition, TurnContext};
/// use serde_json::json;
///
/// struct WhoAmI;
///
/// impl ToolHandler for WhoAmI {
///     fn definition(&self) -> ToolDefinition {
///         ToolDefinition::new(
///             "who_am_i",
///             "Returns the current conversation id",
///             JsonSchema::new(json!({"type": "object"})),
///         )
///     }
///
///     fn call<'a>(&'a self, _arguments: &'a str, ctx: &'a TurnContext) -> ToolFuture<'a> {
///         Box::pin(async move {
///             ctx.conversation_id()
///                 .map(str::to_owned)
///                 .ok_or_else(|| ToolError::new("no conversation"))
///         })
///     }
/// }
/// ```
pub trait ToolHandler: Send + Sync {
    /// Returns the tool's definition (name, description, parameter schema).
    fn definition(&self) -> ToolDefinition;

    /// Invokes the tool with the raw arguments produced by the model.
    ///
    /// `arguments` is not guaranteed to be valid JSON. Return
    /// [`ToolError::FailedUnmarshalInput`] when it cannot be decoded.
    fn call<'a>(&'a self, arguments: &'a str, ctx: &'a TurnContext) -> ToolFuture<'a>;

    /// Exposes the nested-assistant capability, if this tool has it.
    ///
    /// When this returns `Some`, the dispatcher calls
    /// [`NestedAssistant::call_as_nested_assistant`] instead of
    /// [`call`](Self::call).
    fn as_nested_assistant(&self) -> Option<&dyn NestedAssistant> {
        None
    }
}

/// A tool that runs a whole sub-conversation.
///
/// The dispatcher passes a context one level deeper than the calling turn
/// and forwards the calling turn's overrides unchanged.
pub trait NestedAssistant: Send + Sync {
    /// Runs the nested assistant on `input`.
    fn call_as_nested_assistant<'a>(
        &'a self,
        input: &'a str,
        ctx: &'a TurnContext,
        overrides: &'a TurnOverrides,
    ) -> ToolFuture<'a>;
}
