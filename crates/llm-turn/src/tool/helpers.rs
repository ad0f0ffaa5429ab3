//! Closure-backed tool handlers.

use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use super::{ToolError, ToolFuture, ToolHandler};
use crate::context::TurnContext;
use crate::provider::ToolDefinition;

/// A tool handler backed by a closure over the raw arguments and context.
///
/// Created via [`tool_fn`] or [`tool_fn_with_ctx`].
pub struct FnToolHandler<F> {
    definition: ToolDefinition,
    handler: F,
}

impl<F> std::fmt::Debug for FnToolHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnToolHandler")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl<F, Fut, O> ToolHandler for FnToolHandler<F>
where
    F: Fn(String, TurnContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<String> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn call<'a>(&'a self, arguments: &'a str, ctx: &'a TurnContext) -> ToolFuture<'a> {
        let fut = (self.handler)(arguments.to_owned(), ctx.clone());
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// A tool handler whose closure receives arguments decoded into `T`.
///
/// Created via [`typed_tool_fn`]. Undecodable arguments never reach the
/// closure; they become [`ToolError::FailedUnmarshalInput`].
pub struct TypedToolHandler<T, F> {
    definition: ToolDefinition,
    handler: F,
    _input: PhantomData<fn(T)>,
}

impl<T, F> std::fmt::Debug for TypedToolHandler<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedToolHandler")
            .field("name", &self.definition.name)
            .field("input", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T, F, Fut, O> ToolHandler for TypedToolHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<String> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn call<'a>(&'a self, arguments: &'a str, _ctx: &'a TurnContext) -> ToolFuture<'a> {
        let input = ToolError::parse_arguments::<T>(arguments);
        let fut = input.map(|input| (self.handler)(input));
        Box::pin(async move { fut?.await.map(Into::into) })
    }
}

/// Creates a [`ToolHandler`] from a closure over the raw argument string.
///
/// # Example
///
/// ```rust
/// use llm_turn::tool::tool_fn;
/// use llm_turn::{JsonSchema, ToolDefinition};
/// use serde_json::json;
///
/// let echo = tool_fn(
///     ToolDefinition::new("echo", "Echo the arguments", JsonSchema::new(json!({"type": "object"}))),
///     |arguments: String| async move { Ok::<_, llm_turn::tool::ToolError>(arguments) },
/// );
/// ```
pub fn tool_fn<F, Fut, O>(
    definition: ToolDefinition,
    handler: F,
) -> FnToolHandler<impl Fn(String, TurnContext) -> Fut + Send + Sync>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<String> + Send + 'static,
{
    FnToolHandler {
        definition,
        handler: move |arguments: String, _ctx: TurnContext| handler(arguments),
    }
}

/// Creates a [`ToolHandler`] from a closure that also receives the
/// invocation context (conversation id, cancellation, depth).
pub fn tool_fn_with_ctx<F, Fut, O>(definition: ToolDefinition, handler: F) -> FnToolHandler<F>
where
    F: Fn(String, TurnContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<String> + Send + 'static,
{
    FnToolHandler {
        definition,
        handler,
    }
}

/// Creates a [`ToolHandler`] whose closure receives typed arguments.
///
/// # Example
///
/// ```rust
/// use llm_turn::tool::{ToolError, typed_tool_fn};
/// use llm_turn::{JsonSchema, ToolDefinition};
/// use serde::Deserialize;
/// use serde_json::json;
///
/// #[derive(Deserialize)]
/// struct Add { a: f64, b: f64 }
///
/// let add = typed_tool_fn(
///     ToolDefinition::new(
///         "add",
///         "Add two numbers",
///         JsonSchema::new(json!({
///             "type": "object",
///             "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
///             "required": ["a", "b"]
///         })),
///     ),
///     |input: Add| async move { Ok::<_, ToolError>(format!("{}", input.a + input.b)) },
/// );
/// ```
pub fn typed_tool_fn<T, F, Fut, O>(definition: ToolDefinition, handler: F) -> TypedToolHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<String> + Send + 'static,
{
    TypedToolHandler {
        definition,
        handler,
        _input: PhantomData,
    }
}
