//! Model client contract and request types.
//!
//! The engine never talks to a network itself. It hands a
//! [`ModelRequest`] to whatever implements [`Provider`] and gets back a
//! [`ModelResponse`].
//!
//! - **[`Provider`]** uses native async-fn-in-traits, so implementations
//!   are plain `async fn`s.
//! - **[`DynProvider`]** is the object-safe mirror with boxed futures. A
//!   blanket `impl<T: Provider> DynProvider for T` bridges the two, so the
//!   engine can hold any provider as `Arc<dyn DynProvider>`.
//!
//! # Capabilities
//!
//! [`ProviderMetadata::capabilities`] drives two engine decisions:
//!
//! | Capability | Present | Absent |
//! |------------|---------|--------|
//! | [`Capability::Tools`] | tool definitions attached to the request | no tools offered |
//! | [`Capability::StructuredOutput`] | parser schema sent natively | format instructions appended to the system message |

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ModelResponse, Transcript};
use crate::context::TurnContext;
use crate::error::TurnError;

/// A language-model backend.
///
/// Implementations map transport and provider failures to
/// [`TurnError::Transport`]. They may observe
/// [`TurnContext::cancellation_token`], but the engine also races every
/// call against cancellation, so ignoring it is safe.
pub trait Provider: Send + Sync {
    /// Requests one completion for the given transcript.
    fn generate(
        &self,
        request: &ModelRequest,
        ctx: &TurnContext,
    ) -> impl Future<Output = Result<ModelResponse, TurnError>> + Send;

    /// Describes this provider and the model it targets.
    fn metadata(&self) -> ProviderMetadata;
}

/// Object-safe counterpart of [`Provider`].
///
/// You never implement this directly; the blanket impl covers every
/// `Provider`.
pub trait DynProvider: Send + Sync {
    /// Boxed-future version of [`Provider::generate`].
    fn generate_boxed<'a>(
        &'a self,
        request: &'a ModelRequest,
        ctx: &'a TurnContext,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, TurnError>> + Send + 'a>>;

    /// See [`Provider::metadata`].
    fn metadata(&self) -> ProviderMetadata;
}

impl<T: Provider> DynProvider for T {
    fn generate_boxed<'a>(
        &'a self,
        request: &'a ModelRequest,
        ctx: &'a TurnContext,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, TurnError>> + Send + 'a>> {
        Box::pin(self.generate(request, ctx))
    }

    fn metadata(&self) -> ProviderMetadata {
        Provider::metadata(self)
    }
}

/// Static information about a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Provider name, e.g. `"anthropic"`.
    pub name: Cow<'static, str>,
    /// Model identifier.
    pub model: String,
    /// Features the model supports.
    pub capabilities: HashSet<Capability>,
}

impl ProviderMetadata {
    /// Whether the model supports the given capability.
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// A feature a model may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Capability {
    /// Function calling.
    Tools,
    /// Native JSON-schema constrained output.
    StructuredOutput,
}

/// Everything sent to the model for one invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The full transcript, system message first.
    pub messages: Transcript,
    /// Tool definitions, `None` when no tools are offered.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Schema for native structured output.
    pub structured_output: Option<JsonSchema>,
    /// Free-form metadata forwarded to the provider.
    pub metadata: HashMap<String, Value>,
}

/// Predicate deciding whether a failed tool call should be retried,
/// given the error message.
pub type RetryPredicate = std::sync::Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Retry policy for a tool whose invocations may fail transiently.
///
/// Backoff for attempt `n` (zero-based) is
/// `min(initial_backoff * backoff_multiplier^n, max_backoff)`, scaled by
/// a random factor in `[1 - jitter, 1]`.
#[derive(Clone)]
pub struct ToolRetryConfig {
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 100ms.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay. Default: 5s.
    pub max_backoff: Duration,
    /// Growth factor per attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Fraction of each delay that is randomized, `0.0..=1.0`.
    /// Default: 0.5.
    pub jitter: f64,
    /// Only retry errors this predicate accepts. `None` retries all.
    pub retry_if: Option<RetryPredicate>,
}

impl Default for ToolRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.5,
            retry_if: None,
        }
    }
}

impl std::fmt::Debug for ToolRetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRetryConfig")
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("has_retry_if", &self.retry_if.is_some())
            .finish()
    }
}

impl PartialEq for ToolRetryConfig {
    fn eq(&self, other: &Self) -> bool {
        self.max_retries == other.max_retries
            && self.initial_backoff == other.initial_backoff
            && self.max_backoff == other.max_backoff
            && self.backoff_multiplier == other.backoff_multiplier
            && self.jitter == other.jitter
            && self.retry_if.is_some() == other.retry_if.is_some()
    }
}

/// How a tool is described to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name as the model should call it.
    pub name: String,
    /// What the tool does, in prose for the model.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: JsonSchema,
    /// Optional retry policy. Never sent to the model.
    #[serde(skip)]
    pub retry: Option<ToolRetryConfig>,
}

impl ToolDefinition {
    /// Creates a definition without a retry policy.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: JsonSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            retry: None,
        }
    }

    /// Attaches a retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: ToolRetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// A JSON Schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonSchema(Value);

impl JsonSchema {
    /// Wraps a raw schema value.
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    /// The schema as JSON.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Generates the schema of a Rust type.
    #[cfg(feature = "schema")]
    pub fn from_type<T: schemars::JsonSchema>() -> Result<Self, serde_json::Error> {
        let schema = schemars::schema_for!(T);
        let value = serde_json::to_value(schema)?;
        Ok(Self(value))
    }

    /// Validates `value` against this schema, collecting every violation.
    #[cfg(feature = "schema")]
    pub fn validate(&self, value: &Value) -> Result<(), crate::structured::OutputError> {
        use crate::structured::OutputError;

        let validator = jsonschema::validator_for(&self.0)
            .map_err(|e| OutputError::InvalidSchema(e.to_string()))?;
        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OutputError::Validation {
                message: errors.join("; "),
                actual: value.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    struct Echo;

    impl Provider for Echo {
        async fn generate(
            &self,
            request: &ModelRequest,
            _ctx: &TurnContext,
        ) -> Result<ModelResponse, TurnError> {
            let last = request.messages.last().map(ChatMessage::text);
            Ok(ModelResponse::text(last.unwrap_or_default()))
        }

        fn metadata(&self) -> ProviderMetadata {
            ProviderMetadata {
                name: "echo".into(),
                model: "echo-1".into(),
                capabilities: HashSet::from([Capability::Tools]),
            }
        }
    }

    #[tokio::test]
    async fn test_blanket_dyn_provider() {
        let provider: std::sync::Arc<dyn DynProvider> = std::sync::Arc::new(Echo);
        let request = ModelRequest {
            messages: vec![ChatMessage::human("ping")].into(),
            ..Default::default()
        };
        let response = provider
            .generate_boxed(&request, &TurnContext::new())
            .await
            .unwrap();
        assert_eq!(response.joined_content(), "ping");
        assert!(provider.metadata().supports(Capability::Tools));
        assert!(!provider.metadata().supports(Capability::StructuredOutput));
    }

    #[test]
    fn test_provider_metadata_owned_name() {
        let m = ProviderMetadata {
            name: Cow::Owned(String::from("custom")),
            model: "test".into(),
            capabilities: HashSet::new(),
        };
        assert_eq!(m.name, "custom");
    }

    #[test]
    fn test_tool_definition_skips_retry_in_serde() {
        let td = ToolDefinition::new(
            "search",
            "Search the web",
            JsonSchema::new(serde_json::json!({"type": "object"})),
        )
        .with_retry(ToolRetryConfig::default());
        let json = serde_json::to_value(&td).unwrap();
        assert!(json.get("retry").is_none());
        assert_eq!(json["parameters"], serde_json::json!({"type": "object"}));
    }

    #[test]
    fn test_retry_config_eq_ignores_predicate_identity() {
        let a = ToolRetryConfig {
            retry_if: Some(std::sync::Arc::new(|_| true)),
            ..Default::default()
        };
        let b = ToolRetryConfig {
            retry_if: Some(std::sync::Arc::new(|_| false)),
            ..Default::default()
        };
        assert_eq!(a, b);
        assert_ne!(a, ToolRetryConfig::default());
    }

    #[cfg(feature = "schema")]
    #[test]
    fn test_json_schema_from_type_simple() {
        #[derive(schemars::JsonSchema)]
        struct Foo {
            #[allow(dead_code)]
            x: i32,
        }
        let schema = JsonSchema::from_type::<Foo>().unwrap();
        assert!(schema.as_value()["properties"].get("x").is_some());
    }

    #[cfg(feature = "schema")]
    #[test]
    fn test_json_schema_validate_reports_violation() {
        use crate::structured::OutputError;

        let schema = JsonSchema::new(serde_json::json!({
            "type": "object",
            "properties": {"x": {"type": "integer"}},
            "required": ["x"]
        }));
        assert!(schema.validate(&serde_json::json!({"x": 42})).is_ok());
        assert!(matches!(
            schema.validate(&serde_json::json!({})),
            Err(OutputError::Validation { .. })
        ));
    }

    #[cfg(feature = "schema")]
    #[test]
    fn test_json_schema_validate_invalid_schema() {
        use crate::structured::OutputError;

        let schema = JsonSchema::new(serde_json::json!({"type": "bogus_not_a_type"}));
        assert!(matches!(
            schema.validate(&serde_json::json!(42)),
            Err(OutputError::InvalidSchema(_))
        ));
    }
}
