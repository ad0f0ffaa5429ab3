//! Structured output: decoding the final answer into a typed value.
//!
//! The engine finalizes a turn with plain text. When the caller asks for
//! a typed result (see [`Engine::run_with_output`](crate::Engine::run_with_output)),
//! that text goes through an [`OutputParser`]. A parser also tells the
//! engine how to ask for the right shape:
//!
//! - if the model supports native structured output, the parser's
//!   [`schema`](OutputParser::schema) is attached to every request;
//! - otherwise its [`format_instructions`](OutputParser::format_instructions)
//!   are appended to the system message.
//!
//! [`JsonOutputParser`] (feature `schema`) covers the common case: a
//! `serde` type with a `schemars` schema.
//!
//! ```rust
//! # #[cfg(feature = "schema")] {
//! use llm_turn::structured::{JsonOutputParser, OutputParser};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize, schemars::JsonSchema)]
//! struct Weather {
//!     city: String,
//!     celsius: f64,
//! }
//!
//! let parser = JsonOutputParser::<Weather>::new().unwrap();
//! let weather = parser.decode("```json\n{\"city\": \"Oslo\", \"celsius\": -3.5}\n```").unwrap();
//! assert_eq!(weather.city, "Oslo");
//! # }
//! ```

use serde_json::Value;

use crate::provider::JsonSchema;

/// Why model output could not be decoded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum OutputError {
    /// The model produced no text to decode.
    #[error("model returned no text content for structured output")]
    Empty,

    /// The text is not valid JSON.
    #[error("invalid JSON in structured output: {0}")]
    Parse(String),

    /// The schema itself could not be compiled.
    #[error("invalid JSON schema: {0}")]
    InvalidSchema(String),

    /// The JSON does not conform to the schema.
    #[error("schema validation failed: {message}")]
    Validation {
        /// Every violation, joined with `"; "`.
        message: String,
        /// The value that failed validation.
        actual: Value,
    },

    /// The JSON conforms but does not deserialize into the target type.
    #[error("failed to deserialize structured output: {0}")]
    Deserialize(String),
}

/// Decodes final model text into `T`.
pub trait OutputParser<T>: Send + Sync {
    /// Decodes `text` into a value.
    fn decode(&self, text: &str) -> Result<T, OutputError>;

    /// Prose appended to the system message when the model cannot be
    /// constrained natively.
    fn format_instructions(&self) -> String;

    /// Schema for native structured output, if the parser has one.
    fn schema(&self) -> Option<&JsonSchema> {
        None
    }
}

/// Instruction text asking the model for JSON that matches `schema`.
pub fn schema_instructions(schema: &JsonSchema) -> String {
    let schema_json = serde_json::to_string_pretty(schema.as_value())
        .unwrap_or_else(|_| schema.as_value().to_string());
    format!(
        "You must respond with valid JSON that conforms to this JSON Schema:\n\
         ```json\n{schema_json}\n```\n\
         Respond ONLY with the JSON object. No markdown, no explanation."
    )
}

/// Strips one surrounding markdown code fence (```` ``` ```` or
/// ```` ```json ````) and surrounding whitespace.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line.
    match body.split_once('\n') {
        Some((info, inner)) if !info.trim().contains([' ', '{', '[', '"']) => inner.trim(),
        _ => body.trim(),
    }
}

#[cfg(feature = "schema")]
pub use json::JsonOutputParser;

#[cfg(feature = "schema")]
mod json {
    use std::marker::PhantomData;

    use serde::de::DeserializeOwned;
    use serde_json::Value;

    use super::{OutputError, OutputParser, schema_instructions, strip_code_fence};
    use crate::provider::JsonSchema;

    /// Parses JSON output into `T`, validating it against `T`'s schema.
    ///
    /// Decoding is parse, then validate, then deserialize. A single
    /// markdown code fence around the JSON is tolerated.
    pub struct JsonOutputParser<T> {
        schema: JsonSchema,
        _marker: PhantomData<fn() -> T>,
    }

    impl<T> JsonOutputParser<T>
    where
        T: DeserializeOwned + schemars::JsonSchema,
    {
        /// Derives the schema from `T`.
        pub fn new() -> Result<Self, OutputError> {
            let schema = JsonSchema::from_type::<T>()
                .map_err(|e| OutputError::InvalidSchema(e.to_string()))?;
            Ok(Self {
                schema,
                _marker: PhantomData,
            })
        }
    }

    impl<T> std::fmt::Debug for JsonOutputParser<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("JsonOutputParser")
                .field("type", &std::any::type_name::<T>())
                .finish_non_exhaustive()
        }
    }

    impl<T> OutputParser<T> for JsonOutputParser<T>
    where
        T: DeserializeOwned + schemars::JsonSchema,
    {
        fn decode(&self, text: &str) -> Result<T, OutputError> {
            let raw = strip_code_fence(text);
            if raw.is_empty() {
                return Err(OutputError::Empty);
            }
            let value: Value =
                serde_json::from_str(raw).map_err(|e| OutputError::Parse(e.to_string()))?;
            self.schema.validate(&value)?;
            serde_json::from_value(value).map_err(|e| OutputError::Deserialize(e.to_string()))
        }

        fn format_instructions(&self) -> String {
            schema_instructions(&self.schema)
        }

        fn schema(&self) -> Option<&JsonSchema> {
            Some(&self.schema)
        }
    }
}
