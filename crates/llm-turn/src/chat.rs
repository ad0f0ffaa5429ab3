//! Conversation messages, tool-call pairing, and model responses.
//!
//! A [`Transcript`] is the ordered call context handed to the model on
//! every invocation. It is append-only for the duration of a turn:
//!
//! ```text
//!   System
//!   [few-shot Human / Ai pairs]
//!   [history loaded from the message store]
//!   Human                     ← the new user input
//!   [caller-supplied messages]
//!   Ai(tool calls) Tool Tool  ← one block per dispatch round
//!   ...
//!   Ai                        ← final answer
//! ```
//!
//! Tool results are correlated to the requests that produced them by id:
//! every [`ToolCallResult::tool_call_id`] must match the
//! [`ToolCallRequest::id`] of an earlier request in the same transcript.
//! [`Transcript::check_pairing`] verifies this.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Kind assigned to tool-call requests that arrive without one.
pub const DEFAULT_TOOL_CALL_KIND: &str = "function";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions that frame the whole conversation.
    System,
    /// The end user.
    Human,
    /// The model.
    Ai,
    /// The output of a tool call.
    Tool,
    /// Anything else a store or caller wants to carry through.
    Generic,
}

/// A model-issued request to call a named tool.
///
/// `id` and `kind` are empty when the model did not supply them; the
/// dispatcher fills them in (see [`ToolCallRequest::normalized`]) before
/// the request is written to the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id echoed back in the matching [`ToolCallResult`].
    pub id: String,
    /// Call kind, `"function"` for every provider in practice.
    pub kind: String,
    /// Name of the tool to invoke. Matched case-insensitively.
    pub function_name: String,
    /// Raw arguments as produced by the model. Not guaranteed to be
    /// valid JSON.
    pub arguments: String,
}

impl ToolCallRequest {
    /// Creates a request with the given id, function name, and arguments.
    pub fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: DEFAULT_TOOL_CALL_KIND.into(),
            function_name: function_name.into(),
            arguments: arguments.into(),
        }
    }

    /// Returns a copy with a synthesized id (`<function_name>_<position>`)
    /// and the default kind filled in where they are missing.
    ///
    /// `position` is the request's index within its choice.
    #[must_use]
    pub fn normalized(&self, position: usize) -> Self {
        let mut call = self.clone();
        if call.id.is_empty() {
            call.id = format!("{}_{position}", call.function_name);
        }
        if call.kind.is_empty() {
            call.kind = DEFAULT_TOOL_CALL_KIND.into();
        }
        call
    }

    fn byte_size(&self) -> usize {
        self.id.len() + self.kind.len() + self.function_name.len() + self.arguments.len()
    }
}

/// The textual outcome of a tool call, fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The [`ToolCallRequest::id`] this result answers.
    pub tool_call_id: String,
    /// Name of the tool that was requested.
    pub function_name: String,
    /// Tool output, or a diagnostic when the call failed.
    pub content: String,
}

impl ToolCallResult {
    fn byte_size(&self) -> usize {
        self.tool_call_id.len() + self.function_name.len() + self.content.len()
    }
}

/// One piece of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text itself.
        value: String,
    },
    /// A request to call a tool.
    ToolCall(ToolCallRequest),
    /// The result of a previously requested tool call.
    ToolResult(ToolCallResult),
}

impl ContentPart {
    /// Creates a text part.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    fn byte_size(&self) -> usize {
        match self {
            Self::Text { value } => value.len(),
            Self::ToolCall(call) => call.byte_size(),
            Self::ToolResult(result) => result.byte_size(),
        }
    }
}

/// A single entry in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message.
    pub role: ChatRole,
    /// Ordered content.
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    /// Creates a message with a single text part.
    pub fn with_text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Creates a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(ChatRole::System, text)
    }

    /// Creates a human message.
    pub fn human(text: impl Into<String>) -> Self {
        Self::with_text(ChatRole::Human, text)
    }

    /// Creates a model (AI) text message.
    pub fn ai(text: impl Into<String>) -> Self {
        Self::with_text(ChatRole::Ai, text)
    }

    /// Creates a generic message.
    pub fn generic(text: impl Into<String>) -> Self {
        Self::with_text(ChatRole::Generic, text)
    }

    /// Creates an AI message holding only tool-call requests.
    pub fn ai_tool_calls(calls: impl IntoIterator<Item = ToolCallRequest>) -> Self {
        Self {
            role: ChatRole::Ai,
            parts: calls.into_iter().map(ContentPart::ToolCall).collect(),
        }
    }

    /// Creates a tool message carrying one result.
    pub fn tool_result(result: ToolCallResult) -> Self {
        Self {
            role: ChatRole::Tool,
            parts: vec![ContentPart::ToolResult(result)],
        }
    }

    /// Concatenates every text part. Empty when the message has none.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { value } => Some(value.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Iterates over the tool-call requests in this message.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// Iterates over the tool-call results in this message.
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolCallResult> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    /// Sum of the UTF-8 lengths of every string in this message.
    pub fn byte_size(&self) -> usize {
        self.parts.iter().map(ContentPart::byte_size).sum()
    }
}

/// The ordered message sequence sent to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the transcript holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Read-only view of the messages.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The most recent message, if any.
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Messages appended at or after `index`.
    pub fn since(&self, index: usize) -> &[ChatMessage] {
        self.messages.get(index..).unwrap_or_default()
    }

    /// Total size of all message content in bytes. See
    /// [`ChatMessage::byte_size`].
    pub fn byte_size(&self) -> usize {
        self.messages.iter().map(ChatMessage::byte_size).sum()
    }

    /// Checks that every tool result answers an earlier tool-call request.
    ///
    /// Returns the id of the first result with no matching request.
    pub fn check_pairing(&self) -> Result<(), String> {
        let mut requested: HashSet<&str> = HashSet::new();
        for message in &self.messages {
            for part in &message.parts {
                match part {
                    ContentPart::ToolCall(call) => {
                        requested.insert(call.id.as_str());
                    }
                    ContentPart::ToolResult(result) => {
                        if !requested.contains(result.tool_call_id.as_str()) {
                            return Err(result.tool_call_id.clone());
                        }
                    }
                    ContentPart::Text { .. } => {}
                }
            }
        }
        Ok(())
    }

    /// Consumes the transcript, returning the messages.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

impl From<Vec<ChatMessage>> for Transcript {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

impl Extend<ChatMessage> for Transcript {
    fn extend<I: IntoIterator<Item = ChatMessage>>(&mut self, iter: I) {
        self.messages.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// One candidate completion from a model invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Text produced by the model.
    pub content: String,
    /// Tool calls requested in this choice, in model order.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Provider-reported stop reason, if any.
    pub stop_reason: Option<String>,
}

impl Choice {
    /// A choice with text content and no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// A choice that only requests tool calls.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }
}

/// The raw result of one model invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Candidate completions. Empty when the model produced nothing.
    pub choices: Vec<Choice>,
}

impl ModelResponse {
    /// A response with a single text choice.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice::text(content)],
        }
    }

    /// A response with no choices.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the model returned zero choices.
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Total tool-call requests across all choices.
    pub fn tool_call_count(&self) -> usize {
        self.choices.iter().map(|c| c.tool_calls.len()).sum()
    }

    /// Whether any choice requests a tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.choices.iter().any(|c| !c.tool_calls.is_empty())
    }

    /// Content of every choice joined by a blank line.
    pub fn joined_content(&self) -> String {
        self.choices
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
