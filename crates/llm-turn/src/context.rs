//! Execution context threaded through a turn.
//!
//! A [`TurnContext`] carries the three things every collaborator may need
//! but none of them owns:
//!
//! - the conversation identity, required by the engine and used by
//!   message stores to key history;
//! - the caller's [`CancellationToken`], observed by the model call and
//!   by every tool invocation;
//! - the nesting depth, incremented each time a tool delegates to a
//!   nested assistant.
//!
//! ```rust
//! use llm_turn::TurnContext;
//!
//! let ctx = TurnContext::new().with_conversation("conv-42");
//! let child = ctx.nested();
//! assert_eq!(child.depth(), 1);
//! assert_eq!(child.conversation_id(), Some("conv-42"));
//!
//! ctx.cancel();
//! assert!(child.is_cancelled());
//! ```

use tokio_util::sync::CancellationToken;

/// Identity, cancellation, and nesting depth for one turn.
///
/// Cloning is cheap and clones share the same cancellation token.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    conversation_id: Option<String>,
    cancel: CancellationToken,
    depth: u32,
}

impl TurnContext {
    /// Creates a root context with no conversation identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a conversation identity.
    #[must_use]
    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Uses an existing cancellation token instead of a fresh one.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The conversation identity, if one was attached.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Current nesting depth. Zero for a top-level turn.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The cancellation token for this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Requests cancellation of this context and every context derived
    /// from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Context for one tool invocation: same identity and depth, with a
    /// child token so the caller's cancellation propagates downward.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            conversation_id: self.conversation_id.clone(),
            cancel: self.cancel.child_token(),
            depth: self.depth,
        }
    }

    /// Context for a nested assistant: a [`child`](Self::child) one level
    /// deeper.
    #[must_use]
    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth.saturating_add(1),
            ..self.child()
        }
    }
}
