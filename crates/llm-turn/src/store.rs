//! Conversation history persistence.
//!
//! The engine loads prior messages through a [`MessageStore`] when it
//! builds the transcript, and appends everything a turn produced in one
//! batch when the turn succeeds. Failed turns persist nothing.
//!
//! [`InMemoryStore`] keeps history per conversation id in process memory.
//! Anything durable (a database, a file) implements the trait itself.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::chat::ChatMessage;
use crate::context::TurnContext;
use crate::error::TurnError;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A message store failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    /// Creates a store error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<StoreError> for TurnError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.0)
    }
}

/// Loads and appends conversation history.
///
/// Implementations key history by [`TurnContext::conversation_id`].
pub trait MessageStore: Send + Sync {
    /// All stored messages for the context's conversation, oldest first.
    fn messages<'a>(&'a self, ctx: &'a TurnContext) -> StoreFuture<'a, Vec<ChatMessage>>;

    /// Appends `messages`, preserving their order.
    fn append<'a>(&'a self, ctx: &'a TurnContext, messages: Vec<ChatMessage>) -> StoreFuture<'a, ()>;
}

/// In-process history keyed by conversation id.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    conversations: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one conversation's history.
    pub fn history(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.lock().get(conversation_id).cloned().unwrap_or_default()
    }

    // Every critical section is a single clone or extend, so a poisoned
    // map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<ChatMessage>>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conversation<T>(
        &self,
        ctx: &TurnContext,
        f: impl FnOnce(&mut Vec<ChatMessage>) -> T,
    ) -> Result<T, StoreError> {
        let id = ctx
            .conversation_id()
            .ok_or_else(|| StoreError::new("context has no conversation id"))?;
        Ok(f(self.lock().entry(id.to_owned()).or_default()))
    }
}

impl MessageStore for InMemoryStore {
    fn messages<'a>(&'a self, ctx: &'a TurnContext) -> StoreFuture<'a, Vec<ChatMessage>> {
        let result = self.with_conversation(ctx, |history| history.clone());
        Box::pin(async move { result })
    }

    fn append<'a>(&'a self, ctx: &'a TurnContext, messages: Vec<ChatMessage>) -> StoreFuture<'a, ()> {
        let result = self.with_conversation(ctx, |history| history.extend(messages));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_is_per_conversation() {
        let store = InMemoryStore::new();
        let a = TurnContext::new().with_conversation("a");
        let b = TurnContext::new().with_conversation("b");

        store
            .append(&a, vec![ChatMessage::human("1"), ChatMessage::ai("2")])
            .await
            .unwrap();
        store.append(&b, vec![ChatMessage::human("x")]).await.unwrap();
        store.append(&a, vec![ChatMessage::human("3")]).await.unwrap();

        let texts: Vec<String> = store
            .messages(&a)
            .await
            .unwrap()
            .iter()
            .map(ChatMessage::text)
            .collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
        assert_eq!(store.history("b").len(), 1);
        assert!(store.history("missing").is_empty());
    }

    #[tokio::test]
    async fn test_missing_conversation_id_is_an_error() {
        let store = InMemoryStore::new();
        let err = store.messages(&TurnContext::new()).await.unwrap_err();
        assert!(err.to_string().contains("conversation id"));
    }

    #[tokio::test]
    async fn test_poisoned_lock_keeps_history_readable() {
        let store = InMemoryStore::new();
        let ctx = TurnContext::new().with_conversation("a");
        store.append(&ctx, vec![ChatMessage::human("kept")]).await.unwrap();

        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.conversations.lock().unwrap();
            panic!("poison the store");
        }));
        assert!(poisoned.is_err());
        assert!(store.conversations.is_poisoned());

        assert_eq!(store.history("a").len(), 1);
        assert_eq!(store.messages(&ctx).await.unwrap(), store.history("a"));
        store.append(&ctx, vec![ChatMessage::ai("more")]).await.unwrap();
        assert_eq!(store.history("a").len(), 2);
    }
}
