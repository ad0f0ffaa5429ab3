//! Mock provider for testing.
//!
//! [`MockProvider`] is a queue-based fake model: tests queue exactly the
//! responses and errors it should return, in order, and inspect every
//! request it received. It implements [`Provider`], so it also works as
//! an `Arc<dyn DynProvider>` through the blanket impl.
//!
//! ```rust
//! use std::collections::HashSet;
//! use llm_turn::mock::MockProvider;
//! use llm_turn::{ModelRequest, ModelResponse, Provider, ProviderMetadata, TurnContext};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mock = MockProvider::new(ProviderMetadata {
//!     name: "test".into(),
//!     model: "test-model".into(),
//!     capabilities: HashSet::new(),
//! });
//! mock.queue_response(ModelResponse::text("Hello!"));
//!
//! let resp = mock.generate(&ModelRequest::default(), &TurnContext::new()).await.unwrap();
//! assert_eq!(resp.joined_content(), "Hello!");
//! assert_eq!(mock.recorded_calls().len(), 1);
//! # }
//! ```
//!
//! An exhausted queue yields a non-retryable [`TurnError::Transport`]
//! rather than panicking, so a test that under-queues fails with a
//! readable turn error.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::chat::ModelResponse;
use crate::context::TurnContext;
use crate::error::TurnError;
use crate::provider::{ModelRequest, Provider, ProviderMetadata};

/// A queue-based fake model.
pub struct MockProvider {
    responses: Mutex<VecDeque<Result<ModelResponse, TurnError>>>,
    calls: Mutex<Vec<ModelRequest>>,
    latency: Option<Duration>,
    meta: ProviderMetadata,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("meta", &self.meta)
            .field("queued_responses", &lock(&self.responses).len())
            .field("recorded_calls", &lock(&self.calls).len())
            .field("latency", &self.latency)
            .finish()
    }
}

impl MockProvider {
    /// Creates a mock with an empty queue.
    pub fn new(meta: ProviderMetadata) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            latency: None,
            meta,
        }
    }

    /// Sleeps for `latency` before answering each call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queues a successful response.
    pub fn queue_response(&self, response: ModelResponse) -> &Self {
        lock(&self.responses).push_back(Ok(response));
        self
    }

    /// Queues an error.
    pub fn queue_error(&self, error: TurnError) -> &Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    /// Every request received so far, in order.
    pub fn recorded_calls(&self) -> Vec<ModelRequest> {
        lock(&self.calls).clone()
    }

    /// Number of responses still queued.
    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }
}

impl Provider for MockProvider {
    async fn generate(
        &self,
        request: &ModelRequest,
        _ctx: &TurnContext,
    ) -> Result<ModelResponse, TurnError> {
        lock(&self.calls).push(request.clone());
        let next = lock(&self.responses).pop_front();
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        next.unwrap_or_else(|| {
            Err(TurnError::Transport {
                status: None,
                message: "MockProvider: no queued responses remaining".into(),
                retryable: false,
            })
        })
    }

    fn metadata(&self) -> ProviderMetadata {
        self.meta.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::provider::{Capability, DynProvider};

    fn test_metadata() -> ProviderMetadata {
        ProviderMetadata {
            name: "mock".into(),
            model: "test-model".into(),
            capabilities: HashSet::from([Capability::Tools]),
        }
    }

    #[tokio::test]
    async fn test_mock_returns_queued_in_order() {
        let mock = MockProvider::new(test_metadata());
        mock.queue_response(ModelResponse::text("first"))
            .queue_response(ModelResponse::text("second"));

        let ctx = TurnContext::new();
        let r1 = mock.generate(&ModelRequest::default(), &ctx).await.unwrap();
        let r2 = mock.generate(&ModelRequest::default(), &ctx).await.unwrap();
        assert_eq!(r1.joined_content(), "first");
        assert_eq!(r2.joined_content(), "second");
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_mock_error_and_exhaustion() {
        let mock = MockProvider::new(test_metadata());
        mock.queue_error(TurnError::Transport {
            status: Some(http::StatusCode::SERVICE_UNAVAILABLE),
            message: "overloaded".into(),
            retryable: true,
        });

        let ctx = TurnContext::new();
        let err = mock.generate(&ModelRequest::default(), &ctx).await.unwrap_err();
        assert!(err.is_retryable());

        let err = mock.generate(&ModelRequest::default(), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("no queued responses"));
        assert_eq!(mock.recorded_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_as_dyn_provider() {
        let mock = MockProvider::new(test_metadata());
        mock.queue_response(ModelResponse::text("dyn"));
        let provider: &dyn DynProvider = &mock;
        let resp = provider
            .generate_boxed(&ModelRequest::default(), &TurnContext::new())
            .await
            .unwrap();
        assert_eq!(resp.joined_content(), "dyn");
    }
}
