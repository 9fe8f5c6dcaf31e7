use crate::Envelope;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::error::Error;
use std::fmt::{Debug, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

/// Any error a [`Callback`] may report.
pub type CallbackError = Box<dyn Error + Send + Sync>;

/// The outcome of a single [`Callback`] invocation.
pub type CallbackResult = Result<(), CallbackError>;

/// Receives a [`CallbackFailure`]. Error handlers run inline on the consumer
/// task of the subscription, so they should return quickly.
pub type ErrorHandler = Arc<dyn Fn(&CallbackFailure) + Send + Sync>;

/// Application logic invoked with every message delivered to a
/// [`Subscription`](crate::Subscription) under a matching routing key.
///
/// For synchronous logic, [`Handler::sync`] wraps a plain closure.
#[async_trait]
pub trait Callback: Send + Sync + 'static {
    /// Handles one message. The message is acknowledged after every callback
    /// registered for it returns, regardless of the outcome.
    async fn call(&self, envelope: &Envelope) -> CallbackResult;
}

/// A [`Callback`] paired with its own optional [`ErrorHandler`].
pub struct Handler {
    callback: Box<dyn Callback>,
    on_error: Option<ErrorHandler>,
}

/// Decides what happens to a callback failure that neither the callback's own
/// error handler nor the subscription's error handler picks up.
#[derive(Clone, Default)]
pub enum ErrorPolicy {
    /// Log the failure at the error level and carry on.
    #[default]
    Log,
    /// Forward the failure to the given process-wide sink.
    Sink(ErrorHandler),
    /// Stop the subscription whose callback failed, once the current message
    /// is fully dispatched and acknowledged.
    Terminate,
}

/// A failed [`Callback`] invocation, including a panic inside it.
#[derive(Error, Debug)]
#[error("callback for '{routing_key}' on subscription '{subscription}' failed: {error}")]
pub struct CallbackFailure {
    subscription: Arc<str>,
    routing_key: String,
    error: CallbackError,
}

struct SyncCallback<F>(F);

#[async_trait]
impl<F> Callback for SyncCallback<F>
where
    F: Fn(&Envelope) -> CallbackResult + Send + Sync + 'static,
{
    async fn call(&self, envelope: &Envelope) -> CallbackResult {
        (self.0)(envelope)
    }
}

impl Handler {
    /// Wraps an asynchronous [`Callback`].
    pub fn new(callback: impl Callback) -> Self {
        Self {
            callback: Box::new(callback),
            on_error: None,
        }
    }

    /// Wraps a synchronous closure.
    pub fn sync<F>(callback: F) -> Self
    where
        F: Fn(&Envelope) -> CallbackResult + Send + Sync + 'static,
    {
        Self::new(SyncCallback(callback))
    }

    /// Routes the failures of this handler to the given [`ErrorHandler`]
    /// instead of the subscription-wide one.
    pub fn with_error_handler(self, on_error: ErrorHandler) -> Self {
        Self {
            on_error: Some(on_error),
            ..self
        }
    }

    /// Exposes the handler-specific [`ErrorHandler`], if any.
    pub fn error_handler(&self) -> Option<&ErrorHandler> {
        self.on_error.as_ref()
    }

    /// Runs the callback, turning a panic into an error.
    pub(crate) async fn invoke(&self, envelope: &Envelope) -> CallbackResult {
        match AssertUnwindSafe(self.callback.call(envelope))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(describe_panic(panic).into()),
        }
    }
}

impl Debug for Handler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

impl Debug for ErrorPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorPolicy::Log => f.write_str("Log"),
            ErrorPolicy::Sink(_) => f.write_str("Sink(..)"),
            ErrorPolicy::Terminate => f.write_str("Terminate"),
        }
    }
}

impl CallbackFailure {
    pub(crate) fn new(
        subscription: Arc<str>,
        routing_key: impl Into<String>,
        error: CallbackError,
    ) -> Self {
        Self {
            subscription,
            routing_key: routing_key.into(),
            error,
        }
    }

    /// Reports the name of the subscription that received the message.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Reports the routing key of the message.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Exposes the error returned by the callback.
    pub fn error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }
}

fn describe_panic(panic: Box<dyn Any + Send>) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());

    format!("callback panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::delivery;
    use pretty_assertions::assert_eq;

    fn envelope() -> Envelope {
        Envelope::decode(Arc::from("test"), delivery("jobs.done", br#"{"id":1}"#)).unwrap()
    }

    #[tokio::test]
    async fn sync_handler_passes_result_through() {
        // Given
        let ok = Handler::sync(|_| Ok(()));
        let failing = Handler::sync(|_| Err("nope".into()));
        let envelope = envelope();

        // When
        let ok_result = ok.invoke(&envelope).await;
        let failing_result = failing.invoke(&envelope).await;

        // Then
        assert!(ok_result.is_ok());
        assert_eq!(failing_result.unwrap_err().to_string(), "nope");
        envelope.ack().await;
    }

    #[tokio::test]
    async fn panic_becomes_error() {
        // Given
        let handler = Handler::sync(|envelope| panic!("boom on {}", envelope.routing_key()));
        let envelope = envelope();

        // When
        let result = handler.invoke(&envelope).await;

        // Then
        assert_eq!(
            result.unwrap_err().to_string(),
            "callback panicked: boom on jobs.done",
        );
        envelope.ack().await;
    }

    #[tokio::test]
    async fn async_callback() {
        // Given
        struct ReadsId;

        #[async_trait]
        impl Callback for ReadsId {
            async fn call(&self, envelope: &Envelope) -> CallbackResult {
                tokio::task::yield_now().await;
                match envelope.get("id") {
                    Some(_) => Ok(()),
                    None => Err("missing id".into()),
                }
            }
        }
        let handler = Handler::new(ReadsId);
        let envelope = envelope();

        // When
        let result = handler.invoke(&envelope).await;

        // Then
        assert!(result.is_ok());
        assert!(handler.error_handler().is_none());
        envelope.ack().await;
    }

    #[test]
    fn failure_display() {
        // Given
        let failure = CallbackFailure::new(Arc::from("sub"), "jobs.done", "nope".into());

        // When
        let rendered = failure.to_string();

        // Then
        assert_eq!(
            rendered,
            "callback for 'jobs.done' on subscription 'sub' failed: nope",
        );
        assert_eq!(format!("{:?}", ErrorPolicy::default()), "Log");
    }
}
