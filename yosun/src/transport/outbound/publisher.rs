use crate::broker::Broker;
use crate::{BrokerError, Dispatch, Exchange, PublishingError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error};
use yosun_util::{Exhausted, RetryPolicy};

/// Publishes outgoing [`Dispatch`]es to one [`Exchange`].
///
/// Every dispatch is attempted up to the number of times allowed by the
/// [`RetryPolicy`], with an exponential backoff between attempts.
///
/// - [`try_publish`](Publisher::try_publish) reports the terminal failure.
/// - [`publish`](Publisher::publish) logs it instead.
pub struct Publisher {
    name: Arc<str>,
    exchange: Exchange,
    broker: Arc<dyn Broker>,
    retry: RetryPolicy,
}

impl Publisher {
    /// Creates a publisher to the given exchange.
    pub fn new(broker: Arc<dyn Broker>, exchange: Exchange, retry: RetryPolicy) -> Self {
        let name = Self::compose_name(&exchange);

        Self {
            name,
            exchange,
            broker,
            retry,
        }
    }

    fn compose_name(exchange: &Exchange) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "yosun:pub:{}:{}",
            exchange.name(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Reports the unique name of this publisher.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exposes the target [`Exchange`].
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Exposes the [`RetryPolicy`].
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl Publisher {
    /// Publishes the dispatch, retrying failed attempts. Returns the failure
    /// of the last attempt once the attempts run out, or right away once the
    /// broker is closed.
    pub async fn try_publish(&self, dispatch: &Dispatch) -> Result<(), PublishingError> {
        let send = |attempt: u32| async move {
            let result = self.broker.publish(&self.exchange, dispatch).await;

            if let Err(error) = &result {
                debug!(
                    publisher = self.name.as_ref(),
                    routing_key = dispatch.routing_key(),
                    attempt,
                    ?error,
                    error_message = %error,
                    "A publishing attempt failed",
                );
            }

            result
        };

        // Nothing publishes through a closed broker anymore
        let retryable = |error: &BrokerError| !matches!(error, BrokerError::Closed);

        self.retry
            .run_if(send, retryable)
            .await
            .map_err(|Exhausted { attempts, error }| {
                PublishingError::new(dispatch.shared_routing_key(), attempts, error)
            })
    }

    /// Publishes the dispatch, retrying failed attempts. The terminal failure
    /// is logged, never returned.
    pub async fn publish(&self, dispatch: &Dispatch) {
        match self.try_publish(dispatch).await {
            Ok(()) => debug!(
                publisher = self.name.as_ref(),
                routing_key = dispatch.routing_key(),
                byte_count = dispatch.bytes().len(),
                "Published a message",
            ),
            Err(error) => error!(
                alert = true,
                publisher = self.name.as_ref(),
                routing_key = dispatch.routing_key(),
                attempts = error.attempts(),
                ?error,
                error_message = %error,
                byte_preview = String::from_utf8_lossy(dispatch.bytes()).as_ref(),
                "Failed to publish a message",
            ),
        }
    }
}
