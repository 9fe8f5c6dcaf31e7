use crate::broker::Broker;
use crate::routing::topic::prefixed;
use crate::transport::inbound::subscription::SubscriptionSettings;
use crate::{
    AmqpBroker, Dispatch, ErrorHandler, ErrorPolicy, Exchange, MessageProperties, Payload,
    Publisher, Subscription, YosunConfig, YosunError,
};
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle as Runtime;

/// The client: publishes JSON object payloads under routing keys on a topic
/// exchange, and keeps at most one [`Subscription`] per binding key.
///
/// Every outgoing payload is merged with the client's default payload
/// fragment (see [`set_payload`](Yosun::set_payload)). Every binding and
/// routing key is prefixed with the configured key prefix.
///
/// Call [`close`](Yosun::close) to stop every subscription and release the
/// broker connections. Dropping the client without closing it only asks the
/// subscriptions to stop. Either way, a broker handed in through
/// [`with_broker`](Yosun::with_broker) is left open for its other users.
pub struct Yosun {
    config: YosunConfig,
    key_prefix: Arc<str>,
    broker: Arc<dyn Broker>,
    publisher: Arc<Publisher>,
    payload: RwLock<Payload>,
    subscriptions: SyncMutex<HashMap<String, Arc<Subscription>>>,
    error_policy: ErrorPolicy,
    runtime: Runtime,
    owns_broker: bool,
    closed: AtomicBool,
}

/// Per-subscription overrides for [`Yosun::subscribe_with`].
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    reconnect_timeout: Option<Duration>,
    on_error: Option<ErrorHandler>,
}

impl SubscribeOptions {
    /// Creates options that change nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the configured reconnect timeout.
    pub fn with_reconnect_timeout(self, reconnect_timeout: Duration) -> Self {
        Self {
            reconnect_timeout: Some(reconnect_timeout),
            ..self
        }
    }

    /// Handles the failures of callbacks that have no error handler of their
    /// own, instead of the client's [`ErrorPolicy`].
    pub fn with_error_handler(self, on_error: ErrorHandler) -> Self {
        Self {
            on_error: Some(on_error),
            ..self
        }
    }
}

impl Debug for SubscribeOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("reconnect_timeout", &self.reconnect_timeout)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl Yosun {
    /// Creates a client talking to the RabbitMQ cluster described by the
    /// given configuration. Connecting happens lazily, on the first
    /// subscription or publish.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: YosunConfig) -> Result<Self, YosunError> {
        let broker = Arc::new(AmqpBroker::from_config(&config));

        Self::assemble(config, broker, true)
    }

    /// Creates a client on top of the given [`Broker`], which may be shared
    /// with other clients. The client never closes it: closing the broker is
    /// up to whoever created it.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_broker(config: YosunConfig, broker: Arc<dyn Broker>) -> Result<Self, YosunError> {
        Self::assemble(config, broker, false)
    }

    fn assemble(
        config: YosunConfig,
        broker: Arc<dyn Broker>,
        owns_broker: bool,
    ) -> Result<Self, YosunError> {
        let runtime = Runtime::try_current().map_err(|_| YosunError::NoRuntime)?;
        let publisher = Publisher::new(
            broker.clone(),
            config.exchange().clone(),
            config.publishing().retry_policy(),
        );

        Ok(Self {
            key_prefix: Arc::from(config.key_prefix()),
            config,
            broker,
            publisher: Arc::new(publisher),
            payload: RwLock::new(Payload::new()),
            subscriptions: SyncMutex::new(HashMap::new()),
            error_policy: ErrorPolicy::default(),
            runtime,
            owns_broker,
            closed: AtomicBool::new(false),
        })
    }

    /// Sets the [`ErrorPolicy`] for callback failures that no error handler
    /// picks up. Applies to subscriptions created afterwards.
    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;

        self
    }
}

impl Yosun {
    /// Exposes the configuration.
    pub fn config(&self) -> &YosunConfig {
        &self.config
    }

    /// Exposes the [`Exchange`] all messages go through.
    pub fn exchange(&self) -> &Exchange {
        self.config.exchange()
    }

    /// Reports the prefix prepended to every binding and routing key.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Exposes the [`Publisher`].
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Returns a copy of the default payload fragment.
    pub fn payload(&self) -> Payload {
        self.payload.read().clone()
    }

    /// Replaces the default payload fragment merged into every outgoing
    /// payload. Its keys take precedence over the same keys of the published
    /// payload.
    pub fn set_payload(&self, payload: Payload) {
        *self.payload.write() = payload;
    }

    /// Modifies the default payload fragment in place.
    pub fn update_payload(&self, update: impl FnOnce(&mut Payload)) {
        update(&mut self.payload.write());
    }
}

impl Yosun {
    /// Returns the running [`Subscription`] to the binding key (key prefix
    /// added), creating it or restarting it as needed.
    pub fn subscribe(&self, binding_key: &str) -> Arc<Subscription> {
        self.subscribe_with(binding_key, SubscribeOptions::default())
    }

    /// Same as [`subscribe`](Yosun::subscribe), with overrides. The options
    /// apply only when the subscription is created; an existing subscription
    /// keeps its original settings.
    pub fn subscribe_with(&self, binding_key: &str, options: SubscribeOptions) -> Arc<Subscription> {
        let mut subscriptions = self.subscriptions.lock();

        let subscription = subscriptions
            .entry(binding_key.to_string())
            .or_insert_with(|| Arc::new(self.create_subscription(binding_key, options)))
            .clone();

        subscription.start();

        subscription
    }

    fn create_subscription(&self, binding_key: &str, options: SubscribeOptions) -> Subscription {
        let defaults = self.config.subscription();
        let settings = SubscriptionSettings {
            binding_key: binding_key.to_string(),
            key_prefix: self.key_prefix.clone(),
            exchange: self.config.exchange().clone(),
            broker: self.broker.clone(),
            reconnect_timeout: options
                .reconnect_timeout
                .unwrap_or(defaults.reconnect_timeout()),
            drain_timeout: defaults.drain_timeout(),
            on_error: options.on_error,
            policy: self.error_policy.clone(),
        };

        Subscription::new(settings, self.runtime.clone())
    }

    /// Stops the subscription to the binding key, keeping it around for a later
    /// [`subscribe`](Yosun::subscribe) to restart. Returns whether such a
    /// subscription exists.
    pub fn unsubscribe(&self, binding_key: &str) -> bool {
        match self.subscriptions.lock().get(binding_key) {
            Some(subscription) => {
                subscription.stop();
                true
            }
            None => false,
        }
    }

    /// Looks up the subscription to the binding key, running or not.
    pub fn subscription(&self, binding_key: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.lock().get(binding_key).cloned()
    }

    /// Lists the binding keys (without the key prefix) of all subscriptions.
    pub fn binding_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        keys.sort();

        keys
    }
}

impl Yosun {
    /// Publishes the payload under the routing key (key prefix added).
    ///
    /// Fails only when the payload does not serialize into a key/value mapping;
    /// a `None`/unit payload counts as an empty one. Failing to publish after
    /// every allowed attempt is logged, not returned.
    pub async fn publish<P>(&self, routing_key: &str, payload: &P) -> Result<(), YosunError>
    where
        P: Serialize + ?Sized,
    {
        self.publish_with(routing_key, payload, MessageProperties::default())
            .await
    }

    /// Same as [`publish`](Yosun::publish), with broker-level options.
    pub async fn publish_with<P>(
        &self,
        routing_key: &str,
        payload: &P,
        properties: MessageProperties,
    ) -> Result<(), YosunError>
    where
        P: Serialize + ?Sized,
    {
        let dispatch = self.prepare(routing_key, payload, properties)?;
        self.publisher.publish(&dispatch).await;

        Ok(())
    }

    /// Same as [`publish_with`](Yosun::publish_with), but also returns the
    /// failure to publish after every allowed attempt.
    pub async fn try_publish<P>(
        &self,
        routing_key: &str,
        payload: &P,
        properties: MessageProperties,
    ) -> Result<(), YosunError>
    where
        P: Serialize + ?Sized,
    {
        let dispatch = self.prepare(routing_key, payload, properties)?;
        self.publisher.try_publish(&dispatch).await?;

        Ok(())
    }

    /// Validates and merges the payload right away, then publishes it in the
    /// background. Nothing reports the outcome of the publishing itself; wait
    /// for a reply message when a confirmation is needed.
    pub fn publish_async<P>(&self, routing_key: &str, payload: &P) -> Result<(), YosunError>
    where
        P: Serialize + ?Sized,
    {
        self.publish_async_with(routing_key, payload, MessageProperties::default())
    }

    /// Same as [`publish_async`](Yosun::publish_async), with broker-level
    /// options.
    pub fn publish_async_with<P>(
        &self,
        routing_key: &str,
        payload: &P,
        properties: MessageProperties,
    ) -> Result<(), YosunError>
    where
        P: Serialize + ?Sized,
    {
        let dispatch = self.prepare(routing_key, payload, properties)?;
        let publisher = self.publisher.clone();

        self.runtime.spawn(async move {
            publisher.publish(&dispatch).await;
        });

        Ok(())
    }

    /// Validates the payload, overlays the default fragment, prefixes the
    /// routing key, and encodes the result.
    fn prepare<P>(
        &self,
        routing_key: &str,
        payload: &P,
        properties: MessageProperties,
    ) -> Result<Dispatch, YosunError>
    where
        P: Serialize + ?Sized,
    {
        let mut merged = match serde_json::to_value(payload)? {
            Value::Null => Payload::new(),
            Value::Object(map) => map,
            other => return Err(YosunError::invalid_payload(&other)),
        };

        // Defaults win over the caller's keys
        merged.extend(
            self.payload
                .read()
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        let routing_key = prefixed(&self.key_prefix, routing_key);

        Ok(Dispatch::json(routing_key, &merged, properties)?)
    }
}

impl Yosun {
    /// Stops every subscription, waits for their consumer tasks to exit, then
    /// closes the broker if this client created it.
    pub async fn close(&self) {
        let subscriptions: Vec<Arc<Subscription>> =
            self.subscriptions.lock().values().cloned().collect();

        for subscription in &subscriptions {
            subscription.stop();
        }

        for subscription in &subscriptions {
            subscription.join().await;
        }

        if self.owns_broker && !self.closed.swap(true, Ordering::AcqRel) {
            self.broker.close().await;
        }
    }
}

impl Drop for Yosun {
    fn drop(&mut self) {
        for subscription in self.subscriptions.get_mut().values() {
            subscription.stop();
        }

        if self.owns_broker && !self.closed.swap(true, Ordering::AcqRel) {
            let broker = self.broker.clone();
            self.runtime.spawn(async move { broker.close().await });
        }
    }
}
