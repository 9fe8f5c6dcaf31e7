use crate::broker::{Broker, Consumer, Delivery};
use crate::routing::topic::prefixed;
use crate::transport::inbound::envelope::Undecodable;
use crate::transport::inbound::registry::{CallbackRegistry, EventRegistry};
use crate::{
    BrokerError, CallbackFailure, CallbackResult, Envelope, ErrorHandler, ErrorPolicy, Exchange,
    Handler,
};
use parking_lot::Mutex as SyncMutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle as Runtime;
use tokio::select;
use tracing::{debug, error, info, trace, warn};
use yosun_sync::{Gate, Latch};

/// A self-healing consumer of one binding key on the client's exchange.
///
/// While running, a dedicated background task binds an exclusive,
/// auto-deleting queue to the binding key, and for every delivered message:
///
/// 1. wakes the [waiters](Subscription::wait) for its exact routing key, then
///    the [waiters for any message](Subscription::wait_any);
/// 2. invokes, in registration order, the [callbacks](Subscription::on) for
///    its exact routing key, then the [match-all](Subscription::all)
///    callbacks;
/// 3. acknowledges it.
///
/// Messages are handled one at a time, in delivery order. When the connection
/// to the broker is lost, the task waits for the reconnect timeout and binds a
/// fresh queue, indefinitely, until [stopped](Subscription::stop).
///
/// Stopping is cooperative: a message being dispatched is always dispatched
/// and acknowledged to the end, while messages arriving after the stop are
/// dropped without being dispatched or acknowledged.
pub struct Subscription {
    core: Arc<Core>,
    runtime: Runtime,
    state: SyncMutex<RunState>,
}

/// Everything the consumer task needs, shared between the subscription and
/// its task(s).
struct Core {
    name: Arc<str>,
    binding_key: Arc<str>,
    key_prefix: Arc<str>,
    exchange: Exchange,
    broker: Arc<dyn Broker>,
    reconnect_timeout: Duration,
    drain_timeout: Duration,
    on_error: Option<ErrorHandler>,
    policy: ErrorPolicy,
    callbacks: CallbackRegistry,
    events: EventRegistry,
}

/// The parameters of a new [`Subscription`].
pub(crate) struct SubscriptionSettings {
    pub(crate) binding_key: String,
    pub(crate) key_prefix: Arc<str>,
    pub(crate) exchange: Exchange,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) reconnect_timeout: Duration,
    pub(crate) drain_timeout: Duration,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) policy: ErrorPolicy,
}

#[derive(Default)]
struct RunState {
    current: Option<Run>,
    retired: Vec<Latch>,
}

/// One run of the consumer task: `stop` is released to ask the task to exit,
/// `done` is released by the task as it exits.
struct Run {
    stop: Latch,
    done: Latch,
}

/// Releases the `done` latch of a run however the task ends.
struct DoneGuard(Latch);

enum Drained {
    Stopped,
    Disconnected,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl Subscription {
    /// Creates a subscription without starting it.
    pub(crate) fn new(settings: SubscriptionSettings, runtime: Runtime) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let key_prefixed = prefixed(&settings.key_prefix, &settings.binding_key);
        let name = Arc::from(format!(
            "yosun:sub:{}:{}:{}",
            settings.exchange.name(),
            key_prefixed,
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ));

        let core = Core {
            name,
            binding_key: Arc::from(key_prefixed),
            key_prefix: settings.key_prefix,
            exchange: settings.exchange,
            broker: settings.broker,
            reconnect_timeout: settings.reconnect_timeout,
            drain_timeout: settings.drain_timeout,
            on_error: settings.on_error,
            policy: settings.policy,
            callbacks: CallbackRegistry::default(),
            events: EventRegistry::default(),
        };

        Self {
            core: Arc::new(core),
            runtime,
            state: SyncMutex::new(RunState::default()),
        }
    }

    /// Reports the unique name of this subscription, also used as the consumer
    /// tag.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Reports the binding key of the queue, including the key prefix.
    pub fn binding_key(&self) -> &str {
        &self.core.binding_key
    }

    /// Exposes the [`Exchange`] the queue is bound to.
    pub fn exchange(&self) -> &Exchange {
        &self.core.exchange
    }

    /// Exposes the reconnect timeout.
    pub fn reconnect_timeout(&self) -> Duration {
        self.core.reconnect_timeout
    }
}

impl Subscription {
    /// Registers a synchronous callback for messages under exactly this
    /// routing key (key prefix added). No pattern matching applies here.
    pub fn on<F>(&self, routing_key: &str, callback: F) -> &Self
    where
        F: Fn(&Envelope) -> CallbackResult + Send + Sync + 'static,
    {
        self.on_handler(routing_key, Handler::sync(callback))
    }

    /// Registers a [`Handler`] for messages under exactly this routing key
    /// (key prefix added).
    pub fn on_handler(&self, routing_key: &str, handler: Handler) -> &Self {
        let routing_key = prefixed(&self.core.key_prefix, routing_key);
        self.core.callbacks.on(routing_key, handler);

        self
    }

    /// Registers a synchronous callback for every message.
    pub fn all<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Envelope) -> CallbackResult + Send + Sync + 'static,
    {
        self.all_handler(Handler::sync(callback))
    }

    /// Registers a [`Handler`] for every message.
    pub fn all_handler(&self, handler: Handler) -> &Self {
        self.core.callbacks.all(handler);

        self
    }

    /// Waits for the **next** message under exactly this routing key (key
    /// prefix added). Resolves to `false` once the timeout elapses; [`None`]
    /// waits indefinitely.
    ///
    /// Listening starts when this method is called, not when the returned
    /// future is first polled. A message that arrived earlier does not count.
    pub fn wait(
        &self,
        routing_key: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = bool> + Send + use<> {
        let routing_key = prefixed(&self.core.key_prefix, routing_key);

        self.core.events.listen(routing_key, timeout)
    }

    /// Same as [`wait`](Subscription::wait), but for a message under any
    /// routing key.
    pub fn wait_any(&self, timeout: Option<Duration>) -> impl Future<Output = bool> + Send + use<> {
        self.core.events.listen_any(timeout)
    }
}

impl Subscription {
    /// Starts the consumer task, unless it is already running.
    ///
    /// A run that was [stopped](Subscription::stop) but is still finishing its
    /// current message is left to finish on its own; a fresh run starts next
    /// to it.
    pub fn start(&self) {
        let mut state = self.state.lock();

        if let Some(run) = &state.current {
            if !run.stop.is_released() && !run.done.is_released() {
                return;
            }
        }

        let run = Run {
            stop: Latch::new(),
            done: Latch::new(),
        };
        let task = self.core.clone().run(run.stop.clone(), DoneGuard(run.done.clone()));

        if let Some(previous) = state.current.replace(run) {
            state.retired.push(previous.done);
        }
        state.retired.retain(|done| !done.is_released());

        self.runtime.spawn(task);
    }

    /// Asks the consumer task to exit at its next opportunity.
    pub fn stop(&self) {
        if let Some(run) = &self.state.lock().current {
            if !run.stop.is_released() {
                info!(
                    subscription = self.core.name.as_ref(),
                    binding_key = self.core.binding_key.as_ref(),
                    "Stopping a subscription",
                );
            }
            run.stop.release();
        }
    }

    /// Reports whether the consumer task of the latest run has not exited yet.
    pub fn is_alive(&self) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(|run| !run.done.is_released())
    }

    /// Reports whether the latest run is alive and not asked to stop.
    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(|run| !run.stop.is_released() && !run.done.is_released())
    }

    /// Waits until every consumer task of this subscription has exited.
    /// Meant to follow a [`stop`](Subscription::stop).
    pub async fn join(&self) {
        let gates: Vec<Gate> = {
            let state = self.state.lock();

            state
                .current
                .iter()
                .map(|run| &run.done)
                .chain(state.retired.iter())
                .map(Latch::gate)
                .collect()
        };

        for gate in gates {
            gate.opened().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(run) = &self.state.get_mut().current {
            run.stop.release();
        }
    }
}

impl Core {
    /// The consumer task.
    async fn run(self: Arc<Self>, stop: Latch, _done: DoneGuard) {
        let gate = stop.gate();

        info!(
            subscription = self.name.as_ref(),
            binding_key = self.binding_key.as_ref(),
            exchange = self.exchange.name(),
            "Starting a subscription",
        );

        while !gate.is_open() {
            let consumed = select! {
                biased;
                _ = gate.opened() => break,
                consumed = self.broker.consume(&self.exchange, &self.binding_key, &self.name) => consumed,
            };

            match consumed {
                Ok(mut consumer) => {
                    let drained = self.drain(consumer.as_mut(), &stop).await;
                    consumer.close().await;

                    if let Drained::Stopped = drained {
                        break;
                    }

                    info!(
                        subscription = self.name.as_ref(),
                        binding_key = self.binding_key.as_ref(),
                        "Disconnected from the broker; reconnecting",
                    );
                }
                Err(BrokerError::Closed) => {
                    warn!(
                        subscription = self.name.as_ref(),
                        binding_key = self.binding_key.as_ref(),
                        "The broker is closed; abandoning the subscription",
                    );
                    break;
                }
                Err(error) => info!(
                    subscription = self.name.as_ref(),
                    binding_key = self.binding_key.as_ref(),
                    ?error,
                    error_message = %error,
                    "Failed to start consuming; reconnecting",
                ),
            }

            select! {
                biased;
                _ = gate.opened() => break,
                _ = tokio::time::sleep(self.reconnect_timeout) => {},
            }
        }

        info!(
            subscription = self.name.as_ref(),
            binding_key = self.binding_key.as_ref(),
            "Stopped a subscription",
        );
    }

    /// Receives messages until stopped or disconnected.
    async fn drain(&self, consumer: &mut dyn Consumer, stop: &Latch) -> Drained {
        let gate = stop.gate();

        loop {
            let next = select! {
                biased;
                _ = gate.opened() => return Drained::Stopped,
                next = tokio::time::timeout(self.drain_timeout, consumer.next()) => next,
            };

            match next {
                Err(_) => trace!(
                    subscription = self.name.as_ref(),
                    "No messages within the drain timeout",
                ),
                Ok(None) => return Drained::Disconnected,
                Ok(Some(Err(error))) => {
                    debug!(
                        subscription = self.name.as_ref(),
                        ?error,
                        error_message = %error,
                        "The consumer stream broke down",
                    );

                    return Drained::Disconnected;
                }
                Ok(Some(Ok(delivery))) => self.receive(delivery, stop).await,
            }
        }
    }

    /// Handles a single delivery to the end.
    async fn receive(&self, delivery: Delivery, stop: &Latch) {
        if stop.is_released() {
            debug!(
                subscription = self.name.as_ref(),
                routing_key = delivery.routing_key.as_str(),
                "Dropped a message that arrived after the subscription stopped",
            );
            return;
        }

        let envelope = match Envelope::decode(self.name.clone(), delivery) {
            Ok(envelope) => envelope,
            Err(undecodable) => return self.discard(undecodable).await,
        };

        self.events.signal(envelope.routing_key());

        let mut terminate = false;
        for handler in self.callbacks.snapshot(envelope.routing_key()) {
            if let Err(error) = handler.invoke(&envelope).await {
                let failure = CallbackFailure::new(self.name.clone(), envelope.routing_key(), error);
                terminate |= self.report(&handler, &failure);
            }
        }

        envelope.ack().await;

        if terminate {
            warn!(
                subscription = self.name.as_ref(),
                binding_key = self.binding_key.as_ref(),
                "Stopping the subscription after a callback failure",
            );
            stop.release();
        }
    }

    /// Routes a callback failure to the first taker: the handler, the
    /// subscription, then the client policy. Returns whether the subscription
    /// must stop.
    fn report(&self, handler: &Handler, failure: &CallbackFailure) -> bool {
        if let Some(on_error) = handler.error_handler().or(self.on_error.as_ref()) {
            self.notify(on_error, failure);
            return false;
        }

        match &self.policy {
            ErrorPolicy::Log => {
                error!(
                    subscription = self.name.as_ref(),
                    routing_key = failure.routing_key(),
                    error_message = %failure.error(),
                    "A callback failed to handle a message",
                );
                false
            }
            ErrorPolicy::Sink(sink) => {
                self.notify(sink, failure);
                false
            }
            ErrorPolicy::Terminate => {
                error!(
                    subscription = self.name.as_ref(),
                    routing_key = failure.routing_key(),
                    error_message = %failure.error(),
                    "A callback failed to handle a message",
                );
                true
            }
        }
    }

    fn notify(&self, on_error: &ErrorHandler, failure: &CallbackFailure) {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| on_error(failure)));

        if outcome.is_err() {
            error!(
                subscription = self.name.as_ref(),
                routing_key = failure.routing_key(),
                error_message = %failure.error(),
                "An error handler panicked while handling a callback failure",
            );
        }
    }

    async fn discard(&self, undecodable: Undecodable) {
        let Undecodable { delivery, error } = undecodable;

        error!(
            alert = true,
            subscription = self.name.as_ref(),
            routing_key = delivery.routing_key.as_str(),
            ?error,
            error_message = %error,
            byte_preview = String::from_utf8_lossy(&delivery.bytes).as_ref(),
            "Discarded an incoming message that is not a JSON object",
        );

        if let Err(error) = delivery.acker.ack().await {
            debug!(
                subscription = self.name.as_ref(),
                ?error,
                error_message = %error,
                "Failed to acknowledge a discarded message",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::eventually;
    use crate::transport::outbound::dispatch::Dispatch;
    use crate::{MemoryBroker, MessageProperties};
    use pretty_assertions::assert_eq;

    const SHORT: Option<Duration> = Some(Duration::from_millis(100));

    fn subscribe(broker: &MemoryBroker, binding_key: &str) -> Subscription {
        subscribe_with(broker, binding_key, None, ErrorPolicy::Log)
    }

    fn subscribe_with(
        broker: &MemoryBroker,
        binding_key: &str,
        on_error: Option<ErrorHandler>,
        policy: ErrorPolicy,
    ) -> Subscription {
        let settings = SubscriptionSettings {
            binding_key: binding_key.to_string(),
            key_prefix: Arc::from(""),
            exchange: Exchange::default(),
            broker: Arc::new(broker.clone()),
            reconnect_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(10),
            on_error,
            policy,
        };

        Subscription::new(settings, Runtime::current())
    }

    async fn publish(broker: &MemoryBroker, routing_key: &str, body: &str) {
        let dispatch = Dispatch::new(routing_key, body.as_bytes().to_vec(), MessageProperties::new());
        broker.publish(&Exchange::default(), &dispatch).await.unwrap();
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Envelope) -> CallbackResult + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();

        (count, move |_: &Envelope| -> CallbackResult {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    async fn started(broker: &MemoryBroker, subscription: &Subscription, consumers: usize) {
        subscription.start();
        eventually(|| broker.consumer_count() == consumers).await;
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_by_exact_key_and_to_all() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe(&broker, "jobs.*");
        let (done, on_done) = counter();
        let (failed, on_failed) = counter();
        let (all, on_all) = counter();
        subscription
            .on("jobs.done", on_done)
            .on("jobs.failed", on_failed)
            .all(on_all);
        started(&broker, &subscription, 1).await;

        // When
        publish(&broker, "jobs.done", "{}").await;
        publish(&broker, "jobs.done", "{}").await;
        publish(&broker, "jobs.started", "{}").await;
        eventually(|| broker.acknowledged_count() == 3).await;

        // Then
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(failed.load(Ordering::SeqCst), 0);
        assert_eq!(all.load(Ordering::SeqCst), 3);
        assert!(subscription.is_alive());
        assert!(subscription.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sees_only_the_next_message() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe(&broker, "#");
        started(&broker, &subscription, 1).await;

        // When
        let first = subscription.wait("nodes.up", SHORT);
        let any = subscription.wait_any(SHORT);
        publish(&broker, "nodes.up", "{}").await;
        let first = first.await;
        let any = any.await;
        let second = subscription.wait("nodes.up", SHORT).await;
        let other = subscription.wait("nodes.down", SHORT);
        publish(&broker, "nodes.up", "{}").await;

        // Then
        assert!(first);
        assert!(any);
        assert!(!second);
        assert!(!other.await);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_disconnect() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe(&broker, "jobs.#");
        let (count, on_done) = counter();
        subscription.on("jobs.done", on_done);
        started(&broker, &subscription, 1).await;

        // When
        let disconnected_at = tokio::time::Instant::now();
        broker.disconnect();
        assert_eq!(broker.consumer_count(), 0);
        eventually(|| broker.consumer_count() == 1).await;
        let recovered_after = disconnected_at.elapsed();
        publish(&broker, "jobs.done", "{}").await;
        eventually(|| count.load(Ordering::SeqCst) == 1).await;

        // Then
        assert!(recovered_after >= Duration::from_secs(10));
        assert!(recovered_after <= Duration::from_secs(10) + Duration::from_millis(100));
        assert!(subscription.is_running());
        assert_eq!(broker.acknowledged_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_retrying_while_broker_is_down() {
        // Given
        let broker = MemoryBroker::new();
        broker.set_online(false);
        let subscription = subscribe(&broker, "#");
        subscription.start();

        // When
        tokio::time::sleep(Duration::from_secs(35)).await;
        let while_down = broker.consumer_count();
        broker.set_online(true);
        eventually(|| broker.consumer_count() == 1).await;

        // Then
        assert_eq!(while_down, 0);
        assert!(subscription.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn early_ack_is_not_repeated() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe(&broker, "#");
        let acked_early = Arc::new(AtomicUsize::new(0));
        struct AcksEarly(Arc<AtomicUsize>);
        #[async_trait::async_trait]
        impl crate::Callback for AcksEarly {
            async fn call(&self, envelope: &Envelope) -> CallbackResult {
                envelope.ack().await;
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        subscription.all_handler(Handler::new(AcksEarly(acked_early.clone())));
        started(&broker, &subscription, 1).await;

        // When
        publish(&broker, "a", "{}").await;
        eventually(|| acked_early.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Then
        assert_eq!(broker.acknowledged_count(), 1);
        assert!(subscription.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_task_and_delivery() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe(&broker, "#");
        let (count, on_all) = counter();
        subscription.all(on_all);
        started(&broker, &subscription, 1).await;

        // When
        subscription.stop();
        subscription.join().await;
        publish(&broker, "a", "{}").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Then
        assert!(!subscription.is_alive());
        assert!(!subscription.is_running());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(broker.consumer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_stop() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe(&broker, "#");
        let (count, on_all) = counter();
        subscription.all(on_all);
        started(&broker, &subscription, 1).await;
        subscription.stop();
        subscription.join().await;

        // When
        started(&broker, &subscription, 1).await;
        subscription.start();
        publish(&broker, "a", "{}").await;
        eventually(|| count.load(Ordering::SeqCst) == 1).await;

        // Then
        assert_eq!(broker.consumer_count(), 1);
        assert!(subscription.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated_and_routed() {
        // Given
        let broker = MemoryBroker::new();
        let handled = Arc::new(SyncMutex::new(Vec::<String>::new()));
        let subscription_level = {
            let handled = handled.clone();
            Arc::new(move |failure: &CallbackFailure| {
                handled.lock().push(format!("subscription: {}", failure.error()));
            }) as ErrorHandler
        };
        let handler_level = {
            let handled = handled.clone();
            Arc::new(move |failure: &CallbackFailure| {
                handled.lock().push(format!("handler: {}", failure.error()));
            }) as ErrorHandler
        };
        let subscription = subscribe_with(&broker, "#", Some(subscription_level), ErrorPolicy::Log);
        let (after, on_after) = counter();
        subscription
            .on_handler(
                "a",
                Handler::sync(|_| Err("first".into())).with_error_handler(handler_level),
            )
            .on("a", |_| panic!("second"))
            .on("a", on_after);
        started(&broker, &subscription, 1).await;

        // When
        publish(&broker, "a", "{}").await;
        eventually(|| broker.acknowledged_count() == 1).await;

        // Then
        assert_eq!(
            *handled.lock(),
            vec![
                "handler: first".to_string(),
                "subscription: callback panicked: second".to_string(),
            ],
        );
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert!(subscription.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn sink_policy_receives_unhandled_failures() {
        // Given
        let broker = MemoryBroker::new();
        let sunk = Arc::new(AtomicUsize::new(0));
        let sink = {
            let sunk = sunk.clone();
            Arc::new(move |failure: &CallbackFailure| {
                assert_eq!(failure.routing_key(), "a");
                sunk.fetch_add(1, Ordering::SeqCst);
            }) as ErrorHandler
        };
        let subscription = subscribe_with(&broker, "#", None, ErrorPolicy::Sink(sink));
        subscription.all(|_| Err("nope".into()));
        started(&broker, &subscription, 1).await;

        // When
        publish(&broker, "a", "{}").await;
        publish(&broker, "a", "{}").await;
        eventually(|| broker.acknowledged_count() == 2).await;

        // Then
        assert_eq!(sunk.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_policy_stops_after_the_current_message() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe_with(&broker, "#", None, ErrorPolicy::Terminate);
        let (count, on_all) = counter();
        subscription.on("bad", |_| Err("nope".into())).all(on_all);
        started(&broker, &subscription, 1).await;

        // When
        publish(&broker, "bad", "{}").await;
        subscription.join().await;
        publish(&broker, "good", "{}").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Then
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(broker.acknowledged_count(), 1);
        assert!(!subscription.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_messages_are_acked_not_dispatched() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe(&broker, "#");
        let (count, on_all) = counter();
        subscription.all(on_all);
        started(&broker, &subscription, 1).await;

        // When
        publish(&broker, "a", "[1, 2, 3]").await;
        publish(&broker, "a", "{\"ok\": true}").await;
        eventually(|| broker.acknowledged_count() == 2).await;

        // Then
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe(&broker, "#");

        // When
        subscription.start();
        subscription.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Then
        assert_eq!(broker.consumer_count(), 1);
        assert!(subscription.name().starts_with("yosun:sub:amq.topic:#:"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_the_task() {
        // Given
        let broker = MemoryBroker::new();
        let subscription = subscribe(&broker, "#");
        started(&broker, &subscription, 1).await;

        // When
        drop(subscription);

        // Then
        eventually(|| broker.consumer_count() == 0).await;
    }
}
