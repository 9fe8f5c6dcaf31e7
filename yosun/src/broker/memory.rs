use crate::broker::{Acker, Broker, Consumer, Delivery};
use crate::transport::outbound::dispatch::Dispatch;
use crate::{AckError, BrokerError, Exchange, topic_matches};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// An in-process topic broker.
///
/// Every consumer gets its own exclusive queue, deleted as soon as the consumer
/// goes away. Published messages are copied into every queue whose binding key
/// [matches](topic_matches) the routing key on the same exchange.
///
/// Faults are injected on demand:
///
/// - [`disconnect`](MemoryBroker::disconnect) simulates a broker restart:
///   every consumer stream fails, every queue is dropped, and every delivery
///   tag handed out so far expires.
/// - [`set_online`](MemoryBroker::set_online) refuses new consumers and
///   publishes while offline.
/// - [`fail_next_publishes`](MemoryBroker::fail_next_publishes) fails the
///   given number of upcoming publishing attempts.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: SyncMutex<State>,
    acknowledged: AtomicUsize,
}

struct State {
    online: bool,
    closed: bool,
    generation: u64,
    queues: Vec<Queue>,
    next_queue_id: u64,
    next_delivery_tag: u64,
    failing_publishes: usize,
    published: usize,
}

struct Queue {
    id: u64,
    exchange: String,
    binding_key: String,
    sender: mpsc::UnboundedSender<Result<Delivery, BrokerError>>,
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    queue_id: u64,
    receiver: mpsc::UnboundedReceiver<Result<Delivery, BrokerError>>,
}

struct MemoryAcker {
    inner: Arc<Inner>,
    generation: u64,
    acked: AtomicBool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            online: true,
            closed: false,
            generation: 0,
            queues: Vec::new(),
            next_queue_id: 0,
            next_delivery_tag: 1,
            failing_publishes: 0,
            published: 0,
        }
    }
}

impl MemoryBroker {
    /// Creates an online broker with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a broker restart.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();

        state.disconnect();
    }

    /// Brings the broker up or down. Going down also
    /// [disconnects](MemoryBroker::disconnect) every consumer.
    pub fn set_online(&self, online: bool) {
        let mut state = self.inner.state.lock();

        if state.online && !online {
            state.disconnect();
        }
        state.online = online;
    }

    /// Makes the next `count` publishing attempts fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner.state.lock().failing_publishes = count;
    }

    /// Reports how many consumers (and thus queues) are currently attached.
    pub fn consumer_count(&self) -> usize {
        self.inner.state.lock().queues.len()
    }

    /// Reports how many deliveries were acknowledged successfully.
    pub fn acknowledged_count(&self) -> usize {
        self.inner.acknowledged.load(Ordering::Relaxed)
    }

    /// Reports how many messages were accepted for publishing.
    pub fn published_count(&self) -> usize {
        self.inner.state.lock().published
    }
}

impl State {
    fn disconnect(&mut self) {
        self.generation += 1;

        for queue in self.queues.drain(..) {
            let _ = queue.sender.send(Err(BrokerError::ConnectionLost(
                "the broker went away".to_string(),
            )));
        }
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }

        if !self.online {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn consume(
        &self,
        exchange: &Exchange,
        binding_key: &str,
        _consumer_tag: &str,
    ) -> Result<Box<dyn Consumer>, BrokerError> {
        let mut state = self.inner.state.lock();
        state.ensure_available()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = state.next_queue_id;
        state.next_queue_id += 1;
        state.queues.push(Queue {
            id,
            exchange: exchange.name().to_string(),
            binding_key: binding_key.to_string(),
            sender,
        });

        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            queue_id: id,
            receiver,
        }))
    }

    async fn publish(&self, exchange: &Exchange, dispatch: &Dispatch) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock();
        state.ensure_available()?;

        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;

            return Err(BrokerError::Publish("injected failure".to_string()));
        }

        let generation = state.generation;
        let mut next_tag = state.next_delivery_tag;

        for queue in state.queues.iter().filter(|queue| {
            queue.exchange == exchange.name()
                && topic_matches(&queue.binding_key, dispatch.routing_key())
        }) {
            let delivery = Delivery {
                delivery_tag: next_tag,
                exchange: queue.exchange.clone(),
                routing_key: dispatch.routing_key().to_string(),
                redelivered: false,
                properties: dispatch.properties().clone(),
                bytes: dispatch.bytes().to_vec(),
                acker: Box::new(MemoryAcker {
                    inner: self.inner.clone(),
                    generation,
                    acked: AtomicBool::new(false),
                }),
            };
            next_tag += 1;

            if queue.sender.send(Ok(delivery)).is_err() {
                debug!(
                    binding_key = queue.binding_key.as_str(),
                    "Dropped a message for a queue without a consumer",
                );
            }
        }

        state.next_delivery_tag = next_tag;
        state.published += 1;

        Ok(())
    }

    async fn close(&self) {
        let mut state = self.inner.state.lock();

        state.closed = true;
        state.disconnect();
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>> {
        self.receiver.recv().await
    }

    async fn close(self: Box<Self>) {}
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let id = self.queue_id;

        self.inner.state.lock().queues.retain(|queue| queue.id != id);
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<(), AckError> {
        if self.acked.swap(true, Ordering::AcqRel) {
            return Err(AckError::InvalidState);
        }

        if self.inner.state.lock().generation != self.generation {
            return Err(AckError::InvalidState);
        }

        self.inner.acknowledged.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}
