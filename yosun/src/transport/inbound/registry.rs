use crate::Handler;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use yosun_sync::Pulse;

/// Handlers of one subscription, keyed by exact routing key, plus the
/// match-all handlers. Registration order is preserved within each list.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    keyed: RwLock<HashMap<String, Vec<Arc<Handler>>>>,
    all: RwLock<Vec<Arc<Handler>>>,
}

/// One-shot notifications of one subscription, keyed by exact routing key,
/// plus the notification for any message.
#[derive(Default)]
pub(crate) struct EventRegistry {
    keyed: RwLock<HashMap<String, Pulse>>,
    any: Pulse,
}

impl CallbackRegistry {
    pub(crate) fn on(&self, routing_key: String, handler: Handler) {
        self.keyed
            .write()
            .entry(routing_key)
            .or_default()
            .push(Arc::new(handler));
    }

    pub(crate) fn all(&self, handler: Handler) {
        self.all.write().push(Arc::new(handler));
    }

    /// Lists the handlers due for a message: those registered for exactly this
    /// routing key, then the match-all ones.
    pub(crate) fn snapshot(&self, routing_key: &str) -> Vec<Arc<Handler>> {
        let mut handlers = self
            .keyed
            .read()
            .get(routing_key)
            .cloned()
            .unwrap_or_default();

        handlers.extend(self.all.read().iter().cloned());

        handlers
    }
}

impl EventRegistry {
    /// Starts listening right away for the next message under exactly this
    /// routing key. The returned future resolves to `false` on timeout.
    pub(crate) fn listen(
        &self,
        routing_key: String,
        timeout: Option<Duration>,
    ) -> impl Future<Output = bool> + Send + use<> {
        let beat = self.keyed.write().entry(routing_key).or_default().listen();

        beat.within(timeout)
    }

    /// Starts listening right away for the next message of any routing key.
    pub(crate) fn listen_any(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = bool> + Send + use<> {
        self.any.listen().within(timeout)
    }

    /// Wakes everyone listening for this routing key, then everyone listening
    /// for any message.
    pub(crate) fn signal(&self, routing_key: &str) {
        if let Some(pulse) = self.keyed.read().get(routing_key) {
            pulse.emit();
        }

        self.any.emit();
    }
}
