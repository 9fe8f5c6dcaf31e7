use parking_lot::Mutex;
use std::sync::Arc;
use yosun::{CallbackResult, Envelope, Payload};

/// Collects the routing keys and payloads of every message it sees.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(String, Payload)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a callback that records into this recorder.
    pub fn callback(&self) -> impl Fn(&Envelope) -> CallbackResult + Send + Sync + 'static {
        let seen = self.seen.clone();

        move |envelope: &Envelope| -> CallbackResult {
            seen.lock().push((
                envelope.routing_key().to_string(),
                envelope.payload().clone(),
            ));
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn routing_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.seen.lock().iter().map(|(k, _)| k.clone()).collect();
        keys.sort();

        keys
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.seen.lock().iter().map(|(_, p)| p.clone()).collect()
    }
}
