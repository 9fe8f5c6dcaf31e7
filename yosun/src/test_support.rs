use crate::broker::{Acker, Delivery};
use crate::{AckError, MessageProperties};
use async_trait::async_trait;
use std::time::Duration;

/// Acknowledges anything, any number of times.
pub(crate) struct NoopAcker;

#[async_trait]
impl Acker for NoopAcker {
    async fn ack(&self) -> Result<(), AckError> {
        Ok(())
    }
}

/// Builds a raw delivery with the given routing key and body.
pub(crate) fn delivery(routing_key: &str, bytes: &[u8]) -> Delivery {
    Delivery {
        delivery_tag: 1,
        exchange: "amq.topic".to_string(),
        routing_key: routing_key.to_string(),
        redelivered: false,
        properties: MessageProperties::new(),
        bytes: bytes.to_vec(),
        acker: Box::new(NoopAcker),
    }
}

/// Polls the condition every millisecond of (usually paused) time until it
/// holds, giving up after a minute.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..60_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    panic!("condition not met within a minute");
}
