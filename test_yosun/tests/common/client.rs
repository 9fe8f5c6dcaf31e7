use crate::common::handle::make_rabbitmq_handle;
use crate::common::names::unique_prefix;
use std::sync::Arc;
use std::time::Duration;
use yosun::{MemoryBroker, SubscriptionConfig, Yosun, YosunConfig};

/// How long system tests wait for a message before giving up.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates a client talking to the live test broker, with a key prefix unique
/// to the calling test.
pub fn make_live_client(test_path: &str) -> Yosun {
    let config = YosunConfig::default()
        .with_connection(make_rabbitmq_handle())
        .with_key_prefix(unique_prefix(test_path))
        .with_subscription(SubscriptionConfig::new(
            Duration::from_millis(200),
            Duration::from_millis(50),
        ));

    Yosun::new(config).unwrap()
}

/// Creates a client on top of the given in-memory broker.
pub fn make_memory_client(broker: &MemoryBroker) -> Yosun {
    make_memory_client_with(broker, YosunConfig::default())
}

/// Same as [`make_memory_client`], with the given configuration.
pub fn make_memory_client_with(broker: &MemoryBroker, config: YosunConfig) -> Yosun {
    Yosun::with_broker(config, Arc::new(broker.clone())).unwrap()
}

/// Waits (in paused time) until the condition holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..60_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    panic!("condition not met within a minute");
}
