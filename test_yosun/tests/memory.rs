mod common;

#[cfg(test)]
mod tests {
    use crate::common::client::{eventually, make_memory_client, make_memory_client_with};
    use crate::common::recorder::Recorder;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use yosun::{
        Callback, CallbackResult, Envelope, ErrorPolicy, Handler, MemoryBroker, MessageProperties,
        SubscriptionConfig, YosunConfig,
    };

    /// Records twice the `value` of every message, after yielding once.
    #[derive(Clone, Default)]
    struct Doubler {
        results: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl Callback for Doubler {
        async fn call(&self, envelope: &Envelope) -> CallbackResult {
            tokio::task::yield_now().await;
            let value = envelope
                .get("value")
                .and_then(|value| value.as_u64())
                .ok_or("no value")?;
            self.results.lock().push(value * 2);

            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn routes_by_topic_pattern() {
        // Given
        let broker = MemoryBroker::new();
        let yosun = make_memory_client(&broker);
        let one_word = Recorder::new();
        let any_words = Recorder::new();
        yosun.subscribe("orders.*").all(one_word.callback());
        yosun.subscribe("orders.#").all(any_words.callback());
        eventually(|| broker.consumer_count() == 2).await;

        // When
        yosun.publish("orders", &json!({})).await.unwrap();
        yosun.publish("orders.eu", &json!({})).await.unwrap();
        yosun.publish("orders.eu.created", &json!({})).await.unwrap();
        yosun.publish("invoices.eu", &json!({})).await.unwrap();
        eventually(|| broker.acknowledged_count() == 4).await;

        // Then
        assert_eq!(one_word.routing_keys(), vec!["orders.eu"]);
        assert_eq!(
            any_words.routing_keys(),
            vec!["orders", "orders.eu", "orders.eu.created"],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn survives_a_broker_outage() {
        // Given
        let broker = MemoryBroker::new();
        let config = YosunConfig::default().with_subscription(SubscriptionConfig::new(
            Duration::from_secs(1),
            Duration::from_millis(100),
        ));
        let yosun = make_memory_client_with(&broker, config);
        let recorder = Recorder::new();
        yosun.subscribe("jobs.#").all(recorder.callback());
        eventually(|| broker.consumer_count() == 1).await;
        yosun.publish("jobs.before", &json!({"n": 1})).await.unwrap();
        eventually(|| recorder.len() == 1).await;

        // When
        broker.set_online(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        broker.set_online(true);
        eventually(|| broker.consumer_count() == 1).await;
        yosun.publish("jobs.after", &json!({"n": 2})).await.unwrap();
        eventually(|| recorder.len() == 2).await;

        // Then
        assert_eq!(recorder.routing_keys(), vec!["jobs.after", "jobs.before"]);
        assert!(yosun.subscription("jobs.#").unwrap().is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn request_reply_with_wait() {
        // Given
        #[derive(Debug, PartialEq, Deserialize)]
        struct Reply {
            id: u32,
            status: String,
        }
        let broker = MemoryBroker::new();
        let yosun = make_memory_client(&broker);
        let replies = yosun.subscribe("replies.#");
        let received = Recorder::new();
        replies.on("replies.job", received.callback());
        eventually(|| broker.consumer_count() == 1).await;

        // When
        let waited = replies.wait("replies.job", Some(Duration::from_secs(1)));
        yosun
            .publish_async_with(
                "replies.job",
                &json!({"id": 4, "status": "done"}),
                MessageProperties::new().with_correlation_id("job-4"),
            )
            .unwrap();

        // Then
        assert!(waited.await);
        eventually(|| received.len() == 1).await;
        let payload = received.payloads().remove(0);
        let reply: Reply = serde_json::from_value(payload.into()).unwrap();
        assert_eq!(reply, Reply { id: 4, status: "done".to_string() });
        assert!(!replies.wait("replies.job", Some(Duration::from_millis(100))).await);
    }

    #[tokio::test(start_paused = true)]
    async fn async_callbacks_and_terminate_policy() {
        // Given
        let broker = MemoryBroker::new();
        let yosun = make_memory_client(&broker).with_error_policy(ErrorPolicy::Terminate);
        let doubler = Doubler::default();
        let subscription = yosun.subscribe("numbers");
        subscription.all_handler(Handler::new(doubler.clone()));
        eventually(|| broker.consumer_count() == 1).await;

        // When
        yosun.publish("numbers", &json!({"value": 21})).await.unwrap();
        eventually(|| broker.acknowledged_count() == 1).await;
        yosun.publish("numbers", &json!({"missing": true})).await.unwrap();
        subscription.join().await;

        // Then
        assert_eq!(*doubler.results.lock(), vec![42]);
        assert_eq!(broker.acknowledged_count(), 2);
        assert!(!subscription.is_alive());
        assert_eq!(broker.consumer_count(), 0);
    }
}
