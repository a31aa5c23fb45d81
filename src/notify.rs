//! In-process pub-sub for long-polling endpoints (spec §4.2, §9 "Coroutine control
//! flow"). A single broadcast channel carries `(topic, row_id)` events; subscribers
//! filter client-side by topic, matching the typed-channel-keyed-by-(topic,predicate)
//! design note.

use std::time::Duration;

use tokio::sync::broadcast;

/// Capacity chosen so a burst of commits between a subscriber's poll iterations
/// doesn't force it to miss events (broadcast drops the oldest entry once full,
/// surfaced to the subscriber as `RecvError::Lagged`, which callers treat as "wake
/// up and re-check current state" rather than a fatal error).
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub row_id: i64,
}

#[derive(Clone)]
pub struct NotifyBus {
    sender: broadcast::Sender<Event>,
}

impl NotifyBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishes an event; called after a `Store::serializable` transaction commits.
    pub fn publish(&self, topic: impl Into<String>, row_id: i64) {
        let _ = self.sender.send(Event {
            topic: topic.into(),
            row_id,
        });
    }

    /// Waits up to `timeout` for an event on `topic` satisfying `predicate`. Returns
    /// `None` on timeout or if the channel closed; cancellation-safe since it's
    /// driven entirely by `tokio::select!` at the call site.
    pub async fn wait_for(
        &self,
        topic: &str,
        timeout: Duration,
        mut predicate: impl FnMut(i64) -> bool,
    ) -> Option<Event> {
        let mut receiver = self.sender.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }

            match tokio::time::timeout(remaining, receiver.recv()).await {
                Ok(Ok(event)) => {
                    if event.topic == topic && predicate(event.row_id) {
                        return Some(event);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_elapsed) => return None,
            }
        }
    }
}

impl Default for NotifyBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_returns_on_matching_publish() {
        let bus = NotifyBus::new();
        let waiter_bus = bus.clone();

        let waiter = tokio::spawn(async move {
            waiter_bus
                .wait_for("acct:1", Duration::from_millis(500), |row_id| row_id > 10)
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish("acct:1", 11);

        let event = waiter.await.unwrap();
        assert_eq!(event.unwrap().row_id, 11);
    }

    #[tokio::test]
    async fn wait_for_times_out_without_publish() {
        let bus = NotifyBus::new();
        let result = bus
            .wait_for("acct:1", Duration::from_millis(50), |_| true)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn wait_for_ignores_other_topics() {
        let bus = NotifyBus::new();
        let waiter_bus = bus.clone();

        let waiter = tokio::spawn(async move {
            waiter_bus
                .wait_for("acct:1", Duration::from_millis(200), |_| true)
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish("acct:2", 1);
        bus.publish("acct:1", 2);

        let event = waiter.await.unwrap();
        assert_eq!(event.unwrap().row_id, 2);
    }
}
