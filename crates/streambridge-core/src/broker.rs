//! Topic-keyed fan-out of events to bounded sinks.
//!
//! A [`Broker`] maps topic names to the set of sinks registered for them.
//! Publishing never blocks: each sink gets a `try_send`, and a sink whose
//! queue is full simply misses that event. The drop is logged, the
//! publisher is never told.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

type TopicTable<T> = HashMap<String, Vec<mpsc::Sender<T>>>;

/// In-process publish/subscribe register.
///
/// Cloning is cheap and every clone shares the same topic table.
pub struct Broker<T> {
    topics: Arc<RwLock<TopicTable<T>>>,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            topics: Arc::clone(&self.topics),
        }
    }
}

impl<T> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Broker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("topics", &self.read().len())
            .finish()
    }
}

impl<T> Broker<T> {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TopicTable<T>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TopicTable<T>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `sink` under `topic`.
    ///
    /// Adding a sink that is already registered for the topic leaves the
    /// table unchanged but still returns a usable handle.
    pub fn add_sink(&self, topic: impl Into<String>, sink: mpsc::Sender<T>) -> SinkHandle<T> {
        let topic = topic.into();
        {
            let mut table = self.write();
            let is_new_topic = !table.contains_key(&topic);
            let sinks = table.entry(topic.clone()).or_default();
            if !sinks.iter().any(|s| s.same_channel(&sink)) {
                sinks.push(sink.clone());
            }
            if is_new_topic {
                info!(topic = %topic, "new topic");
            }
            debug!(topic = %topic, sinks = sinks.len(), "added sink");
        }

        SinkHandle {
            broker: self.clone(),
            topic,
            sink: Some(sink),
        }
    }

    /// Unregisters the sink behind `handle`.
    pub fn remove_sink(&self, handle: SinkHandle<T>) {
        handle.remove();
    }

    fn remove_channel(&self, topic: &str, sink: &mpsc::Sender<T>) -> bool {
        let mut table = self.write();
        let Some(sinks) = table.get_mut(topic) else {
            return false;
        };
        let before = sinks.len();
        sinks.retain(|s| !s.same_channel(sink));
        let removed = sinks.len() != before;
        if sinks.is_empty() {
            table.remove(topic);
        }
        removed
    }

    /// Names of all topics that currently have at least one sink.
    pub fn topics(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Number of sinks registered for `topic`.
    pub fn sink_count(&self, topic: &str) -> usize {
        self.read().get(topic).map_or(0, Vec::len)
    }
}

impl<T: Clone> Broker<T> {
    /// Offers `payload` to every sink registered under `topic`.
    ///
    /// Returns how many sinks accepted it. Unknown topics are a no-op.
    pub fn publish(&self, topic: &str, payload: T) -> usize {
        // Snapshot the sink list so no lock is held while sending.
        let sinks = match self.read().get(topic) {
            Some(sinks) => sinks.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for sink in &sinks {
            match sink.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(topic = %topic, "event dropped, sink queue full");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(topic = %topic, "event dropped, sink closed");
                }
            }
        }
        delivered
    }
}

/// Registration of one sink under one topic.
///
/// The sink is unregistered when the handle is removed or dropped,
/// whichever comes first.
pub struct SinkHandle<T> {
    broker: Broker<T>,
    topic: String,
    sink: Option<mpsc::Sender<T>>,
}

impl<T> SinkHandle<T> {
    /// The topic this handle is registered under.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Unregisters the sink.
    pub fn remove(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(sink) = self.sink.take()
            && self.broker.remove_channel(&self.topic, &sink)
        {
            debug!(topic = %self.topic, "removed sink");
        }
    }
}

impl<T> Drop for SinkHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_sink_once() {
        let broker = Broker::new();
        let mut receivers = Vec::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = mpsc::channel(8);
            handles.push(broker.add_sink("events", tx));
            receivers.push(rx);
        }

        assert_eq!(broker.publish("events", 7u32), 4);

        for rx in &mut receivers {
            assert_eq!(rx.recv().await, Some(7));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn publish_to_unknown_topic_is_noop() {
        let broker: Broker<u32> = Broker::new();
        assert_eq!(broker.publish("nobody", 1), 0);
        assert!(broker.topics().is_empty());
    }

    #[test]
    fn add_sink_is_idempotent() {
        let broker = Broker::new();
        let (tx, mut rx) = mpsc::channel(8);
        let first = broker.add_sink("events", tx.clone());
        let second = broker.add_sink("events", tx);
        assert_eq!(broker.sink_count("events"), 1);

        assert_eq!(broker.publish("events", 1u8), 1);
        assert_eq!(rx.try_recv().ok(), Some(1));
        assert!(rx.try_recv().is_err());

        assert_eq!(second.topic(), "events");
        second.remove();
        assert_eq!(broker.sink_count("events"), 0);
        drop(first);
        assert_eq!(broker.sink_count("events"), 0);
    }

    #[test]
    fn full_sink_is_skipped_without_affecting_others() {
        let broker = Broker::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let _slow = broker.add_sink("events", slow_tx);
        let _fast = broker.add_sink("events", fast_tx);

        assert_eq!(broker.publish("events", 1u8), 2);
        assert_eq!(broker.publish("events", 2u8), 1);

        assert_eq!(slow_rx.try_recv().ok(), Some(1));
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.try_recv().ok(), Some(1));
        assert_eq!(fast_rx.try_recv().ok(), Some(2));
    }

    #[test]
    fn dropping_handle_unregisters() {
        let broker = Broker::new();
        let (tx, _rx) = mpsc::channel::<u8>(1);
        let handle = broker.add_sink("events", tx);
        assert_eq!(broker.topics(), vec!["events".to_string()]);
        drop(handle);
        assert!(broker.topics().is_empty());
    }

    #[test]
    fn closed_sink_does_not_count_as_delivered() {
        let broker = Broker::new();
        let (tx, rx) = mpsc::channel::<u8>(1);
        let _handle = broker.add_sink("events", tx);
        drop(rx);
        assert_eq!(broker.publish("events", 1), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_and_publish() {
        let broker: Broker<u64> = Broker::new();
        let publisher = {
            let broker = broker.clone();
            tokio::spawn(async move {
                for i in 0..1_000 {
                    broker.publish("events", i);
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut handles = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..50 {
            let (tx, rx) = mpsc::channel(2_000);
            handles.push(broker.add_sink("events", tx));
            receivers.push(rx);
            tokio::task::yield_now().await;
        }
        publisher.await.unwrap();

        assert_eq!(broker.sink_count("events"), 50);
        for mut rx in receivers {
            let mut last = None;
            while let Ok(v) = rx.try_recv() {
                if let Some(prev) = last {
                    assert!(v > prev, "events must arrive in publish order");
                }
                last = Some(v);
            }
        }
    }
}
