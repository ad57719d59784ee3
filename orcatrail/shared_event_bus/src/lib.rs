#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]

//! Typed, one-directional publish/subscribe channels.
//!
//! A [`Channel`] is named by the `(producer, consumer)` pair it connects.
//! Sending stamps the payload into an [`Envelope`] and hands it to every
//! subscriber registered at that moment, in registration order. Late
//! subscribers never see earlier messages. A failing or panicking handler is
//! logged and skipped; the remaining subscribers still receive the message.

use std::{
    collections::VecDeque,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::{LogLevel, LogRecord, LogSink};
use uuid::Uuid;

/// Producer name used by broadcast channels.
pub const BROADCAST: &str = "*";

/// `(producer, consumer)` pair identifying a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelName {
    /// Component publishing on the channel.
    pub producer: String,
    /// Component consuming from the channel.
    pub consumer: String,
}

impl ChannelName {
    /// Creates a point-to-point name.
    #[must_use]
    pub fn new(producer: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            consumer: consumer.into(),
        }
    }

    /// Creates a broadcast name `(*, consumer)`.
    #[must_use]
    pub fn broadcast(consumer: impl Into<String>) -> Self {
        Self::new(BROADCAST, consumer)
    }

    /// Whether any component may publish on this channel.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.producer == BROADCAST
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.producer, self.consumer)
    }
}

/// Message as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Unique message id.
    pub id: Uuid,
    /// Channel the message travelled on.
    pub channel: ChannelName,
    /// Send timestamp.
    pub sent_at: DateTime<Utc>,
    /// Typed payload.
    pub payload: T,
}

/// Handle returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Outcome of a single [`Channel::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Id of the envelope that was sent.
    pub message_id: Uuid,
    /// Subscribers that handled the message.
    pub delivered: usize,
    /// Subscribers whose handler failed or panicked.
    pub failed: usize,
}

type Handler<T> = Arc<dyn Fn(&Envelope<T>) -> Result<()> + Send + Sync>;

struct Subscriber<T> {
    id: SubscriptionId,
    handler: Handler<T>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct ChannelInner<T> {
    name: ChannelName,
    capacity: usize,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber<T>>>,
    backlog: Mutex<VecDeque<Envelope<T>>>,
    sink: Option<Arc<dyn LogSink>>,
}

/// Typed in-process channel. Clones share the same subscribers and backlog.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("subscribers", &self.inner.subscribers.read().len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Channel<T> {
    /// Creates a channel retaining at most `capacity` sent envelopes for inspection.
    #[must_use]
    pub fn new(name: ChannelName, capacity: usize) -> Self {
        Self::with_sink(name, capacity, None)
    }

    /// Creates a channel that reports handler failures to `sink`.
    #[must_use]
    pub fn with_sink(name: ChannelName, capacity: usize, sink: Option<Arc<dyn LogSink>>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(ChannelInner {
                name,
                capacity,
                next_id: AtomicU64::new(1),
                subscribers: RwLock::new(Vec::new()),
                backlog: Mutex::new(VecDeque::with_capacity(capacity)),
                sink,
            }),
        }
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &ChannelName {
        &self.inner.name
    }

    /// Registers a handler for every subsequent message.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope<T>) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Stamps and delivers `payload` to the current subscribers.
    pub fn send(&self, payload: T) -> DeliveryReport {
        let envelope = Envelope {
            id: Uuid::new_v4(),
            channel: self.inner.name.clone(),
            sent_at: Utc::now(),
            payload,
        };
        {
            let mut backlog = self.inner.backlog.lock();
            if backlog.len() == self.inner.capacity {
                backlog.pop_front();
            }
            backlog.push_back(envelope.clone());
        }
        // Handlers may subscribe or send again, so never hold the lock while dispatching.
        let subscribers = self.inner.subscribers.read().clone();
        let mut report = DeliveryReport {
            message_id: envelope.id,
            delivered: 0,
            failed: 0,
        };
        for subscriber in subscribers {
            match catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(&envelope))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    self.report_failure(subscriber.id, &envelope, &err.to_string());
                }
                Err(_) => {
                    report.failed += 1;
                    self.report_failure(subscriber.id, &envelope, "handler panicked");
                }
            }
        }
        report
    }

    /// Snapshot of recently sent envelopes, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Envelope<T>> {
        self.inner.backlog.lock().iter().cloned().collect()
    }

    fn report_failure(&self, id: SubscriptionId, envelope: &Envelope<T>, reason: &str) {
        if let Some(sink) = &self.inner.sink {
            let record = LogRecord::new("event-bus", LogLevel::Warn, "channel.handler.failed")
                .with_metadata(json!({
                    "channel": self.inner.name.to_string(),
                    "subscription": id.0,
                    "message_id": envelope.id,
                    "error": reason,
                }));
            let _ = sink.write(&record);
        }
    }
}

/// Creates channels sharing one backlog size and failure sink.
#[derive(Clone, Default)]
pub struct ChannelFactory {
    capacity: usize,
    sink: Option<Arc<dyn LogSink>>,
}

impl fmt::Debug for ChannelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelFactory")
            .field("capacity", &self.capacity)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl ChannelFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sink: None,
        }
    }

    /// Routes handler failures of every created channel to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Creates a point-to-point channel.
    #[must_use]
    pub fn channel<T: Clone + Send + Sync + 'static>(
        &self,
        producer: &str,
        consumer: &str,
    ) -> Channel<T> {
        Channel::with_sink(
            ChannelName::new(producer, consumer),
            self.capacity,
            self.sink.clone(),
        )
    }

    /// Creates a broadcast channel `(*, consumer)`.
    #[must_use]
    pub fn broadcast<T: Clone + Send + Sync + 'static>(&self, consumer: &str) -> Channel<T> {
        self.channel(BROADCAST, consumer)
    }
}
