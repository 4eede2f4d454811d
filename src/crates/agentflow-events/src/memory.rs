//! Single-process event bus
//!
//! [`InMemoryEventBus`] fans published events out to every live subscriber.
//! It retains a log per process so subscriptions can replay a stream from a
//! given version before tailing live events.
//!
//! Backpressure is governed by [`BufferPolicy`]: `DropOldest` (the default)
//! evicts the oldest buffered event of a slow subscriber and counts the
//! drop; `Block` makes `publish` wait for space, which throttles the run
//! naturally. Publishes are serialized internally, which is what gives each
//! subscriber publish-order delivery per stream.

use crate::bus::{EventBus, EventStream};
use crate::error::{EventBusError, Result};
use crate::event::Event;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// What a slow subscriber does to the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferPolicy {
    /// Evict the subscriber's oldest buffered event and count the drop
    #[default]
    DropOldest,
    /// Make `publish` wait until the subscriber has space
    Block,
}

enum SubscriberFilter {
    All,
    Stream(String),
    Types(Vec<String>),
}

impl SubscriberFilter {
    fn matches(&self, event: &Event) -> bool {
        match self {
            SubscriberFilter::All => true,
            SubscriberFilter::Stream(stream_id) => &event.stream_id == stream_id,
            SubscriberFilter::Types(types) => types.iter().any(|t| t == &event.event_type),
        }
    }
}

struct Subscriber {
    filter: SubscriberFilter,
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    policy: BufferPolicy,
    ready: Notify,
    space: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Subscriber {
    fn new(filter: SubscriberFilter, capacity: usize, policy: BufferPolicy) -> Self {
        Self {
            filter,
            queue: Mutex::new(VecDeque::new()),
            capacity,
            policy,
            ready: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn preload(&self, events: impl IntoIterator<Item = Event>) {
        let mut queue = self.queue.lock().unwrap();
        queue.extend(events);
    }

    async fn push(&self, event: Event) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            let wait_for_space = {
                let mut queue = self.queue.lock().unwrap();
                if queue.len() < self.capacity {
                    queue.push_back(event.clone());
                    false
                } else {
                    match self.policy {
                        BufferPolicy::DropOldest => {
                            queue.pop_front();
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            queue.push_back(event.clone());
                            false
                        }
                        BufferPolicy::Block => true,
                    }
                }
            };
            if !wait_for_space {
                self.ready.notify_one();
                return;
            }
            self.space.notified().await;
        }
    }

    fn pop(&self) -> Option<Event> {
        self.queue.lock().unwrap().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_waiters();
        self.space.notify_waiters();
    }
}

struct BusState {
    log: Vec<Event>,
    subscribers: Vec<Arc<Subscriber>>,
}

/// In-process [`EventBus`] with replayable log and bounded subscriber buffers
pub struct InMemoryEventBus {
    state: tokio::sync::Mutex<BusState>,
    capacity: usize,
    policy: BufferPolicy,
    closed: AtomicBool,
    dropped_total: AtomicU64,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(BusState {
                log: Vec::new(),
                subscribers: Vec::new(),
            }),
            capacity: 1024,
            policy: BufferPolicy::default(),
            closed: AtomicBool::new(false),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Per-subscriber buffer capacity; default 1024.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_buffer_policy(mut self, policy: BufferPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Total events dropped across all subscribers under `DropOldest`.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Number of events retained for replay.
    pub async fn retained(&self) -> usize {
        self.state.lock().await.log.len()
    }

    async fn register(&self, filter: SubscriberFilter, replay: Option<(Option<String>, u64)>) -> Result<EventStream> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        let subscriber = Arc::new(Subscriber::new(filter, self.capacity, self.policy));
        {
            let mut state = self.state.lock().await;
            if let Some((stream_id, from_version)) = replay {
                let events = state.log.iter().filter(|event| {
                    event.version >= from_version
                        && stream_id
                            .as_deref()
                            .map(|id| event.stream_id == id)
                            .unwrap_or(true)
                });
                subscriber.preload(events.cloned());
            }
            state.subscribers.push(subscriber.clone());
        }

        let stream = async_stream::stream! {
            loop {
                let notified = subscriber.ready.notified();
                if let Some(event) = subscriber.pop() {
                    subscriber.space.notify_one();
                    yield event;
                    continue;
                }
                if subscriber.closed.load(Ordering::Acquire) {
                    break;
                }
                notified.await;
            }
        };
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        // The state lock is held across fan-out so concurrent publishers
        // cannot interleave deliveries within a stream.
        let state = self.state.lock().await;
        for subscriber in state.subscribers.iter() {
            if subscriber.filter.matches(&event) {
                let before = subscriber.dropped.load(Ordering::Relaxed);
                subscriber.push(event.clone()).await;
                let dropped = subscriber.dropped.load(Ordering::Relaxed) - before;
                if dropped > 0 {
                    self.dropped_total.fetch_add(dropped, Ordering::Relaxed);
                    tracing::warn!(
                        stream_id = %event.stream_id,
                        dropped,
                        "subscriber buffer full, dropped oldest event"
                    );
                }
            }
        }
        let mut state = state;
        state.log.push(event);
        Ok(())
    }

    async fn subscribe(
        &self,
        stream_id: Option<&str>,
        from_version: Option<u64>,
    ) -> Result<EventStream> {
        let filter = match stream_id {
            Some(id) => SubscriberFilter::Stream(id.to_string()),
            None => SubscriberFilter::All,
        };
        let replay = from_version.map(|v| (stream_id.map(str::to_string), v));
        self.register(filter, replay).await
    }

    async fn subscribe_by_type(&self, types: Vec<String>) -> Result<EventStream> {
        self.register(SubscriberFilter::Types(types), None).await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let state = self.state.lock().await;
        for subscriber in state.subscribers.iter() {
            subscriber.close();
        }
        Ok(())
    }
}
