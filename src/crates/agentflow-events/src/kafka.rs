//! Kafka transport
//!
//! Events are sharded into one topic per event class (`{prefix}.graph`,
//! `{prefix}.node`, `{prefix}.hitl`, `{prefix}.checkpoint`, `{prefix}.custom`)
//! with the `streamId` as partition key, so all events of one run land on
//! one partition and keep their order. Consumers join a stable group id and
//! start from the configured offset (`latest`/`earliest`) when the group has
//! no committed position.
//!
//! Messages whose payload fails to decode are routed to the configured
//! [`DeadLetterSink`] with topic/partition/offset coordinates and never
//! interrupt the consumer loop.

use crate::bus::{EventBus, EventStream, StartPosition};
use crate::dead_letter::{DeadLetter, DeadLetterOrigin, DeadLetterSink, TracingDeadLetterSink};
use crate::error::{EventBusError, Result};
use crate::event::{event_class, Event};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_stream::wrappers::ReceiverStream;

const EVENT_CLASSES: &[&str] = &["graph", "node", "hitl", "checkpoint", "custom"];

/// Configuration for [`KafkaEventBus`]
#[derive(Debug, Clone)]
pub struct KafkaBusConfig {
    /// Comma-separated broker list, e.g. `localhost:9092`
    pub brokers: String,
    /// Stable consumer group id
    pub group_id: String,
    /// Topic prefix; topics are `{prefix}.{event_class}`
    pub topic_prefix: String,
    /// Offset to start from when the group has no committed position
    pub start: StartPosition,
}

impl KafkaBusConfig {
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            topic_prefix: "agentflow.events".to_string(),
            start: StartPosition::default(),
        }
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    fn topic_for(&self, event_type: &str) -> String {
        let class = event_class(event_type);
        let class = if EVENT_CLASSES.contains(&class.as_str()) {
            class
        } else {
            "custom".to_string()
        };
        format!("{}.{}", self.topic_prefix, class)
    }

    fn all_topics(&self) -> Vec<String> {
        EVENT_CLASSES
            .iter()
            .map(|class| format!("{}.{}", self.topic_prefix, class))
            .collect()
    }
}

enum DeliveryFilter {
    All,
    Stream { stream_id: String, min_version: Option<u64> },
    Types(Vec<String>),
}

impl DeliveryFilter {
    fn matches(&self, event: &Event) -> bool {
        match self {
            DeliveryFilter::All => true,
            DeliveryFilter::Stream { stream_id, min_version } => {
                &event.stream_id == stream_id
                    && min_version.map(|v| event.version >= v).unwrap_or(true)
            }
            DeliveryFilter::Types(types) => types.iter().any(|t| t == &event.event_type),
        }
    }
}

/// [`EventBus`] over Kafka
pub struct KafkaEventBus {
    producer: FutureProducer,
    config: KafkaBusConfig,
    dead_letters: Arc<dyn DeadLetterSink>,
    shutdown: Arc<Notify>,
    closed: std::sync::atomic::AtomicBool,
}

impl KafkaEventBus {
    /// Connect with the default (logging) dead-letter sink.
    pub fn connect(config: KafkaBusConfig) -> Result<Self> {
        Self::connect_with_dead_letter_sink(config, Arc::new(TracingDeadLetterSink))
    }

    pub fn connect_with_dead_letter_sink(
        config: KafkaBusConfig,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| EventBusError::Transport(e.to_string()))?;
        Ok(Self {
            producer,
            config,
            dead_letters,
            shutdown: Arc::new(Notify::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Acquire)
    }

    fn build_consumer(&self) -> Result<StreamConsumer> {
        let offset_reset = match self.config.start {
            StartPosition::Earliest => "earliest",
            StartPosition::Latest => "latest",
        };
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", offset_reset)
            .create()
            .map_err(|e| EventBusError::Transport(e.to_string()))?;
        let topics = self.config.all_topics();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| EventBusError::Subscribe(e.to_string()))?;
        Ok(consumer)
    }

    fn spawn_consumer(&self, filter: DeliveryFilter) -> Result<EventStream> {
        let consumer = self.build_consumer()?;
        let (tx, rx) = mpsc::channel::<Event>(1024);
        let dead_letters = self.dead_letters.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown.notified() => break,
                    message = consumer.recv() => message,
                };
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "kafka receive failed");
                        continue;
                    }
                };
                let raw = message.payload().unwrap_or_default().to_vec();
                match serde_json::from_slice::<Event>(&raw) {
                    Ok(event) => {
                        if filter.matches(&event) && tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        dead_letters
                            .publish(DeadLetter::new(
                                DeadLetterOrigin {
                                    transport: "kafka".to_string(),
                                    topic: message.topic().to_string(),
                                    partition: Some(message.partition()),
                                    offset: Some(message.offset().to_string()),
                                },
                                e.to_string(),
                                raw,
                            ))
                            .await;
                    }
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        if self.is_closed() {
            return Err(EventBusError::Closed);
        }
        let topic = self.config.topic_for(&event.event_type);
        let payload = serde_json::to_vec(&event)?;
        let record = FutureRecord::to(&topic)
            .key(&event.stream_id)
            .payload(&payload);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| EventBusError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        stream_id: Option<&str>,
        from_version: Option<u64>,
    ) -> Result<EventStream> {
        if self.is_closed() {
            return Err(EventBusError::Closed);
        }
        let filter = match stream_id {
            Some(id) => DeliveryFilter::Stream {
                stream_id: id.to_string(),
                min_version: from_version,
            },
            None => DeliveryFilter::All,
        };
        self.spawn_consumer(filter)
    }

    async fn subscribe_by_type(&self, types: Vec<String>) -> Result<EventStream> {
        if self.is_closed() {
            return Err(EventBusError::Closed);
        }
        self.spawn_consumer(DeliveryFilter::Types(types))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        self.shutdown.notify_waiters();
        Ok(())
    }
}
