//! Redis Streams transport
//!
//! Each `streamId` maps to one Redis stream key under a configurable prefix;
//! a firehose key additionally receives every event so that unscoped and
//! type-filtered subscriptions work without key scans. Consumption uses
//! plain `XREAD` tailing, or `XREADGROUP`/`XACK` when a consumer group is
//! configured (durable offsets, stable group id).
//!
//! Entries whose payload fails to decode are routed to the configured
//! [`DeadLetterSink`] with the stream key and entry id and never interrupt
//! the consumer loop.

use crate::bus::{EventBus, EventStream, StartPosition};
use crate::dead_letter::{DeadLetter, DeadLetterOrigin, DeadLetterSink, TracingDeadLetterSink};
use crate::error::{EventBusError, Result};
use crate::event::Event;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const FIREHOSE: &str = "__all__";

/// Configuration for [`RedisEventBus`]
#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    /// Connection URL, e.g. `redis://127.0.0.1/`
    pub url: String,
    /// Stream key prefix; the key for a stream id is `{prefix}{stream_id}`
    pub key_prefix: String,
    /// Consumer group for durable offsets; `None` reads without a group
    pub consumer_group: Option<String>,
    /// Consumer name within the group
    pub consumer_name: String,
    /// Where a fresh subscription starts
    pub start: StartPosition,
    /// XREAD block timeout in milliseconds
    pub block_ms: u64,
}

impl RedisBusConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: "agentflow:events:".to_string(),
            consumer_group: None,
            consumer_name: "agentflow-consumer".to_string(),
            start: StartPosition::default(),
            block_ms: 2_000,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_consumer_group(
        mut self,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        self.consumer_group = Some(group.into());
        self.consumer_name = consumer.into();
        self
    }

    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }
}

enum DeliveryFilter {
    All,
    Types(Vec<String>),
    MinVersion(u64),
}

impl DeliveryFilter {
    fn matches(&self, event: &Event) -> bool {
        match self {
            DeliveryFilter::All => true,
            DeliveryFilter::Types(types) => types.iter().any(|t| t == &event.event_type),
            DeliveryFilter::MinVersion(version) => event.version >= *version,
        }
    }
}

/// [`EventBus`] over Redis Streams
pub struct RedisEventBus {
    manager: ConnectionManager,
    config: RedisBusConfig,
    dead_letters: Arc<dyn DeadLetterSink>,
    closed: Arc<AtomicBool>,
}

impl RedisEventBus {
    /// Connect to Redis with the default (logging) dead-letter sink.
    pub async fn connect(config: RedisBusConfig) -> Result<Self> {
        Self::connect_with_dead_letter_sink(config, Arc::new(TracingDeadLetterSink)).await
    }

    pub async fn connect_with_dead_letter_sink(
        config: RedisBusConfig,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| EventBusError::Transport(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| EventBusError::Transport(e.to_string()))?;
        Ok(Self {
            manager,
            config,
            dead_letters,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn key_for(&self, stream_id: &str) -> String {
        format!("{}{}", self.config.key_prefix, stream_id)
    }

    async fn ensure_group(&self, key: &str) -> Result<()> {
        let Some(group) = &self.config.consumer_group else {
            return Ok(());
        };
        let start = match self.config.start {
            StartPosition::Earliest => "0",
            StartPosition::Latest => "$",
        };
        let mut conn = self.manager.clone();
        let created: std::result::Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(key)
            .arg(group)
            .arg(start)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            // BUSYGROUP means the group already exists, which is fine.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(EventBusError::Transport(e.to_string())),
        }
    }

    fn spawn_reader(&self, key: String, filter: DeliveryFilter, replay: bool) -> EventStream {
        let (tx, rx) = mpsc::channel::<Event>(1024);
        let mut conn = self.manager.clone();
        let config = self.config.clone();
        let dead_letters = self.dead_letters.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let mut last_id = match (replay, config.start) {
                (true, _) | (_, StartPosition::Earliest) => "0".to_string(),
                (_, StartPosition::Latest) => "$".to_string(),
            };
            loop {
                if closed.load(Ordering::Acquire) || tx.is_closed() {
                    break;
                }
                let reply = read_batch(&mut conn, &config, &key, &last_id).await;
                let reply = match reply {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "redis stream read failed");
                        tokio::time::sleep(std::time::Duration::from_millis(config.block_ms)).await;
                        continue;
                    }
                };
                for stream_key in reply.keys {
                    for entry in stream_key.ids {
                        last_id = entry.id.clone();
                        let raw = entry
                            .map
                            .get("event")
                            .and_then(|value| redis::from_redis_value::<Vec<u8>>(value).ok());
                        let decoded = raw.as_deref().map(serde_json::from_slice::<Event>);
                        match decoded {
                            Some(Ok(event)) => {
                                if let Some(group) = &config.consumer_group {
                                    let _: std::result::Result<i64, _> =
                                        conn.xack(&key, group, &[&entry.id]).await;
                                }
                                if filter.matches(&event) && tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            other => {
                                let reason = match other {
                                    Some(Err(e)) => e.to_string(),
                                    _ => "missing event field".to_string(),
                                };
                                dead_letters
                                    .publish(DeadLetter::new(
                                        DeadLetterOrigin {
                                            transport: "redis".to_string(),
                                            topic: key.clone(),
                                            partition: None,
                                            offset: Some(entry.id.clone()),
                                        },
                                        reason,
                                        raw.unwrap_or_default(),
                                    ))
                                    .await;
                            }
                        }
                    }
                }
            }
        });
        Box::pin(ReceiverStream::new(rx))
    }
}

async fn read_batch(
    conn: &mut ConnectionManager,
    config: &RedisBusConfig,
    key: &str,
    last_id: &str,
) -> std::result::Result<StreamReadReply, redis::RedisError> {
    match &config.consumer_group {
        Some(group) => {
            let options = StreamReadOptions::default()
                .group(group, &config.consumer_name)
                .block(config.block_ms as usize)
                .count(100);
            conn.xread_options(&[key], &[">"], &options).await
        }
        None => {
            let options = StreamReadOptions::default()
                .block(config.block_ms as usize)
                .count(100);
            conn.xread_options(&[key], &[last_id], &options).await
        }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        let payload = serde_json::to_vec(&event)?;
        let mut conn = self.manager.clone();
        let stream_key = self.key_for(&event.stream_id);
        let firehose_key = self.key_for(FIREHOSE);
        let fields = [("event", payload.as_slice())];
        let _: String = conn
            .xadd(&stream_key, "*", &fields)
            .await
            .map_err(|e| EventBusError::Publish(e.to_string()))?;
        let _: String = conn
            .xadd(&firehose_key, "*", &fields)
            .await
            .map_err(|e| EventBusError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        stream_id: Option<&str>,
        from_version: Option<u64>,
    ) -> Result<EventStream> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        let key = self.key_for(stream_id.unwrap_or(FIREHOSE));
        self.ensure_group(&key).await?;
        let filter = match from_version {
            Some(version) => DeliveryFilter::MinVersion(version),
            None => DeliveryFilter::All,
        };
        // Version replay requires reading from the beginning of the stream.
        Ok(self.spawn_reader(key, filter, from_version.is_some()))
    }

    async fn subscribe_by_type(&self, types: Vec<String>) -> Result<EventStream> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        let key = self.key_for(FIREHOSE);
        self.ensure_group(&key).await?;
        Ok(self.spawn_reader(key, DeliveryFilter::Types(types), false))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
