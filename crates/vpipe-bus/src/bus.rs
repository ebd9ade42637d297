//! Work and event queues over Redis Streams.

use futures_util::Stream;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::Serialize;
use std::pin::Pin;
use tracing::{debug, info, warn};

use vpipe_models::{JobId, TaskPgs, TaskPgsResponse};

use crate::error::{BusError, BusResult};

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying `TaskEncode` payloads to workers
    pub encode_stream: String,
    /// Consumer group workers read the encode stream with
    pub encode_group: String,
    /// Stream carrying `TaskEvent` payloads back to the coordinator
    pub events_stream: String,
    /// Consumer group the coordinator reads events with
    pub events_group: String,
    /// Stream carrying `TaskPgs` OCR requests
    pub pgs_stream: String,
    /// Consumer group OCR workers read the pgs stream with
    pub pgs_group: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            encode_stream: "vpipe:encode".to_string(),
            encode_group: "vpipe:workers".to_string(),
            events_stream: "vpipe:events".to_string(),
            events_group: "vpipe:server".to_string(),
            pgs_stream: "vpipe:pgs".to_string(),
            pgs_group: "vpipe:ocr".to_string(),
        }
    }
}

impl BusConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("BROKER_URL").unwrap_or(defaults.redis_url),
            encode_stream: std::env::var("BROKER_ENCODE_STREAM").unwrap_or(defaults.encode_stream),
            encode_group: std::env::var("BROKER_ENCODE_GROUP").unwrap_or(defaults.encode_group),
            events_stream: std::env::var("BROKER_EVENTS_STREAM").unwrap_or(defaults.events_stream),
            events_group: std::env::var("BROKER_EVENTS_GROUP").unwrap_or(defaults.events_group),
            pgs_stream: std::env::var("BROKER_PGS_STREAM").unwrap_or(defaults.pgs_stream),
            pgs_group: std::env::var("BROKER_PGS_GROUP").unwrap_or(defaults.pgs_group),
        }
    }
}

/// Message bus client.
///
/// Streams give durable work-queue semantics: one consumer in a group
/// wins each entry, delivery is at-least-once, and entries stay pending
/// until acked. Receivers deduplicate by `event_id`.
pub struct MessageBus {
    client: redis::Client,
    config: BusConfig,
}

impl MessageBus {
    /// Create a new bus client.
    pub fn new(config: BusConfig) -> BusResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> BusResult<Self> {
        Self::new(BusConfig::from_env())
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Create the consumer groups for every stream (idempotent).
    pub async fn init(&self) -> BusResult<()> {
        for (stream, group) in [
            (&self.config.encode_stream, &self.config.encode_group),
            (&self.config.events_stream, &self.config.events_group),
            (&self.config.pgs_stream, &self.config.pgs_group),
        ] {
            self.create_group(stream, group).await?;
        }
        Ok(())
    }

    async fn create_group(&self, stream: &str, group: &str) -> BusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group {} on {}", group, stream),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {} already exists on {}", group, stream);
            }
            Err(e) => return Err(BusError::Redis(e)),
        }

        Ok(())
    }

    /// Publish a raw payload to a stream.
    pub async fn publish(&self, stream: &str, payload: &[u8]) -> BusResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let message_id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        debug!(stream, message_id, "Published message");
        Ok(message_id)
    }

    /// Publish a JSON-encoded value to a stream.
    pub async fn publish_json<T: Serialize>(&self, stream: &str, value: &T) -> BusResult<String> {
        let payload = serde_json::to_vec(value)?;
        self.publish(stream, &payload).await
    }

    /// Consume new entries from a stream as a group member.
    ///
    /// Returns `(message_id, payload)` pairs. Entries must be [`ack`]ed
    /// once fully processed; unacked entries are redelivered to the
    /// group after a restart.
    pub async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> BusResult<Vec<(String, Vec<u8>)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                match entry.map.get("payload") {
                    Some(redis::Value::BulkString(payload)) => {
                        messages.push((entry.id.clone(), payload.clone()));
                    }
                    _ => {
                        warn!(message_id = %entry.id, "Entry without payload field, acking");
                        self.ack(stream, group, &entry.id).await.ok();
                    }
                }
            }
        }

        Ok(messages)
    }

    /// Claim entries left pending by a dead group member.
    pub async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> BusResult<Vec<(String, Vec<u8>)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut messages = Vec::new();
        for entry in reply.claimed {
            if let Some(redis::Value::BulkString(payload)) = entry.map.get("payload") {
                info!(message_id = %entry.id, stream, "Claimed pending entry");
                messages.push((entry.id.clone(), payload.clone()));
            }
        }

        Ok(messages)
    }

    /// Acknowledge and drop a processed entry.
    pub async fn ack(&self, stream: &str, group: &str, message_id: &str) -> BusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(stream, message_id, "Acknowledged message");
        Ok(())
    }

    /// Stream length, for operator visibility.
    pub async fn len(&self, stream: &str) -> BusResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(stream).await?;
        Ok(len)
    }

    // ========================================================================
    // PGS request/reply
    // ========================================================================

    /// Pub/Sub channel replies for a job are correlated on.
    pub fn pgs_reply_channel(job_id: &JobId) -> String {
        format!("pgs:reply:{}", job_id)
    }

    /// Publish an OCR request onto the pgs stream.
    pub async fn request_pgs(&self, request: &TaskPgs) -> BusResult<String> {
        let payload = serde_json::to_vec(request)?;
        self.publish(&self.config.pgs_stream, &payload).await
    }

    /// Publish an OCR reply, correlated by job ID.
    pub async fn respond_pgs(&self, response: &TaskPgsResponse) -> BusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::pgs_reply_channel(&response.job_id);
        let payload = serde_json::to_string(response)?;
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    /// Subscribe to OCR replies for a job.
    ///
    /// Must be called before the requests are published so no reply is
    /// lost; Pub/Sub does not buffer for absent subscribers.
    pub async fn subscribe_pgs_replies(
        &self,
        job_id: &JobId,
    ) -> BusResult<Pin<Box<dyn Stream<Item = TaskPgsResponse> + Send>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::pgs_reply_channel(job_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_name_every_queue() {
        let config = BusConfig::default();
        assert_eq!(config.encode_stream, "vpipe:encode");
        assert_eq!(config.events_stream, "vpipe:events");
        assert_eq!(config.pgs_stream, "vpipe:pgs");
        assert_ne!(config.encode_group, config.events_group);
    }

    #[test]
    fn reply_channel_is_per_job() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(
            MessageBus::pgs_reply_channel(&a),
            MessageBus::pgs_reply_channel(&b)
        );
        assert!(MessageBus::pgs_reply_channel(&a).starts_with("pgs:reply:"));
    }
}
