//! Kafka-backed message stream
//!
//! Auto-commit and automatic offset storage are disabled; a position is only
//! committed when the pipeline says so. Commits are synchronous and run on
//! the blocking pool, so any runtime flavor can drive the stream.

use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tracing::info;

use super::stream::{MessageStream, StreamMessage, StreamPosition};
use crate::config::StreamConfig;
use crate::error::{OrderError, Result};

// == Kafka Stream ==
/// One consumer-group member subscribed to the order topic.
pub struct KafkaStream {
    consumer: Arc<StreamConsumer>,
}

impl KafkaStream {
    // == Connect ==
    /// Creates the consumer and subscribes to `config.topic`.
    pub fn connect(config: &StreamConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;
        info!(
            "Subscribed to {} on {} as group {}",
            config.topic,
            config.brokers.join(","),
            config.group_id
        );

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

#[async_trait]
impl MessageStream for KafkaStream {
    // == Fetch ==
    async fn fetch(&self) -> Result<StreamMessage> {
        let message = self.consumer.recv().await?;

        Ok(StreamMessage {
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            position: StreamPosition {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            },
        })
    }

    // == Commit ==
    async fn commit(&self, position: &StreamPosition) -> Result<()> {
        let offsets = next_offsets(position)?;
        let consumer = self.consumer.clone();

        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| OrderError::Internal(format!("commit task failed: {}", e)))??;
        Ok(())
    }
}

/// Kafka commits the offset of the next message to read.
fn next_offsets(position: &StreamPosition) -> Result<TopicPartitionList> {
    let mut offsets = TopicPartitionList::new();
    offsets.add_partition_offset(
        &position.topic,
        position.partition,
        Offset::Offset(position.offset + 1),
    )?;
    Ok(offsets)
}
