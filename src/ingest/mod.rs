//! Ingestion Module
//!
//! Moves orders from a message stream into the store.
//!
//! # Flow
//! - A pipeline fetches one message, validates it and hands it off
//! - The write loop persists it in one transaction and answers
//! - The pipeline commits the stream position once answered
//!
//! [`spawn_ingestion`] starts one pipeline and one write loop per stream and
//! returns a handle that waits for all of them after cancellation.

mod handoff;
#[cfg(feature = "kafka")]
mod kafka;
mod pipeline;
mod stream;
mod validator;
mod writer;

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::OrderCache;
use crate::storage::OrderRepository;

pub use handoff::{handoff, HandoffOutcome, HandoffReceiver, HandoffSender, WriteRequest};
#[cfg(feature = "kafka")]
pub use kafka::KafkaStream;
pub use pipeline::{CycleOutcome, IngestionPipeline, PipelineSettings};
pub use stream::{MemoryStream, MessageStream, StreamMessage, StreamPosition};
pub use validator::{check, validate, RejectionReason};
pub use writer::OrderWriter;

// == Ingestion Handle ==
/// Running pipelines and write loops.
pub struct IngestionHandle {
    tasks: JoinSet<()>,
}

impl IngestionHandle {
    /// Number of tasks still tracked (two per stream until they exit).
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    // == Join ==
    /// Waits for every task to exit. Call after cancelling the token passed to
    /// [`spawn_ingestion`]; a panicked task is logged and the rest are still awaited.
    pub async fn join(mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!("Ingestion task ended abnormally: {}", err);
            }
        }
        info!("All ingestion tasks stopped");
    }

    // == Drain ==
    /// Shutdown sequence: cancel, wait for every write loop, then close the store.
    ///
    /// The store is closed only after the last write has answered, so no
    /// transaction is cut off by the pool going away.
    pub async fn drain(self, cancel: &CancellationToken, store: &dyn OrderRepository) {
        cancel.cancel();
        self.join().await;
        store.close();
    }
}

// == Supervisor ==
/// Starts one pipeline plus one write loop per stream.
///
/// Each pair gets its own handoff, so a stalled write on one consumer never
/// blocks another. All of them stop when `cancel` fires.
pub fn spawn_ingestion(
    streams: Vec<Arc<dyn MessageStream>>,
    store: Arc<dyn OrderRepository>,
    cache: Option<Arc<OrderCache>>,
    settings: PipelineSettings,
    cancel: CancellationToken,
) -> IngestionHandle {
    let mut tasks = JoinSet::new();

    for (index, stream) in streams.into_iter().enumerate() {
        let (sender, receiver) = handoff();

        let writer = OrderWriter::new(store.clone(), cache.clone());
        tasks.spawn(writer.run(format!("writer-{}", index), receiver, cancel.clone()));

        let pipeline = IngestionPipeline::new(
            format!("consumer-{}", index),
            stream,
            sender,
            settings.clone(),
        );
        tasks.spawn(pipeline.run(cancel.clone()));
    }

    info!("Started {} ingestion pipeline(s)", tasks.len() / 2);
    IngestionHandle { tasks }
}
