//! Ingestion pipeline
//!
//! One message per tick: fetch, validate, hand off to the write loop, wait for
//! the answer, commit. Commits happen after rejections and after failed writes
//! alike, so a message that could not be stored is not seen again
//! (at-most-once for write failures). Only a cancellation before the answer
//! leaves the message uncommitted for redelivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handoff::{HandoffOutcome, HandoffSender};
use super::stream::{MessageStream, StreamPosition};
use super::validator::{self, RejectionReason};
use crate::config::StreamConfig;
use crate::error::OrderError;

// == Settings ==
/// Timing and retry knobs for a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Delay between fetch attempts
    pub poll_interval: Duration,
    /// Extra handoff attempts after a failed write, before committing anyway.
    /// Attempts are spaced by `poll_interval`.
    pub write_retries: u32,
}

impl From<&StreamConfig> for PipelineSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            write_retries: config.write_retries,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            write_retries: 0,
        }
    }
}

// == Cycle Outcome ==
/// Result of a single fetch-to-commit cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The writer answered and the position was committed (if `committed`)
    Acknowledged {
        position: StreamPosition,
        stored: bool,
        committed: bool,
    },
    /// Validation failed; the message was skipped and committed (if `committed`)
    Rejected {
        position: StreamPosition,
        reason: RejectionReason,
        committed: bool,
    },
    /// Nothing was fetched; try again next tick
    FetchFailed(OrderError),
    /// Cancellation observed before the message was acknowledged
    Cancelled,
    /// The write loop has stopped
    WriterGone,
}

// == Ingestion Pipeline ==
/// Consumes one stream and feeds one write loop.
pub struct IngestionPipeline {
    name: String,
    stream: Arc<dyn MessageStream>,
    handoff: HandoffSender,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    pub fn new(
        name: impl Into<String>,
        stream: Arc<dyn MessageStream>,
        handoff: HandoffSender,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            name: name.into(),
            stream,
            handoff,
            settings,
        }
    }

    // == Run ==
    /// Runs cycles on every tick until cancelled or the writer disappears.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Pipeline {} started, polling every {:?}",
            self.name, self.settings.poll_interval
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.cycle(&cancel).await {
                CycleOutcome::Cancelled => break,
                CycleOutcome::WriterGone => {
                    error!("Pipeline {} lost its write loop, stopping", self.name);
                    break;
                }
                outcome => debug!("Pipeline {} cycle finished: {:?}", self.name, outcome),
            }
        }

        info!("Pipeline {} stopped", self.name);
    }

    // == Cycle ==
    /// One `Idle → Fetched → Validated|Rejected → AwaitingWrite → Acknowledged` pass.
    pub async fn cycle(&self, cancel: &CancellationToken) -> CycleOutcome {
        // Idle -> Fetched
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CycleOutcome::Cancelled,
            fetched = self.stream.fetch() => match fetched {
                Ok(message) => message,
                Err(err) => {
                    warn!("Pipeline {} failed to fetch: {}", self.name, err);
                    return CycleOutcome::FetchFailed(err);
                }
            },
        };
        let position = message.position.clone();

        // Fetched -> Validated | Rejected
        let order = match validator::validate(&message.payload) {
            Ok(order) => order,
            Err(reason) => {
                warn!(
                    "Rejected message key={:?} at {}: {}",
                    message.key, position, reason
                );
                let committed = self.acknowledge(&position).await;
                return CycleOutcome::Rejected {
                    position,
                    reason,
                    committed,
                };
            }
        };

        if message.key.as_deref().is_some_and(|key| key != order.order_uid) {
            debug!(
                "Message key {:?} differs from order_uid {} at {}",
                message.key, order.order_uid, position
            );
        }

        // Validated -> AwaitingWrite
        let mut attempt = 0;
        let stored = loop {
            match self.handoff.submit(order.clone(), cancel).await {
                HandoffOutcome::Answered(Ok(())) => break true,
                HandoffOutcome::Answered(Err(err)) if attempt < self.settings.write_retries => {
                    attempt += 1;
                    warn!(
                        "Write of order {} at {} failed ({}), retry {}/{}",
                        order.order_uid, position, err, attempt, self.settings.write_retries
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return CycleOutcome::Cancelled,
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
                HandoffOutcome::Answered(Err(err)) => {
                    error!(
                        "Failed to write order {} from {}: {}; committing anyway",
                        order.order_uid, position, err
                    );
                    break false;
                }
                HandoffOutcome::Cancelled => {
                    info!(
                        "Cancelled while order {} at {} was in flight, leaving it uncommitted",
                        order.order_uid, position
                    );
                    return CycleOutcome::Cancelled;
                }
                HandoffOutcome::WriterGone => return CycleOutcome::WriterGone,
            }
        };

        // AwaitingWrite -> Acknowledged
        let committed = self.acknowledge(&position).await;
        if stored && committed {
            info!("Order {} stored from {}", order.order_uid, position);
        }
        CycleOutcome::Acknowledged {
            position,
            stored,
            committed,
        }
    }

    async fn acknowledge(&self, position: &StreamPosition) -> bool {
        match self.stream.commit(position).await {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to commit {}: {}", position, err);
                false
            }
        }
    }
}
