//! Message stream abstraction
//!
//! The pipeline fetches one message at a time and commits positions manually.
//! [`MemoryStream`] is an in-process stream with the same contract, used by
//! tests and local runs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{OrderError, Result};
use crate::models::Order;

// == Stream Position ==
/// Where a message sits in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "topic={}, partition={}, offset={}",
            self.topic, self.partition, self.offset
        )
    }
}

/// One fetched record.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Producer-supplied key, the order id by convention
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub position: StreamPosition,
}

// == Message Stream ==
/// Consumer side of a stream with manual acknowledgment.
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Waits for the next message. Dropping the future abandons the wait.
    async fn fetch(&self) -> Result<StreamMessage>;

    /// Marks everything up to and including `position` as processed.
    async fn commit(&self, position: &StreamPosition) -> Result<()>;
}

// == Memory Stream ==
/// Single-partition in-memory stream.
#[derive(Debug)]
pub struct MemoryStream {
    topic: String,
    pending: Mutex<VecDeque<StreamMessage>>,
    committed: Mutex<Vec<StreamPosition>>,
    next_offset: AtomicI64,
    arrived: Notify,
    failing_fetches: AtomicUsize,
    commit_available: AtomicBool,
}

impl MemoryStream {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            pending: Mutex::new(VecDeque::new()),
            committed: Mutex::new(Vec::new()),
            next_offset: AtomicI64::new(0),
            arrived: Notify::new(),
            failing_fetches: AtomicUsize::new(0),
            commit_available: AtomicBool::new(true),
        }
    }

    /// Appends a raw message and returns its position.
    pub fn push(&self, key: Option<&str>, payload: impl Into<Vec<u8>>) -> StreamPosition {
        let position = StreamPosition {
            topic: self.topic.clone(),
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
        };
        relock(&self.pending).push_back(StreamMessage {
            key: key.map(String::from),
            payload: payload.into(),
            position: position.clone(),
        });
        self.arrived.notify_one();
        position
    }

    /// Appends an order encoded as JSON, keyed by its id.
    pub fn push_order(&self, order: &Order) -> StreamPosition {
        let payload = serde_json::to_vec(order).unwrap_or_default();
        self.push(Some(&order.order_uid), payload)
    }

    /// Puts a message back at the head, as a broker would redeliver it after a restart.
    pub fn redeliver(&self, message: StreamMessage) {
        relock(&self.pending).push_front(message);
        self.arrived.notify_one();
    }

    /// Committed positions in commit order.
    pub fn committed(&self) -> Vec<StreamPosition> {
        relock(&self.committed).clone()
    }

    pub fn pending_len(&self) -> usize {
        relock(&self.pending).len()
    }

    /// Makes the next `count` fetches fail with `StreamUnavailable`.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    pub fn set_commit_available(&self, available: bool) {
        self.commit_available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn fetch(&self) -> Result<StreamMessage> {
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(OrderError::StreamUnavailable(
                "broker not reachable".to_string(),
            ));
        }

        loop {
            let next = relock(&self.pending).pop_front();
            if let Some(message) = next {
                return Ok(message);
            }
            self.arrived.notified().await;
        }
    }

    async fn commit(&self, position: &StreamPosition) -> Result<()> {
        if !self.commit_available.load(Ordering::SeqCst) {
            return Err(OrderError::StreamUnavailable(format!(
                "commit of {} refused",
                position
            )));
        }
        relock(&self.committed).push(position.clone());
        Ok(())
    }
}

/// A poisoned lock here only means a test thread panicked; the data is still usable.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
