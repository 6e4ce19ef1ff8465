//! Handoff between a pipeline and its write loop
//!
//! A single-slot channel carries one [`WriteRequest`] at a time; each request
//! carries its own oneshot responder, so an answer always belongs to the exact
//! order that was offered. Both waits are abandoned on cancellation.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::Order;

// == Write Request ==
/// An order waiting to be written, plus the way back to whoever offered it.
#[derive(Debug)]
pub struct WriteRequest {
    pub order: Order,
    responder: oneshot::Sender<Result<()>>,
}

impl WriteRequest {
    /// Sends the write result back. Never blocks; returns false when the
    /// requester is no longer listening and the answer was dropped.
    pub fn respond(self, result: Result<()>) -> bool {
        self.responder.send(result).is_ok()
    }
}

// == Handoff Outcome ==
/// How an offer ended.
#[derive(Debug)]
pub enum HandoffOutcome {
    /// The writer processed the order and answered
    Answered(Result<()>),
    /// Cancellation was observed before an answer arrived
    Cancelled,
    /// The write loop is gone; nothing will answer
    WriterGone,
}

// == Channel Ends ==
/// Pipeline end of the handoff.
#[derive(Debug, Clone)]
pub struct HandoffSender {
    slot: mpsc::Sender<WriteRequest>,
}

/// Write-loop end of the handoff.
#[derive(Debug)]
pub struct HandoffReceiver {
    slot: mpsc::Receiver<WriteRequest>,
}

// == Constructor ==
/// Creates a connected sender/receiver pair.
pub fn handoff() -> (HandoffSender, HandoffReceiver) {
    let (slot_tx, slot_rx) = mpsc::channel(1);
    (
        HandoffSender { slot: slot_tx },
        HandoffReceiver { slot: slot_rx },
    )
}

// == Submit ==
impl HandoffSender {
    /// Offers `order` and waits for the writer's answer.
    ///
    /// Cancellation is checked first at each wait, so a message whose answer
    /// races with shutdown is reported as `Cancelled` and stays uncommitted.
    pub async fn submit(&self, order: Order, cancel: &CancellationToken) -> HandoffOutcome {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return HandoffOutcome::Cancelled,
            permit = self.slot.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return HandoffOutcome::WriterGone,
            },
        };

        let (responder, answer) = oneshot::channel();
        permit.send(WriteRequest { order, responder });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => HandoffOutcome::Cancelled,
            answer = answer => match answer {
                Ok(result) => HandoffOutcome::Answered(result),
                Err(_) => HandoffOutcome::WriterGone,
            },
        }
    }
}

// == Receive ==
impl HandoffReceiver {
    /// Next offered request; None once every sender is dropped.
    pub async fn recv(&mut self) -> Option<WriteRequest> {
        self.slot.recv().await
    }
}
