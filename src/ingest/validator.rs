//! Record Validator
//!
//! Decodes a raw stream payload into an [`Order`] and checks the keys the
//! storage schema depends on. Pure and deterministic.

use thiserror::Error;

use crate::models::Order;

// == Rejection Reasons ==
/// Why a payload was refused. All reasons are terminal: the message is logged
/// and skipped, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("order_uid is empty")]
    MissingIdentifier,

    #[error("delivery.name is empty")]
    MissingDeliveryKey,

    #[error("payment.transaction is empty")]
    MissingPaymentKey,

    #[error("item[{index}] has track_number {found:?}, order has {expected:?}")]
    TrackingNumberMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("track_number is empty")]
    MissingTrackNumber,
}

// == Validation ==
/// Decodes and checks one payload.
pub fn validate(raw: &[u8]) -> Result<Order, RejectionReason> {
    let order: Order = serde_json::from_slice(raw)
        .map_err(|e| RejectionReason::MalformedPayload(e.to_string()))?;

    check(&order)?;
    Ok(order)
}

/// Checks the invariants of an already decoded order.
pub fn check(order: &Order) -> Result<(), RejectionReason> {
    if order.order_uid.is_empty() {
        return Err(RejectionReason::MissingIdentifier);
    }
    if order.delivery.name.is_empty() {
        return Err(RejectionReason::MissingDeliveryKey);
    }
    if order.payment.transaction.is_empty() {
        return Err(RejectionReason::MissingPaymentKey);
    }

    if let Some((index, item)) = order
        .items
        .iter()
        .enumerate()
        .find(|(_, item)| item.track_number != order.track_number)
    {
        return Err(RejectionReason::TrackingNumberMismatch {
            index,
            expected: order.track_number.clone(),
            found: item.track_number.clone(),
        });
    }

    if order.track_number.is_empty() {
        return Err(RejectionReason::MissingTrackNumber);
    }

    Ok(())
}
