//! Order domain model
//!
//! The shape of an order record as it travels on the stream, sits in the
//! cache and is returned by the read path. Field names match the JSON payload
//! published by producers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level ingested entity.
///
/// Missing JSON fields decode to empty/zero values; the validator decides
/// whether the result is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    /// Globally unique identifier, also the stream message key
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: String,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

/// Recipient contact and address. `name` is the natural key of the Delivery table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment transaction. `transaction` is the natural key of the Payment table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: f64,
    pub payment_dt: DateTime<Utc>,
    pub bank: String,
    pub delivery_cost: f64,
    pub goods_total: f64,
    pub custom_fee: f64,
}

/// Line item, keyed by `chrt_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub chrt_id: String,
    /// Must equal the parent order's tracking number
    pub track_number: String,
    pub price: f64,
    pub rid: String,
    pub name: String,
    pub sale: i32,
    pub size: String,
    pub total_price: f64,
    pub nm_id: String,
    pub brand: String,
    pub status: i32,
}

impl Order {
    /// Builds a small, valid order with one item. Used by tests and the producer.
    pub fn sample(order_uid: impl Into<String>) -> Self {
        let order_uid = order_uid.into();
        let track_number = format!("WBILM{}", order_uid.to_uppercase());
        let created = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();

        Self {
            track_number: track_number.clone(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: format!("Recipient {}", order_uid),
                phone: "+9720000000".to_string(),
                zip: "2639809".to_string(),
                city: "Kiryat Mozkin".to_string(),
                address: "Ploshad Mira 15".to_string(),
                region: "Kraiot".to_string(),
                email: "test@gmail.com".to_string(),
            },
            payment: Payment {
                transaction: order_uid.clone(),
                request_id: String::new(),
                currency: "USD".to_string(),
                provider: "wbpay".to_string(),
                amount: 1817.0,
                payment_dt: created,
                bank: "alpha".to_string(),
                delivery_cost: 1500.0,
                goods_total: 317.0,
                custom_fee: 0.0,
            },
            items: vec![Item {
                chrt_id: format!("{}-1", order_uid),
                track_number,
                price: 453.0,
                rid: format!("rid-{}", order_uid),
                name: "Mascaras".to_string(),
                sale: 30,
                size: "0".to_string(),
                total_price: 317.0,
                nm_id: "2389212".to_string(),
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            }],
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: "99".to_string(),
            date_created: created,
            oof_shard: "1".to_string(),
            order_uid,
        }
    }
}
