//! Synthetic order producer
//!
//! Publishes random orders to the order topic, keyed by `order_uid`. Each
//! identifier field is occasionally blank so the consumer's rejection paths
//! see traffic too.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use order_cache::config::Config;
use order_cache::models::Order;

/// Chance that any single identifier field is sent blank.
const BLANK_CHANCE: f64 = 0.1;

const DELIVERY_NAMES: [&str; 5] = [
    "Wildberries Logistics",
    "AliExpress Express",
    "Yandex Market",
    "Ozon Delivery",
    "Meest Express",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "producer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", config.stream.brokers.join(","))
        .set("message.timeout.ms", "5000")
        .create()
        .context("failed to create Kafka producer")?;

    info!(
        "Producing random orders to {} on {}",
        config.stream.topic,
        config.stream.brokers.join(",")
    );

    loop {
        let order = random_order();
        let payload = serde_json::to_vec(&order).context("failed to encode order")?;

        let record = FutureRecord::to(&config.stream.topic)
            .key(order.order_uid.as_str())
            .payload(payload.as_slice());
        match producer.send(record, Duration::from_secs(5)).await {
            Ok((partition, offset)) => info!(
                "Sent order '{}' to partition={}, offset={}",
                order.order_uid, partition, offset
            ),
            Err((err, _)) => warn!("Failed to send order '{}': {}", order.order_uid, err),
        }

        let delay = rand::rng().random_range(10..30);
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }
}

/// A fresh order with random identifiers, some of them blanked.
fn random_order() -> Order {
    let mut rng = rand::rng();
    let order_uid = random_string(&mut rng, 16);
    let mut order = Order::sample(order_uid.clone());

    let now = Utc::now();
    order.track_number = format!("WBILM{}", random_string(&mut rng, 5));
    order.date_created = now;
    order.delivery.name = DELIVERY_NAMES[rng.random_range(0..DELIVERY_NAMES.len())].to_string();
    order.payment.payment_dt = now;
    order.payment.custom_fee = f64::from(rng.random_range(0..100u32));

    for item in &mut order.items {
        item.chrt_id = rng.random_range(1_000_000..10_000_000u32).to_string();
        item.rid = random_string(&mut rng, 15);
        item.track_number = order.track_number.clone();
    }

    maybe_blank(&mut rng, &mut order.order_uid);
    maybe_blank(&mut rng, &mut order.track_number);
    maybe_blank(&mut rng, &mut order.delivery.name);
    maybe_blank(&mut rng, &mut order.payment.transaction);
    if let Some(item) = order.items.first_mut() {
        maybe_blank(&mut rng, &mut item.track_number);
    }
    order
}

fn maybe_blank<R: Rng + ?Sized>(rng: &mut R, field: &mut String) {
    if rng.random_bool(BLANK_CHANCE) {
        field.clear();
    }
}

fn random_string<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}
