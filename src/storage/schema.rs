//! Relational schema
//!
//! Applied on connect. Every statement is `IF NOT EXISTS` so running it against
//! an initialized database is a no-op.

// == Schema ==
/// DDL for the order tables and the cache index.
///
/// `Delivery` and `Payment` are keyed by natural key: two orders that share a
/// delivery name share (and overwrite) one address row.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS Delivery (
    name        TEXT PRIMARY KEY,
    phone       TEXT NOT NULL DEFAULT '',
    zip         TEXT NOT NULL DEFAULT '',
    city        TEXT NOT NULL DEFAULT '',
    address     TEXT NOT NULL DEFAULT '',
    region      TEXT NOT NULL DEFAULT '',
    email       TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS Payment (
    transaction    TEXT PRIMARY KEY,
    request_id     TEXT NOT NULL DEFAULT '',
    currency       TEXT NOT NULL DEFAULT '',
    provider       TEXT NOT NULL DEFAULT '',
    amount         DOUBLE PRECISION NOT NULL DEFAULT 0,
    payment_dt     TIMESTAMPTZ NOT NULL,
    bank           TEXT NOT NULL DEFAULT '',
    delivery_cost  DOUBLE PRECISION NOT NULL DEFAULT 0,
    goods_total    DOUBLE PRECISION NOT NULL DEFAULT 0,
    custom_fee     DOUBLE PRECISION NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS Items (
    chrt_id      TEXT PRIMARY KEY,
    price        DOUBLE PRECISION NOT NULL DEFAULT 0,
    rid          TEXT NOT NULL DEFAULT '',
    name         TEXT NOT NULL DEFAULT '',
    sale         INTEGER NOT NULL DEFAULT 0,
    size         TEXT NOT NULL DEFAULT '',
    total_price  DOUBLE PRECISION NOT NULL DEFAULT 0,
    nm_id        TEXT NOT NULL DEFAULT '',
    brand        TEXT NOT NULL DEFAULT '',
    status       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS Orders (
    order_uid           TEXT PRIMARY KEY,
    entry               TEXT NOT NULL DEFAULT '',
    delivery_id         TEXT NOT NULL REFERENCES Delivery (name),
    payment_id          TEXT NOT NULL REFERENCES Payment (transaction),
    track_number        TEXT NOT NULL DEFAULT '',
    locale              TEXT NOT NULL DEFAULT '',
    internal_signature  TEXT NOT NULL DEFAULT '',
    customer_id         TEXT NOT NULL DEFAULT '',
    delivery_service    TEXT NOT NULL DEFAULT '',
    shardkey            TEXT NOT NULL DEFAULT '',
    sm_id               TEXT NOT NULL DEFAULT '',
    date_created        TIMESTAMPTZ NOT NULL,
    oof_shard           TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS Order_contents (
    order_uid  TEXT NOT NULL REFERENCES Orders (order_uid),
    chrt_id    TEXT NOT NULL REFERENCES Items (chrt_id),
    PRIMARY KEY (order_uid, chrt_id)
);

CREATE TABLE IF NOT EXISTS Hash (
    order_id  TEXT PRIMARY KEY
);
"#;
