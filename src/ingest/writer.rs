//! Write loop
//!
//! Receives orders from one pipeline's handoff, persists each in a single
//! transaction and answers on the request's own responder.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handoff::{HandoffReceiver, WriteRequest};
use crate::cache::OrderCache;
use crate::storage::OrderRepository;

// == Order Writer ==
/// Persists handed-off orders.
#[derive(Clone)]
pub struct OrderWriter {
    store: Arc<dyn OrderRepository>,
    cache: Option<Arc<OrderCache>>,
}

impl OrderWriter {
    /// `cache`, when given, has resident entries refreshed after each successful write.
    pub fn new(store: Arc<dyn OrderRepository>, cache: Option<Arc<OrderCache>>) -> Self {
        Self { store, cache }
    }

    // == Process ==
    /// Writes one order and answers. A write in progress is not interrupted by
    /// cancellation; dropping it mid-transaction would only roll it back.
    pub async fn process(&self, request: WriteRequest) {
        let result = self.store.upsert_order(&request.order).await;

        if result.is_ok() {
            debug!("Order {} written to store", request.order.order_uid);
            if let Some(cache) = &self.cache {
                cache.refresh(&request.order).await;
            }
        }

        let order_uid = request.order.order_uid.clone();
        if !request.respond(result) {
            warn!("Pipeline stopped listening, dropping write answer for {}", order_uid);
        }
    }

    // == Write Loop ==
    /// Serves requests until cancelled or until the pipeline side hangs up.
    pub async fn run(self, name: String, mut requests: HandoffReceiver, cancel: CancellationToken) {
        info!("Write loop {} started", name);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => self.process(request).await,
                    None => {
                        debug!("Handoff for {} closed", name);
                        break;
                    }
                },
            }
        }
        info!("Write loop {} stopped", name);
    }

    /// Spawns [`OrderWriter::run`] on the runtime.
    pub fn spawn(
        self,
        name: String,
        requests: HandoffReceiver,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(name, requests, cancel))
    }
}
