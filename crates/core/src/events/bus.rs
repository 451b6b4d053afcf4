use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::time::Instant;
use tracing::{Level, error, trace, warn};
use uuid::Uuid;

use crate::{
    events::{BusConfig, BusMetrics, EnrichedEvent, Event, to_json},
    routes::{Delivery, Routes},
};

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

pub struct EventBusInner {
    session_id: Uuid,
    next_ingest_seq: AtomicU64,
    routes: Arc<Routes>,
    metrics: Arc<BusMetrics>,
    strict_routing: bool,
}

impl EventBus {
    pub fn new(cfg: BusConfig, routes: Routes, metrics: Arc<BusMetrics>) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                session_id: cfg.session_id,
                next_ingest_seq: AtomicU64::new(0),
                routes: Arc::new(routes),
                metrics,
                strict_routing: cfg.strict_routing,
            }),
        }
    }

    pub fn publish(&self, event: Arc<dyn Event>) {
        let ingest_ns = self.inner.next_ingest_seq.fetch_add(1, Ordering::Relaxed);

        if tracing::enabled!(Level::TRACE) {
            trace!(
                event_type = event.event_type(),
                ingest_ns,
                payload = %to_json(event.as_ref()),
                "publish"
            );
        }

        let enriched_event = Arc::new(EnrichedEvent {
            event,
            session_id: self.inner.session_id,
            ingest_ns,
            ingested_at: Instant::now(),
        });

        let Some(routes) = self
            .inner
            .routes
            .table
            .get(enriched_event.event.event_type())
        else {
            self.inner
                .metrics
                .record_unrouted(enriched_event.event.event_type());

            if self.inner.strict_routing {
                error!(
                    event_type = enriched_event.event.event_type(),
                    "event published with no subscriber"
                );
            }

            return;
        };

        for route in routes {
            let outcome = route.inbox.try_deliver(Arc::clone(&enriched_event));
            if outcome == Delivery::Delivered {
                continue;
            }

            // A lost stage event strands its job, so every drop is loud.
            route.drops_total.fetch_add(1, Ordering::Relaxed);
            self.inner.metrics.record_drop();
            warn!(
                subscriber = route.subscriber_id,
                event_type = enriched_event.event.event_type(),
                ?outcome,
                "event dropped, subscriber inbox full"
            );
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }
}
