use std::{
    collections::HashMap,
    sync::{Arc, atomic::AtomicU64},
};

use crate::{
    events::EnrichedEvent,
    queues::{FifoDropOldestQueue, IsolatedForwarder},
};

/// Event type to the inboxes subscribed to it, fixed at build time.
pub struct Routes {
    pub table: HashMap<&'static str, Vec<Route>>,
}

pub struct Route {
    pub subscriber_id: &'static str,
    pub inbox: RouteInbox,
    pub drops_total: Arc<AtomicU64>,
}

pub enum RouteInbox {
    FifoDropOldest(Arc<FifoDropOldestQueue<Arc<EnrichedEvent>>>),
    Isolated(IsolatedForwarder<Arc<EnrichedEvent>>),
}

/// Outcome of offering one event to one inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Accepted, but an older pending event was evicted.
    Evicted,
    /// The inbox was full or closed; the event was not accepted.
    Rejected,
}

impl RouteInbox {
    pub fn try_deliver(&self, event: Arc<EnrichedEvent>) -> Delivery {
        match self {
            RouteInbox::FifoDropOldest(q) => match q.push_overwrite(event) {
                Some(_) => Delivery::Evicted,
                None => Delivery::Delivered,
            },
            RouteInbox::Isolated(fwd) => match fwd.try_send(event) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Rejected,
            },
        }
    }
}
