//! Completion events for streaming subscribers.
//!
//! Each subscriber owns one unbounded channel and an optional filter.
//! Dropping the receiver is enough to stop delivery; the registry forgets a
//! subscriber the next time a send to it fails, or at once on `unsubscribe`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use pfm_core::now_millis;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{GatewayQuery, GatewayResponse};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamFilter {
    /// Upper-cased on match. Empty means every category.
    pub categories: BTreeSet<String>,
    pub min_score: Option<f64>,
}

impl StreamFilter {
    pub fn categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            categories: categories.into_iter().map(|c| c.as_ref().to_uppercase()).collect(),
            min_score: None,
        }
    }

    pub fn min_score(mut self, score: f64) -> Self {
        self.min_score = Some(score);
        self
    }

    pub fn matches(&self, query: &GatewayQuery, response: &GatewayResponse) -> bool {
        if !self.categories.is_empty() {
            let Some(category) = query.category() else {
                return false;
            };
            if !self.categories.contains(&category.to_uppercase()) {
                return false;
            }
        }
        match self.min_score {
            Some(min) => response.score().is_some_and(|s| s >= min),
            None => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub timestamp: u64,
    pub query: GatewayQuery,
    pub response: GatewayResponse,
}

pub type SubscriptionId = u64;

/// Receiving half handed to a subscriber.
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
}

struct Subscriber {
    filter: StreamFilter,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

#[derive(Default)]
pub struct StreamRegistry {
    next_id: AtomicU64,
    subscribers: DashMap<SubscriptionId, Subscriber>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, filter: StreamFilter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, Subscriber { filter, tx });
        debug!(id, "stream subscriber added");
        Subscription { id, events: rx }
    }

    /// Release a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver to every matching subscriber. Returns the number reached.
    pub fn publish(&self, query: &GatewayQuery, response: &GatewayResponse) -> usize {
        if self.subscribers.is_empty() {
            return 0;
        }
        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if !entry.filter.matches(query, response) {
                continue;
            }
            let event = StreamEvent {
                timestamp: now_millis(),
                query: query.clone(),
                response: response.clone(),
            };
            if entry.tx.send(event).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
            debug!(id, "stream subscriber dropped");
        }
        delivered
    }
}
