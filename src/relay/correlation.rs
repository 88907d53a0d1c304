//! Correlation store.
//!
//! Maps an origin message to the copies relayed from it, so edits and deletes
//! can follow. Writes for one origin are serialized by the map's per-key entry
//! lock; unrelated origins proceed in parallel.
//!
//! Correlation is at-most-once: a copy sent but not yet recorded when the
//! process dies is simply unreachable for later edits.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::common::types::{ChannelRef, MessageId};

/// A message the relay posted into a destination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedCopy {
    pub destination: ChannelRef,
    /// Identity of the copy in the destination.
    pub message_id: MessageId,
    /// Identity of the message it mirrors.
    pub origin_id: MessageId,
    pub created_at: DateTime<Utc>,
}

/// Origin message -> relayed copies, in send order.
#[derive(Debug, Default)]
pub struct CorrelationStore {
    entries: DashMap<MessageId, Vec<RelayedCopy>>,
}

impl CorrelationStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a copy to its origin's entry, creating the entry if absent.
    pub fn record(&self, copy: RelayedCopy) {
        self.entries.entry(copy.origin_id).or_default().push(copy);
    }

    /// Copies relayed from `origin`, in the order they were recorded.
    ///
    /// Empty when the origin is unknown (sent before startup, or evicted).
    pub fn lookup(&self, origin: MessageId) -> Vec<RelayedCopy> {
        self.entries
            .get(&origin)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Remove the origin's entry, returning its copies.
    pub fn evict(&self, origin: MessageId) -> Option<Vec<RelayedCopy>> {
        self.entries.remove(&origin).map(|(_, copies)| copies)
    }

    /// Evict every entry whose first copy was created before `cutoff`.
    ///
    /// Returns the number of entries removed.
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, copies| {
            copies
                .first()
                .map(|copy| copy.created_at >= cutoff)
                .unwrap_or(false)
        });
        before.saturating_sub(self.entries.len())
    }

    /// Number of origins currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Periodically evict entries older than `retention` until shutdown.
pub async fn run_retention_sweep(
    store: Arc<CorrelationStore>,
    retention: Duration,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let retention =
        chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36500));
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cutoff = Utc::now()
                    .checked_sub_signed(retention)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let evicted = store.evict_older_than(cutoff);
                if evicted > 0 {
                    info!("Correlation sweep evicted {} entries, {} remain", evicted, store.len());
                } else {
                    debug!("Correlation sweep: {} entries", store.len());
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Correlation sweep stopping");
                    break;
                }
            }
        }
    }
}
