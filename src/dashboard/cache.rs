//! Query cache for fetched listings and metrics, with broadcast invalidation.
//!
//! Any table change, local write, polling tick or reconnect clears the whole
//! cache and tells every connected WebSocket client to re-fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use crate::records::{Metrics, Preset, Queue, Record, TimeRange};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Why cached results were discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// The change feed reported a row change.
    TableChange,
    /// The polling fallback fired.
    Poll,
    /// A reviewer action was written through this server.
    Write,
    /// The store connection changed (configure, sign-in, sign-out).
    Reconnect,
}

/// Events pushed to dashboard WebSocket clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// Sent once on connect.
    Hello { generation: u64, realtime: bool },
    /// Cached data is stale; clients should re-fetch.
    Invalidated {
        generation: u64,
        reason: InvalidationReason,
        record_id: Option<i64>,
    },
}

/// Width of the bucket a preset window's end is rounded into.
const PRESET_BUCKET_SECS: i64 = 60;

/// Cache identity of a time window.
///
/// Presets are keyed by name and by the minute their window ends in, so a
/// cached "last 7 days" is reused for at most a minute even without an
/// invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKey {
    All,
    Preset(Preset, i64),
    Custom(DateTime<Utc>, DateTime<Utc>),
}

impl WindowKey {
    pub fn of(window: Option<&TimeRange>) -> Self {
        match window {
            None => Self::All,
            Some(w) if w.preset == Preset::Custom => Self::Custom(w.start, w.end),
            Some(w) => Self::Preset(w.preset, w.end.timestamp().div_euclid(PRESET_BUCKET_SECS)),
        }
    }
}

type RecordsKey = (Option<Queue>, WindowKey);

pub struct QueryCache {
    records: RwLock<HashMap<RecordsKey, Vec<Record>>>,
    metrics: RwLock<HashMap<WindowKey, Metrics>>,
    generation: AtomicU64,
    tx: broadcast::Sender<DashboardEvent>,
}

impl QueryCache {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            records: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            tx,
        })
    }

    /// Subscribe to invalidation events. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }

    /// Current generation; bumped by every invalidation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn records(&self, queue: Option<Queue>, window: WindowKey) -> Option<Vec<Record>> {
        self.records.read().await.get(&(queue, window)).cloned()
    }

    /// Store a listing fetched at `generation`. Dropped if an invalidation
    /// happened while the fetch was in flight.
    pub async fn put_records(
        &self,
        queue: Option<Queue>,
        window: WindowKey,
        generation: u64,
        records: Vec<Record>,
    ) {
        let mut cache = self.records.write().await;
        if self.generation() != generation {
            debug!(queue = ?queue, "Discarding listing fetched before invalidation");
            return;
        }
        cache.insert((queue, window), records);
    }

    pub async fn metrics(&self, window: WindowKey) -> Option<Metrics> {
        self.metrics.read().await.get(&window).copied()
    }

    pub async fn put_metrics(&self, window: WindowKey, generation: u64, metrics: Metrics) {
        let mut cache = self.metrics.write().await;
        if self.generation() != generation {
            return;
        }
        cache.insert(window, metrics);
    }

    /// Drop everything cached and broadcast the invalidation.
    pub async fn invalidate(&self, reason: InvalidationReason, record_id: Option<i64>) -> u64 {
        let mut records = self.records.write().await;
        let mut metrics = self.metrics.write().await;
        records.clear();
        metrics.clear();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(metrics);
        drop(records);

        match reason {
            InvalidationReason::Poll => debug!(generation, "Cache invalidated by poll"),
            _ => info!(generation, reason = ?reason, record_id = ?record_id, "Cache invalidated"),
        }

        // Ok if no clients are listening
        let _ = self.tx.send(DashboardEvent::Invalidated {
            generation,
            reason,
            record_id,
        });
        generation
    }

    /// Invalidate from a synchronous callback (change feed, poll timer).
    pub fn invalidate_detached(self: &Arc<Self>, reason: InvalidationReason, record_id: Option<i64>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.invalidate(reason, record_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64) -> Record {
        Record::new(id, Utc::now())
    }

    #[tokio::test]
    async fn put_and_get_records() {
        let cache = QueryCache::new();
        let gen0 = cache.generation();
        cache
            .put_records(Some(Queue::SendGuard), WindowKey::All, gen0, vec![record(1)])
            .await;

        let hit = cache.records(Some(Queue::SendGuard), WindowKey::All).await;
        assert_eq!(hit.unwrap().len(), 1);
        assert!(
            cache
                .records(Some(Queue::Recovery), WindowKey::All)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn invalidate_clears_and_broadcasts() {
        let cache = QueryCache::new();
        let mut rx = cache.subscribe();
        cache
            .put_metrics(WindowKey::Preset(Preset::Last7d, 0), 0, Metrics::default())
            .await;

        let generation = cache.invalidate(InvalidationReason::Write, Some(4)).await;
        assert_eq!(generation, 1);
        assert!(
            cache
                .metrics(WindowKey::Preset(Preset::Last7d, 0))
                .await
                .is_none()
        );

        match rx.recv().await.unwrap() {
            DashboardEvent::Invalidated {
                generation,
                reason,
                record_id,
            } => {
                assert_eq!(generation, 1);
                assert_eq!(reason, InvalidationReason::Write);
                assert_eq!(record_id, Some(4));
            }
            other => panic!("Expected Invalidated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_fetch_is_not_cached() {
        let cache = QueryCache::new();
        let fetched_at = cache.generation();
        cache.invalidate(InvalidationReason::TableChange, None).await;
        cache
            .put_records(None, WindowKey::All, fetched_at, vec![record(1)])
            .await;
        assert!(cache.records(None, WindowKey::All).await.is_none());
    }

    #[test]
    fn window_keys() {
        let now = Utc::now();
        assert_eq!(WindowKey::of(None), WindowKey::All);
        let preset = TimeRange::preset_at(Preset::Last30d, now);
        assert!(matches!(
            WindowKey::of(Some(&preset)),
            WindowKey::Preset(Preset::Last30d, _)
        ));
        let custom = TimeRange::custom(now - chrono::Duration::days(2), now).unwrap();
        assert!(matches!(WindowKey::of(Some(&custom)), WindowKey::Custom(..)));
    }

    #[test]
    fn preset_keys_roll_over_each_minute() {
        let base = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 5).unwrap();
        let key = |at| WindowKey::of(Some(&TimeRange::preset_at(Preset::Last24h, at)));

        assert_eq!(key(base), key(base + chrono::Duration::seconds(40)));
        assert_ne!(key(base), key(base + chrono::Duration::seconds(60)));
        assert_ne!(
            key(base),
            WindowKey::of(Some(&TimeRange::preset_at(Preset::Last7d, base)))
        );
    }

    #[test]
    fn event_json_shape() {
        let json = serde_json::to_value(DashboardEvent::Invalidated {
            generation: 3,
            reason: InvalidationReason::TableChange,
            record_id: None,
        })
        .unwrap();
        assert_eq!(json["type"], "invalidated");
        assert_eq!(json["reason"], "table_change");
    }
}
