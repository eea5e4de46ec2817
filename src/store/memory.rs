//! In-memory record store with a broadcast change feed.
//!
//! Mirrors the hosted store's semantics (queue filters, inclusive windows,
//! newest-first ordering, last-write-wins updates) for tests and local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RealtimeError, StoreError};
use crate::realtime::{ChangeCallback, ChangeEvent, ChangeFeed, ChangeKind, Subscription};
use crate::records::{Queue, Record, RecordUpdate, TimeRange};
use crate::store::traits::RecordStore;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

pub struct MemoryStore {
    table: String,
    records: RwLock<BTreeMap<i64, Record>>,
    next_id: AtomicI64,
    tx: broadcast::Sender<ChangeEvent>,
    updates: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new(table: impl Into<String>) -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            table: table.into(),
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            tx,
            updates: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Insert a record as an upstream producer would. An `id` of 0 is assigned
    /// by the store; a zero `created_at` becomes now.
    pub async fn insert(&self, mut record: Record) -> Record {
        if record.id == 0 {
            record.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        } else {
            self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
        }
        if record.created_at.timestamp() == 0 {
            record.created_at = Utc::now();
        }
        let id = record.id;
        self.records.write().await.insert(id, record.clone());
        self.notify(ChangeKind::Insert, Some(id));
        record
    }

    /// Number of update calls that reached the store.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Simulate an unreachable backend.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Request {
                table: self.table.clone(),
                reason: "store unavailable".into(),
            });
        }
        Ok(())
    }

    fn notify(&self, kind: ChangeKind, record_id: Option<i64>) {
        // Ok if nobody is subscribed
        let _ = self.tx.send(ChangeEvent {
            kind,
            table: self.table.clone(),
            record_id,
        });
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn table(&self) -> &str {
        &self.table
    }

    async fn list(
        &self,
        queue: Option<Queue>,
        window: Option<&TimeRange>,
    ) -> Result<Vec<Record>, StoreError> {
        self.check_available()?;
        let records = self.records.read().await;
        let mut matching: Vec<Record> = records
            .values()
            .filter(|r| queue.is_none_or(|q| q.matches(r)))
            .filter(|r| window.is_none_or(|w| w.contains(r.created_at)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching)
    }

    async fn get(&self, id: i64) -> Result<Option<Record>, StoreError> {
        self.check_available()?;
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(&self, id: i64, update: &RecordUpdate) -> Result<Record, StoreError> {
        self.check_available()?;
        self.updates.fetch_add(1, Ordering::SeqCst);

        let updated = {
            let mut records = self.records.write().await;
            let record = records.get_mut(&id).ok_or_else(|| StoreError::NotFound {
                table: self.table.clone(),
                id,
            })?;
            record.apply(update);
            record.clone()
        };

        debug!(record_id = id, "Record updated in memory");
        self.notify(ChangeKind::Update, Some(id));
        Ok(updated)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.check_available()?;
        if self.records.write().await.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                table: self.table.clone(),
                id,
            });
        }
        self.notify(ChangeKind::Delete, Some(id));
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(&self, callback: ChangeCallback) -> Result<Subscription, RealtimeError> {
        let mut rx = self.tx.subscribe();
        let name = format!("memory:{}:{}", self.table, Uuid::new_v4());

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Change feed subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(name, task))
    }
}
