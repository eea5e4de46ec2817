//! Change notifications on the record table.
//!
//! A [`ChangeFeed`] accepts a callback and returns a [`Subscription`]; the
//! polling fallback is a separate [`PollHandle`]. Dropping either handle
//! cancels its task. Events are not buffered: a consumer reacts by
//! re-fetching current state.

pub mod phoenix;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::RealtimeError;

pub use phoenix::PhoenixChangeFeed;

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single table change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    /// Affected row, when the notification carries it.
    pub record_id: Option<i64>,
}

/// Callback invoked for every change notification.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Source of change notifications for one table.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Start delivering notifications to `callback` until the returned
    /// subscription is cancelled or dropped.
    async fn subscribe(&self, callback: ChangeCallback) -> Result<Subscription, RealtimeError>;
}

/// Cancellation handle for a change-feed subscription.
pub struct Subscription {
    name: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the feed task is still delivering.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop delivering notifications.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(subscription = %self.name, "Change feed subscription cancelled");
        self.task.abort();
    }
}

/// Cancellation handle for the polling fallback.
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a background task that calls `on_tick` every `interval`.
///
/// The first call happens one full interval after spawning.
pub fn spawn_poll_fallback(
    interval: Duration,
    on_tick: Arc<dyn Fn() + Send + Sync>,
) -> PollHandle {
    let task = tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            ticker.tick().await;
            debug!("Polling fallback tick");
            on_tick();
        }
    });
    PollHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn poll_fallback_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = spawn_poll_fallback(
            Duration::from_secs(30),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_subscription_aborts_task() {
        let task = tokio::spawn(std::future::pending::<()>());
        let sub = Subscription::new("test", task);
        assert!(sub.is_active());
        assert_eq!(sub.name(), "test");
        sub.cancel();
    }
}
