//! Composition root for the store connection, the session and live updates.
//!
//! A store client exists only while a store is configured *and* a reviewer is
//! signed in. Configuring, signing in, signing out and disconnecting all
//! rebuild (or drop) the connection; dropping it cancels the change-feed
//! subscription and the polling fallback with it.

pub mod cache;
pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::{IdentityProvider, Session, SessionInfo};
use crate::config::{ServerConfig, StoreConfig, StoreConfigView};
use crate::error::{AuthError, ConfigError, Result, StoreError};
use crate::realtime::{
    ChangeCallback, ChangeFeed, PhoenixChangeFeed, PollHandle, Subscription, spawn_poll_fallback,
};
use crate::records::{
    ChartSlice, Comparison, Metric, Metrics, Mutation, Queue, QueueCount, Record, ReviewAction,
    TimeRange, plan,
};
use crate::store::{PostgrestStore, RecordStore};

use cache::{DashboardEvent, InvalidationReason, QueryCache, WindowKey};

/// A live store client and the feed for the same table.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn RecordStore>,
    pub feed: Arc<dyn ChangeFeed>,
}

/// Builds a [`Backend`] from a store config.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &StoreConfig) -> Backend;
}

/// Connects to the hosted REST API and realtime socket.
pub struct HostedConnector;

impl Connector for HostedConnector {
    fn connect(&self, config: &StoreConfig) -> Backend {
        Backend {
            store: Arc::new(PostgrestStore::new(config.clone())),
            feed: Arc::new(PhoenixChangeFeed::new(config.clone())),
        }
    }
}

/// Runtime options taken from [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub config_path: PathBuf,
    pub poll_interval: Duration,
    pub realtime_enabled: bool,
}

impl From<&ServerConfig> for DashboardOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            config_path: config.config_path.clone(),
            poll_interval: config.poll_interval,
            realtime_enabled: config.realtime_enabled,
        }
    }
}

struct Connection {
    backend: Backend,
    subscription: Option<Subscription>,
    _poll: PollHandle,
}

#[derive(Default)]
struct DashboardState {
    config: Option<StoreConfig>,
    session: Option<Session>,
    connection: Option<Connection>,
    /// Bumped every time a connection is built.
    connection_epoch: u64,
    realtime_enabled: bool,
}

/// Outcome of a reviewer action.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Updated { record: Record },
    Deleted { id: i64 },
}

/// Counters and chart data for one window.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub window: TimeRange,
    pub metrics: Metrics,
    pub permission_breakdown: Vec<ChartSlice>,
    pub status_breakdown: Vec<ChartSlice>,
}

/// Live-update status, as reported to clients.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RealtimeStatus {
    pub enabled: bool,
    pub subscribed: bool,
}

pub struct Dashboard {
    options: DashboardOptions,
    identity: Arc<dyn IdentityProvider>,
    connector: Arc<dyn Connector>,
    cache: Arc<QueryCache>,
    state: RwLock<DashboardState>,
}

impl Dashboard {
    /// Create a dashboard, picking up any store config persisted earlier.
    pub fn new(
        options: DashboardOptions,
        identity: Arc<dyn IdentityProvider>,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>> {
        let config = StoreConfig::load(&options.config_path)?;
        if let Some(config) = &config {
            info!(table = %config.table_name, "Loaded saved store config");
        }
        let state = DashboardState {
            config,
            realtime_enabled: options.realtime_enabled,
            ..Default::default()
        };
        Ok(Arc::new(Self {
            options,
            identity,
            connector,
            cache: QueryCache::new(),
            state: RwLock::new(state),
        }))
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// The event a newly connected WebSocket client receives first.
    pub async fn hello(&self) -> DashboardEvent {
        let state = self.state.read().await;
        DashboardEvent::Hello {
            generation: self.cache.generation(),
            realtime: state.realtime_enabled,
        }
    }

    // ── Session ─────────────────────────────────────────────────────────

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.identity.sign_in(email.trim(), password).await?;
        self.state.write().await.session = Some(session.clone());
        self.reconnect().await;
        Ok(session)
    }

    /// Sign out. Drops the store client and stops live updates even if the
    /// identity provider cannot be reached.
    pub async fn sign_out(&self) {
        let session = {
            let mut state = self.state.write().await;
            state.connection = None;
            state.session.take()
        };
        self.cache.invalidate(InvalidationReason::Reconnect, None).await;

        if let Some(session) = session {
            if let Err(e) = self.identity.sign_out(&session).await {
                warn!(error = %e, "Upstream sign-out failed");
            }
            info!(email = %session.user_email, "Signed out");
        }
    }

    /// Check a bearer token against the current session.
    pub async fn authorize(&self, token: Option<&str>) -> std::result::Result<SessionInfo, AuthError> {
        let expired = {
            let state = self.state.read().await;
            let session = state.session.as_ref().ok_or(AuthError::NotSignedIn)?;
            if !token.is_some_and(|t| session.accepts(t)) {
                return Err(AuthError::NotSignedIn);
            }
            if !session.is_expired(Utc::now()) {
                return Ok(session.info());
            }
            session.user_email.clone()
        };

        warn!(email = %expired, "Session expired");
        let mut state = self.state.write().await;
        state.session = None;
        state.connection = None;
        drop(state);
        self.cache.invalidate(InvalidationReason::Reconnect, None).await;
        Err(AuthError::SessionExpired)
    }

    // ── Store configuration ─────────────────────────────────────────────

    pub async fn config_view(&self) -> Option<StoreConfigView> {
        self.state.read().await.config.as_ref().map(StoreConfig::view)
    }

    /// Persist a new store config and reconnect with it.
    pub async fn configure(&self, config: StoreConfig) -> Result<StoreConfigView> {
        config.save(&self.options.config_path)?;
        let view = config.view();
        self.state.write().await.config = Some(config);
        self.reconnect().await;
        Ok(view)
    }

    /// Forget the store config and drop the client.
    pub async fn disconnect(&self) -> Result<()> {
        StoreConfig::clear(&self.options.config_path)?;
        {
            let mut state = self.state.write().await;
            state.config = None;
            state.connection = None;
        }
        info!("Store disconnected");
        self.cache.invalidate(InvalidationReason::Reconnect, None).await;
        Ok(())
    }

    // ── Live updates ────────────────────────────────────────────────────

    pub async fn realtime_status(&self) -> RealtimeStatus {
        let state = self.state.read().await;
        RealtimeStatus {
            enabled: state.realtime_enabled,
            subscribed: state
                .connection
                .as_ref()
                .and_then(|c| c.subscription.as_ref())
                .is_some_and(Subscription::is_active),
        }
    }

    /// Turn the change-feed subscription on or off. Polling keeps running.
    pub async fn set_realtime(&self, enabled: bool) -> RealtimeStatus {
        let pending = {
            let mut state = self.state.write().await;
            state.realtime_enabled = enabled;
            let epoch = state.connection_epoch;
            match state.connection.as_mut() {
                Some(connection) if enabled => connection
                    .subscription
                    .is_none()
                    .then(|| (epoch, connection.backend.clone())),
                Some(connection) => {
                    if let Some(subscription) = connection.subscription.take() {
                        subscription.cancel();
                    }
                    None
                }
                None => None,
            }
        };
        if let Some((epoch, backend)) = pending {
            self.attach_feed(epoch, backend).await;
        }
        info!(enabled, "Realtime toggled");
        self.realtime_status().await
    }

    /// Rebuild the connection from the current config and session.
    ///
    /// The change feed is joined after the state lock is released, so a slow
    /// realtime endpoint only delays the caller.
    async fn reconnect(&self) {
        let pending = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            // Old subscription and poll task stop here
            state.connection = None;
            state.connection_epoch += 1;

            match (&state.config, &state.session) {
                (Some(config), Some(_)) => {
                    let backend = self.connector.connect(config);
                    let cache = Arc::clone(&self.cache);
                    let poll = spawn_poll_fallback(
                        self.options.poll_interval,
                        Arc::new(move || cache.invalidate_detached(InvalidationReason::Poll, None)),
                    );
                    info!(table = %config.table_name, "Store connected");
                    let pending = state
                        .realtime_enabled
                        .then(|| (state.connection_epoch, backend.clone()));
                    state.connection = Some(Connection {
                        backend,
                        subscription: None,
                        _poll: poll,
                    });
                    pending
                }
                _ => None,
            }
        };

        self.cache.invalidate(InvalidationReason::Reconnect, None).await;
        if let Some((epoch, backend)) = pending {
            self.attach_feed(epoch, backend).await;
        }
    }

    /// Join the change feed for `backend` and install the subscription, unless
    /// the connection was replaced or realtime was switched off meanwhile.
    async fn attach_feed(&self, epoch: u64, backend: Backend) {
        let Some(subscription) = subscribe(&backend, &self.cache).await else {
            return;
        };

        let mut state = self.state.write().await;
        let current = state.connection_epoch == epoch && state.realtime_enabled;
        match state.connection.as_mut() {
            Some(connection) if current && connection.subscription.is_none() => {
                connection.subscription = Some(subscription);
            }
            _ => {
                debug!(subscription = %subscription.name(), "Discarding change feed for a stale connection");
                subscription.cancel();
            }
        }
    }

    async fn store(&self) -> Result<Arc<dyn RecordStore>> {
        let state = self.state.read().await;
        if state.session.is_none() {
            return Err(AuthError::NotSignedIn.into());
        }
        state
            .connection
            .as_ref()
            .map(|c| Arc::clone(&c.backend.store))
            .ok_or_else(|| ConfigError::NotConfigured.into())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Records in `queue` (or all records), newest first.
    pub async fn records(&self, queue: Option<Queue>, window: Option<&TimeRange>) -> Result<Vec<Record>> {
        let store = self.store().await?;
        let key = WindowKey::of(window);
        if let Some(hit) = self.cache.records(queue, key).await {
            return Ok(hit);
        }

        let generation = self.cache.generation();
        let records = store.list(queue, window).await?;
        self.cache
            .put_records(queue, key, generation, records.clone())
            .await;
        Ok(records)
    }

    pub async fn metrics(&self, window: &TimeRange) -> Result<MetricsReport> {
        let metrics = self.window_metrics(window).await?;
        Ok(MetricsReport {
            window: *window,
            metrics,
            permission_breakdown: metrics.permission_breakdown(),
            status_breakdown: metrics.status_breakdown(),
        })
    }

    /// Compare `metric` in `window` against the preceding window of equal length.
    pub async fn compare(&self, metric: Metric, window: &TimeRange) -> Result<Comparison> {
        let current = self.window_metrics(window).await?;
        let previous = self.window_metrics(&window.previous()).await?;
        Ok(Comparison::between(metric, &current, &previous))
    }

    /// Current size of each active queue.
    pub async fn overview(&self) -> Result<Vec<QueueCount>> {
        let mut counts = Vec::with_capacity(Queue::ACTIVE.len());
        for queue in Queue::ACTIVE {
            let records = self.records(Some(queue), None).await?;
            counts.push(QueueCount {
                queue,
                title: queue.title().to_string(),
                count: records.len(),
            });
        }
        Ok(counts)
    }

    async fn window_metrics(&self, window: &TimeRange) -> Result<Metrics> {
        let store = self.store().await?;
        let key = WindowKey::of(Some(window));
        if let Some(hit) = self.cache.metrics(key).await {
            return Ok(hit);
        }

        let generation = self.cache.generation();
        let records = store.list(None, Some(window)).await?;
        let metrics = Metrics::from_records(&records);
        self.cache.put_metrics(key, generation, metrics).await;
        Ok(metrics)
    }

    // ── Actions ─────────────────────────────────────────────────────────

    /// Apply a reviewer action. Validation runs before any store call.
    pub async fn apply(&self, queue: Queue, id: i64, action: &ReviewAction) -> Result<ActionOutcome> {
        action.validate(queue)?;
        let store = self.store().await?;

        let record = store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                table: store.table().to_string(),
                id,
            })?;

        let outcome = match plan(queue, &record, action)? {
            Mutation::Update(update) => ActionOutcome::Updated {
                record: store.update(id, &update).await?,
            },
            Mutation::Delete => {
                store.delete(id).await?;
                ActionOutcome::Deleted { id }
            }
        };

        info!(record_id = id, queue = %queue, action = %action.kind(), "Action applied");
        self.cache
            .invalidate(InvalidationReason::Write, Some(id))
            .await;
        Ok(outcome)
    }
}

async fn subscribe(backend: &Backend, cache: &Arc<QueryCache>) -> Option<Subscription> {
    let cache = Arc::clone(cache);
    let callback: ChangeCallback = Arc::new(move |event| {
        cache.invalidate_detached(InvalidationReason::TableChange, event.record_id);
    });
    match backend.feed.subscribe(callback).await {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            warn!(error = %e, "Change feed unavailable, relying on polling");
            None
        }
    }
}
