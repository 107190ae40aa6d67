//! Store liveness probing.
//!
//! Feeds "service degraded" indicators. Runs on its own schedule and is never
//! consulted on the authorization path.

use crate::journal::{Journal, JournalEvent, JournalEventKind};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use warden_store::{DocumentStore, StoreError};

/// Health status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Store answered the last probe.
    Up,
    /// Store failed the last probe.
    Down,
    /// No probe has completed yet.
    Unknown,
}

/// Latest known store health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    /// Current status.
    pub status: HealthStatus,
    /// Latency of the last successful probe in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Failed probes since the last success.
    pub consecutive_failures: u32,
    /// Error of the last failed probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for StoreHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            latency_ms: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Periodic store liveness probe.
pub struct StoreHeartbeat<S> {
    store: Arc<S>,
    probe_timeout: Duration,
    journal: Arc<Journal>,
    health: RwLock<StoreHealth>,
}

impl<S: DocumentStore + 'static> StoreHeartbeat<S> {
    /// Create a heartbeat whose probes give up after `probe_timeout`.
    pub fn new(store: Arc<S>, probe_timeout: Duration, journal: Arc<Journal>) -> Self {
        Self {
            store,
            probe_timeout,
            journal,
            health: RwLock::new(StoreHealth::default()),
        }
    }

    /// Latest known health.
    pub fn health(&self) -> StoreHealth {
        self.health.read().clone()
    }

    /// Whether a degraded-service banner should be shown.
    pub fn is_degraded(&self) -> bool {
        self.health.read().status == HealthStatus::Down
    }

    /// Probe the store once and update the recorded health.
    pub async fn probe(&self) -> StoreHealth {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.probe_timeout, self.store.ping()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.probe_timeout)),
        };

        let (previous, current) = {
            let mut health = self.health.write();
            let previous = health.status;
            match &result {
                Ok(()) => {
                    *health = StoreHealth {
                        status: HealthStatus::Up,
                        latency_ms: Some(started.elapsed().as_millis() as u64),
                        consecutive_failures: 0,
                        last_error: None,
                    };
                }
                Err(e) => {
                    health.status = HealthStatus::Down;
                    health.latency_ms = None;
                    health.consecutive_failures += 1;
                    health.last_error = Some(e.to_string());
                }
            }
            (previous, health.clone())
        };

        match (previous, current.status) {
            (HealthStatus::Up | HealthStatus::Unknown, HealthStatus::Down) => {
                self.journal.record(JournalEvent::new(
                    JournalEventKind::StoreDegraded,
                    "heartbeat",
                    "document-store",
                    current.last_error.clone().unwrap_or_default(),
                ));
            }
            (HealthStatus::Down, HealthStatus::Up) => {
                self.journal.record(JournalEvent::new(
                    JournalEventKind::StoreRecovered,
                    "heartbeat",
                    "document-store",
                    "probe succeeded",
                ));
            }
            _ => {}
        }
        current
    }

    /// Probe every `every` until `shutdown` flips to true or its sender is
    /// dropped.
    pub fn spawn(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.probe().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_store::MemoryDocumentStore;

    fn heartbeat() -> (Arc<MemoryDocumentStore>, Arc<StoreHeartbeat<MemoryDocumentStore>>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let heartbeat = Arc::new(StoreHeartbeat::new(
            Arc::clone(&store),
            Duration::from_secs(1),
            Arc::new(Journal::new()),
        ));
        (store, heartbeat)
    }

    #[tokio::test]
    async fn test_transitions_are_journaled() {
        let (store, heartbeat) = heartbeat();
        assert_eq!(heartbeat.health().status, HealthStatus::Unknown);

        assert_eq!(heartbeat.probe().await.status, HealthStatus::Up);
        assert!(!heartbeat.is_degraded());

        store.set_offline(true);
        heartbeat.probe().await;
        let health = heartbeat.probe().await;
        assert_eq!(health.status, HealthStatus::Down);
        assert_eq!(health.consecutive_failures, 2);
        assert!(heartbeat.is_degraded());

        store.set_offline(false);
        heartbeat.probe().await;
        assert!(!heartbeat.is_degraded());

        let journal = &heartbeat.journal;
        assert_eq!(journal.by_kind(JournalEventKind::StoreDegraded).len(), 1);
        assert_eq!(journal.by_kind(JournalEventKind::StoreRecovered).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_heartbeat_stops_on_shutdown() {
        let (store, heartbeat) = heartbeat();
        store.set_offline(true);

        let (tx, rx) = watch::channel(false);
        let handle = Arc::clone(&heartbeat).spawn(Duration::from_secs(10), rx);
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(heartbeat.health().consecutive_failures, 3);

        drop(tx);
        handle.await.unwrap();
    }
}
