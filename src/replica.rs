//! Replica synchronizer: the single owner of a process's local alert view.
//!
//! Holds one subscription against the store, diffs each delivered snapshot
//! against the local copy, and fans change events out to consumers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::models::alert::{Alert, AlertId, AlertStatus};
use crate::store::{AlertStore, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    Created(Alert),
    Updated { alert: Alert, previous: AlertStatus },
    Removed(AlertId),
}

/// Dashboard counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    /// pending + escalated
    pub active: usize,
    pub escalated: usize,
    pub assigned: usize,
    pub total: usize,
}

/// Process-local copy of the alert collection. Clones share the same view.
#[derive(Clone)]
pub struct Replica {
    alerts: Arc<DashMap<AlertId, Alert>>,
    events: broadcast::Sender<AlertEvent>,
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl Replica {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1000);
        Self {
            alerts: Arc::new(DashMap::new()),
            events,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        self.alerts.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// All alerts, newest first.
    pub fn list(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.alerts.iter().map(|e| e.value().clone()).collect();
        crate::store::order_snapshot(&mut alerts);
        alerts
    }

    pub fn with_status(&self, status: AlertStatus) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|e| e.value().status == status)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn stats(&self) -> ReplicaStats {
        let mut stats = ReplicaStats::default();
        for entry in self.alerts.iter() {
            stats.total += 1;
            match entry.value().status {
                AlertStatus::Pending => stats.active += 1,
                AlertStatus::Escalated => {
                    stats.active += 1;
                    stats.escalated += 1;
                }
                AlertStatus::Assigned => stats.assigned += 1,
                AlertStatus::Investigating | AlertStatus::Resolved => {}
            }
        }
        stats
    }

    /// Drops a record the store reported as gone.
    pub fn remove(&self, id: AlertId) {
        if self.alerts.remove(&id).is_some() {
            self.emit(AlertEvent::Removed(id));
        }
    }

    /// Reconciles the local view with a full store snapshot and returns the
    /// events emitted. Re-delivering the same snapshot emits nothing.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        let mut seen = HashSet::with_capacity(snapshot.len());

        for alert in snapshot {
            seen.insert(alert.id);
            let previous = self.alerts.get(&alert.id).map(|e| e.value().status);

            match previous {
                None => {
                    self.alerts.insert(alert.id, alert.clone());
                    events.push(AlertEvent::Created(alert));
                }
                Some(previous) if previous == alert.status => {
                    self.alerts.insert(alert.id, alert);
                }
                Some(previous) if alert.status.rank() > previous.rank() => {
                    self.alerts.insert(alert.id, alert.clone());
                    events.push(AlertEvent::Updated { alert, previous });
                }
                Some(previous) => {
                    warn!(
                        "Ignoring stale delivery for alert {}: {} after {}",
                        alert.id, alert.status, previous
                    );
                }
            }
        }

        let gone: Vec<AlertId> = self
            .alerts
            .iter()
            .map(|e| *e.key())
            .filter(|id| !seen.contains(id))
            .collect();
        for id in gone {
            self.alerts.remove(&id);
            events.push(AlertEvent::Removed(id));
        }

        for event in &events {
            self.emit(event.clone());
        }
        events
    }

    fn emit(&self, event: AlertEvent) {
        // No listeners is fine.
        let _ = self.events.send(event);
    }
}

/// Receives replica change events. Implementations must not block.
pub trait AlertListener: Send + Sync {
    fn on_created(&self, alert: &Alert);
    fn on_updated(&self, alert: &Alert, previous: AlertStatus);
    fn on_removed(&self, _id: AlertId) {}
}

/// Feeds replica events to `listener` until shutdown.
pub fn spawn_listener(
    replica: &Replica,
    listener: Arc<dyn AlertListener>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let mut events = replica.events();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = events.recv() => match event {
                    Ok(AlertEvent::Created(alert)) => listener.on_created(&alert),
                    Ok(AlertEvent::Updated { alert, previous }) => listener.on_updated(&alert, previous),
                    Ok(AlertEvent::Removed(id)) => listener.on_removed(id),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Alert listener lagged {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    })
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Pause before re-subscribing after the subscription is lost.
    pub resubscribe_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            resubscribe_delay: Duration::from_secs(2),
        }
    }
}

pub struct ReplicaSynchronizer {
    store: Arc<dyn AlertStore>,
    replica: Replica,
    settings: SyncSettings,
}

impl ReplicaSynchronizer {
    pub fn new(store: Arc<dyn AlertStore>, settings: SyncSettings) -> Self {
        Self {
            store,
            replica: Replica::new(),
            settings,
        }
    }

    pub fn replica(&self) -> Replica {
        self.replica.clone()
    }

    /// Keeps the replica subscribed until shutdown, re-subscribing whenever the
    /// stream ends or fails.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut subscriptions = 0u64;

        loop {
            subscriptions += 1;
            let outcome = tokio::select! {
                _ = shutdown.recv() => break,
                outcome = self.follow(subscriptions) => outcome,
            };

            match outcome {
                Ok(()) => warn!("Alert subscription ended"),
                Err(e) => error!("Alert subscription failed: {}", e),
            }

            info!(
                "Re-subscribing in {:?} (subscription #{})",
                self.settings.resubscribe_delay,
                subscriptions + 1
            );
            tokio::select! {
                _ = sleep(self.settings.resubscribe_delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Replica synchronizer stopped");
    }

    /// Drains one subscription. Every snapshot is a full view of the store, so
    /// the first one after a re-subscribe simply overwrites whatever the
    /// replica held.
    async fn follow(&self, subscription: u64) -> Result<(), StoreError> {
        let mut stream = self.store.subscribe().await?;
        info!("Alert subscription #{} established", subscription);

        while let Some(snapshot) = stream.next().await {
            let snapshot = snapshot?;
            let events = self.replica.apply_snapshot(snapshot);
            if !events.is_empty() {
                debug!("Applied snapshot with {} change(s)", events.len());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::{AlertKind, NewAlert};
    use crate::store::{MemoryStore, StatusPatch};
    use chrono::Utc;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn alert(status: AlertStatus) -> Alert {
        let new = NewAlert::new(Uuid::new_v4(), "B3", "24", AlertKind::EmergencySos, "theft").unwrap();
        let mut alert = Alert::accept(new, Uuid::new_v4(), Utc::now());
        alert.status = status;
        alert
    }

    fn with_status(alert: &Alert, status: AlertStatus) -> Alert {
        let mut next = alert.clone();
        next.status = status;
        next
    }

    async fn next_event(rx: &mut broadcast::Receiver<AlertEvent>) -> AlertEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no event within 2s")
            .unwrap()
    }

    #[test]
    fn test_diff_emits_created_then_updated() {
        let replica = Replica::new();
        let a = alert(AlertStatus::Pending);

        let events = replica.apply_snapshot(vec![a.clone()]);
        assert_eq!(events, vec![AlertEvent::Created(a.clone())]);

        let escalated = with_status(&a, AlertStatus::Escalated);
        let events = replica.apply_snapshot(vec![escalated.clone()]);
        assert_eq!(
            events,
            vec![AlertEvent::Updated {
                alert: escalated,
                previous: AlertStatus::Pending
            }]
        );
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let replica = Replica::new();
        let a = alert(AlertStatus::Assigned);
        replica.apply_snapshot(vec![a.clone()]);
        assert!(replica.apply_snapshot(vec![a.clone()]).is_empty());
        assert!(replica.apply_snapshot(vec![a]).is_empty());
    }

    #[test]
    fn test_stale_status_never_reaches_consumers() {
        let replica = Replica::new();
        let a = alert(AlertStatus::Escalated);
        replica.apply_snapshot(vec![a.clone()]);

        let stale = with_status(&a, AlertStatus::Pending);
        assert!(replica.apply_snapshot(vec![stale]).is_empty());
        assert_eq!(replica.get(a.id).unwrap().status, AlertStatus::Escalated);
    }

    #[test]
    fn test_missing_alert_is_removed() {
        let replica = Replica::new();
        let a = alert(AlertStatus::Pending);
        let b = alert(AlertStatus::Resolved);
        replica.apply_snapshot(vec![a.clone(), b.clone()]);

        let events = replica.apply_snapshot(vec![b]);
        assert_eq!(events, vec![AlertEvent::Removed(a.id)]);
        assert_eq!(replica.len(), 1);
    }

    #[test]
    fn test_stats() {
        let replica = Replica::new();
        replica.apply_snapshot(vec![
            alert(AlertStatus::Pending),
            alert(AlertStatus::Escalated),
            alert(AlertStatus::Escalated),
            alert(AlertStatus::Assigned),
            alert(AlertStatus::Resolved),
        ]);
        assert_eq!(
            replica.stats(),
            ReplicaStats {
                active: 3,
                escalated: 2,
                assigned: 1,
                total: 5
            }
        );
    }

    #[tokio::test]
    async fn test_synchronizer_follows_store_and_recovers_from_disconnect() {
        let store = MemoryStore::default();
        let sync = Arc::new(ReplicaSynchronizer::new(
            Arc::new(store.clone()),
            SyncSettings {
                resubscribe_delay: Duration::from_millis(10),
            },
        ));
        let replica = sync.replica();
        let mut events = replica.events();
        let (shutdown_tx, _) = broadcast::channel(1);
        let task = {
            let sync = sync.clone();
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { sync.run(shutdown).await })
        };

        let new = NewAlert::new(Uuid::new_v4(), "S1", "3", AlertKind::EmergencySos, "harassment").unwrap();
        let created = store.create(new).await.unwrap();
        assert_eq!(next_event(&mut events).await, AlertEvent::Created(created.clone()));

        // Lose the subscription, then change state while it is down.
        store.disconnect_subscribers();
        store
            .conditional_update(
                created.id,
                &[AlertStatus::Pending],
                StatusPatch::status(AlertStatus::Escalated),
            )
            .await
            .unwrap();

        match next_event(&mut events).await {
            AlertEvent::Updated { alert, previous } => {
                assert_eq!(previous, AlertStatus::Pending);
                assert_eq!(alert.status, AlertStatus::Escalated);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // A fresh subscription re-delivers the same state without new events.
        store.disconnect_subscribers();
        sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
