use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::models::alert::{Alert, AlertId, AlertStatus, NewAlert};
use crate::store::{
    alert_id_for, order_snapshot, AlertStore, Snapshot, SnapshotStream, StatusPatch,
    UpdateOutcome,
};

struct Inner {
    alerts: HashMap<AlertId, Alert>,
    snapshot_tx: broadcast::Sender<Snapshot>,
    #[cfg(test)]
    failing_updates: usize,
}

impl Inner {
    fn snapshot(&self) -> Snapshot {
        let mut alerts: Snapshot = self.alerts.values().cloned().collect();
        order_snapshot(&mut alerts);
        alerts
    }

    #[cfg(test)]
    fn take_injected_failure(&mut self) -> bool {
        if self.failing_updates > 0 {
            self.failing_updates -= 1;
            true
        } else {
            false
        }
    }

    #[cfg(not(test))]
    fn take_injected_failure(&mut self) -> bool {
        false
    }

    fn publish(&self) {
        // No subscribers is fine.
        let _ = self.snapshot_tx.send(self.snapshot());
    }
}

/// In-process store with the same compare-and-set semantics as the database
/// backend. Every accepted write broadcasts a full snapshot.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (snapshot_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                alerts: HashMap::new(),
                snapshot_tx,
                #[cfg(test)]
                failing_updates: 0,
            })),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        self.lock().alerts.get(&id).cloned()
    }

    /// Makes the next `n` conditional updates fail as if the store were unreachable.
    #[cfg(test)]
    pub fn fail_next_updates(&self, n: usize) {
        self.lock().failing_updates = n;
    }

    /// Drops every open subscription stream.
    #[cfg(test)]
    pub fn disconnect_subscribers(&self) {
        let (snapshot_tx, _) = broadcast::channel(256);
        self.lock().snapshot_tx = snapshot_tx;
    }

    /// Removes a record behind everyone's back, as an external archiver would.
    #[cfg(test)]
    pub fn purge(&self, id: AlertId) {
        let mut inner = self.lock();
        inner.alerts.remove(&id);
        inner.publish();
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn create(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let id = alert_id_for(alert.submission_id);
        let mut inner = self.lock();

        if let Some(existing) = inner.alerts.get(&id) {
            debug!("Duplicate submission {} for alert {}", alert.submission_id, id);
            return Ok(existing.clone());
        }

        let stored = Alert::accept(alert, id, self.clock.now());
        inner.alerts.insert(id, stored.clone());
        inner.publish();
        Ok(stored)
    }

    async fn subscribe(&self) -> Result<SnapshotStream, StoreError> {
        let (initial, rx) = {
            let inner = self.lock();
            (inner.snapshot(), inner.snapshot_tx.subscribe())
        };
        let store = self.inner.clone();

        let updates = stream::unfold((rx, store), |(mut rx, store)| async move {
            match rx.recv().await {
                Ok(snapshot) => Some((Ok(snapshot), (rx, store))),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Snapshots are full state; skip the backlog and hand out the latest.
                    debug!("Memory subscription lagged {} snapshots", n);
                    let current = store.lock().unwrap_or_else(PoisonError::into_inner).snapshot();
                    Some((Ok(current), (rx, store)))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        Ok(stream::once(async move { Ok(initial) }).chain(updates).boxed())
    }

    async fn conditional_update(
        &self,
        id: AlertId,
        expected: &[AlertStatus],
        patch: StatusPatch,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut inner = self.lock();

        if inner.take_injected_failure() {
            return Err(StoreError::Transport("injected failure".into()));
        }

        let now = self.clock.now();
        let outcome = match inner.alerts.get_mut(&id) {
            None => UpdateOutcome::NotFound,
            Some(alert) if expected.contains(&alert.status) => {
                alert.status = patch.status;
                alert.updated_at = now;
                UpdateOutcome::Applied(alert.clone())
            }
            Some(alert) => UpdateOutcome::Conflict {
                current: alert.status,
            },
        };

        if matches!(outcome, UpdateOutcome::Applied(_)) {
            inner.publish();
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::alert::AlertKind;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn sos(category: &str) -> NewAlert {
        NewAlert::new(Uuid::new_v4(), "B3", "24", AlertKind::EmergencySos, category).unwrap()
    }

    #[tokio::test]
    async fn test_create_stamps_server_time_and_dedupes() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryStore::new(clock.clone());

        let new = sos("theft");
        let first = store.create(new.clone()).await.unwrap();
        assert_eq!(first.created_at, start);
        assert_eq!(first.id, alert_id_for(new.submission_id));

        clock.advance(Duration::seconds(30));
        let again = store.create(new).await.unwrap();
        assert_eq!(again, first);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_conditional_update_outcomes() {
        let store = MemoryStore::default();
        let alert = store.create(sos("harassment")).await.unwrap();
        let escalate = StatusPatch::status(AlertStatus::Escalated);

        let won = store
            .conditional_update(alert.id, &[AlertStatus::Pending], escalate)
            .await
            .unwrap();
        assert!(matches!(won, UpdateOutcome::Applied(ref a) if a.status == AlertStatus::Escalated));

        let lost = store
            .conditional_update(alert.id, &[AlertStatus::Pending], escalate)
            .await
            .unwrap();
        assert_eq!(
            lost,
            UpdateOutcome::Conflict {
                current: AlertStatus::Escalated
            }
        );

        let missing = store
            .conditional_update(Uuid::new_v4(), &[AlertStatus::Pending], escalate)
            .await
            .unwrap();
        assert_eq!(missing, UpdateOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_subscription_delivers_initial_and_subsequent_snapshots() {
        let store = MemoryStore::default();
        let first = store.create(sos("theft")).await.unwrap();

        let mut stream = store.subscribe().await.unwrap();
        let initial = stream.next().await.unwrap().unwrap();
        assert_eq!(initial, vec![first.clone()]);

        store.create(sos("medical_emergency")).await.unwrap();
        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next.len(), 2);
        assert!(next[0].created_at >= next[1].created_at);

        store.disconnect_subscribers();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_transport_failure() {
        let store = MemoryStore::default();
        let alert = store.create(sos("theft")).await.unwrap();
        store.fail_next_updates(1);

        let patch = StatusPatch::status(AlertStatus::Assigned);
        assert!(matches!(
            store
                .conditional_update(alert.id, &[AlertStatus::Pending], patch)
                .await,
            Err(StoreError::Transport(_))
        ));
        assert_eq!(store.get(alert.id).unwrap().status, AlertStatus::Pending);
        assert!(store
            .conditional_update(alert.id, &[AlertStatus::Pending], patch)
            .await
            .is_ok());
    }
}
