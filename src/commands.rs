//! Operator commands (assign, mark investigating, resolve).
//!
//! Each command checks the edge against the locally observed status first, so
//! an invalid transition never reaches the store. An alert the replica has not
//! seen yet goes straight to the store, which decides. The write itself is the same
//! compare-and-set the sweeper uses; losing it means another console got there
//! first. The replica is not touched on success; the next snapshot carries the
//! canonical state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::CommandError;
use crate::models::alert::{Alert, AlertId, AlertStatus};
use crate::models::message::OperatorAction;
use crate::replica::Replica;
use crate::store::{AlertStore, StatusPatch, UpdateOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied(Alert),
    /// Someone else moved the alert first.
    AlreadyHandled { current: AlertStatus },
}

#[derive(Clone)]
pub struct CommandHandler {
    store: Arc<dyn AlertStore>,
    replica: Replica,
}

impl CommandHandler {
    pub fn new(store: Arc<dyn AlertStore>, replica: Replica) -> Self {
        Self { store, replica }
    }

    pub async fn assign(&self, id: AlertId) -> Result<CommandOutcome, CommandError> {
        self.transition(id, AlertStatus::Assigned).await
    }

    pub async fn investigate(&self, id: AlertId) -> Result<CommandOutcome, CommandError> {
        self.transition(id, AlertStatus::Investigating).await
    }

    pub async fn resolve(&self, id: AlertId) -> Result<CommandOutcome, CommandError> {
        self.transition(id, AlertStatus::Resolved).await
    }

    pub async fn execute(
        &self,
        id: AlertId,
        action: OperatorAction,
    ) -> Result<CommandOutcome, CommandError> {
        match action {
            OperatorAction::Assign => self.assign(id).await,
            OperatorAction::Investigate => self.investigate(id).await,
            OperatorAction::Resolve => self.resolve(id).await,
        }
    }

    async fn transition(
        &self,
        id: AlertId,
        target: AlertStatus,
    ) -> Result<CommandOutcome, CommandError> {
        let observed = self.replica.get(id).map(|alert| alert.status);
        match observed {
            Some(from) if !from.can_transition_to(target) => {
                return Err(CommandError::InvalidTransition { from, to: target });
            }
            Some(_) => {}
            None => debug!("Alert {} not in local view yet, asking the store", id),
        }

        let expected = AlertStatus::sources_of(target);
        let outcome = self
            .store
            .conditional_update(id, expected, StatusPatch::status(target))
            .await
            .map_err(|e| {
                warn!("{} on alert {} failed: {}", target, id, e);
                CommandError::from(e)
            })?;

        match outcome {
            UpdateOutcome::Applied(alert) => {
                info!("Alert {} -> {}", id, alert.status);
                Ok(CommandOutcome::Applied(alert))
            }
            // Unchecked locally and not far enough along for this command.
            UpdateOutcome::Conflict { current }
                if observed.is_none() && current.rank() < target.rank() =>
            {
                Err(CommandError::InvalidTransition {
                    from: current,
                    to: target,
                })
            }
            UpdateOutcome::Conflict { current } => {
                info!("Alert {} already handled (now {})", id, current);
                Ok(CommandOutcome::AlreadyHandled { current })
            }
            UpdateOutcome::NotFound => {
                self.replica.remove(id);
                Err(CommandError::NotFound(id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::alert::{AlertKind, NewAlert, Priority};
    use crate::store::MemoryStore;
    use crate::sweeper::{EscalationPolicy, EscalationSweeper};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    async fn setup(category: &str) -> (MemoryStore, CommandHandler, Alert) {
        let store = MemoryStore::default();
        let new = NewAlert::new(Uuid::new_v4(), "B3", "24", AlertKind::EmergencySos, category).unwrap();
        let alert = store.create(new).await.unwrap();
        let replica = Replica::new();
        replica.apply_snapshot(store.snapshot());
        let handler = CommandHandler::new(Arc::new(store.clone()), replica);
        (store, handler, alert)
    }

    fn refresh(store: &MemoryStore, handler: &CommandHandler) {
        handler.replica.apply_snapshot(store.snapshot());
    }

    #[tokio::test]
    async fn test_concurrent_assign_has_one_winner() {
        let (store, first, alert) = setup("theft").await;
        let second_replica = Replica::new();
        second_replica.apply_snapshot(store.snapshot());
        let second = CommandHandler::new(Arc::new(store.clone()), second_replica);

        let (a, b) = tokio::join!(first.assign(alert.id), second.assign(alert.id));
        let outcomes = [a.unwrap(), b.unwrap()];

        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, CommandOutcome::Applied(_)))
            .count();
        assert_eq!(applied, 1);
        assert!(outcomes.contains(&CommandOutcome::AlreadyHandled {
            current: AlertStatus::Assigned
        }));
        assert_eq!(store.get(alert.id).unwrap().status, AlertStatus::Assigned);
    }

    #[tokio::test]
    async fn test_invalid_transition_never_reaches_store() {
        let (store, handler, alert) = setup("theft").await;
        store.fail_next_updates(1);

        // pending -> resolved is not an edge; the injected failure stays unconsumed.
        assert!(matches!(
            handler.resolve(alert.id).await,
            Err(CommandError::InvalidTransition {
                from: AlertStatus::Pending,
                to: AlertStatus::Resolved
            })
        ));
        assert!(matches!(
            handler.assign(alert.id).await,
            Err(CommandError::Transport(_))
        ));
        assert_eq!(store.get(alert.id).unwrap().status, AlertStatus::Pending);
    }

    #[tokio::test]
    async fn test_transport_error_leaves_local_view_unchanged() {
        let (store, handler, alert) = setup("harassment").await;
        store.fail_next_updates(1);

        assert!(matches!(
            handler.assign(alert.id).await,
            Err(CommandError::Transport(_))
        ));
        assert_eq!(
            handler.replica.get(alert.id).unwrap().status,
            AlertStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_unknown_alert_is_not_found() {
        let (_store, handler, _alert) = setup("theft").await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            handler.assign(missing).await,
            Err(CommandError::NotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_store_side_deletion_drops_local_copy() {
        let (store, handler, alert) = setup("theft").await;
        store.purge(alert.id);

        assert!(matches!(
            handler.assign(alert.id).await,
            Err(CommandError::NotFound(_))
        ));
        assert!(handler.replica.get(alert.id).is_none());
    }

    #[tokio::test]
    async fn test_assign_investigate_resolve() {
        let (store, handler, alert) = setup("theft").await;

        handler.assign(alert.id).await.unwrap();
        refresh(&store, &handler);
        handler.investigate(alert.id).await.unwrap();
        refresh(&store, &handler);
        let outcome = handler.resolve(alert.id).await.unwrap();
        assert!(matches!(outcome, CommandOutcome::Applied(ref a) if a.status == AlertStatus::Resolved));
    }

    #[tokio::test]
    async fn test_full_escalation_lifecycle() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryStore::new(clock.clone());
        let replica = Replica::new();
        let sweeper = EscalationSweeper::new(
            Arc::new(store.clone()),
            replica.clone(),
            clock.clone(),
            EscalationPolicy::default(),
        );
        let handler = CommandHandler::new(Arc::new(store.clone()), replica.clone());

        let new = NewAlert::new(Uuid::new_v4(), "S4", "12", AlertKind::EmergencySos, "medical_emergency")
            .unwrap();
        let alert = store.create(new).await.unwrap();
        assert_eq!(alert.priority, Priority::High);
        assert_eq!(alert.status, AlertStatus::Pending);
        replica.apply_snapshot(store.snapshot());

        clock.advance(Duration::seconds(125));
        assert_eq!(sweeper.tick().await.escalated, vec![alert.id]);
        replica.apply_snapshot(store.snapshot());

        let assigned = handler.assign(alert.id).await.unwrap();
        assert!(matches!(assigned, CommandOutcome::Applied(ref a) if a.status == AlertStatus::Assigned));
        replica.apply_snapshot(store.snapshot());

        let resolved = handler.resolve(alert.id).await.unwrap();
        assert!(matches!(resolved, CommandOutcome::Applied(ref a) if a.status == AlertStatus::Resolved));
        replica.apply_snapshot(store.snapshot());

        assert!(matches!(
            handler.resolve(alert.id).await,
            Err(CommandError::InvalidTransition {
                from: AlertStatus::Resolved,
                to: AlertStatus::Resolved
            })
        ));

        // Re-delivering the whole history changes nothing.
        assert!(replica.apply_snapshot(store.snapshot()).is_empty());
        let stored = store.get(alert.id).unwrap();
        assert_eq!(stored.status, AlertStatus::Resolved);
        assert_eq!(stored.priority, Priority::High);
        assert_eq!(stored.created_at, alert.created_at);
    }

    #[tokio::test]
    async fn test_command_before_first_snapshot_goes_to_store() {
        let store = MemoryStore::default();
        let new = NewAlert::new(Uuid::new_v4(), "C1", "7", AlertKind::EmergencySos, "theft").unwrap();
        let alert = store.create(new).await.unwrap();
        let handler = CommandHandler::new(Arc::new(store.clone()), Replica::new());

        let outcome = handler.assign(alert.id).await.unwrap();
        assert!(matches!(outcome, CommandOutcome::Applied(ref a) if a.status == AlertStatus::Assigned));
        assert_eq!(store.get(alert.id).unwrap().status, AlertStatus::Assigned);

        assert_eq!(
            handler.assign(alert.id).await.unwrap(),
            CommandOutcome::AlreadyHandled {
                current: AlertStatus::Assigned
            }
        );
    }

    #[tokio::test]
    async fn test_unseen_alert_still_rejects_invalid_edge() {
        let store = MemoryStore::default();
        let new = NewAlert::new(Uuid::new_v4(), "C1", "8", AlertKind::EmergencySos, "theft").unwrap();
        let alert = store.create(new).await.unwrap();
        let handler = CommandHandler::new(Arc::new(store.clone()), Replica::new());

        assert!(matches!(
            handler.resolve(alert.id).await,
            Err(CommandError::InvalidTransition {
                from: AlertStatus::Pending,
                to: AlertStatus::Resolved
            })
        ));
        assert_eq!(store.get(alert.id).unwrap().status, AlertStatus::Pending);
    }
}
