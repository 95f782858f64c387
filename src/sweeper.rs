//! Escalation sweeper.
//!
//! Every process holding a live replica runs one. Each tick escalates the
//! locally known `pending` alerts whose grace period has run out, using a
//! compare-and-set conditioned on `pending`. Many processes race on the same
//! alerts; the store lets exactly one write through and everyone else sees a
//! conflict, which is the expected outcome and not an error.
//!
//! Within one process an alert has at most one escalation write outstanding:
//! ids are claimed for the duration of the write and skipped by later ticks
//! until it settles.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::models::alert::{Alert, AlertId, AlertStatus};
use crate::models::countdown;
use crate::replica::Replica;
use crate::store::{AlertStore, StatusPatch, UpdateOutcome};

#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    /// How long an alert may stay pending.
    pub grace: chrono::Duration,
    pub interval: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            grace: chrono::Duration::seconds(120),
            interval: Duration::from_secs(5),
        }
    }
}

impl EscalationPolicy {
    pub fn is_overdue(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        alert.status == AlertStatus::Pending && now - alert.created_at > self.grace
    }

    /// Display-only countdown for a pending alert.
    pub fn remaining(&self, alert: &Alert, now: DateTime<Utc>) -> chrono::Duration {
        countdown::remaining(alert.created_at, now, self.grace)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub escalated: Vec<AlertId>,
    /// Lost the race to another writer.
    pub already_handled: usize,
    pub missing: usize,
    /// Store unreachable; picked up again next tick.
    pub failed: usize,
}

impl SweepReport {
    pub fn attempts(&self) -> usize {
        self.escalated.len() + self.already_handled + self.missing + self.failed
    }
}

/// Releases a claimed id when its write settles or the tick is cancelled.
struct InFlight<'a> {
    ids: &'a DashSet<AlertId>,
    id: AlertId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ids.remove(&self.id);
    }
}

pub struct EscalationSweeper {
    store: Arc<dyn AlertStore>,
    replica: Replica,
    clock: Arc<dyn Clock>,
    policy: EscalationPolicy,
    in_flight: DashSet<AlertId>,
}

impl EscalationSweeper {
    pub fn new(
        store: Arc<dyn AlertStore>,
        replica: Replica,
        clock: Arc<dyn Clock>,
        policy: EscalationPolicy,
    ) -> Self {
        Self {
            store,
            replica,
            clock,
            policy,
            in_flight: DashSet::new(),
        }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Alerts this process currently considers overdue and is not already
    /// writing.
    pub fn overdue(&self, now: DateTime<Utc>) -> Vec<AlertId> {
        self.replica
            .with_status(AlertStatus::Pending)
            .iter()
            .filter(|alert| self.policy.is_overdue(alert, now))
            .filter(|alert| !self.in_flight.contains(&alert.id))
            .map(|alert| alert.id)
            .collect()
    }

    fn claim(&self, id: AlertId) -> Option<InFlight<'_>> {
        self.in_flight.insert(id).then(|| InFlight {
            ids: &self.in_flight,
            id,
        })
    }

    /// One sweep over the local replica. Never fails; every outcome is folded
    /// into the report.
    pub async fn tick(&self) -> SweepReport {
        let now = self.clock.now();
        let claimed: Vec<InFlight<'_>> = self
            .overdue(now)
            .into_iter()
            .filter_map(|id| self.claim(id))
            .collect();
        let mut report = SweepReport::default();
        if claimed.is_empty() {
            return report;
        }

        let patch = StatusPatch::status(AlertStatus::Escalated);
        let attempts = claimed.iter().map(|claim| async move {
            let id = claim.id;
            let result = self
                .store
                .conditional_update(id, &[AlertStatus::Pending], patch)
                .await;
            (id, result)
        });

        for (id, result) in join_all(attempts).await {
            match result {
                Ok(UpdateOutcome::Applied(alert)) => {
                    info!(
                        "Escalated alert {} ({}/{}, {} priority, {})",
                        id, alert.coach, alert.seat, alert.priority, alert.category
                    );
                    report.escalated.push(id);
                }
                Ok(UpdateOutcome::Conflict { current }) => {
                    debug!("Alert {} already {} elsewhere", id, current);
                    report.already_handled += 1;
                }
                Ok(UpdateOutcome::NotFound) => {
                    debug!("Alert {} no longer exists, dropping from replica", id);
                    self.replica.remove(id);
                    report.missing += 1;
                }
                Err(e) => {
                    warn!("Escalation write for {} failed, retrying next tick: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Sweeps on a fixed interval until shutdown. Each tick runs in its own task
    /// so a slow store never holds up the timer; ticks still running at
    /// shutdown are cancelled before this returns.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.policy.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Escalation sweeper started (grace {}s, every {:?})",
            self.policy.grace.num_seconds(),
            self.policy.interval
        );

        let mut ticks: JoinSet<SweepReport> = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => match joined {
                    Ok(report) if report.attempts() > 0 => debug!("Sweep finished: {:?}", report),
                    Ok(_) => {}
                    Err(e) => error!("Sweep task failed: {}", e),
                },
                _ = interval.tick() => {
                    let sweeper = self.clone();
                    ticks.spawn(async move { sweeper.tick().await });
                }
            }
        }

        if !ticks.is_empty() {
            debug!("Cancelling {} unfinished sweeps", ticks.len());
        }
        ticks.abort_all();
        while ticks.join_next().await.is_some() {}

        info!("Escalation sweeper stopped");
    }
}
