//! Shared alert store contract.
//!
//! Core code (synchronizer, sweeper, command handler) only talks to the store
//! through [`AlertStore`]. The store is the single source of truth and owns the
//! atomic compare-and-set on `status`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::alert::{Alert, AlertId, AlertStatus, NewAlert};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgAlertStore;

/// Full current contents of the collection, newest first.
pub type Snapshot = Vec<Alert>;

/// Ends when the subscription is lost; callers re-subscribe.
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, StoreError>>;

const ALERT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f2c_1e0a_58d4_4b7e_9a31_c0de_a1e7_5a0f);

/// Store-side id derivation. A redelivered submission lands on the same id.
pub fn alert_id_for(submission_id: Uuid) -> AlertId {
    Uuid::new_v5(&ALERT_ID_NAMESPACE, submission_id.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPatch {
    pub status: AlertStatus,
}

impl StatusPatch {
    pub fn status(status: AlertStatus) -> Self {
        Self { status }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The write won; carries the record as stored.
    Applied(Alert),
    /// The record exists but its status was not one of the expected ones.
    Conflict { current: AlertStatus },
    NotFound,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Accepts a submission. `created_at` is stamped here, never by the client.
    /// Creating the same submission twice returns the existing record.
    async fn create(&self, alert: NewAlert) -> Result<Alert, StoreError>;

    /// Opens a subscription ordered by `created_at` descending. The first item
    /// is always a full snapshot.
    async fn subscribe(&self) -> Result<SnapshotStream, StoreError>;

    /// Applies `patch` only if the current status is one of `expected`.
    async fn conditional_update(
        &self,
        id: AlertId,
        expected: &[AlertStatus],
        patch: StatusPatch,
    ) -> Result<UpdateOutcome, StoreError>;
}

pub(crate) fn order_snapshot(alerts: &mut Snapshot) {
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}
