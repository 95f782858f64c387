use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::{Executor, Row};
use tracing::{debug, info, warn};

use crate::db::{queries, DbPool};
use crate::error::StoreError;
use crate::models::alert::{Alert, AlertId, AlertStatus, NewAlert};
use crate::models::alert_row::AlertRow;
use crate::store::{
    alert_id_for, AlertStore, Snapshot, SnapshotStream, StatusPatch, UpdateOutcome,
};

/// Payload written by the `alerts_changed` trigger.
#[derive(Debug, Deserialize)]
struct ChangeNotice {
    id: AlertId,
    status: String,
    op: String,
}

/// LISTEN/NOTIFY channels are spliced into DDL, so only plain identifiers pass.
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// PostgreSQL-backed store. The database stamps `created_at` and performs the
/// compare-and-set; change fan-out rides on LISTEN/NOTIFY.
#[derive(Clone)]
pub struct PgAlertStore {
    pool: DbPool,
    channel: String,
}

impl PgAlertStore {
    pub fn new(pool: DbPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    /// Creates the table and notify trigger if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        if !is_valid_channel_name(&self.channel) {
            return Err(StoreError::Decode(format!(
                "invalid notify channel '{}'",
                self.channel
            )));
        }

        let ddl = queries::ENSURE_SCHEMA.replace("{channel}", &self.channel);
        self.pool.execute(ddl.as_str()).await?;
        info!("Alert schema ready (notify channel '{}')", self.channel);
        Ok(())
    }

    async fn fetch_one(&self, id: AlertId) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query_as::<_, AlertRow>(queries::SELECT_ALERT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Alert::try_from).transpose()?)
    }
}

async fn fetch_snapshot(pool: &DbPool) -> Result<Snapshot, StoreError> {
    let rows = sqlx::query_as::<_, AlertRow>(queries::SELECT_SNAPSHOT)
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(|row| Alert::try_from(row).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn create(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let id = alert_id_for(alert.submission_id);
        let priority = alert.priority();

        let inserted = sqlx::query_as::<_, AlertRow>(queries::INSERT_ALERT)
            .bind(id)
            .bind(alert.submission_id)
            .bind(&alert.coach)
            .bind(&alert.seat)
            .bind(alert.kind.as_str())
            .bind(&alert.category)
            .bind(priority.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(row) => Ok(Alert::try_from(row)?),
            None => {
                debug!("Duplicate submission {} for alert {}", alert.submission_id, id);
                self.fetch_one(id).await?.ok_or_else(|| {
                    StoreError::Transport(format!("alert {id} vanished after conflicting insert"))
                })
            }
        }
    }

    async fn subscribe(&self) -> Result<SnapshotStream, StoreError> {
        // Listen before reading so no change between the two is missed.
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;
        let initial = fetch_snapshot(&self.pool).await?;
        debug!("Subscribed to '{}' with {} alerts", self.channel, initial.len());

        let pool = self.pool.clone();
        let updates = stream::unfold(Some((listener, pool)), |state| async move {
            let (mut listener, pool) = state?;
            match listener.try_recv().await {
                Ok(Some(notification)) => {
                    match serde_json::from_str::<ChangeNotice>(notification.payload()) {
                        Ok(notice) => debug!(
                            "Alert {} {} -> {}",
                            notice.id, notice.op, notice.status
                        ),
                        Err(e) => warn!("Unparseable change notice: {}", e),
                    }
                    match fetch_snapshot(&pool).await {
                        Ok(snapshot) => Some((Ok(snapshot), Some((listener, pool)))),
                        Err(e) => Some((Err(e), None)),
                    }
                }
                Ok(None) => {
                    // Connection dropped; notifications may have been lost.
                    warn!("Alert listener connection lost");
                    None
                }
                Err(e) => Some((Err(StoreError::from(e)), None)),
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
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();

        let updated = sqlx::query_as::<_, AlertRow>(queries::CONDITIONAL_UPDATE_STATUS)
            .bind(id)
            .bind(patch.status.as_str())
            .bind(expected)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return Ok(UpdateOutcome::Applied(Alert::try_from(row)?));
        }

        let current = sqlx::query(queries::SELECT_STATUS)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match current {
            None => Ok(UpdateOutcome::NotFound),
            Some(row) => {
                let status: String = row.try_get("status")?;
                Ok(UpdateOutcome::Conflict {
                    current: status.parse()?,
                })
            }
        }
    }
}
