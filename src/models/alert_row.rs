use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AlertError;
use crate::models::alert::Alert;

#[derive(Debug, FromRow)]
pub struct AlertRow {
    pub id: Uuid,
    pub coach: String,
    pub seat: String,
    pub kind: String,     // 'SOS' | 'Evidence'
    pub category: String,
    pub priority: String, // written once at insert
    pub status: String,
    pub created_at: DateTime<Utc>, // DEFAULT NOW(), never bound by us
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = AlertError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            id: row.id,
            coach: row.coach,
            seat: row.seat,
            kind: row.kind.parse()?,
            category: row.category,
            priority: row.priority.parse()?,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
