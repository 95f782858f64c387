use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AlertError;

pub type AlertId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Assigned,
    Investigating,
    Escalated,
    Resolved,
}

impl AlertStatus {
    pub const ALL: [AlertStatus; 5] = [
        AlertStatus::Pending,
        AlertStatus::Assigned,
        AlertStatus::Investigating,
        AlertStatus::Escalated,
        AlertStatus::Resolved,
    ];

    /// Position along the lifecycle. Every permitted edge strictly increases it,
    /// so an observed decrease always means a stale delivery.
    pub fn rank(self) -> u8 {
        match self {
            AlertStatus::Pending => 0,
            AlertStatus::Escalated => 1,
            AlertStatus::Assigned => 2,
            AlertStatus::Investigating => 3,
            AlertStatus::Resolved => 4,
        }
    }

    pub fn can_transition_to(self, to: AlertStatus) -> bool {
        matches!(
            (self, to),
            (AlertStatus::Pending, AlertStatus::Assigned)
                | (AlertStatus::Pending, AlertStatus::Escalated)
                | (AlertStatus::Assigned, AlertStatus::Investigating)
                | (AlertStatus::Assigned, AlertStatus::Resolved)
                | (AlertStatus::Escalated, AlertStatus::Assigned)
                | (AlertStatus::Investigating, AlertStatus::Resolved)
        )
    }

    /// Statuses from which `target` may be reached. This is the expected-status
    /// set handed to the store's compare-and-set.
    pub fn sources_of(target: AlertStatus) -> &'static [AlertStatus] {
        match target {
            AlertStatus::Pending => &[],
            AlertStatus::Assigned => &[AlertStatus::Pending, AlertStatus::Escalated],
            AlertStatus::Investigating => &[AlertStatus::Assigned],
            AlertStatus::Escalated => &[AlertStatus::Pending],
            AlertStatus::Resolved => &[AlertStatus::Assigned, AlertStatus::Investigating],
        }
    }

    pub fn transition(self, to: AlertStatus) -> Result<AlertStatus, AlertError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(AlertError::InvalidTransition { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == AlertStatus::Resolved
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Assigned => "assigned",
            AlertStatus::Investigating => "investigating",
            AlertStatus::Escalated => "escalated",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AlertError::UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "SOS")]
    EmergencySos,
    #[serde(rename = "Evidence")]
    EvidenceComplaint,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::EmergencySos => "SOS",
            AlertKind::EvidenceComplaint => "Evidence",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sos" | "emergency_sos" => Ok(AlertKind::EmergencySos),
            "evidence" | "evidence_complaint" => Ok(AlertKind::EvidenceComplaint),
            _ => Err(AlertError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Fixed category lookup. Anything unlisted is medium.
    pub fn for_category(category: &str) -> Priority {
        match category {
            "medical_emergency" | "harassment" => Priority::High,
            "theft" => Priority::Medium,
            "vendor_overpricing" => Priority::Low,
            _ => Priority::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(AlertError::Validation(format!("unknown priority '{other}'"))),
        }
    }
}

/// A field report as submitted by a client, before the store has accepted it.
///
/// Carries no timestamp: `created_at` is stamped by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    /// Client-generated key; redelivery of the same submission maps to the same alert.
    pub submission_id: Uuid,
    pub coach: String,
    pub seat: String,
    pub kind: AlertKind,
    pub category: String,
}

impl NewAlert {
    pub fn new(
        submission_id: Uuid,
        coach: &str,
        seat: &str,
        kind: AlertKind,
        category: &str,
    ) -> Result<Self, AlertError> {
        let coach = coach.trim();
        let seat = seat.trim();
        let category = category.trim();

        if coach.is_empty() {
            return Err(AlertError::Validation("coach is required".into()));
        }
        if seat.is_empty() {
            return Err(AlertError::Validation("seat is required".into()));
        }
        if category.is_empty() {
            return Err(AlertError::Validation("category is required".into()));
        }

        Ok(Self {
            submission_id,
            coach: coach.to_string(),
            seat: seat.to_string(),
            kind,
            category: category.to_string(),
        })
    }

    pub fn priority(&self) -> Priority {
        Priority::for_category(&self.category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub coach: String,
    pub seat: String,
    pub kind: AlertKind,
    pub category: String,
    pub priority: Priority,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// Builds the stored record for an accepted submission. Only stores call this,
    /// since they own both the id and the creation timestamp.
    pub fn accept(new: NewAlert, id: AlertId, created_at: DateTime<Utc>) -> Self {
        let priority = new.priority();
        Self {
            id,
            coach: new.coach,
            seat: new.seat,
            kind: new.kind,
            category: new.category,
            priority,
            status: AlertStatus::Pending,
            created_at,
            updated_at: created_at,
        }
    }
}
