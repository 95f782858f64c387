use thiserror::Error;

use crate::models::alert::{AlertId, AlertStatus};

/// Errors raised by the alert model itself, before any store is contacted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertError {
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },
    #[error("invalid submission: {0}")]
    Validation(String),
    #[error("unknown alert status '{0}'")]
    UnknownStatus(String),
    #[error("unknown alert kind '{0}'")]
    UnknownKind(String),
}

/// Failures talking to the shared alert store.
///
/// Compare-and-set misses are not errors; they come back as
/// [`crate::store::UpdateOutcome::Conflict`] or `NotFound`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Transport(String),
    #[error("malformed record from store: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Decode(e.to_string())
            }
            other => StoreError::Transport(other.to_string()),
        }
    }
}

impl From<AlertError> for StoreError {
    fn from(e: AlertError) -> Self {
        StoreError::Decode(e.to_string())
    }
}

/// Errors reported to the operator who issued a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },
    #[error("alert {0} not found")]
    NotFound(AlertId),
    #[error("store unreachable: {0}")]
    Transport(String),
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Transport(e.to_string())
    }
}
