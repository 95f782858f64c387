use crate::commands::{CommandHandler, CommandOutcome};
use crate::error::CommandError;
use crate::models::message::OperatorCommand;
use prost::Message;
use tracing::{info, warn};

/// Applies one operator command from the command topic. The outcome is only
/// reported back through the log; a lost race is "already handled", not a failure.
pub async fn process_command(handler: &CommandHandler, payload: &[u8]) -> anyhow::Result<()> {
    let command = match OperatorCommand::decode(payload) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse operator command: {}", e);
            return Ok(());
        }
    };

    let (id, action) = match command.parse() {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Rejected operator command from '{}': {}", command.operator, e);
            return Ok(());
        }
    };

    match handler.execute(id, action).await {
        Ok(CommandOutcome::Applied(alert)) => {
            info!(
                "{} by '{}': alert {} is now {}",
                command.action.trim(),
                command.operator,
                id,
                alert.status
            );
            Ok(())
        }
        Ok(CommandOutcome::AlreadyHandled { current }) => {
            info!(
                "Alert {} already handled (now {}), '{}' ignored",
                id, current, command.operator
            );
            Ok(())
        }
        Err(e @ (CommandError::InvalidTransition { .. } | CommandError::NotFound(_))) => {
            warn!("Command from '{}' rejected: {}", command.operator, e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::{AlertKind, AlertStatus, NewAlert};
    use crate::replica::Replica;
    use crate::store::{AlertStore, MemoryStore};
    use std::sync::Arc;
    use uuid::Uuid;

    fn encode(alert_id: &str, action: &str) -> Vec<u8> {
        OperatorCommand {
            alert_id: alert_id.into(),
            action: action.into(),
            operator: "rpf-desk-1".into(),
        }
        .encode_to_vec()
    }

    #[tokio::test]
    async fn test_assign_command_moves_alert() {
        let store = MemoryStore::default();
        let new = NewAlert::new(Uuid::new_v4(), "A1", "7", AlertKind::EmergencySos, "theft").unwrap();
        let alert = store.create(new).await.unwrap();
        let replica = Replica::new();
        replica.apply_snapshot(store.snapshot());
        let handler = CommandHandler::new(Arc::new(store.clone()), replica);

        process_command(&handler, &encode(&alert.id.to_string(), "assign"))
            .await
            .unwrap();
        assert_eq!(store.get(alert.id).unwrap().status, AlertStatus::Assigned);

        // Not an edge from the replica's view; logged, not raised.
        process_command(&handler, &encode(&alert.id.to_string(), "resolve"))
            .await
            .unwrap();
        process_command(&handler, &encode("nope", "assign")).await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_is_returned() {
        let store = MemoryStore::default();
        let new = NewAlert::new(Uuid::new_v4(), "A1", "7", AlertKind::EmergencySos, "theft").unwrap();
        let alert = store.create(new).await.unwrap();
        let replica = Replica::new();
        replica.apply_snapshot(store.snapshot());
        let handler = CommandHandler::new(Arc::new(store.clone()), replica);

        store.fail_next_updates(1);
        assert!(
            process_command(&handler, &encode(&alert.id.to_string(), "assign"))
                .await
                .is_err()
        );
    }
}
