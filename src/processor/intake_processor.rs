use crate::models::message::AlertSubmission;
use crate::store::AlertStore;
use tracing::{info, warn};

/// Turns one intake message into an alert. Bad payloads are logged and
/// skipped; only store failures are returned so the consumer can log them.
pub async fn process_submission(store: &dyn AlertStore, payload: &[u8]) -> anyhow::Result<()> {
    // 1. Decode
    let submission = match AlertSubmission::decode_payload(payload) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to parse submission: {}", e);
            return Ok(());
        }
    };

    // 2. Validate
    let new_alert = match submission.into_new_alert() {
        Ok(a) => a,
        Err(e) => {
            warn!("Rejected submission: {}", e);
            return Ok(());
        }
    };

    // 3. Create (redelivery resolves to the same alert)
    let alert = store.create(new_alert).await?;
    info!(
        "Alert {} {} {}/{} category={} priority={}",
        alert.id, alert.kind, alert.coach, alert.seat, alert.category, alert.priority
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::{AlertStatus, Priority};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_redelivered_submission_creates_one_alert() {
        let store = MemoryStore::default();
        let payload = br#"{
            "uuid": "0b6c2f0e-4c1e-4f55-8d0a-3c8f5f0e9a11",
            "coachNumber": "B3",
            "seatNumber": "24",
            "type": "SOS",
            "incidentType": "vendor_overpricing"
        }"#;

        process_submission(&store, payload).await.unwrap();
        process_submission(&store, payload).await.unwrap();

        let alerts = store.snapshot();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, Priority::Low);
        assert_eq!(alerts[0].status, AlertStatus::Pending);
    }

    #[tokio::test]
    async fn test_garbage_is_skipped() {
        let store = MemoryStore::default();
        process_submission(&store, b"{not json").await.unwrap();
        process_submission(&store, br#"{"coachNumber": "B3"}"#).await.unwrap();
        assert!(store.snapshot().is_empty());
    }
}
