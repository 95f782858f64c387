use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::models::alert::{Alert, AlertId, AlertStatus};
use crate::models::countdown;
use crate::replica::AlertListener;
use crate::sweeper::EscalationPolicy;

/// Live alert feed written to the service log, one line per change.
pub struct ConsoleFeed {
    clock: Arc<dyn Clock>,
    policy: EscalationPolicy,
}

impl ConsoleFeed {
    pub fn new(clock: Arc<dyn Clock>, policy: EscalationPolicy) -> Self {
        Self { clock, policy }
    }

    fn describe(&self, alert: &Alert) -> String {
        let now = self.clock.now();
        let mut line = format!(
            "{} {}/{} {} [{}] {} ({})",
            alert.kind,
            alert.coach,
            alert.seat,
            alert.category.replace('_', " "),
            alert.priority,
            alert.status,
            countdown::time_ago(alert.created_at, now)
        );
        if alert.status == AlertStatus::Pending {
            line.push_str(", ");
            line.push_str(&countdown::remaining_label(
                alert.created_at,
                now,
                self.policy.grace,
            ));
        }
        line
    }
}

impl AlertListener for ConsoleFeed {
    fn on_created(&self, alert: &Alert) {
        info!("NEW {}", self.describe(alert));
    }

    fn on_updated(&self, alert: &Alert, previous: AlertStatus) {
        if alert.status == AlertStatus::Escalated {
            warn!("ESCALATED {} (was {})", self.describe(alert), previous);
        } else {
            info!("UPDATED {} (was {})", self.describe(alert), previous);
        }
    }

    fn on_removed(&self, id: AlertId) {
        info!("REMOVED {}", id);
    }
}
