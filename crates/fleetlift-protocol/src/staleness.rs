//! Agent staleness detection: if `status.updatedAt` is older than the
//! configured threshold, the workflow treats the agent as dead.

use std::time::Duration;

use chrono::Utc;
use fleetlift_core::model::AgentStatus;

#[must_use]
pub fn is_stale(status: &AgentStatus, threshold: Duration) -> bool {
    let age = Utc::now().signed_duration_since(status.updated_at);
    match age.to_std() {
        Ok(age) => age > threshold,
        // A negative duration means updated_at is in the future, never stale.
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlift_core::model::AgentPhase;

    #[test]
    fn fresh_status_is_not_stale() {
        let status = AgentStatus {
            phase: AgentPhase::Executing,
            message: String::new(),
            updated_at: Utc::now(),
            progress: None,
        };
        assert!(!is_stale(&status, Duration::from_secs(300)));
    }

    #[test]
    fn old_status_is_stale() {
        let status = AgentStatus {
            phase: AgentPhase::Executing,
            message: String::new(),
            updated_at: Utc::now() - chrono::Duration::seconds(600),
            progress: None,
        };
        assert!(is_stale(&status, Duration::from_secs(300)));
    }
}
