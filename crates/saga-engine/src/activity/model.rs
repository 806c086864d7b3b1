use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable namespace for deterministic activity IDs. Part of the external
/// ABI: activity creation across retries and processes is only idempotent
/// because this value never changes.
pub const ACTIVITY_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x5d, 0xf6, 0xa4, 0xfe, 0x1f, 0xe4, 0x47, 0xb8, 0xbf, 0x32, 0x3b, 0xf5, 0x99, 0x65, 0x0a, 0x9f,
]);

/// Computes the deterministic activity ID for a `(workflow_id, activity_type)`
/// pair. Repeated calls with the same inputs always yield the same UUID.
pub fn deterministic_activity_id(workflow_id: Uuid, activity_type: &str) -> Uuid {
    let name = format!("{workflow_id}:{activity_type}");
    Uuid::new_v5(&ACTIVITY_ID_NAMESPACE, name.as_bytes())
}

/// An activity's position in its sub-state-machine. Only `succeeded` and
/// `failed_permanent` are terminal — `failed_temporary` is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "activity_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Pending,
    Running,
    FailedTemporary,
    FailedPermanent,
    Succeeded,
}

impl ActivityState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActivityState::Succeeded | ActivityState::FailedPermanent
        )
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityState::Pending => "pending",
            ActivityState::Running => "running",
            ActivityState::FailedTemporary => "failed_temporary",
            ActivityState::FailedPermanent => "failed_permanent",
            ActivityState::Succeeded => "succeeded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub activity_type: String,
    pub state: ActivityState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Strips a leading `rollback:` prefix if present, then returns the
/// substring before the first remaining `:`. `foo`, `foo:meta`, and
/// `rollback:foo:meta` all normalize to `foo`.
pub fn normalize_activity_type(activity_type: &str) -> &str {
    let stripped = activity_type
        .strip_prefix("rollback:")
        .unwrap_or(activity_type);
    stripped.split(':').next().unwrap_or(stripped)
}

/// The activity type used to compensate a succeeded activity of type `T`.
pub fn rollback_activity_type(activity_type: &str) -> String {
    format!("rollback:{activity_type}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_id_is_stable_across_calls() {
        let workflow_id = Uuid::new_v4();
        let a = deterministic_activity_id(workflow_id, "charge-card");
        let b = deterministic_activity_id(workflow_id, "charge-card");
        assert_eq!(a, b);
    }

    #[test]
    fn deterministic_id_varies_with_inputs() {
        let workflow_id = Uuid::new_v4();
        let a = deterministic_activity_id(workflow_id, "charge-card");
        let b = deterministic_activity_id(workflow_id, "ship-order");
        assert_ne!(a, b);
    }

    #[test]
    fn namespace_matches_the_pinned_value() {
        assert_eq!(
            ACTIVITY_ID_NAMESPACE.to_string(),
            "5df6a4fe-1fe4-47b8-bf32-3bf599650a9f"
        );
    }

    #[test]
    fn normalize_plain_type() {
        assert_eq!(normalize_activity_type("charge-card"), "charge-card");
    }

    #[test]
    fn normalize_strips_metadata_tail() {
        assert_eq!(normalize_activity_type("charge-card:retry=1"), "charge-card");
    }

    #[test]
    fn normalize_strips_rollback_prefix_and_tail() {
        assert_eq!(
            normalize_activity_type("rollback:charge-card:retry=1"),
            "charge-card"
        );
    }

    #[test]
    fn rollback_type_is_prefixed() {
        assert_eq!(rollback_activity_type("charge-card"), "rollback:charge-card");
    }

    #[test]
    fn terminal_states() {
        assert!(ActivityState::Succeeded.is_terminal());
        assert!(ActivityState::FailedPermanent.is_terminal());
        assert!(!ActivityState::FailedTemporary.is_terminal());
        assert!(!ActivityState::Pending.is_terminal());
        assert!(!ActivityState::Running.is_terminal());
    }
}
