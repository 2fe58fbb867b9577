//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::types::Condition;

/// Condition types used across the resource kinds
pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_CONFIGURATION_VALID: &str = "ConfigurationValid";
pub const CONDITION_TYPE_L1_CONNECTED: &str = "L1Connected";
pub const CONDITION_TYPE_ADDRESSES_READY: &str = "AddressesReady";
pub const CONDITION_TYPE_NETWORK_READY: &str = "NetworkReady";
pub const CONDITION_TYPE_SEQUENCER_READY: &str = "SequencerReady";
pub const CONDITION_TYPE_SECRETS_READY: &str = "SecretsReady";
pub const CONDITION_TYPE_RESOURCES_READY: &str = "ResourcesReady";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Update or add a condition to the conditions list
///
/// At most one condition exists per type. An existing condition is updated
/// in place; its transition time changes only when the status changes.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    let now = Utc::now().to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let should_update_time = existing.status != status;

        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();

        if should_update_time {
            existing.last_transition_time = now;
        }
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        });
    }
}

/// Convenience wrapper taking a boolean status
pub fn set_condition_bool(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
) {
    let status = if status {
        CONDITION_STATUS_TRUE
    } else {
        CONDITION_STATUS_FALSE
    };
    set_condition(conditions, type_, status, reason, message);
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(Condition::is_true)
        .unwrap_or(false)
}

/// True when every listed condition type is present and true
pub fn all_conditions_true(conditions: &[Condition], types: &[&str]) -> bool {
    types.iter().all(|t| is_condition_true(conditions, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_adds_new() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_TRUE,
            "Reconciled",
            "All checks passed",
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, CONDITION_TYPE_READY);
        assert_eq!(conditions[0].status, CONDITION_STATUS_TRUE);
    }

    #[test]
    fn test_set_condition_updates_in_place() {
        let mut conditions = vec![Condition {
            type_: CONDITION_TYPE_NETWORK_READY.to_string(),
            status: CONDITION_STATUS_FALSE.to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            reason: "NetworkNotFound".to_string(),
            message: "network missing".to_string(),
            observed_generation: None,
        }];

        let old_time = conditions[0].last_transition_time.clone();
        set_condition(
            &mut conditions,
            CONDITION_TYPE_NETWORK_READY,
            CONDITION_STATUS_TRUE,
            "NetworkReady",
            "network is ready",
        );

        assert_eq!(conditions.len(), 1, "no duplicate types");
        assert_eq!(conditions[0].status, CONDITION_STATUS_TRUE);
        assert_ne!(conditions[0].last_transition_time, old_time);
    }

    #[test]
    fn test_transition_time_preserved_without_status_change() {
        let mut conditions = vec![Condition {
            type_: CONDITION_TYPE_READY.to_string(),
            status: CONDITION_STATUS_TRUE.to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            reason: "Reconciled".to_string(),
            message: "ok".to_string(),
            observed_generation: None,
        }];

        set_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_TRUE,
            "Reconciled",
            "still ok",
        );

        assert_eq!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
        assert_eq!(conditions[0].message, "still ok");
    }

    #[test]
    fn test_condition_uniqueness_over_many_updates() {
        let mut conditions = Vec::new();
        for i in 0..10 {
            set_condition_bool(
                &mut conditions,
                CONDITION_TYPE_SEQUENCER_READY,
                i % 2 == 0,
                "Flip",
                "toggling",
            );
        }
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_all_conditions_true() {
        let mut conditions = Vec::new();
        set_condition_bool(
            &mut conditions,
            CONDITION_TYPE_CONFIGURATION_VALID,
            true,
            "Valid",
            "",
        );
        set_condition_bool(&mut conditions, CONDITION_TYPE_NETWORK_READY, true, "Ready", "");
        assert!(all_conditions_true(
            &conditions,
            &[CONDITION_TYPE_CONFIGURATION_VALID, CONDITION_TYPE_NETWORK_READY]
        ));
        assert!(!all_conditions_true(
            &conditions,
            &[CONDITION_TYPE_CONFIGURATION_VALID, CONDITION_TYPE_READY]
        ));
    }
}
