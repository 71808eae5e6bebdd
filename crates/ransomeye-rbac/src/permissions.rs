//! The permission vocabulary and the role-permission table

use ransomeye_types::{ActionType, Role};
use std::collections::BTreeSet;

/// Every permission known to the system. Checks against names outside this
/// list are programming errors, not denials.
pub const PERMISSIONS: [&str; 18] = [
    // Incident permissions
    "incident:read",
    "incident:manage",
    "incident:reopen",
    // Policy permissions
    "policy:read",
    "policy:manage",
    // Threat response permissions
    "tre:execute",
    "tre:rollback",
    "tre:manage_mode",
    "tre:emergency_override",
    // Human authority permissions
    "haf:approve",
    "haf:attest",
    // Forensics permissions
    "forensics:read",
    // Agent permissions
    "agent:manage",
    "agent:policy_update",
    // User management permissions
    "user:manage",
    // System permissions
    "system:read",
    // Audit permissions
    "audit:read",
    "audit:verify",
];

/// Permission required to execute a specific destructive action, on top of
/// `tre:execute`
pub fn destructive_permission(action: ActionType) -> Option<&'static str> {
    match action {
        ActionType::IsolateHost => Some("tre:destructive:isolate_host"),
        ActionType::LockUser => Some("tre:destructive:lock_user"),
        ActionType::DisableService => Some("tre:destructive:disable_service"),
        ActionType::MassProcessKill => Some("tre:destructive:mass_process_kill"),
        ActionType::NetworkSegmentIsolation => {
            Some("tre:destructive:network_segment_isolation")
        }
        _ => None,
    }
}

pub fn is_known_permission(permission: &str) -> bool {
    PERMISSIONS.contains(&permission) || permission.starts_with("tre:destructive:")
}

/// Permissions granted to a role. Default DENY: anything not listed here
/// is denied, and an unknown user has no role at all.
pub fn role_permissions(role: Role) -> BTreeSet<&'static str> {
    let mut set: BTreeSet<&'static str> = BTreeSet::new();
    match role {
        Role::SuperAdmin => {
            set.extend(PERMISSIONS);
            for action in ActionType::ALL {
                if let Some(permission) = destructive_permission(action) {
                    set.insert(permission);
                }
            }
        }
        Role::SecurityAnalyst => {
            set.extend([
                "incident:read",
                "incident:manage",
                "tre:execute",
                "tre:rollback",
                "haf:attest",
                "forensics:read",
                "system:read",
            ]);
        }
        Role::PolicyManager => {
            set.extend(["incident:read", "policy:read", "policy:manage", "system:read"]);
        }
        Role::ItAdmin => {
            set.extend([
                "incident:read",
                "agent:manage",
                "agent:policy_update",
                "system:read",
            ]);
        }
        Role::Auditor => {
            set.extend(["incident:read", "audit:read", "audit:verify", "system:read"]);
        }
    }
    set
}

/// Whether a role holds a permission
pub fn role_has_permission(role: Role, permission: &str) -> bool {
    role_permissions(role).contains(permission)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_admin_holds_everything() {
        for permission in PERMISSIONS {
            assert!(role_has_permission(Role::SuperAdmin, permission));
        }
        assert!(role_has_permission(
            Role::SuperAdmin,
            "tre:destructive:isolate_host"
        ));
    }

    #[test]
    fn analyst_can_execute_but_not_destroy() {
        assert!(role_has_permission(Role::SecurityAnalyst, "tre:execute"));
        assert!(role_has_permission(Role::SecurityAnalyst, "tre:rollback"));
        assert!(!role_has_permission(
            Role::SecurityAnalyst,
            "tre:destructive:isolate_host"
        ));
        assert!(!role_has_permission(Role::SecurityAnalyst, "tre:manage_mode"));
    }

    #[test]
    fn auditor_is_read_only() {
        assert!(role_has_permission(Role::Auditor, "audit:read"));
        assert!(!role_has_permission(Role::Auditor, "tre:execute"));
        assert!(!role_has_permission(Role::Auditor, "incident:manage"));
    }

    #[test]
    fn every_destructive_action_has_a_permission() {
        for action in ActionType::ALL {
            if action.is_destructive() {
                assert!(destructive_permission(action).is_some(), "{}", action);
            } else {
                assert!(destructive_permission(action).is_none(), "{}", action);
            }
        }
    }
}
