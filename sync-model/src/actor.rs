//! The identity of whoever is performing a write, as resolved from a session
//! (§6). Carried through push, the gate, and into ledger entries.

use serde::{Deserialize, Serialize};

/// A user's role, used by the Change-Request Gate's admission rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Whether this role bypasses row ownership (§4.E step 3).
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

/// The resolved identity of the caller of a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admin_and_superadmin_are_privileged() {
        assert!(!Role::User.is_privileged());
        assert!(Role::Admin.is_privileged());
        assert!(Role::SuperAdmin.is_privileged());
    }
}
