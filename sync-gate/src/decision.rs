//! The pure admission function (§4.E steps 1-5), kept free of any storage or
//! async concern so it can be unit tested as plain data in, data out.

use sync_model::actor::Actor;
use sync_model::sync::RowOwner;

/// The outcome of the admission algorithm for one incoming `(table, row,
/// actor)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No owner exists yet (creation), the actor is privileged, or the
    /// actor already owns the row: apply immediately.
    Admit,
    /// The row belongs to someone else and the actor is an ordinary user:
    /// hold it as a [`sync_model::sync::ChangeRequest`] instead.
    Deflect,
}

impl Decision {
    pub fn is_admit(self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// The admission algorithm (§4.E steps 1-5): given the row's current owner
/// (if any) and the actor attempting the write, decide whether to admit or
/// deflect.
pub fn decide(actor: &Actor, owner: Option<&RowOwner>) -> Decision {
    match owner {
        None => Decision::Admit,
        Some(_) if actor.role.is_privileged() => Decision::Admit,
        Some(owner) if owner.user_id == actor.user_id => Decision::Admit,
        Some(_) => Decision::Deflect,
    }
}

/// Whether `decider` may apply or reject a pending change request against
/// `owner_user_id` (§4.E's `apply`/`reject` decisions): the owner
/// themselves, or any privileged role.
pub fn is_authorized_decider(decider: &Actor, owner_user_id: &str) -> bool {
    decider.role.is_privileged() || decider.user_id == owner_user_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_model::actor::Role;

    fn owner(user_id: &str) -> RowOwner {
        RowOwner {
            table_name: "entities".into(),
            row_id: "e1".into(),
            user_id: user_id.into(),
            username: "owner".into(),
            created_at: 0,
        }
    }

    #[test]
    fn no_owner_admits_as_creation() {
        let alice = Actor::new("u-alice", "alice", Role::User);
        assert_eq!(decide(&alice, None), Decision::Admit);
    }

    #[test]
    fn privileged_actor_always_admits() {
        let admin = Actor::new("u-admin", "admin", Role::Admin);
        assert_eq!(decide(&admin, Some(&owner("u-bob"))), Decision::Admit);
    }

    #[test]
    fn owner_writing_their_own_row_admits() {
        let bob = Actor::new("u-bob", "bob", Role::User);
        assert_eq!(decide(&bob, Some(&owner("u-bob"))), Decision::Admit);
    }

    #[test]
    fn foreign_write_by_ordinary_user_deflects() {
        let bob = Actor::new("u-bob", "bob", Role::User);
        assert_eq!(decide(&bob, Some(&owner("u-alice"))), Decision::Deflect);
    }

    #[test]
    fn is_authorized_decider_allows_owner_and_privileged_roles() {
        let owner_id = "u-alice";
        assert!(is_authorized_decider(
            &Actor::new("u-alice", "alice", Role::User),
            owner_id
        ));
        assert!(is_authorized_decider(
            &Actor::new("u-admin", "admin", Role::Admin),
            owner_id
        ));
        assert!(!is_authorized_decider(
            &Actor::new("u-bob", "bob", Role::User),
            owner_id
        ));
    }
}
