//! The Change-Request Gate (§4.E): interposes on writes that touch a row
//! owned by someone other than the acting user, turning them into
//! reviewable [`sync_model::sync::ChangeRequest`]s instead of applying them
//! outright.

mod decision;
mod error;

pub use decision::{decide, is_authorized_decider, Decision};
pub use error::GateError;

use std::sync::Arc;
use sync_model::actor::Actor;
use sync_model::row::{DbRow, WireRow};
use sync_model::sync::{ChangeOp, ChangeRequest};
use sync_registry::{TableDef, ValidationError};
use sync_store::{AuthoritativeStore, NewChangeRequest, WriteInput, WriteOutcome};

/// The result of offering one incoming row to the gate.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The row had no owner, the actor owned it already, or the actor is
    /// privileged: the caller should proceed to apply it via
    /// [`sync_store::AuthoritativeStore::write_sync_changes`].
    Admit,
    /// The row belongs to someone else; it was recorded as a pending
    /// [`ChangeRequest`] instead and must NOT be applied.
    Deflect(ChangeRequest),
}

/// The Change-Request Gate, parameterized over the concrete
/// [`AuthoritativeStore`] it consults and writes through.
pub struct Gate<S: AuthoritativeStore> {
    store: Arc<S>,
}

impl<S: AuthoritativeStore> Gate<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Run the admission algorithm (§4.E steps 1-5) for one incoming row.
    /// `before` is the row's current stored state, if any, used only to
    /// populate a deflected request's `before_json`.
    pub async fn admit_or_deflect(
        &self,
        table_name: &str,
        row_id: &str,
        before: Option<DbRow>,
        after: DbRow,
        actor: &Actor,
    ) -> Result<Outcome, GateError> {
        let owner = self.store.row_owner(table_name, row_id).await?;

        match decide(actor, owner.as_ref()) {
            Decision::Admit => Ok(Outcome::Admit),
            Decision::Deflect => {
                // `decide` only returns `Deflect` when `owner` is `Some`.
                let owner = owner.expect("deflect implies an assigned owner");
                let before_json = before
                    .map(|row| serde_json::to_string(&row.0))
                    .transpose()?;
                let after_json = serde_json::to_string(&after.0)?;

                let request = self
                    .store
                    .create_change_request(NewChangeRequest {
                        table_name: table_name.to_string(),
                        row_id: row_id.to_string(),
                        before_json,
                        after_json,
                        change_author: actor.clone(),
                        record_owner_id: owner.user_id,
                        record_owner_username: owner.username,
                    })
                    .await?;

                tracing::info!(
                    table = table_name,
                    row_id,
                    actor = actor.user_id.as_str(),
                    change_request_id = request.id.as_str(),
                    "deflected foreign-owned write into a change request"
                );
                Ok(Outcome::Deflect(request))
            }
        }
    }

    /// Apply a pending change request (§4.E `apply`): authorize the
    /// decider, re-validate `after_json` against the table's schema, check
    /// for dangling references (§9), then write it through
    /// [`AuthoritativeStore::apply_change_request`] atomically with marking
    /// the request `applied`.
    pub async fn apply(&self, id: &str, decider: &Actor) -> Result<WriteOutcome, GateError> {
        let request = self.load_request(id).await?;

        if !is_authorized_decider(decider, &request.record_owner_id) {
            return Err(GateError::NotAllowed(format!(
                "{} may not decide change request {id}",
                decider.user_id
            )));
        }

        let table = sync_registry::table(&request.table_name)
            .ok_or_else(|| GateError::UnknownTable(request.table_name.clone()))?;

        let after_value: serde_json::Value = serde_json::from_str(&request.after_json)?;
        let wire = WireRow(after_value.as_object().cloned().unwrap_or_default());
        (table.schema)(&wire)?;
        self.check_dangling_references(table, &wire).await?;

        let row = table.to_db_row(&wire);
        let outcome = self
            .store
            .apply_change_request(
                id,
                WriteInput {
                    table_name: request.table_name.clone(),
                    row_id: request.row_id.clone(),
                    op: ChangeOp::Upsert,
                    row,
                },
                decider,
            )
            .await?;

        tracing::info!(
            change_request_id = id,
            decider = decider.user_id.as_str(),
            "applied change request"
        );
        Ok(outcome)
    }

    /// Reject a pending change request (§4.E `reject`). No ledger or
    /// `change_log` write happens.
    pub async fn reject(
        &self,
        id: &str,
        decider: &Actor,
        note: Option<String>,
    ) -> Result<(), GateError> {
        let request = self.load_request(id).await?;

        if !is_authorized_decider(decider, &request.record_owner_id) {
            return Err(GateError::NotAllowed(format!(
                "{} may not decide change request {id}",
                decider.user_id
            )));
        }

        self.store.reject_change_request(id, decider, note).await?;
        tracing::info!(change_request_id = id, decider = decider.user_id.as_str(), "rejected change request");
        Ok(())
    }

    async fn load_request(&self, id: &str) -> Result<ChangeRequest, GateError> {
        self.store
            .get_change_request(id)
            .await?
            .ok_or_else(|| GateError::NotFound(id.to_string()))
    }

    /// Surface `ValidationError: dangling reference` (§9's third open
    /// question) for every reference field on `table` whose target row is
    /// missing or soft-deleted.
    async fn check_dangling_references(
        &self,
        table: &TableDef,
        wire: &WireRow,
    ) -> Result<(), GateError> {
        for reference in table.references {
            let Some(target_id) = wire.get_str(reference.fk_field) else {
                continue;
            };
            match self.store.current_row(reference.table, target_id).await? {
                None => {
                    return Err(ValidationError::dangling_reference(format!(
                        "{}/{} does not exist",
                        reference.table, target_id
                    ))
                    .into())
                }
                Some(row) if row.get("deleted_at").map(|v| !v.is_null()).unwrap_or(false) => {
                    return Err(ValidationError::dangling_reference(format!(
                        "{}/{} is soft-deleted",
                        reference.table, target_id
                    ))
                    .into())
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sync_model::actor::Role;
    use sync_model::clock::FixedClock;
    use sync_store::InMemoryAuthoritativeStore;

    fn actor(id: &str) -> Actor {
        Actor::new(id, id, Role::User)
    }

    fn admin() -> Actor {
        Actor::new("u-admin", "admin", Role::Admin)
    }

    fn store() -> Arc<InMemoryAuthoritativeStore> {
        let (_pubkey, signing_key) = sync_kernel::generate_keypair();
        let ledger = Arc::new(sync_ledger::InMemoryLedgerStore::new(sync_ledger::LedgerKeys {
            hmac_key: b"k".to_vec(),
            signing_key,
        }));
        Arc::new(InMemoryAuthoritativeStore::new(ledger, Arc::new(FixedClock(1000))))
    }

    fn entity_type_row(id: &str, code: &str) -> DbRow {
        DbRow(
            serde_json::json!({"id": id, "code": code, "name": code, "deleted_at": null})
                .as_object()
                .unwrap()
                .clone(),
        )
    }

    #[tokio::test]
    async fn creation_of_an_unowned_row_always_admits() {
        let gate = Gate::new(store());
        let outcome = gate
            .admit_or_deflect(
                "entity_types",
                "et-1",
                None,
                entity_type_row("et-1", "engine"),
                &actor("u-alice"),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Admit));
    }

    #[tokio::test]
    async fn foreign_write_deflects_into_a_change_request() {
        let s = store();
        let gate = Gate::new(s.clone());
        let alice = actor("u-alice");
        let bob = actor("u-bob");

        s.write_sync_changes(
            vec![WriteInput {
                table_name: "entity_types".into(),
                row_id: "et-1".into(),
                op: ChangeOp::Upsert,
                row: entity_type_row("et-1", "engine"),
            }],
            &alice,
        )
        .await
        .unwrap();

        let outcome = gate
            .admit_or_deflect(
                "entity_types",
                "et-1",
                Some(entity_type_row("et-1", "engine")),
                entity_type_row("et-1", "engine-v2"),
                &bob,
            )
            .await
            .unwrap();

        match outcome {
            Outcome::Deflect(cr) => {
                assert_eq!(cr.record_owner_id, "u-alice");
                assert_eq!(cr.change_author_id, "u-bob");
            }
            Outcome::Admit => panic!("expected a deflected change request"),
        }
    }

    #[tokio::test]
    async fn non_owner_non_admin_cannot_apply() {
        let s = store();
        let gate = Gate::new(s.clone());
        let alice = actor("u-alice");
        let bob = actor("u-bob");

        s.write_sync_changes(
            vec![WriteInput {
                table_name: "entity_types".into(),
                row_id: "et-1".into(),
                op: ChangeOp::Upsert,
                row: entity_type_row("et-1", "engine"),
            }],
            &alice,
        )
        .await
        .unwrap();

        let Outcome::Deflect(cr) = gate
            .admit_or_deflect(
                "entity_types",
                "et-1",
                Some(entity_type_row("et-1", "engine")),
                entity_type_row("et-1", "engine-v2"),
                &bob,
            )
            .await
            .unwrap()
        else {
            panic!("expected deflect");
        };

        let mallory = actor("u-mallory");
        let result = gate.apply(&cr.id, &mallory).await;
        assert!(matches!(result, Err(GateError::NotAllowed(_))));
    }

    #[tokio::test]
    async fn owner_can_apply_a_deflected_request() {
        let s = store();
        let gate = Gate::new(s.clone());
        let alice = actor("u-alice");
        let bob = actor("u-bob");

        s.write_sync_changes(
            vec![WriteInput {
                table_name: "entity_types".into(),
                row_id: "et-1".into(),
                op: ChangeOp::Upsert,
                row: entity_type_row("et-1", "engine"),
            }],
            &alice,
        )
        .await
        .unwrap();

        let Outcome::Deflect(cr) = gate
            .admit_or_deflect(
                "entity_types",
                "et-1",
                Some(entity_type_row("et-1", "engine")),
                entity_type_row("et-1", "engine-v2"),
                &bob,
            )
            .await
            .unwrap()
        else {
            panic!("expected deflect");
        };

        let outcome = gate.apply(&cr.id, &alice).await.unwrap();
        assert!(outcome.applied.iter().any(|c| c.row_id == "et-1"));
    }

    #[tokio::test]
    async fn admin_can_reject_a_deflected_request() {
        let s = store();
        let gate = Gate::new(s.clone());
        let alice = actor("u-alice");
        let bob = actor("u-bob");

        s.write_sync_changes(
            vec![WriteInput {
                table_name: "entity_types".into(),
                row_id: "et-1".into(),
                op: ChangeOp::Upsert,
                row: entity_type_row("et-1", "engine"),
            }],
            &alice,
        )
        .await
        .unwrap();

        let Outcome::Deflect(cr) = gate
            .admit_or_deflect(
                "entity_types",
                "et-1",
                Some(entity_type_row("et-1", "engine")),
                entity_type_row("et-1", "engine-v2"),
                &bob,
            )
            .await
            .unwrap()
        else {
            panic!("expected deflect");
        };

        gate.reject(&cr.id, &admin(), Some("not needed".into())).await.unwrap();
        assert!(matches!(gate.apply(&cr.id, &alice).await, Err(GateError::Store(_))));
    }

    #[tokio::test]
    async fn apply_rejects_dangling_reference_to_soft_deleted_entity_type() {
        let s = store();
        let gate = Gate::new(s.clone());
        let alice = actor("u-alice");
        let bob = actor("u-bob");

        s.write_sync_changes(
            vec![WriteInput {
                table_name: "entity_types".into(),
                row_id: "et-1".into(),
                op: ChangeOp::Upsert,
                row: entity_type_row("et-1", "engine"),
            }],
            &alice,
        )
        .await
        .unwrap();

        // alice owns attribute_defs/ad-1 (a fresh creation); bob proposes a
        // change whose entity_type_id now points at et-1.
        s.write_sync_changes(
            vec![WriteInput {
                table_name: "attribute_defs".into(),
                row_id: "ad-1".into(),
                op: ChangeOp::Upsert,
                row: DbRow(
                    serde_json::json!({
                        "id": "ad-1", "entity_type_id": "et-1", "code": "engine_number",
                        "name": "Engine Number", "data_type": "text", "required": false,
                        "sort_order": 0,
                    })
                    .as_object()
                    .unwrap()
                    .clone(),
                ),
            }],
            &alice,
        )
        .await
        .unwrap();

        // Soft-delete the entity type.
        s.write_sync_changes(
            vec![WriteInput {
                table_name: "entity_types".into(),
                row_id: "et-1".into(),
                op: ChangeOp::Delete,
                row: entity_type_row("et-1", "engine"),
            }],
            &alice,
        )
        .await
        .unwrap();

        let Outcome::Deflect(cr) = gate
            .admit_or_deflect(
                "attribute_defs",
                "ad-1",
                None,
                DbRow(
                    serde_json::json!({
                        "id": "ad-1", "entity_type_id": "et-1", "code": "engine_number_2",
                        "name": "Engine Number", "data_type": "text", "required": false,
                        "sort_order": 0,
                    })
                    .as_object()
                    .unwrap()
                    .clone(),
                ),
                &bob,
            )
            .await
            .unwrap()
        else {
            panic!("expected deflect");
        };

        let result = gate.apply(&cr.id, &alice).await;
        assert!(matches!(result, Err(GateError::Validation(_))));
    }
}
