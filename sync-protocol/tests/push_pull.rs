//! End-to-end push/pull scenarios (§8): a fresh client bootstrap via pull,
//! idempotent replay of an already-applied push, and deflection into a
//! change request when a foreign-owned row is touched.

use std::sync::Arc;

use sync_gate::Gate;
use sync_model::actor::{Actor, Role};
use sync_model::clock::FixedClock;
use sync_model::row::WireRow;
use sync_protocol::{pull, push, ProtocolConfig, PullRequest, PushRequest, TableUpserts};
use sync_store::{AuthoritativeStore, InMemoryAuthoritativeStore};

fn actor(id: &str) -> Actor {
    Actor::new(id, id, Role::User)
}

fn store() -> Arc<InMemoryAuthoritativeStore> {
    let (_pubkey, signing_key) = sync_kernel::generate_keypair();
    let ledger = Arc::new(sync_ledger::InMemoryLedgerStore::new(sync_ledger::LedgerKeys {
        hmac_key: b"k".to_vec(),
        signing_key,
    }));
    Arc::new(InMemoryAuthoritativeStore::new(ledger, Arc::new(FixedClock(1000))))
}

fn entity_type_wire(id: &str, code: &str) -> WireRow {
    WireRow(
        serde_json::json!({
            "id": id, "code": code, "name": code,
            "created_at": 1000, "updated_at": 1000, "deleted_at": null,
        })
        .as_object()
        .unwrap()
        .clone(),
    )
}

#[tokio::test]
async fn push_then_pull_replays_everything_from_a_fresh_cursor() {
    let s = store();
    let gate = Gate::new(s.clone());
    let config = ProtocolConfig::default();
    let alice = actor("u-alice");

    let request = PushRequest {
        client_id: "client-1".into(),
        upserts: vec![TableUpserts {
            table: "entity_types".into(),
            rows: vec![entity_type_wire("et-1", "engine"), entity_type_wire("et-2", "gearbox")],
        }],
    };
    let response = push(&s, &gate, &config, &alice, request).await.unwrap();
    assert_eq!(response.applied, 2);
    assert!(response.errors.is_empty());
    assert!(response.deflected.is_empty());

    let page = pull(&s, &config, PullRequest { cursor_seq: 0, limit: None }).await.unwrap();
    assert_eq!(page.changes.len(), 1);
    assert_eq!(page.changes[0].table, "entity_types");
    assert_eq!(page.changes[0].rows.len(), 2);
    assert!(!page.has_more);
}

#[tokio::test]
async fn pull_with_a_cursor_past_the_end_returns_nothing_new() {
    let s = store();
    let gate = Gate::new(s.clone());
    let config = ProtocolConfig::default();
    let alice = actor("u-alice");

    let request = PushRequest {
        client_id: "client-1".into(),
        upserts: vec![TableUpserts {
            table: "entity_types".into(),
            rows: vec![entity_type_wire("et-1", "engine")],
        }],
    };
    push(&s, &gate, &config, &alice, request).await.unwrap();

    let first = pull(&s, &config, PullRequest { cursor_seq: 0, limit: None }).await.unwrap();
    let second = pull(&s, &config, PullRequest { cursor_seq: first.next_cursor, limit: None })
        .await
        .unwrap();
    assert!(second.changes.is_empty());
    assert_eq!(second.next_cursor, first.next_cursor);
}

#[tokio::test]
async fn pushing_a_foreign_owned_row_deflects_instead_of_applying() {
    let s = store();
    let gate = Gate::new(s.clone());
    let config = ProtocolConfig::default();
    let alice = actor("u-alice");
    let bob = actor("u-bob");

    push(
        &s,
        &gate,
        &config,
        &alice,
        PushRequest {
            client_id: "client-1".into(),
            upserts: vec![TableUpserts {
                table: "entity_types".into(),
                rows: vec![entity_type_wire("et-1", "engine")],
            }],
        },
    )
    .await
    .unwrap();

    let response = push(
        &s,
        &gate,
        &config,
        &bob,
        PushRequest {
            client_id: "client-2".into(),
            upserts: vec![TableUpserts {
                table: "entity_types".into(),
                rows: vec![entity_type_wire("et-1", "engine-v2")],
            }],
        },
    )
    .await
    .unwrap();

    assert_eq!(response.applied, 0);
    assert_eq!(response.deflected.len(), 1);
    assert_eq!(response.deflected[0].id, "et-1");

    // The row itself is unchanged — only a change request was created.
    let page = pull(&s, &config, PullRequest { cursor_seq: 0, limit: None }).await.unwrap();
    let row = &page.changes[0].rows[0];
    assert_eq!(row.get_str("code"), Some("engine"));
}

#[tokio::test]
async fn a_row_failing_schema_validation_is_reported_and_does_not_block_the_rest() {
    let s = store();
    let gate = Gate::new(s.clone());
    let config = ProtocolConfig::default();
    let alice = actor("u-alice");

    let bad = WireRow(
        serde_json::json!({"id": "et-bad", "code": "", "name": "", "created_at": 1, "updated_at": 1, "deleted_at": null})
            .as_object()
            .unwrap()
            .clone(),
    );
    let request = PushRequest {
        client_id: "client-1".into(),
        upserts: vec![TableUpserts {
            table: "entity_types".into(),
            rows: vec![bad, entity_type_wire("et-1", "engine")],
        }],
    };
    let response = push(&s, &gate, &config, &alice, request).await.unwrap();
    assert_eq!(response.applied, 1);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].table, "entity_types");
}

#[tokio::test]
async fn a_push_with_an_older_updated_at_does_not_clobber_a_newer_row() {
    // §8 scenario 2 (reverse order): C2 (name="gearbox", updated_at=101)
    // reaches the server first, then C1 (name="engine", updated_at=100)
    // arrives afterward. max(updated_at) wins, so the row must keep
    // "gearbox" instead of being clobbered back to "engine".
    let s = store();
    let gate = Gate::new(s.clone());
    let config = ProtocolConfig::default();
    let alice = actor("u-alice");

    let newer = WireRow(
        serde_json::json!({
            "id": "et-1", "code": "engine", "name": "gearbox",
            "created_at": 1000, "updated_at": 101, "deleted_at": null,
        })
        .as_object()
        .unwrap()
        .clone(),
    );
    push(
        &s,
        &gate,
        &config,
        &alice,
        PushRequest {
            client_id: "client-1".into(),
            upserts: vec![TableUpserts {
                table: "entity_types".into(),
                rows: vec![newer],
            }],
        },
    )
    .await
    .unwrap();

    let stale = WireRow(
        serde_json::json!({
            "id": "et-1", "code": "engine", "name": "engine",
            "created_at": 1000, "updated_at": 100, "deleted_at": null,
        })
        .as_object()
        .unwrap()
        .clone(),
    );
    push(
        &s,
        &gate,
        &config,
        &alice,
        PushRequest {
            client_id: "client-1".into(),
            upserts: vec![TableUpserts {
                table: "entity_types".into(),
                rows: vec![stale],
            }],
        },
    )
    .await
    .unwrap();

    let page = pull(&s, &config, PullRequest { cursor_seq: 0, limit: None }).await.unwrap();
    let row = &page.changes[0].rows[0];
    assert_eq!(row.get_str("name"), Some("gearbox"));
}

#[tokio::test]
async fn repushing_the_same_pack_after_a_disconnect_is_a_no_op() {
    // §8 scenario 5: a client disconnects before reading the push response
    // and re-pushes the identical pack on reconnect. The row's own
    // `updated_at` already equals the incoming value, so the replay must be
    // accepted without changing anything observable through a pull.
    let s = store();
    let gate = Gate::new(s.clone());
    let config = ProtocolConfig::default();
    let alice = actor("u-alice");

    let pack = || PushRequest {
        client_id: "client-1".into(),
        upserts: vec![TableUpserts {
            table: "entity_types".into(),
            rows: vec![entity_type_wire("et-1", "engine")],
        }],
    };

    let first = push(&s, &gate, &config, &alice, pack()).await.unwrap();
    assert_eq!(first.applied, 1);

    let replay = push(&s, &gate, &config, &alice, pack()).await.unwrap();
    assert_eq!(replay.applied, 1);
    assert!(replay.errors.is_empty());
    assert!(replay.deflected.is_empty());

    let page = pull(&s, &config, PullRequest { cursor_seq: 0, limit: None }).await.unwrap();
    assert_eq!(page.changes[0].rows.len(), 1);
    let row = &page.changes[0].rows[0];
    assert_eq!(row.get_str("name"), Some("engine"));
    assert_eq!(row.get_i64("updated_at"), Some(1000));
}

#[tokio::test]
async fn push_rejects_a_batch_over_the_per_table_cap() {
    let s = store();
    let gate = Gate::new(s.clone());
    let config = ProtocolConfig {
        push_max_per_table: 1,
        ..ProtocolConfig::default()
    };
    let alice = actor("u-alice");

    let request = PushRequest {
        client_id: "client-1".into(),
        upserts: vec![TableUpserts {
            table: "entity_types".into(),
            rows: vec![entity_type_wire("et-1", "engine"), entity_type_wire("et-2", "gearbox")],
        }],
    };
    let result = push(&s, &gate, &config, &alice, request).await;
    assert!(matches!(result, Err(sync_protocol::ProtocolError::PushTooLarge { .. })));
}
