//! The Ledger Store (§4.A): durable, append-only, hash-chained, signed
//! record of every state change accepted into the authoritative replica.

mod canonical;
mod error;
mod memory;
mod pg;

pub use error::LedgerError;
pub use memory::InMemoryLedgerStore;
pub use pg::PgLedgerStore;

use async_trait::async_trait;
use sync_model::ledger::{Checkpoint, LedgerEntry, TxPayload};

/// Keys shared process-wide, supplied at construction (§6, §9 "global
/// mutable state" note: these are constructor arguments, never read from the
/// environment inside this crate).
#[derive(Clone)]
pub struct LedgerKeys {
    pub hmac_key: Vec<u8>,
    pub signing_key: ed25519_dalek::SigningKey,
}

/// One `append` call: the caller's last-observed sequence (for optimistic
/// conflict detection) and the batch of transactions to append.
pub struct AppendRequest {
    /// `None` skips the conflict check (used by callers who already hold an
    /// exclusive lock, e.g. inside a serialized database transaction).
    pub expected_last_seq: Option<u64>,
    pub txs: Vec<TxPayload>,
}

/// The result of [`LedgerStore::verify_chain`]: either the whole range
/// checks out, or the first offending sequence number is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    Valid,
    Invalid { first_bad_seq: u64, reason: String },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainVerification::Valid)
    }
}

/// The Ledger Store's operations (§4.A), implemented by both a production
/// PostgreSQL-backed store and an in-memory fake used throughout this
/// workspace's tests.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically assigns sequential `seq` values starting at
    /// `last_seq + 1`, chains each entry's `prev_hash` from the previous
    /// entry's canonical bytes, signs it, and writes all entries in one
    /// transaction. Fails with [`LedgerError::Conflict`] if
    /// `expected_last_seq` is set and does not match the store's current
    /// `last_seq`.
    async fn append(&self, request: AppendRequest) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Read a contiguous window ordered by `seq` ascending. Never returns
    /// holes.
    async fn range(&self, from_seq: u64, limit: u32) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// The current highest assigned sequence number, or 0 if the ledger is
    /// empty.
    async fn last_seq(&self) -> Result<u64, LedgerError>;

    /// Fold all entries since the previous checkpoint into a rolling
    /// digest, sign it, persist it, and return it.
    async fn checkpoint(&self) -> Result<Checkpoint, LedgerError>;

    /// Recompute hashes and check signatures across `[from_seq, to_seq]`,
    /// reporting the first offending seq if any.
    async fn verify_chain(&self, from_seq: u64, to_seq: u64) -> Result<ChainVerification, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_model::actor::{Actor, Role};
    use sync_model::sync::ChangeOp;

    pub(crate) fn sample_tx(row_id: &str, ts: i64) -> TxPayload {
        TxPayload {
            table_name: "entities".to_string(),
            row_id: row_id.to_string(),
            op: ChangeOp::Upsert,
            payload_json: format!("{{\"id\":\"{row_id}\"}}"),
            actor: Actor::new("u1", "alice", Role::User),
            ts,
        }
    }

    fn test_keys() -> LedgerKeys {
        let (_pubkey, signing_key) = sync_kernel::generate_keypair();
        LedgerKeys {
            hmac_key: b"test-hmac-key".to_vec(),
            signing_key,
        }
    }

    #[tokio::test]
    async fn append_assigns_sequential_seqs() {
        let store = InMemoryLedgerStore::new(test_keys());
        let entries = store
            .append(AppendRequest {
                expected_last_seq: None,
                txs: vec![sample_tx("e1", 100), sample_tx("e2", 101)],
            })
            .await
            .unwrap();
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
    }

    #[tokio::test]
    async fn append_chains_prev_hash_from_previous_entry() {
        let keys = test_keys();
        let hmac_key = keys.hmac_key.clone();
        let store = InMemoryLedgerStore::new(keys);

        let first = store
            .append(AppendRequest {
                expected_last_seq: None,
                txs: vec![sample_tx("e1", 100)],
            })
            .await
            .unwrap();
        assert_eq!(first[0].prev_hash, sync_kernel::GENESIS_HASH);

        let second = store
            .append(AppendRequest {
                expected_last_seq: Some(1),
                txs: vec![sample_tx("e2", 101)],
            })
            .await
            .unwrap();
        let expected_prev = canonical::chain_hash(&hmac_key, &first[0]);
        assert_eq!(second[0].prev_hash, expected_prev);
    }

    #[tokio::test]
    async fn append_rejects_stale_expected_seq() {
        let store = InMemoryLedgerStore::new(test_keys());
        store
            .append(AppendRequest {
                expected_last_seq: None,
                txs: vec![sample_tx("e1", 100)],
            })
            .await
            .unwrap();

        let conflict = store
            .append(AppendRequest {
                expected_last_seq: Some(0),
                txs: vec![sample_tx("e2", 101)],
            })
            .await;
        assert!(matches!(conflict, Err(LedgerError::Conflict { .. })));
    }

    #[tokio::test]
    async fn range_never_returns_holes() {
        let store = InMemoryLedgerStore::new(test_keys());
        for i in 0..5 {
            store
                .append(AppendRequest {
                    expected_last_seq: None,
                    txs: vec![sample_tx(&format!("e{i}"), 100 + i)],
                })
                .await
                .unwrap();
        }
        let window = store.range(2, 2).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].seq, 2);
        assert_eq!(window[1].seq, 3);
    }

    #[tokio::test]
    async fn verify_chain_detects_tampering() {
        let store = InMemoryLedgerStore::new(test_keys());
        for i in 0..3 {
            store
                .append(AppendRequest {
                    expected_last_seq: None,
                    txs: vec![sample_tx(&format!("e{i}"), 100 + i)],
                })
                .await
                .unwrap();
        }
        assert!(store.verify_chain(1, 3).await.unwrap().is_valid());

        store.tamper_payload_for_test(2, "{\"id\":\"tampered\"}");
        let result = store.verify_chain(1, 3).await.unwrap();
        assert_eq!(result, ChainVerification::Invalid { first_bad_seq: 2, reason: "tx_hash mismatch".to_string() });
    }
}
