//! Canonical entry content, hashing, and signing (invariant 5).
//!
//! An entry's `tx_hash` is computed over its canonical content *excluding*
//! `tx_hash` and `sig`. Its `sig` then signs the canonical content
//! *including* `prev_hash` and `tx_hash` but excluding `sig` itself. The
//! next entry's `prev_hash` is the HMAC of that same signed content. This
//! makes the three fields non-circular while satisfying invariant 5
//! literally: `prev_hash == HMAC(previous entry canonical bytes)` and
//! `sig` signs bytes that include `prev_hash`.

use crate::LedgerKeys;
use serde_json::json;
use sync_model::ledger::{LedgerEntry, TxPayload};

/// The canonical JSON bytes of an entry's signed content (everything except
/// `sig`). This is what gets signed, and what the *next* entry's
/// `prev_hash` is HMAC'd from.
pub fn signed_content_bytes(entry: &LedgerEntry) -> Vec<u8> {
    let value = json!({
        "seq": entry.seq,
        "ts": entry.ts,
        "op": entry.op,
        "table": entry.table_name,
        "row_id": entry.row_id,
        "payload": entry.payload_json,
        "actor": entry.actor,
        "prev_hash": entry.prev_hash,
        "tx_hash": entry.tx_hash,
    });
    sync_atom::canonicalize(&value).expect("ledger entry content is always valid JSON")
}

/// HMAC chain value a *following* entry's `prev_hash` must equal.
pub fn chain_hash(hmac_key: &[u8], entry: &LedgerEntry) -> String {
    sync_kernel::hmac_chain(hmac_key, &signed_content_bytes(entry))
}

/// Build and sign the next entry given the previous entry's canonical
/// chain value (or the genesis constant for seq 1).
pub fn build_entry(keys: &LedgerKeys, seq: u64, prev_hash: String, tx: TxPayload) -> LedgerEntry {
    let content_without_hash = json!({
        "seq": seq,
        "ts": tx.ts,
        "op": tx.op,
        "table": tx.table_name,
        "row_id": tx.row_id,
        "payload": tx.payload_json,
        "actor": tx.actor,
        "prev_hash": prev_hash,
    });
    let content_bytes = sync_atom::canonicalize(&content_without_hash)
        .expect("ledger entry content is always valid JSON");
    let tx_hash = sync_kernel::hash_tagged(sync_kernel::domains::LEDGER, &content_bytes);

    let mut entry = LedgerEntry {
        seq,
        ts: tx.ts,
        op: tx.op,
        table_name: tx.table_name,
        row_id: tx.row_id,
        payload_json: tx.payload_json,
        actor: tx.actor,
        prev_hash,
        tx_hash,
        sig: String::new(),
    };

    let signed_bytes = signed_content_bytes(&entry);
    entry.sig = sync_kernel::sign(&keys.signing_key, &signed_bytes);
    entry
}

/// Recompute `tx_hash` for `entry` and compare, independent of its stored
/// value — used by `verify_chain`.
pub fn recompute_tx_hash(entry: &LedgerEntry) -> String {
    let content_without_hash = json!({
        "seq": entry.seq,
        "ts": entry.ts,
        "op": entry.op,
        "table": entry.table_name,
        "row_id": entry.row_id,
        "payload": entry.payload_json,
        "actor": entry.actor,
        "prev_hash": entry.prev_hash,
    });
    let content_bytes = sync_atom::canonicalize(&content_without_hash)
        .expect("ledger entry content is always valid JSON");
    sync_kernel::hash_tagged(sync_kernel::domains::LEDGER, &content_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_model::actor::{Actor, Role};
    use sync_model::sync::ChangeOp;

    fn keys() -> LedgerKeys {
        let (_pub, signing_key) = sync_kernel::generate_keypair();
        LedgerKeys {
            hmac_key: b"k".to_vec(),
            signing_key,
        }
    }

    fn tx() -> TxPayload {
        TxPayload {
            table_name: "entities".into(),
            row_id: "e1".into(),
            op: ChangeOp::Upsert,
            payload_json: "{}".into(),
            actor: Actor::new("u1", "alice", Role::User),
            ts: 1000,
        }
    }

    #[test]
    fn build_entry_tx_hash_matches_recomputation() {
        let keys = keys();
        let entry = build_entry(&keys, 1, sync_kernel::GENESIS_HASH.to_string(), tx());
        assert_eq!(entry.tx_hash, recompute_tx_hash(&entry));
    }

    #[test]
    fn chain_hash_feeds_next_entrys_prev_hash() {
        let keys = keys();
        let first = build_entry(&keys, 1, sync_kernel::GENESIS_HASH.to_string(), tx());
        let expected_next_prev = chain_hash(&keys.hmac_key, &first);
        let second = build_entry(&keys, 2, expected_next_prev.clone(), tx());
        assert_eq!(second.prev_hash, expected_next_prev);
    }

    #[test]
    fn sig_verifies_against_signed_content() {
        let keys = keys();
        let entry = build_entry(&keys, 1, sync_kernel::GENESIS_HASH.to_string(), tx());
        let pubkey = sync_kernel::pubkey_from_signing_key(&keys.signing_key);
        let bytes = signed_content_bytes(&entry);
        assert!(sync_kernel::verify(&pubkey, &bytes, &entry.sig).is_ok());
    }
}
