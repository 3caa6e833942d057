//! A `Mutex<Vec<LedgerEntry>>`-backed fake implementation of
//! [`crate::LedgerStore`], used throughout this workspace's tests in place
//! of a live PostgreSQL instance.

use crate::canonical::{build_entry, chain_hash, recompute_tx_hash, signed_content_bytes};
use crate::{AppendRequest, ChainVerification, LedgerError, LedgerKeys, LedgerStore};
use async_trait::async_trait;
use std::sync::Mutex;
use sync_model::clock::now_ms;
use sync_model::ledger::{Checkpoint, LedgerEntry};

pub struct InMemoryLedgerStore {
    keys: LedgerKeys,
    entries: Mutex<Vec<LedgerEntry>>,
    last_checkpoint_seq: Mutex<u64>,
}

impl InMemoryLedgerStore {
    pub fn new(keys: LedgerKeys) -> Self {
        Self {
            keys,
            entries: Mutex::new(Vec::new()),
            last_checkpoint_seq: Mutex::new(0),
        }
    }

    /// Test-only hook: corrupt a stored entry's payload in place, without
    /// recomputing its hash, to exercise [`LedgerStore::verify_chain`]'s
    /// tamper detection.
    #[cfg(test)]
    pub fn tamper_payload_for_test(&self, seq: u64, new_payload_json: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.seq == seq) {
            entry.payload_json = new_payload_json.to_string();
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, request: AppendRequest) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut entries = self.entries.lock().unwrap();
        let current_last_seq = entries.last().map(|e| e.seq).unwrap_or(0);

        if let Some(expected) = request.expected_last_seq {
            if expected != current_last_seq {
                return Err(LedgerError::Conflict {
                    expected,
                    actual: current_last_seq,
                });
            }
        }

        let mut prev_hash = entries
            .last()
            .map(|e| chain_hash(&self.keys.hmac_key, e))
            .unwrap_or_else(|| sync_kernel::GENESIS_HASH.to_string());

        let mut appended = Vec::with_capacity(request.txs.len());
        let mut next_seq = current_last_seq + 1;

        for tx in request.txs {
            let entry = build_entry(&self.keys, next_seq, prev_hash.clone(), tx);
            prev_hash = chain_hash(&self.keys.hmac_key, &entry);
            next_seq += 1;
            entries.push(entry.clone());
            appended.push(entry);
        }

        Ok(appended)
    }

    async fn range(&self, from_seq: u64, limit: u32) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| e.seq >= from_seq)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn last_seq(&self) -> Result<u64, LedgerError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.last().map(|e| e.seq).unwrap_or(0))
    }

    async fn checkpoint(&self) -> Result<Checkpoint, LedgerError> {
        let entries = self.entries.lock().unwrap();
        let mut last_checkpoint_seq = self.last_checkpoint_seq.lock().unwrap();

        let mut digest = sync_kernel::GENESIS_HASH.to_string();
        let mut last_seq = *last_checkpoint_seq;
        for entry in entries.iter().filter(|e| e.seq > *last_checkpoint_seq) {
            let bytes = signed_content_bytes(entry);
            digest = sync_kernel::hash_tagged(
                sync_kernel::domains::CHECKPOINT,
                &[digest.as_bytes(), &bytes].concat(),
            );
            last_seq = entry.seq;
        }
        *last_checkpoint_seq = last_seq;

        let created_at = now_ms();
        let signed = format!("{last_seq}:{digest}:{created_at}");
        let sig = sync_kernel::sign(&self.keys.signing_key, signed.as_bytes());

        Ok(Checkpoint {
            last_seq,
            digest,
            created_at,
            sig,
        })
    }

    async fn verify_chain(&self, from_seq: u64, to_seq: u64) -> Result<ChainVerification, LedgerError> {
        let entries = self.entries.lock().unwrap();
        let window: Vec<&LedgerEntry> = entries
            .iter()
            .filter(|e| e.seq >= from_seq && e.seq <= to_seq)
            .collect();

        let pubkey = sync_kernel::pubkey_from_signing_key(&self.keys.signing_key);
        let mut expected_prev = if from_seq <= 1 {
            sync_kernel::GENESIS_HASH.to_string()
        } else {
            match entries.iter().find(|e| e.seq == from_seq - 1) {
                Some(prior) => chain_hash(&self.keys.hmac_key, prior),
                None => sync_kernel::GENESIS_HASH.to_string(),
            }
        };

        for entry in window {
            if entry.prev_hash != expected_prev {
                return Ok(ChainVerification::Invalid {
                    first_bad_seq: entry.seq,
                    reason: "prev_hash mismatch".to_string(),
                });
            }
            if entry.tx_hash != recompute_tx_hash(entry) {
                return Ok(ChainVerification::Invalid {
                    first_bad_seq: entry.seq,
                    reason: "tx_hash mismatch".to_string(),
                });
            }
            let signed_bytes = signed_content_bytes(entry);
            if sync_kernel::verify(&pubkey, &signed_bytes, &entry.sig).is_err() {
                return Ok(ChainVerification::Invalid {
                    first_bad_seq: entry.seq,
                    reason: "signature invalid".to_string(),
                });
            }
            expected_prev = chain_hash(&self.keys.hmac_key, entry);
        }

        Ok(ChainVerification::Valid)
    }
}
