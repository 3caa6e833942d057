//! The Client Replica's sync worker (§4.F, §5): push-then-pull on a bounded
//! timer, single-threaded cooperative inside this worker even though other
//! parts of an embedding app (UI, file I/O) run in parallel. Push and pull
//! are each serialized by their own mutex; a polling cycle never pipelines
//! a second refresh while one is in flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sync_protocol::PushRequest;

use crate::backoff::{self, BackoffConfig};
use crate::error::ClientError;
use crate::store::{packs_to_upserts, LocalStore};
use crate::transport::SyncTransport;

/// Tunables for one worker instance (§6's `SYNC_*` table plus §5's backoff
/// constants), constructed once and passed down — never read from the
/// environment inside this crate.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `SYNC_POLL_INTERVAL_MS`.
    pub poll_interval: Duration,
    pub pull_limit: Option<u32>,
    /// `SYNC_PUSH_MAX_TOTAL` / `MAX_TOTAL_ROWS`.
    pub push_max_total: u32,
    /// `SYNC_PUSH_MAX_PER_TABLE` / `MAX_ROWS_PER_TABLE`.
    pub push_max_per_table: u32,
    pub backoff: BackoffConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            pull_limit: None,
            push_max_total: 5_000,
            push_max_per_table: 1_000,
            backoff: BackoffConfig::default(),
        }
    }
}

/// The client-side mirror of §4.D's push/pull protocol, wired against one
/// [`LocalStore`] and one [`SyncTransport`].
pub struct SyncWorker {
    store: Arc<LocalStore>,
    transport: SyncTransport,
    client_id: String,
    config: WorkerConfig,
    push_lock: tokio::sync::Mutex<()>,
    pull_lock: tokio::sync::Mutex<()>,
}

impl SyncWorker {
    pub fn new(store: Arc<LocalStore>, transport: SyncTransport, client_id: impl Into<String>, config: WorkerConfig) -> Self {
        Self {
            store,
            transport,
            client_id: client_id.into(),
            config,
            push_lock: tokio::sync::Mutex::new(()),
            pull_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// `collectAllPending` + one `/sync/push` round trip (§4.F outbound
    /// path). A no-op (and not an error) when there is nothing pending.
    pub async fn push_once(&self) -> Result<(), ClientError> {
        let _guard = self.push_lock.lock().await;

        let packs = self.store.collect_all_pending(self.config.push_max_per_table, self.config.push_max_total)?;
        if packs.is_empty() {
            return Ok(());
        }

        // Remember every (table, id) we are about to send so the response's
        // errors/deflected lists can be turned into a complement: anything
        // sent and not named as an error is treated as applied (§4.D's open
        // question resolves deflected the same way — both mean "stop
        // resending").
        let mut sent: Vec<(String, String)> = Vec::new();
        for pack in &packs {
            for row in &pack.rows {
                sent.push((pack.table.clone(), row.get_str("id").unwrap_or("").to_string()));
            }
        }

        let upserts = packs_to_upserts(packs);
        let request = PushRequest { client_id: self.client_id.clone(), upserts };
        let response = self.transport.push(&request).await?;

        let errored: HashSet<(String, String)> =
            response.errors.iter().map(|e| (e.table.clone(), e.id.clone())).collect();

        for (table, id) in sent {
            if errored.contains(&(table.clone(), id.clone())) {
                self.store.mark_error(&table, &id)?;
            } else {
                self.store.mark_synced(&table, &id)?;
            }
        }

        tracing::info!(
            client_id = self.client_id.as_str(),
            applied = response.applied,
            errors = response.errors.len(),
            deflected = response.deflected.len(),
            "push_once complete"
        );
        Ok(())
    }

    /// Repeated `/sync/pull` round trips (§4.F inbound path) until
    /// `has_more` is false. Each page is projected and the cursor advanced
    /// before the next page is requested (invariant 3: pull is a total,
    /// cursor-bounded replay).
    pub async fn pull_once(&self) -> Result<(), ClientError> {
        let _guard = self.pull_lock.lock().await;

        loop {
            let cursor = self.store.cursor()?;
            let page = self.transport.pull(cursor, self.config.pull_limit).await?;
            let has_more = page.has_more;
            self.store.apply_pull_page(&page)?;
            if !has_more {
                break;
            }
        }
        Ok(())
    }

    /// One full polling cycle: push, then pull with the freshly advanced
    /// cursor (§4.F's ordering guarantee — never the other way around).
    pub async fn run_once(&self) -> Result<(), ClientError> {
        self.push_once().await?;
        self.pull_once().await?;
        Ok(())
    }

    /// Run the bounded-timer loop forever (§5: "a live-data refresh runs on
    /// a bounded timer (≈20s); it is a no-op when the device is offline").
    /// `is_online` is polled once per cycle; a cycle is skipped entirely
    /// while it returns `false`. On failure the loop backs off (unbounded
    /// attempts, same capped delay as the control paths) and tries again —
    /// it never gives up, since this is the background sync loop, not a
    /// control path.
    pub async fn run_loop(self: Arc<Self>, is_online: impl Fn() -> bool + Send + Sync + 'static) {
        let mut attempt: u32 = 0;
        loop {
            if is_online() {
                match self.run_once().await {
                    Ok(()) => {
                        attempt = 0;
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                    Err(e) => {
                        attempt += 1;
                        tracing::warn!(error = %e, attempt, "sync cycle failed, backing off");
                        tokio::time::sleep(backoff::delay_for_attempt(self.config.backoff, attempt)).await;
                    }
                }
            } else {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }
}
