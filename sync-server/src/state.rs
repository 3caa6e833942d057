//! The shared handler state, following this codebase's existing `AppState`
//! pattern (a small `Clone` struct of shared resources, built once in
//! `main` and threaded through axum's `State` extractor).

use std::sync::Arc;

use sqlx::PgPool;
use sync_gate::Gate;
use sync_store::PgAuthoritativeStore;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub store: Arc<PgAuthoritativeStore>,
    pub gate: Arc<Gate<PgAuthoritativeStore>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let store = Arc::new(PgAuthoritativeStore::new(pool.clone(), config.ledger_keys()));
        let gate = Arc::new(Gate::new(store.clone()));
        Self { pool, config, store, gate }
    }
}
