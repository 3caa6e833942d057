//! The synchronization subsystem's HTTP shell (§6): auth, `/sync/push`,
//! `/sync/pull`, and the change-request moderation endpoints, plus the
//! process configuration both the `sync-server` and `rebuild-ledger`
//! binaries share.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod state;
