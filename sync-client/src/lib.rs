//! The Client Replica (§4.F): the mirror on each user's machine. An
//! embedded SQLite local store, a registry-driven pending-queue, and a
//! push-then-pull sync worker against the server's `/sync/push` and
//! `/sync/pull` endpoints.

pub mod backoff;
pub mod error;
pub mod store;
pub mod transport;
pub mod worker;

pub use backoff::BackoffConfig;
pub use error::ClientError;
pub use store::LocalStore;
pub use transport::SyncTransport;
pub use worker::{SyncWorker, WorkerConfig};
