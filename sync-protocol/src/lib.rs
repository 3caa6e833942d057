//! The Sync Protocol (§4.D): push/pull orchestration over the registry, the
//! gate, and the authoritative store. Table-agnostic — adding a replicated
//! table never touches this crate.

mod config;
mod error;
mod moderation;
mod pull;
mod push;
mod types;

pub use config::ProtocolConfig;
pub use error::ProtocolError;
pub use moderation::{filter_change_requests_noise, is_noise};
pub use pull::pull;
pub use push::push;
pub use types::{
    DeflectedRow, PullRequest, PullResponse, PushError, PushRequest, PushResponse, TableUpserts,
    WireTableChanges,
};
