//! Shared data model: the EAV core entities, the supporting ledger/sync
//! bookkeeping entities, and the wire/storage row shapes every other crate
//! in this workspace builds on.

pub mod actor;
pub mod clock;
pub mod eav;
pub mod ledger;
pub mod links;
pub mod row;
pub mod sync;

pub use actor::{Actor, Role};
pub use eav::{AttributeDef, AttributeValue, DataType, Entity, EntityType, Operation};
pub use ledger::{Checkpoint, LedgerEntry, TxPayload};
pub use row::{DbRow, WireRow};
pub use sync::{ChangeLogRow, ChangeOp, ChangeRequest, ChangeRequestStatus, RowOwner};
