//! The entity-attribute-value core of the data model (§3). New business
//! object types are added as `EntityType`/`AttributeDef` rows, not as new
//! Rust types or storage tables.

use serde::{Deserialize, Serialize};

/// The data type of an [`AttributeDef`], constraining how its values are
/// interpreted and validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Number,
    Boolean,
    Date,
    Json,
    Link,
}

/// A named class of business object (`engine`, `part`, `employee`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub id: String,
    pub code: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// A named field on an `EntityType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub id: String,
    pub entity_type_id: String,
    pub code: String,
    pub name: String,
    pub data_type: DataType,
    pub required: bool,
    pub sort_order: i32,
    /// Free-form metadata, e.g. the link-target type for `DataType::Link`.
    pub meta_json: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// An instance of an `EntityType`. Carries only identity and lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub type_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// A (entity, attribute_def) pair with a JSON-encoded value. One row per
/// pair; absence means unset (invariant 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub id: String,
    pub entity_id: String,
    pub attribute_def_id: String,
    pub value_json: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

/// An event on an entity: a checklist, a work order, a supply request, a
/// repair step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub entity_id: String,
    pub operation_type: String,
    pub status: String,
    pub performed_at: Option<i64>,
    pub performed_by: Option<String>,
    pub meta_json: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}
