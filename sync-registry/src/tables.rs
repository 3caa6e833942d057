//! The concrete table definitions for this system's five replicated
//! business tables. `row_owner`, `change_log`, `change_request`,
//! `ledger_entry`, and `checkpoint` are server-only bookkeeping tables and
//! are intentionally not registered here — they are never pushed or pulled
//! as ordinary rows.

use crate::{FieldDef, FieldKind, ParentRef, RefCheck, TableDef, ValidationError};
use sync_model::row::{DbRow, WireRow};

const fn f(dto: &'static str, db: &'static str, kind: FieldKind) -> FieldDef {
    FieldDef { dto, db, kind }
}

fn require_str(wire: &WireRow, field: &str) -> Result<&str, ValidationError> {
    wire.get_str(field)
        .ok_or_else(|| ValidationError::MissingField(field.to_string()))
}

fn require_i64(wire: &WireRow, field: &str) -> Result<i64, ValidationError> {
    wire.get_i64(field)
        .ok_or_else(|| ValidationError::MissingField(field.to_string()))
}

fn schema_entity_types(wire: &WireRow) -> Result<(), ValidationError> {
    require_str(wire, "id")?;
    let code = require_str(wire, "code")?;
    if code.trim().is_empty() {
        return Err(ValidationError::Custom("code must not be empty".into()));
    }
    require_str(wire, "name")?;
    require_i64(wire, "created_at")?;
    require_i64(wire, "updated_at")?;
    Ok(())
}

fn schema_attribute_defs(wire: &WireRow) -> Result<(), ValidationError> {
    require_str(wire, "id")?;
    require_str(wire, "entity_type_id")?;
    let code = require_str(wire, "code")?;
    if code.trim().is_empty() {
        return Err(ValidationError::Custom("code must not be empty".into()));
    }
    require_str(wire, "name")?;
    let data_type = require_str(wire, "data_type")?;
    const VALID: &[&str] = &["text", "number", "boolean", "date", "json", "link"];
    if !VALID.contains(&data_type) {
        return Err(ValidationError::WrongType {
            field: "data_type".into(),
            expected: "one of text|number|boolean|date|json|link".into(),
        });
    }
    require_i64(wire, "created_at")?;
    require_i64(wire, "updated_at")?;
    Ok(())
}

fn schema_entities(wire: &WireRow) -> Result<(), ValidationError> {
    require_str(wire, "id")?;
    require_str(wire, "type_id")?;
    require_i64(wire, "created_at")?;
    require_i64(wire, "updated_at")?;
    Ok(())
}

fn schema_attribute_values(wire: &WireRow) -> Result<(), ValidationError> {
    require_str(wire, "id")?;
    require_str(wire, "entity_id")?;
    require_str(wire, "attribute_def_id")?;
    require_str(wire, "value_json")?;
    require_i64(wire, "created_at")?;
    require_i64(wire, "updated_at")?;
    Ok(())
}

fn schema_operations(wire: &WireRow) -> Result<(), ValidationError> {
    require_str(wire, "id")?;
    require_str(wire, "entity_id")?;
    require_str(wire, "operation_type")?;
    require_str(wire, "status")?;
    require_i64(wire, "created_at")?;
    require_i64(wire, "updated_at")?;
    Ok(())
}

fn label_entity_type(db: &DbRow) -> Option<String> {
    db.get_str("name").map(str::to_owned)
}

fn label_entity(db: &DbRow) -> Option<String> {
    // Generic entities have no intrinsic label; a richer client overrides
    // this per EntityType using attribute values (engine_number, full_name,
    // etc.), which is display-layer concern outside this core per §1.
    db.get_str("id").map(str::to_owned)
}

pub(crate) fn build() -> Vec<TableDef> {
    vec![
        TableDef {
            sync_name: "entity_types",
            fields: &[
                f("id", "id", FieldKind::String),
                f("code", "code", FieldKind::String),
                f("name", "name", FieldKind::String),
                f("created_at", "created_at", FieldKind::NullableTimestamp),
                f("updated_at", "updated_at", FieldKind::NullableTimestamp),
                f("deleted_at", "deleted_at", FieldKind::NullableTimestamp),
            ],
            conflict_target: &["id"],
            schema: schema_entity_types,
            dependency_order: 0,
            noise_filter: &["id", "created_at", "updated_at"],
            label: Some(label_entity_type),
            parent: None,
            unique_when_live: &[&["code"]],
            references: &[],
        },
        TableDef {
            sync_name: "attribute_defs",
            fields: &[
                f("id", "id", FieldKind::String),
                f("entity_type_id", "entity_type_id", FieldKind::String),
                f("code", "code", FieldKind::String),
                f("name", "name", FieldKind::String),
                f("data_type", "data_type", FieldKind::String),
                f("required", "required", FieldKind::Bool),
                f("sort_order", "sort_order", FieldKind::Number),
                f("meta_json", "meta_json", FieldKind::Json),
                f("created_at", "created_at", FieldKind::NullableTimestamp),
                f("updated_at", "updated_at", FieldKind::NullableTimestamp),
                f("deleted_at", "deleted_at", FieldKind::NullableTimestamp),
            ],
            conflict_target: &["id"],
            schema: schema_attribute_defs,
            dependency_order: 0,
            noise_filter: &[],
            label: None,
            parent: None,
            unique_when_live: &[&["entity_type_id", "code"]],
            references: &[RefCheck {
                fk_field: "entity_type_id",
                table: "entity_types",
            }],
        },
        TableDef {
            sync_name: "entities",
            fields: &[
                f("id", "id", FieldKind::String),
                f("type_id", "type_id", FieldKind::String),
                f("created_at", "created_at", FieldKind::NullableTimestamp),
                f("updated_at", "updated_at", FieldKind::NullableTimestamp),
                f("deleted_at", "deleted_at", FieldKind::NullableTimestamp),
            ],
            conflict_target: &["id"],
            schema: schema_entities,
            dependency_order: 1,
            noise_filter: &[],
            label: Some(label_entity),
            parent: None,
            unique_when_live: &[],
            references: &[RefCheck {
                fk_field: "type_id",
                table: "entity_types",
            }],
        },
        TableDef {
            sync_name: "attribute_values",
            fields: &[
                f("id", "id", FieldKind::String),
                f("entity_id", "entity_id", FieldKind::String),
                f("attribute_def_id", "attribute_def_id", FieldKind::String),
                f("value_json", "value_json", FieldKind::Json),
                f("created_at", "created_at", FieldKind::NullableTimestamp),
                f("updated_at", "updated_at", FieldKind::NullableTimestamp),
                f("deleted_at", "deleted_at", FieldKind::NullableTimestamp),
            ],
            conflict_target: &["id"],
            schema: schema_attribute_values,
            dependency_order: 2,
            noise_filter: &[],
            label: None,
            parent: Some(ParentRef {
                table: "entities",
                fk_field: "entity_id",
            }),
            unique_when_live: &[],
            references: &[
                RefCheck {
                    fk_field: "entity_id",
                    table: "entities",
                },
                RefCheck {
                    fk_field: "attribute_def_id",
                    table: "attribute_defs",
                },
            ],
        },
        TableDef {
            sync_name: "operations",
            fields: &[
                f("id", "id", FieldKind::String),
                f("entity_id", "entity_id", FieldKind::String),
                f("operation_type", "operation_type", FieldKind::String),
                f("status", "status", FieldKind::String),
                f("performed_at", "performed_at", FieldKind::NullableTimestamp),
                f("performed_by", "performed_by", FieldKind::String),
                f("meta_json", "meta_json", FieldKind::Json),
                f("created_at", "created_at", FieldKind::NullableTimestamp),
                f("updated_at", "updated_at", FieldKind::NullableTimestamp),
                f("deleted_at", "deleted_at", FieldKind::NullableTimestamp),
            ],
            conflict_target: &["id"],
            schema: schema_operations,
            dependency_order: 2,
            noise_filter: &[],
            label: None,
            parent: Some(ParentRef {
                table: "entities",
                fk_field: "entity_id",
            }),
            unique_when_live: &[],
            references: &[RefCheck {
                fk_field: "entity_id",
                table: "entities",
            }],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(v: serde_json::Value) -> WireRow {
        WireRow(v.as_object().unwrap().clone())
    }

    #[test]
    fn entity_types_schema_rejects_empty_code() {
        let row = wire(json!({
            "id": "et-1", "code": "", "name": "Engine",
            "created_at": 1, "updated_at": 1,
        }));
        assert!(schema_entity_types(&row).is_err());
    }

    #[test]
    fn entity_types_schema_accepts_valid_row() {
        let row = wire(json!({
            "id": "et-1", "code": "engine", "name": "Engine",
            "created_at": 1, "updated_at": 1,
        }));
        assert!(schema_entity_types(&row).is_ok());
    }

    #[test]
    fn attribute_defs_schema_rejects_unknown_data_type() {
        let row = wire(json!({
            "id": "ad-1", "entity_type_id": "et-1", "code": "engine_number",
            "name": "Engine Number", "data_type": "not_a_type",
            "created_at": 1, "updated_at": 1,
        }));
        assert!(schema_attribute_defs(&row).is_err());
    }
}
