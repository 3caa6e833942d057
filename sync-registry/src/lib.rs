//! The Sync Table Registry (§4.B): a compile-time enumeration of every
//! replicated table, replacing per-table copy-paste in both the push and
//! pull paths. Adding a new replicated table is a registry entry plus a
//! storage table; no protocol code changes.

mod tables;
mod validate;

pub use validate::ValidationError;

use std::sync::OnceLock;
use sync_model::row::{DbRow, WireRow};

/// The primitive wire type of one field on a replicated table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Bool,
    NullableTimestamp,
    Json,
}

/// One field's wire name, storage name, and type.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub dto: &'static str,
    pub db: &'static str,
    pub kind: FieldKind,
}

/// A validation predicate applied to every inbound wire row before it is
/// admitted to the gate.
pub type SchemaFn = fn(&WireRow) -> Result<(), ValidationError>;

/// A display-name resolver for one table, generalizing the per-entity label
/// heuristics called out in §9 into a registry-owned configuration.
pub type LabelFn = fn(&DbRow) -> Option<String>;

/// The parent table a child row's write must also "touch" (§4.C step 4):
/// bump the parent's `updated_at` and emit a synthetic `change_log` entry so
/// clients watching the parent learn it has fresh children.
#[derive(Debug, Clone, Copy)]
pub struct ParentRef {
    /// The parent's `sync_name`, e.g. `"entities"`.
    pub table: &'static str,
    /// The db column on the child row holding the parent's row id, e.g.
    /// `"entity_id"`.
    pub fk_field: &'static str,
}

/// A foreign-key-shaped reference from this table to another registered
/// table, independent of [`ParentRef`] (which only names the single parent
/// touched on write). Used to detect dangling references on change-request
/// apply (§9's third open question): a row may reference several other
/// tables (e.g. an `attribute_value` references both its `entity_id` and its
/// `attribute_def_id`), and any of them may have been soft-deleted since the
/// request was filed.
#[derive(Debug, Clone, Copy)]
pub struct RefCheck {
    /// The db column on this row holding the referenced row's id.
    pub fk_field: &'static str,
    /// The referenced table's `sync_name`.
    pub table: &'static str,
}

/// A single replicated table's declarative definition.
pub struct TableDef {
    /// Stable wire identifier, e.g. `"entity_types"`.
    pub sync_name: &'static str,
    pub fields: &'static [FieldDef],
    /// Primary-key column(s) used for UPSERT.
    pub conflict_target: &'static [&'static str],
    pub schema: SchemaFn,
    /// Integer so parents are applied before children (invariant 3).
    pub dependency_order: i32,
    /// Fields whose changes alone are considered noise and ignored when
    /// deciding whether to surface a change request in the moderation view
    /// (§4.D, §9) — e.g. a pure `updated_at` bump. Empty means "show
    /// everything": the spec's chosen default for new tables.
    pub noise_filter: &'static [&'static str],
    pub label: Option<LabelFn>,
    /// The parent table to touch on every write to this table, if any.
    pub parent: Option<ParentRef>,
    /// Column sets that must be unique among not-soft-deleted rows
    /// (invariant 1). Each inner slice is one composite key; empty means no
    /// uniqueness beyond the primary key is enforced by the store.
    pub unique_when_live: &'static [&'static [&'static str]],
    /// Every foreign-key-shaped reference this table carries, for the
    /// dangling-reference check on change-request apply (§9).
    pub references: &'static [RefCheck],
}

impl TableDef {
    /// Convert a wire row (snake_case wire names) into a storage row
    /// (storage column names). Fields absent on the wire are simply absent
    /// from the result; callers decide whether that is an error.
    pub fn to_db_row(&self, wire: &WireRow) -> DbRow {
        let mut out = serde_json::Map::new();
        for field in self.fields {
            if let Some(value) = wire.get(field.dto) {
                out.insert(field.db.to_string(), value.clone());
            }
        }
        DbRow(out)
    }

    /// Convert a storage row back into a wire row.
    pub fn to_wire_row(&self, db: &DbRow) -> WireRow {
        let mut out = serde_json::Map::new();
        for field in self.fields {
            if let Some(value) = db.get(field.db) {
                out.insert(field.dto.to_string(), value.clone());
            }
        }
        WireRow(out)
    }

    /// Whether `after` differs from `before` in any field this table's
    /// `noise_filter` does not ignore. Used by [`crate::suppress_noise`]
    /// semantics implemented in `sync-store`.
    pub fn differs_outside_noise_filter(&self, before: &DbRow, after: &DbRow) -> bool {
        for field in self.fields {
            if self.noise_filter.contains(&field.db) {
                continue;
            }
            if before.get(field.db) != after.get(field.db) {
                return true;
            }
        }
        false
    }
}

static REGISTRY: OnceLock<Vec<TableDef>> = OnceLock::new();

/// The full set of replicated tables, in no particular order (use
/// [`dependency_ordered`] when applying writes).
pub fn registry() -> &'static [TableDef] {
    REGISTRY.get_or_init(tables::build).as_slice()
}

/// Look up one table by its wire name.
pub fn table(sync_name: &str) -> Option<&'static TableDef> {
    registry().iter().find(|t| t.sync_name == sync_name)
}

/// The registry's tables sorted by `dependency_order` ascending (parents
/// before children), stable on ties.
pub fn dependency_ordered() -> Vec<&'static TableDef> {
    let mut tables: Vec<&'static TableDef> = registry().iter().collect();
    tables.sort_by_key(|t| t.dependency_order);
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_contains_all_five_business_tables() {
        let names: Vec<&str> = registry().iter().map(|t| t.sync_name).collect();
        for expected in [
            "entity_types",
            "attribute_defs",
            "entities",
            "attribute_values",
            "operations",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }

    #[test]
    fn dependency_ordered_puts_parents_before_children() {
        let ordered = dependency_ordered();
        let pos = |name: &str| ordered.iter().position(|t| t.sync_name == name).unwrap();
        assert!(pos("entity_types") < pos("entities"));
        assert!(pos("entities") < pos("attribute_values"));
        assert!(pos("entities") < pos("operations"));
    }

    #[test]
    fn to_db_row_and_back_round_trips_known_fields() {
        let t = table("entity_types").unwrap();
        let wire = WireRow(
            json!({
                "id": "et-1",
                "code": "engine",
                "name": "Engine",
                "created_at": 1,
                "updated_at": 2,
                "deleted_at": null,
            })
            .as_object()
            .unwrap()
            .clone(),
        );
        let db = t.to_db_row(&wire);
        let wire2 = t.to_wire_row(&db);
        assert_eq!(wire, wire2);
    }

    #[test]
    fn noise_filter_defaults_to_show_everything() {
        // attribute_values has no noise_filter configured, so any diff
        // outside an empty allow-list is reported.
        let t = table("attribute_values").unwrap();
        let before = DbRow(json!({"value_json": "\"a\"", "updated_at": 1}).as_object().unwrap().clone());
        let after = DbRow(json!({"value_json": "\"a\"", "updated_at": 2}).as_object().unwrap().clone());
        assert!(t.differs_outside_noise_filter(&before, &after));
    }

    #[test]
    fn attribute_values_reference_both_entity_and_attribute_def() {
        let t = table("attribute_values").unwrap();
        let targets: Vec<&str> = t.references.iter().map(|r| r.table).collect();
        assert!(targets.contains(&"entities"));
        assert!(targets.contains(&"attribute_defs"));
    }

    #[test]
    fn noise_filter_on_entity_types_ignores_updated_at_only_churn() {
        let t = table("entity_types").unwrap();
        let before = DbRow(
            json!({"code": "engine", "name": "Engine", "deleted_at": null, "updated_at": 1})
                .as_object()
                .unwrap()
                .clone(),
        );
        let after = DbRow(
            json!({"code": "engine", "name": "Engine", "deleted_at": null, "updated_at": 2})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert!(!t.differs_outside_noise_filter(&before, &after));
    }
}
