//! Newtypes over a JSON object so wire rows (snake_case keys, timestamps as
//! integer milliseconds, `value_json`/`meta_json` as serialized strings) and
//! storage rows are never accidentally interchanged at a type level, even
//! though the registry's whole job (§4.B) is converting between them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row as received from or sent to a client over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireRow(pub Map<String, Value>);

/// A row as stored in (or read from) the authoritative relational tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DbRow(pub Map<String, Value>);

impl WireRow {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }
}

impl DbRow {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }
}

impl From<Map<String, Value>> for WireRow {
    fn from(m: Map<String, Value>) -> Self {
        WireRow(m)
    }
}

impl From<Map<String, Value>> for DbRow {
    fn from(m: Map<String, Value>) -> Self {
        DbRow(m)
    }
}
