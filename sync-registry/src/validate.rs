//! Validation errors produced by a [`crate::SchemaFn`].

use thiserror::Error;

/// A wire row failed a table's schema predicate (§7's `ValidationError`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("wrong type for field {field}: expected {expected}")]
    WrongType { field: String, expected: String },
    #[error("{0}")]
    Custom(String),
}

impl ValidationError {
    /// The exact reason surfaced for a dangling reference on change-request
    /// apply (§9's third open question), kept as one named constructor so
    /// every call site uses the identical wording.
    pub fn dangling_reference(detail: impl Into<String>) -> Self {
        ValidationError::Custom(format!("dangling reference: {}", detail.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_reference_message_is_stable() {
        let err = ValidationError::dangling_reference("attribute_def et-1 is soft-deleted");
        assert_eq!(
            err.to_string(),
            "dangling reference: attribute_def et-1 is soft-deleted"
        );
    }
}
