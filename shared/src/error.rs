use thiserror::Error;

/// Failures raised by the reconciliation model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// A manual edit or creation request broke a field constraint.
    /// Nothing from the request was applied.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// An observation matched more than one stored record.
    #[error("identity key {key} matches {} records", .ids.len())]
    IdentityConflict { key: String, ids: Vec<String> },

    /// An observation that cannot become a record (no name or no host).
    #[error("observation rejected: {reason}")]
    InvalidObservation { reason: String },
}

impl ReconcileError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The offending field for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// A string that does not name any variant of a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
