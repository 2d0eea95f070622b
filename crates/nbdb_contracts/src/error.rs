#![forbid(unsafe_code)]

use thiserror::Error;

use crate::op::Operation;
use crate::value::RowUuid;
use crate::ContractViolation;

/// Caller-facing error kinds. None of them are retried internally.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NbError {
    /// A named entity (or a never-subscribed table) has no matching row.
    #[error("{table}: nothing matches {what}")]
    NotFound { table: String, what: String },

    /// Natural-key collision on insert.
    #[error("{table}: row {uuid} already matches {what}")]
    AlreadyExists {
        table: String,
        uuid: RowUuid,
        what: String,
    },

    /// More than one candidate resolved where exactly one was required.
    #[error("{what} is ambiguous across {candidates:?}")]
    Ambiguous {
        what: String,
        candidates: Vec<String>,
    },

    /// Malformed or contradictory arguments, caught before composing.
    #[error("invalid option {field}: {reason}")]
    InvalidOption { field: &'static str, reason: String },

    #[error("schema violation: {0}")]
    SchemaViolation(ContractViolation),

    /// The sink rejected the submitted list; nothing from it was applied.
    #[error("transaction failed at operation {op_index:?}: {error}: {details}")]
    TransactionFailed {
        op_index: Option<usize>,
        operation: Option<Box<Operation>>,
        error: String,
        details: String,
    },
}

pub type NbResult<T> = Result<T, NbError>;

impl NbError {
    pub fn not_found(table: impl Into<String>, what: impl Into<String>) -> Self {
        NbError::NotFound {
            table: table.into(),
            what: what.into(),
        }
    }

    pub fn invalid_option(field: &'static str, reason: impl Into<String>) -> Self {
        NbError::InvalidOption {
            field,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NbError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, NbError::AlreadyExists { .. })
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, NbError::Ambiguous { .. })
    }
}

impl From<ContractViolation> for NbError {
    fn from(v: ContractViolation) -> Self {
        NbError::SchemaViolation(v)
    }
}
