#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::common::is_ovsdb_id;
use crate::value::{Row, RowUuid, Value, UUID_COLUMN};
use crate::{ContractViolation, Validate};

/// Transaction-scoped name for a row that only gets an identifier when the
/// insert defining it commits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaceholderName(String);

impl PlaceholderName {
    pub fn new(name: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(name.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for PlaceholderName {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !is_ovsdb_id(&self.0) {
            return Err(ContractViolation::InvalidValue {
                field: "placeholder_name",
                reason: "must match [A-Za-z_][A-Za-z0-9_]*",
            });
        }
        if self.0.len() > 64 {
            return Err(ContractViolation::InvalidValue {
                field: "placeholder_name",
                reason: "must be <= 64 chars",
            });
        }
        Ok(())
    }
}

impl fmt::Display for PlaceholderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A row identifier as carried inside an operation. Placeholders are
/// resolved by the sink at commit time and never dereferenced locally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UuidRef {
    Resolved(RowUuid),
    Placeholder(PlaceholderName),
}

impl UuidRef {
    pub fn placeholder(&self) -> Option<&PlaceholderName> {
        match self {
            UuidRef::Placeholder(p) => Some(p),
            UuidRef::Resolved(_) => None,
        }
    }
}

impl From<RowUuid> for UuidRef {
    fn from(v: RowUuid) -> Self {
        UuidRef::Resolved(v)
    }
}

impl From<PlaceholderName> for UuidRef {
    fn from(v: PlaceholderName) -> Self {
        UuidRef::Placeholder(v)
    }
}

/// Operand of a condition or mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum OpValue {
    Plain(Value),
    Ref(UuidRef),
}

impl OpValue {
    pub fn placeholder(&self) -> Option<&PlaceholderName> {
        match self {
            OpValue::Ref(r) => r.placeholder(),
            OpValue::Plain(_) => None,
        }
    }
}

impl From<Value> for OpValue {
    fn from(v: Value) -> Self {
        OpValue::Plain(v)
    }
}

impl From<UuidRef> for OpValue {
    fn from(v: UuidRef) -> Self {
        OpValue::Ref(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Equal,
    NotEqual,
    Includes,
    Excludes,
}

impl Function {
    pub fn wire_name(self) -> &'static str {
        match self {
            Function::Equal => "==",
            Function::NotEqual => "!=",
            Function::Includes => "includes",
            Function::Excludes => "excludes",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub function: Function,
    pub value: OpValue,
}

impl Condition {
    pub fn new(column: impl Into<String>, function: Function, value: impl Into<OpValue>) -> Self {
        Self {
            column: column.into(),
            function,
            value: value.into(),
        }
    }

    pub fn uuid_eq(target: impl Into<UuidRef>) -> Self {
        Self::new(UUID_COLUMN, Function::Equal, OpValue::Ref(target.into()))
    }

    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Function::Equal, OpValue::Plain(value.into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutator {
    InsertIntoSet,
    DeleteFromSet,
}

impl Mutator {
    pub fn wire_name(self) -> &'static str {
        match self {
            Mutator::InsertIntoSet => "insert",
            Mutator::DeleteFromSet => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        table: String,
        row: Row,
        uuid_name: Option<PlaceholderName>,
    },
    Update {
        table: String,
        row: Row,
        filter: Vec<Condition>,
    },
    Delete {
        table: String,
        filter: Vec<Condition>,
    },
    Mutate {
        table: String,
        column: String,
        mutator: Mutator,
        value: OpValue,
        filter: Vec<Condition>,
    },
    Select {
        table: String,
        filter: Vec<Condition>,
    },
}

impl Operation {
    pub fn table(&self) -> &str {
        match self {
            Operation::Insert { table, .. }
            | Operation::Update { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Select { table, .. } => table,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
            Operation::Mutate { .. } => "mutate",
            Operation::Select { .. } => "select",
        }
    }

    pub fn filter(&self) -> &[Condition] {
        match self {
            Operation::Insert { .. } => &[],
            Operation::Update { filter, .. }
            | Operation::Delete { filter, .. }
            | Operation::Mutate { filter, .. }
            | Operation::Select { filter, .. } => filter,
        }
    }

    /// Placeholders this operation reads (not the one it defines).
    pub fn placeholder_uses(&self) -> Vec<&PlaceholderName> {
        let mut uses: Vec<&PlaceholderName> = self
            .filter()
            .iter()
            .filter_map(|c| c.value.placeholder())
            .collect();
        if let Operation::Mutate { value, .. } = self {
            uses.extend(value.placeholder());
        }
        uses
    }
}

/// Per-operation result returned by the sink, parallel to the submitted list.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Inserted(RowUuid),
    Count(u64),
    Rows(Vec<Row>),
}

/// Failure reported by the sink for a submitted list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    /// Index of the first failing operation, when the sink can tell.
    pub op_index: Option<usize>,
    pub error: String,
    pub details: String,
}

/// Ordered operation list applied all-or-nothing by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    operations: Vec<Operation>,
}

impl Transaction {
    pub fn new(operations: Vec<Operation>) -> Result<Self, ContractViolation> {
        let t = Self { operations };
        t.validate()?;
        Ok(t)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Concatenates independently composed transactions into one submission.
    pub fn merge(parts: impl IntoIterator<Item = Transaction>) -> Result<Self, ContractViolation> {
        let operations = parts.into_iter().flat_map(|t| t.operations).collect();
        Self::new(operations)
    }

    /// Placeholder names defined by inserts, with their operation index.
    pub fn placeholders(&self) -> BTreeMap<&PlaceholderName, usize> {
        self.operations
            .iter()
            .enumerate()
            .filter_map(|(i, op)| match op {
                Operation::Insert {
                    uuid_name: Some(name),
                    ..
                } => Some((name, i)),
                _ => None,
            })
            .collect()
    }
}

impl Validate for Transaction {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.operations.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "transaction.operations",
                reason: "must not be empty",
            });
        }
        let mut defined: BTreeSet<&PlaceholderName> = BTreeSet::new();
        for op in &self.operations {
            if op.table().is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field: "operation.table",
                    reason: "must not be empty",
                });
            }
            for used in op.placeholder_uses() {
                if !defined.contains(used) {
                    return Err(ContractViolation::InvalidValue {
                        field: "operation.placeholder",
                        reason: "must be defined by an earlier insert in the same transaction",
                    });
                }
            }
            match op {
                Operation::Insert {
                    uuid_name: Some(name),
                    ..
                } => {
                    if !defined.insert(name) {
                        return Err(ContractViolation::InvalidValue {
                            field: "operation.uuid_name",
                            reason: "must be defined at most once per transaction",
                        });
                    }
                }
                Operation::Update { filter, .. }
                | Operation::Delete { filter, .. }
                | Operation::Mutate { filter, .. } => {
                    if filter.is_empty() {
                        return Err(ContractViolation::InvalidValue {
                            field: "operation.filter",
                            reason: "update/delete/mutate must carry at least one condition",
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Server reply to a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReply {
    pub results: Vec<OperationResult>,
    pub inserted: BTreeMap<PlaceholderName, RowUuid>,
}

impl TransactionReply {
    pub fn uuid_for(&self, name: &PlaceholderName) -> Option<&RowUuid> {
        self.inserted.get(name)
    }
}
