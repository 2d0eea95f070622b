#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::value::{Row, RowUuid};

/// One row's transition inside a delta batch. Empty states are stored as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub uuid: RowUuid,
    pub old: Option<Row>,
    pub new: Option<Row>,
}

impl RowUpdate {
    pub fn new(uuid: RowUuid, old: Option<Row>, new: Option<Row>) -> Self {
        Self {
            uuid,
            old: old.filter(|r| !r.is_empty()),
            new: new.filter(|r| !r.is_empty()),
        }
    }

    pub fn insert(uuid: RowUuid, new: Row) -> Self {
        Self::new(uuid, None, Some(new))
    }

    pub fn modify(uuid: RowUuid, old: Row, new: Row) -> Self {
        Self::new(uuid, Some(old), Some(new))
    }

    pub fn delete(uuid: RowUuid, old: Row) -> Self {
        Self::new(uuid, Some(old), None)
    }
}

/// Delta batch keyed by table; updates within a table keep arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    pub tables: BTreeMap<String, Vec<RowUpdate>>,
}

impl UpdateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: impl Into<String>, update: RowUpdate) {
        self.tables.entry(table.into()).or_default().push(update);
    }

    pub fn with(mut self, table: impl Into<String>, update: RowUpdate) -> Self {
        self.push(table, update);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}
