#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use nbdb_contracts::{NbError, NbResult, Row, RowUuid};
use parking_lot::RwLock;

pub type TableRows = BTreeMap<RowUuid, Row>;

/// Client-side mirror of the subscribed tables.
///
/// One reader/writer lock covers the whole store. Only [`UpdateIngest`]
/// writes, one row per critical section.
///
/// [`UpdateIngest`]: crate::ingest::UpdateIngest
#[derive(Debug, Default)]
pub struct RowStore {
    tables: RwLock<BTreeMap<String, TableRows>>,
}

impl RowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a table as observed. Reads of a subscribed-but-empty table return
    /// an empty result instead of `NotFound`.
    pub fn subscribe(&self, table: &str) {
        self.tables.write().entry(table.to_string()).or_default();
    }

    pub fn is_subscribed(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    pub fn subscribed_tables(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    pub fn get(&self, table: &str, uuid: &RowUuid) -> NbResult<Row> {
        self.read_table(table, |rows| rows.get(uuid).cloned())?
            .ok_or_else(|| NbError::not_found(table, format!("_uuid == {uuid}")))
    }

    pub fn get_all(&self, table: &str) -> NbResult<Vec<(RowUuid, Row)>> {
        self.read_table(table, |rows| {
            rows.iter()
                .map(|(uuid, row)| (uuid.clone(), row.clone()))
                .collect()
        })
    }

    pub fn row_count(&self, table: &str) -> NbResult<usize> {
        self.read_table(table, |rows| rows.len())
    }

    /// Runs `f` over one table under the read lock.
    pub fn read_table<R>(&self, table: &str, f: impl FnOnce(&TableRows) -> R) -> NbResult<R> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| NbError::not_found(table, "table is not subscribed"))?;
        Ok(f(rows))
    }

    /// Replaces (or with `None`/an empty row, removes) one row and returns the
    /// state it held before. No-op on unsubscribed tables.
    pub(crate) fn apply(&self, table: &str, uuid: &RowUuid, new: Option<Row>) -> Option<Row> {
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table)?;
        match new.filter(|r| !r.is_empty()) {
            Some(row) => rows.insert(uuid.clone(), row),
            None => rows.remove(uuid),
        }
    }
}
