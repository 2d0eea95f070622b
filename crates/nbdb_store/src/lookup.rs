#![forbid(unsafe_code)]

//! Linear-scan search over one table of the [`RowStore`]. No secondary
//! indices are kept; table sizes track cluster scale, not request volume.

use nbdb_contracts::value::UUID_COLUMN;
use nbdb_contracts::{NbError, NbResult, Row, RowUuid, Value};

use crate::row_store::RowStore;

/// Compares a stored column against a wanted value. A missing column equals an
/// empty set, and a bare scalar equals a one-element set holding it.
fn value_matches(stored: Option<&Value>, wanted: &Value) -> bool {
    match (stored, wanted) {
        (None, w) => w.is_empty_set(),
        (Some(s), w) if s == w => true,
        (Some(Value::Set(items)), w) if !matches!(w, Value::Set(_)) => {
            items.len() == 1 && &items[0] == w
        }
        (Some(s), Value::Set(items)) if !matches!(s, Value::Set(_)) => {
            items.len() == 1 && &items[0] == s
        }
        _ => false,
    }
}

fn row_matches(uuid: &RowUuid, row: &Row, partial: &Row) -> bool {
    partial.iter().all(|(column, wanted)| {
        if column == UUID_COLUMN {
            return wanted.as_uuid() == Some(uuid);
        }
        value_matches(row.get(column), wanted)
    })
}

impl RowStore {
    /// First row whose columns equal every column present in `partial`.
    ///
    /// An empty `partial` is rejected rather than treated as "match all".
    pub fn find_by_fields(&self, table: &str, partial: &Row) -> NbResult<Option<RowUuid>> {
        Ok(self.find_all_by_fields(table, partial)?.into_iter().next())
    }

    pub fn find_all_by_fields(&self, table: &str, partial: &Row) -> NbResult<Vec<RowUuid>> {
        if partial.is_empty() {
            return Err(NbError::invalid_option(
                "partial_row",
                "at least one discriminating column is required",
            ));
        }
        self.read_table(table, |rows| {
            rows.iter()
                .filter(|(uuid, row)| row_matches(uuid, row, partial))
                .map(|(uuid, _)| uuid.clone())
                .collect()
        })
    }

    /// First row whose `column` (a reference or set of references) holds `target`.
    pub fn find_containing(
        &self,
        table: &str,
        column: &str,
        target: &RowUuid,
    ) -> NbResult<Option<RowUuid>> {
        Ok(self
            .find_all_containing(table, column, target)?
            .into_iter()
            .next())
    }

    pub fn find_all_containing(
        &self,
        table: &str,
        column: &str,
        target: &RowUuid,
    ) -> NbResult<Vec<RowUuid>> {
        self.read_table(table, |rows| {
            rows.iter()
                .filter(|(_, row)| row.get(column).is_some_and(|v| v.contains_uuid(target)))
                .map(|(uuid, _)| uuid.clone())
                .collect()
        })
    }
}
