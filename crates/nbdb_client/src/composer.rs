#![forbid(unsafe_code)]

//! Turns one logical intent into an order-correct operation list.
//!
//! Composing only reads the row store. Existing rows are resolved up front so
//! no operation is emitted that would silently touch zero rows, and inserts
//! are checked against their natural key so duplicates surface as
//! `AlreadyExists`.

use std::cell::Cell;
use std::collections::BTreeSet;

use nbdb_contracts::op::{
    Condition, Mutator, OpValue, Operation, PlaceholderName, Transaction, UuidRef,
};
use nbdb_contracts::{NbError, NbResult, Row, RowUuid, Value};
use nbdb_store::RowStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    /// The key must be unique across the whole table.
    Table,
    /// The key must be unique among the rows the parent's link column holds.
    Parent,
}

/// Columns that decide whether two rows are the same logical entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey {
    pub columns: Vec<String>,
    pub scope: KeyScope,
}

impl NaturalKey {
    pub fn table<'a>(columns: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            columns: columns.into_iter().map(str::to_string).collect(),
            scope: KeyScope::Table,
        }
    }

    pub fn within_parent<'a>(columns: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            columns: columns.into_iter().map(str::to_string).collect(),
            scope: KeyScope::Parent,
        }
    }

    /// Projects `row` onto the key columns; every key column must be present.
    pub fn extract(&self, row: &Row) -> NbResult<Row> {
        if self.columns.is_empty() {
            return Err(NbError::invalid_option(
                "natural_key",
                "at least one key column is required",
            ));
        }
        self.columns
            .iter()
            .map(|c| {
                row.get(c)
                    .map(|v| (c.clone(), v.clone()))
                    .ok_or_else(|| {
                        NbError::invalid_option("natural_key", format!("row lacks key column {c}"))
                    })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParentSelector {
    Uuid(RowUuid),
    /// Natural-key lookup in the parent table; must match exactly one row.
    Key(Row),
    /// The parent row whose link column currently holds the child. Only
    /// meaningful when the child already exists.
    Containing,
}

/// The parent row and the set-of-reference column that links it to a child.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRef {
    pub table: String,
    pub column: String,
    pub selector: ParentSelector,
}

impl ParentRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>, selector: ParentSelector) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            selector,
        }
    }
}

fn describe(row: &Row) -> String {
    let parts: Vec<String> = row.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
    parts.join(",")
}

fn exactly_one(table: &str, what: &Row, hits: Vec<RowUuid>) -> NbResult<RowUuid> {
    let mut hits = hits.into_iter();
    match (hits.next(), hits.next()) {
        (Some(one), None) => Ok(one),
        (None, _) => Err(NbError::not_found(table, describe(what))),
        (Some(a), Some(b)) => {
            let mut candidates = vec![format!("{table}:{a}"), format!("{table}:{b}")];
            candidates.extend(hits.map(|u| format!("{table}:{u}")));
            Err(NbError::Ambiguous {
                what: format!("{table} {}", describe(what)),
                candidates,
            })
        }
    }
}

pub struct OperationComposer<'a> {
    store: &'a RowStore,
    prefix: u32,
    next: Cell<u32>,
}

impl<'a> OperationComposer<'a> {
    pub fn new(store: &'a RowStore) -> Self {
        Self {
            store,
            prefix: rand::random(),
            next: Cell::new(0),
        }
    }

    /// Fresh placeholder; unique within this composer and unlikely to clash
    /// with another composer's when transactions are merged.
    pub fn placeholder(&self) -> NbResult<PlaceholderName> {
        let n = self.next.get();
        self.next.set(n.wrapping_add(1));
        Ok(PlaceholderName::new(format!("row_{:08x}_{n}", self.prefix))?)
    }

    /// Unique row by natural key.
    pub fn resolve_row(&self, table: &str, key: &Row) -> NbResult<RowUuid> {
        exactly_one(table, key, self.store.find_all_by_fields(table, key)?)
    }

    /// Resolves the parent identifier; `child` is needed for
    /// [`ParentSelector::Containing`].
    pub fn resolve_parent(&self, parent: &ParentRef, child: Option<&RowUuid>) -> NbResult<RowUuid> {
        match &parent.selector {
            ParentSelector::Uuid(uuid) => {
                self.store.get(&parent.table, uuid)?;
                Ok(uuid.clone())
            }
            ParentSelector::Key(key) => self.resolve_row(&parent.table, key),
            ParentSelector::Containing => {
                let child = child.ok_or_else(|| {
                    NbError::invalid_option(
                        "parent.selector",
                        "containing lookup needs an existing child",
                    )
                })?;
                let hits = self
                    .store
                    .find_all_containing(&parent.table, &parent.column, child)?;
                let mut what = Row::new();
                what.insert(parent.column.clone(), Value::Uuid(child.clone()));
                exactly_one(&parent.table, &what, hits)
            }
        }
    }

    /// Picks the single parent, across several candidate tables, whose row
    /// matches `key`. Zero hits is `NotFound`; hits in more than one place is
    /// `Ambiguous`.
    pub fn resolve_among(&self, candidates: &[(&str, &str)], key: &Row) -> NbResult<ParentRef> {
        if candidates.is_empty() {
            return Err(NbError::invalid_option(
                "parent.candidates",
                "at least one candidate table is required",
            ));
        }
        let mut hits: Vec<(String, String, RowUuid)> = Vec::new();
        for (table, column) in candidates {
            let found = match self.store.find_all_by_fields(table, key) {
                Ok(found) => found,
                Err(NbError::NotFound { .. }) => Vec::new(),
                Err(err) => return Err(err),
            };
            hits.extend(
                found
                    .into_iter()
                    .map(|u| (table.to_string(), column.to_string(), u)),
            );
        }
        match hits.len() {
            0 => {
                let tables: Vec<&str> = candidates.iter().map(|(t, _)| *t).collect();
                Err(NbError::not_found(tables.join("|"), describe(key)))
            }
            1 => {
                let (table, column, uuid) = hits.remove(0);
                Ok(ParentRef::new(table, column, ParentSelector::Uuid(uuid)))
            }
            _ => Err(NbError::Ambiguous {
                what: describe(key),
                candidates: hits.iter().map(|(t, _, u)| format!("{t}:{u}")).collect(),
            }),
        }
    }

    /// Children in `child_table` linked from `parent_uuid.column` and matching `key`.
    fn linked_children(
        &self,
        parent: &ParentRef,
        parent_uuid: &RowUuid,
        child_table: &str,
        key: &Row,
    ) -> NbResult<Vec<RowUuid>> {
        let parent_row = self.store.get(&parent.table, parent_uuid)?;
        let linked: BTreeSet<&RowUuid> = match parent_row.get(&parent.column) {
            Some(Value::Set(items)) => items.iter().filter_map(Value::as_uuid).collect(),
            Some(Value::Uuid(u)) => BTreeSet::from([u]),
            _ => BTreeSet::new(),
        };
        Ok(self
            .store
            .find_all_by_fields(child_table, key)?
            .into_iter()
            .filter(|u| linked.contains(u))
            .collect())
    }

    fn ensure_absent(
        &self,
        table: &str,
        key: &Row,
        parent: Option<(&ParentRef, &RowUuid)>,
    ) -> NbResult<()> {
        let existing = match parent {
            Some((p, parent_uuid)) => self.linked_children(p, parent_uuid, table, key)?,
            None => self.store.find_all_by_fields(table, key)?,
        };
        match existing.into_iter().next() {
            Some(uuid) => Err(NbError::AlreadyExists {
                table: table.to_string(),
                uuid,
                what: describe(key),
            }),
            None => Ok(()),
        }
    }

    fn insert_op(&self, table: &str, row: Row) -> NbResult<(Operation, PlaceholderName)> {
        let name = self.placeholder()?;
        let op = Operation::Insert {
            table: table.to_string(),
            row,
            uuid_name: Some(name.clone()),
        };
        Ok((op, name))
    }

    /// Insert of a root row, refused when its natural key already matches.
    pub fn create(
        &self,
        table: &str,
        row: Row,
        key: &NaturalKey,
    ) -> NbResult<(Transaction, PlaceholderName)> {
        if key.scope == KeyScope::Parent {
            return Err(NbError::invalid_option(
                "natural_key.scope",
                "parent-scoped keys need create_and_link",
            ));
        }
        let key_row = key.extract(&row)?;
        self.ensure_absent(table, &key_row, None)?;
        let (op, name) = self.insert_op(table, row)?;
        Ok((Transaction::new(vec![op])?, name))
    }

    /// Insert of a child row plus the mutate that links it into its parent,
    /// as one transaction.
    pub fn create_and_link(
        &self,
        table: &str,
        row: Row,
        key: &NaturalKey,
        parent: &ParentRef,
    ) -> NbResult<(Transaction, PlaceholderName)> {
        if parent.selector == ParentSelector::Containing {
            return Err(NbError::invalid_option(
                "parent.selector",
                "a new row has no containing parent yet",
            ));
        }
        let parent_uuid = self.resolve_parent(parent, None)?;
        let key_row = key.extract(&row)?;
        match key.scope {
            KeyScope::Table => self.ensure_absent(table, &key_row, None)?,
            KeyScope::Parent => self.ensure_absent(table, &key_row, Some((parent, &parent_uuid)))?,
        }
        let (insert, name) = self.insert_op(table, row)?;
        let link = Operation::Mutate {
            table: parent.table.clone(),
            column: parent.column.clone(),
            mutator: Mutator::InsertIntoSet,
            value: OpValue::Ref(UuidRef::Placeholder(name.clone())),
            filter: vec![Condition::uuid_eq(parent_uuid)],
        };
        Ok((Transaction::new(vec![insert, link])?, name))
    }

    /// Unlinks a child from its parent and deletes it. With a `Uuid`/`Key`
    /// parent the child is searched among that parent's links; with
    /// `Containing` the child must be unique in its table.
    pub fn delete_and_unlink(&self, table: &str, key: &Row, parent: &ParentRef) -> NbResult<Transaction> {
        let (child, parent_uuid) = match parent.selector {
            ParentSelector::Containing => {
                let child = self.resolve_row(table, key)?;
                let parent_uuid = self.resolve_parent(parent, Some(&child))?;
                (child, parent_uuid)
            }
            _ => {
                let parent_uuid = self.resolve_parent(parent, None)?;
                let hits = self.linked_children(parent, &parent_uuid, table, key)?;
                (exactly_one(table, key, hits)?, parent_uuid)
            }
        };
        let unlink = Operation::Mutate {
            table: parent.table.clone(),
            column: parent.column.clone(),
            mutator: Mutator::DeleteFromSet,
            value: OpValue::Ref(UuidRef::Resolved(child.clone())),
            filter: vec![Condition::uuid_eq(parent_uuid)],
        };
        let delete = Operation::Delete {
            table: table.to_string(),
            filter: vec![Condition::uuid_eq(child)],
        };
        Ok(Transaction::new(vec![unlink, delete])?)
    }

    pub fn delete(&self, table: &str, key: &Row) -> NbResult<Transaction> {
        let uuid = self.resolve_row(table, key)?;
        Ok(Transaction::new(vec![Operation::Delete {
            table: table.to_string(),
            filter: vec![Condition::uuid_eq(uuid)],
        }])?)
    }

    pub fn update(&self, table: &str, key: &Row, changes: Row) -> NbResult<Transaction> {
        if changes.is_empty() {
            return Err(NbError::invalid_option("changes", "nothing to update"));
        }
        if changes.contains_key(nbdb_contracts::value::UUID_COLUMN) {
            return Err(NbError::invalid_option("changes", "_uuid is immutable"));
        }
        let uuid = self.resolve_row(table, key)?;
        Ok(Transaction::new(vec![Operation::Update {
            table: table.to_string(),
            row: changes,
            filter: vec![Condition::uuid_eq(uuid)],
        }])?)
    }

    /// Server-side read of the rows matching every column in `key`.
    pub fn select(&self, table: &str, key: &Row) -> NbResult<Transaction> {
        if key.is_empty() {
            return Err(NbError::invalid_option(
                "partial_row",
                "at least one discriminating column is required",
            ));
        }
        let filter = key
            .iter()
            .map(|(column, value)| match value {
                Value::Uuid(u) if column == nbdb_contracts::value::UUID_COLUMN => {
                    Condition::uuid_eq(u.clone())
                }
                _ => Condition::equals(column.clone(), value.clone()),
            })
            .collect();
        Ok(Transaction::new(vec![Operation::Select {
            table: table.to_string(),
            filter,
        }])?)
    }

    /// Adds or removes `value` in a set column of one existing row.
    pub fn mutate_set(
        &self,
        table: &str,
        key: &Row,
        column: &str,
        mutator: Mutator,
        value: OpValue,
    ) -> NbResult<Transaction> {
        if value.placeholder().is_some() {
            return Err(NbError::invalid_option(
                "value",
                "placeholders are only valid next to their insert",
            ));
        }
        let uuid = self.resolve_row(table, key)?;
        Ok(Transaction::new(vec![Operation::Mutate {
            table: table.to_string(),
            column: column.to_string(),
            mutator,
            value,
            filter: vec![Condition::uuid_eq(uuid)],
        }])?)
    }
}
