#![forbid(unsafe_code)]

//! In-process stand-in for the database server, used to drive a client end
//! to end without a transport.
//!
//! Operation lists are applied to a copy of the tables and committed only when
//! every operation succeeds and no reference dangles. The committed changes
//! are published on the feed as one [`UpdateBatch`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use nbdb_contracts::op::{
    Condition, Function, Mutator, OpValue, Operation, OperationResult, PlaceholderName,
    SinkFailure, Transaction, UuidRef,
};
use nbdb_contracts::update::{RowUpdate, UpdateBatch};
use nbdb_contracts::value::UUID_COLUMN;
use nbdb_contracts::{Row, RowUuid, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::sink::TransactionSink;

type Tables = BTreeMap<String, BTreeMap<RowUuid, Row>>;

struct OpError {
    error: &'static str,
    details: String,
}

impl OpError {
    fn new(error: &'static str, details: impl Into<String>) -> Self {
        Self {
            error,
            details: details.into(),
        }
    }
}

pub struct MemoryServer {
    tables: Mutex<Tables>,
    armed: parking_lot::Mutex<Option<SinkFailure>>,
    feed: mpsc::Sender<UpdateBatch>,
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryServer").finish_non_exhaustive()
    }
}

fn resolve(value: &OpValue, names: &BTreeMap<PlaceholderName, RowUuid>) -> Result<Value, OpError> {
    match value {
        OpValue::Plain(v) => Ok(v.clone()),
        OpValue::Ref(UuidRef::Resolved(u)) => Ok(Value::Uuid(u.clone())),
        OpValue::Ref(UuidRef::Placeholder(name)) => names
            .get(name)
            .cloned()
            .map(Value::Uuid)
            .ok_or_else(|| OpError::new("syntax error", format!("unknown named-uuid {name}"))),
    }
}

fn elements(value: &Value) -> Vec<&Value> {
    match value {
        Value::Set(items) => items.iter().collect(),
        single => vec![single],
    }
}

fn loose_eq(stored: Option<&Value>, wanted: &Value) -> bool {
    let empty = Value::Set(Vec::new());
    let stored = stored.unwrap_or(&empty);
    let (a, b) = (elements(stored), elements(wanted));
    a == b
}

fn matches(
    uuid: &RowUuid,
    row: &Row,
    filter: &[Condition],
    names: &BTreeMap<PlaceholderName, RowUuid>,
) -> Result<bool, OpError> {
    for cond in filter {
        let wanted = resolve(&cond.value, names)?;
        let own;
        let stored = if cond.column == UUID_COLUMN {
            own = Value::Uuid(uuid.clone());
            Some(&own)
        } else {
            row.get(&cond.column)
        };
        let hit = match cond.function {
            Function::Equal => loose_eq(stored, &wanted),
            Function::NotEqual => !loose_eq(stored, &wanted),
            Function::Includes => {
                let have = stored.map(elements).unwrap_or_default();
                elements(&wanted).iter().all(|w| have.contains(w))
            }
            Function::Excludes => {
                let have = stored.map(elements).unwrap_or_default();
                elements(&wanted).iter().all(|w| !have.contains(w))
            }
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matching(
    tables: &Tables,
    table: &str,
    filter: &[Condition],
    names: &BTreeMap<PlaceholderName, RowUuid>,
) -> Result<Vec<RowUuid>, OpError> {
    let mut hits = Vec::new();
    if let Some(rows) = tables.get(table) {
        for (uuid, row) in rows {
            if matches(uuid, row, filter, names)? {
                hits.push(uuid.clone());
            }
        }
    }
    Ok(hits)
}

fn apply(
    tables: &mut Tables,
    names: &mut BTreeMap<PlaceholderName, RowUuid>,
    op: &Operation,
) -> Result<OperationResult, OpError> {
    match op {
        Operation::Insert {
            table,
            row,
            uuid_name,
        } => {
            let uuid = RowUuid::from_random_bits(rand::random());
            if let Some(name) = uuid_name {
                names.insert(name.clone(), uuid.clone());
            }
            tables
                .entry(table.clone())
                .or_default()
                .insert(uuid.clone(), row.clone());
            Ok(OperationResult::Inserted(uuid))
        }
        Operation::Update { table, row, filter } => {
            if row.contains_key(UUID_COLUMN) {
                return Err(OpError::new("constraint violation", "_uuid is immutable"));
            }
            let hits = matching(tables, table, filter, names)?;
            let rows = tables.entry(table.clone()).or_default();
            for uuid in &hits {
                if let Some(stored) = rows.get_mut(uuid) {
                    stored.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Ok(OperationResult::Count(hits.len() as u64))
        }
        Operation::Delete { table, filter } => {
            let hits = matching(tables, table, filter, names)?;
            let rows = tables.entry(table.clone()).or_default();
            for uuid in &hits {
                rows.remove(uuid);
            }
            Ok(OperationResult::Count(hits.len() as u64))
        }
        Operation::Mutate {
            table,
            column,
            mutator,
            value,
            filter,
        } => {
            let value = resolve(value, names)?;
            let hits = matching(tables, table, filter, names)?;
            let rows = tables.entry(table.clone()).or_default();
            for uuid in &hits {
                let Some(stored) = rows.get_mut(uuid) else {
                    continue;
                };
                let current = match stored.remove(column) {
                    Some(Value::Set(items)) => items,
                    Some(Value::Map(m)) if m.is_empty() => Vec::new(),
                    Some(single) => vec![single],
                    None => Vec::new(),
                };
                let changes: Vec<Value> = elements(&value).into_iter().cloned().collect();
                let next = match mutator {
                    Mutator::InsertIntoSet => current.into_iter().chain(changes).collect::<Vec<_>>(),
                    Mutator::DeleteFromSet => current
                        .into_iter()
                        .filter(|v| !changes.contains(v))
                        .collect(),
                };
                stored.insert(column.clone(), Value::set(next));
            }
            Ok(OperationResult::Count(hits.len() as u64))
        }
        Operation::Select { table, filter } => {
            let hits = matching(tables, table, filter, names)?;
            let rows = tables.get(table);
            Ok(OperationResult::Rows(
                hits.iter()
                    .filter_map(|uuid| {
                        let mut row = rows?.get(uuid)?.clone();
                        row.insert(UUID_COLUMN.to_string(), Value::Uuid(uuid.clone()));
                        Some(row)
                    })
                    .collect(),
            ))
        }
    }
}

/// Every referenced identifier must name a live row.
fn dangling(tables: &Tables) -> Option<(String, RowUuid, RowUuid)> {
    let live: BTreeSet<&RowUuid> = tables.values().flat_map(|rows| rows.keys()).collect();
    for (table, rows) in tables {
        for (uuid, row) in rows {
            for value in row.values() {
                for v in elements(value) {
                    if let Value::Uuid(target) = v {
                        if !live.contains(target) {
                            return Some((table.clone(), uuid.clone(), target.clone()));
                        }
                    }
                }
            }
        }
    }
    None
}

fn diff(old: &Tables, new: &Tables) -> UpdateBatch {
    let mut batch = UpdateBatch::new();
    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let empty = BTreeMap::new();
    for table in names {
        let before = old.get(table).unwrap_or(&empty);
        let after = new.get(table).unwrap_or(&empty);
        for (uuid, row) in before {
            match after.get(uuid) {
                None => batch.push(table.clone(), RowUpdate::delete(uuid.clone(), row.clone())),
                Some(next) if next != row => batch.push(
                    table.clone(),
                    RowUpdate::modify(uuid.clone(), row.clone(), next.clone()),
                ),
                Some(_) => {}
            }
        }
        for (uuid, row) in after {
            if !before.contains_key(uuid) {
                batch.push(table.clone(), RowUpdate::insert(uuid.clone(), row.clone()));
            }
        }
    }
    batch
}

impl MemoryServer {
    /// Committed changes are sent on `feed`; pair it with
    /// [`feed_channel`](crate::client::feed_channel).
    pub fn new(feed: mpsc::Sender<UpdateBatch>) -> Self {
        Self {
            tables: Mutex::new(Tables::new()),
            armed: parking_lot::Mutex::new(None),
            feed,
        }
    }

    /// Makes the next transaction fail at `op_index` without applying anything.
    pub fn fail_next(&self, op_index: usize, error: &str, details: &str) {
        *self.armed.lock() = Some(SinkFailure {
            op_index: Some(op_index),
            error: error.to_string(),
            details: details.to_string(),
        });
    }

    /// Inserts a row directly, as another client would, and publishes it.
    pub async fn seed(&self, table: &str, row: Row) -> RowUuid {
        let mut tables = self.tables.lock().await;
        let before = tables.clone();
        let uuid = RowUuid::from_random_bits(rand::random());
        tables
            .entry(table.to_string())
            .or_default()
            .insert(uuid.clone(), row);
        let batch = diff(&before, &tables);
        self.publish(batch).await;
        uuid
    }

    pub async fn rows(&self, table: &str) -> BTreeMap<RowUuid, Row> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    async fn publish(&self, batch: UpdateBatch) {
        if batch.is_empty() {
            return;
        }
        if self.feed.send(batch).await.is_err() {
            debug!("update feed receiver gone; dropping batch");
        }
    }
}

#[async_trait]
impl TransactionSink for MemoryServer {
    async fn transact(&self, txn: &Transaction) -> Result<Vec<OperationResult>, SinkFailure> {
        // Held through publish so batches leave in commit order.
        let mut tables = self.tables.lock().await;
        let armed = self.armed.lock().take();
        if let Some(failure) = armed {
            return Err(failure);
        }
        let mut next = tables.clone();
        let mut names = BTreeMap::new();
        let mut results = Vec::with_capacity(txn.len());
        for (i, op) in txn.operations().iter().enumerate() {
            let result = apply(&mut next, &mut names, op).map_err(|e| SinkFailure {
                op_index: Some(i),
                error: e.error.to_string(),
                details: e.details,
            })?;
            results.push(result);
        }
        if let Some((table, uuid, target)) = dangling(&next) {
            return Err(SinkFailure {
                op_index: None,
                error: "referential integrity violation".to_string(),
                details: format!("{table} row {uuid} references missing row {target}"),
            });
        }
        let batch = diff(&tables, &next);
        *tables = next;
        self.publish(batch).await;
        Ok(results)
    }
}
