#![forbid(unsafe_code)]

//! JSON codec for OVSDB notation: atoms, `["uuid", ..]`, `["named-uuid", ..]`,
//! `["set", [..]]` and `["map", [[k, v], ..]]`.
//!
//! Decoding is loose on purpose (the wire carries every number as a JSON
//! number); callers pass the column kinds they know so integer columns come
//! out as integers.

use std::collections::BTreeMap;

use serde_json::{json, Map as JsonMap, Value as Json};

use crate::op::{
    Condition, OpValue, Operation, OperationResult, SinkFailure, Transaction, TransactionReply,
    UuidRef,
};
use crate::update::{RowUpdate, UpdateBatch};
use crate::value::{ColumnKind, Row, RowUuid, Value};
use crate::ContractViolation;

pub type TableColumns = BTreeMap<String, ColumnKind>;

fn invalid(field: &'static str, reason: &'static str) -> ContractViolation {
    ContractViolation::InvalidValue { field, reason }
}

fn decode_atom(json: &Json) -> Result<Value, ContractViolation> {
    match json {
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Bool(b) => Ok(Value::Boolean(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() => Ok(Value::Real(f)),
                    _ => Err(ContractViolation::NotFinite { field: "wire.number" }),
                }
            }
        }
        Json::Array(pair) if pair.len() == 2 && pair[0] == "uuid" => match &pair[1] {
            Json::String(s) => RowUuid::new(s.clone()).map(Value::Uuid),
            _ => Err(invalid("wire.uuid", "uuid payload must be a string")),
        },
        _ => Err(invalid("wire.atom", "unsupported atom encoding")),
    }
}

/// Decodes one column value; `kind` applies numeric and set-shape normalization.
///
/// Returns `Ok(None)` for an empty set in an optional scalar column.
pub fn decode_value(json: &Json, kind: Option<ColumnKind>) -> Result<Option<Value>, ContractViolation> {
    let raw = match json {
        Json::Array(pair) if pair.len() == 2 && pair[0] == "set" => {
            let items = pair[1]
                .as_array()
                .ok_or_else(|| invalid("wire.set", "set payload must be an array"))?;
            Value::set(items.iter().map(decode_atom).collect::<Result<Vec<_>, _>>()?)
        }
        Json::Array(pair) if pair.len() == 2 && pair[0] == "map" => {
            let entries = pair[1]
                .as_array()
                .ok_or_else(|| invalid("wire.map", "map payload must be an array"))?;
            let mut map = BTreeMap::new();
            for entry in entries {
                match entry.as_array().map(|e| e.as_slice()) {
                    Some([Json::String(k), Json::String(v)]) => {
                        map.insert(k.clone(), v.clone());
                    }
                    _ => return Err(invalid("wire.map", "map entries must be [string, string]")),
                }
            }
            Value::Map(map)
        }
        other => decode_atom(other)?,
    };
    match kind {
        Some(kind) => raw.normalize(kind),
        None => Ok(Some(raw)),
    }
}

/// Decodes a `{column: value}` object. `null` and a non-object both decode to
/// an empty row, which callers treat as "absent".
pub fn decode_row(json: &Json, columns: Option<&TableColumns>) -> Result<Row, ContractViolation> {
    let Some(obj) = json.as_object() else {
        return Ok(Row::new());
    };
    let mut row = Row::new();
    for (column, value) in obj {
        let kind = columns.and_then(|c| c.get(column)).copied();
        if let Some(v) = decode_value(value, kind)? {
            row.insert(column.clone(), v);
        }
    }
    Ok(row)
}

/// A row of a table-updates notification that did not decode.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub table: String,
    pub key: String,
    pub error: ContractViolation,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedUpdates {
    pub batch: UpdateBatch,
    pub rejected: Vec<RejectedRow>,
}

fn decode_row_update(key: &str, states: &Json) -> Result<RowUpdate, ContractViolation> {
    let uuid = RowUuid::new(key.to_string())?;
    if !states.is_object() {
        return Err(invalid("wire.row_update", "must be an object"));
    }
    let old = states.get("old").map(|o| decode_row(o, None)).transpose()?;
    let new = states.get("new").map(|n| decode_row(n, None)).transpose()?;
    Ok(RowUpdate::new(uuid, old, new))
}

/// Decodes a table-updates notification `{table: {uuid: {old?, new?}}}`.
///
/// Values come out raw; callers normalize them against the column kinds they
/// know. A row that fails to decode is reported in `rejected` and the rest of
/// the notification still decodes.
pub fn decode_update_batch(json: &Json) -> Result<DecodedUpdates, ContractViolation> {
    let tables = json
        .as_object()
        .ok_or_else(|| invalid("wire.updates", "must be an object"))?;
    let mut out = DecodedUpdates::default();
    for (table, rows) in tables {
        let Some(rows) = rows.as_object() else {
            out.rejected.push(RejectedRow {
                table: table.clone(),
                key: String::new(),
                error: invalid("wire.table_update", "must be an object"),
            });
            continue;
        };
        let mut updates = Vec::with_capacity(rows.len());
        for (key, states) in rows {
            match decode_row_update(key, states) {
                Ok(update) => updates.push(update),
                Err(error) => out.rejected.push(RejectedRow {
                    table: table.clone(),
                    key: key.clone(),
                    error,
                }),
            }
        }
        out.batch.tables.insert(table.clone(), updates);
    }
    Ok(out)
}

pub fn encode_value(value: &Value) -> Json {
    match value {
        Value::String(s) => Json::String(s.clone()),
        Value::Integer(i) => json!(i),
        Value::Boolean(b) => Json::Bool(*b),
        Value::Real(f) => json!(f),
        Value::Uuid(u) => json!(["uuid", u.as_str()]),
        Value::Set(items) => json!(["set", items.iter().map(encode_value).collect::<Vec<_>>()]),
        Value::Map(m) => json!([
            "map",
            m.iter().map(|(k, v)| json!([k, v])).collect::<Vec<_>>()
        ]),
    }
}

fn encode_uuid_ref(r: &UuidRef) -> Json {
    match r {
        UuidRef::Resolved(u) => json!(["uuid", u.as_str()]),
        UuidRef::Placeholder(p) => json!(["named-uuid", p.as_str()]),
    }
}

fn encode_op_value(v: &OpValue) -> Json {
    match v {
        OpValue::Plain(v) => encode_value(v),
        OpValue::Ref(r) => encode_uuid_ref(r),
    }
}

pub fn encode_row(row: &Row) -> Json {
    Json::Object(
        row.iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect::<JsonMap<_, _>>(),
    )
}

fn encode_filter(filter: &[Condition]) -> Json {
    Json::Array(
        filter
            .iter()
            .map(|c| json!([c.column, c.function.wire_name(), encode_op_value(&c.value)]))
            .collect(),
    )
}

pub fn encode_operation(op: &Operation) -> Json {
    match op {
        Operation::Insert {
            table,
            row,
            uuid_name,
        } => {
            let mut o = json!({"op": "insert", "table": table, "row": encode_row(row)});
            if let (Some(name), Some(obj)) = (uuid_name, o.as_object_mut()) {
                obj.insert("uuid-name".to_string(), Json::String(name.to_string()));
            }
            o
        }
        Operation::Update { table, row, filter } => json!({
            "op": "update",
            "table": table,
            "where": encode_filter(filter),
            "row": encode_row(row),
        }),
        Operation::Delete { table, filter } => json!({
            "op": "delete",
            "table": table,
            "where": encode_filter(filter),
        }),
        Operation::Mutate {
            table,
            column,
            mutator,
            value,
            filter,
        } => json!({
            "op": "mutate",
            "table": table,
            "where": encode_filter(filter),
            "mutations": [[column, mutator.wire_name(), encode_op_value(value)]],
        }),
        Operation::Select { table, filter } => json!({
            "op": "select",
            "table": table,
            "where": encode_filter(filter),
        }),
    }
}

/// Builds the `transact` params array: `[database, op, op, ...]`.
pub fn encode_transact_params(database: &str, txn: &Transaction) -> Json {
    let mut params = Vec::with_capacity(txn.len() + 1);
    params.push(Json::String(database.to_string()));
    params.extend(txn.operations().iter().map(encode_operation));
    Json::Array(params)
}

fn reply_failure(op_index: Option<usize>, error: &str, details: impl Into<String>) -> SinkFailure {
    SinkFailure {
        op_index,
        error: error.to_string(),
        details: details.into(),
    }
}

/// Interprets a `transact` result array against the transaction that produced it.
pub fn decode_transact_reply(json: &Json, txn: &Transaction) -> Result<TransactionReply, SinkFailure> {
    let items = json
        .as_array()
        .ok_or_else(|| reply_failure(None, "malformed reply", "result must be an array"))?;
    let mut results = Vec::with_capacity(txn.len());
    let mut inserted = BTreeMap::new();
    for (i, op) in txn.operations().iter().enumerate() {
        let Some(item) = items.get(i) else {
            return Err(reply_failure(
                Some(i),
                "malformed reply",
                "fewer results than operations",
            ));
        };
        if let Some(error) = item.get("error").and_then(Json::as_str) {
            let details = item.get("details").and_then(Json::as_str).unwrap_or_default();
            return Err(reply_failure(Some(i), error, details));
        }
        let result = match op {
            Operation::Insert { uuid_name, .. } => {
                let uuid = item
                    .get("uuid")
                    .map(decode_atom)
                    .transpose()
                    .ok()
                    .flatten()
                    .and_then(|v| v.as_uuid().cloned())
                    .ok_or_else(|| reply_failure(Some(i), "malformed reply", "insert without uuid"))?;
                if let Some(name) = uuid_name {
                    inserted.insert(name.clone(), uuid.clone());
                }
                OperationResult::Inserted(uuid)
            }
            Operation::Select { .. } => {
                let rows = item
                    .get("rows")
                    .and_then(Json::as_array)
                    .ok_or_else(|| reply_failure(Some(i), "malformed reply", "select without rows"))?
                    .iter()
                    .map(|r| decode_row(r, None))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|v| reply_failure(Some(i), "malformed reply", v.to_string()))?;
                OperationResult::Rows(rows)
            }
            _ => OperationResult::Count(item.get("count").and_then(Json::as_u64).unwrap_or(0)),
        };
        results.push(result);
    }
    // A trailing error object reports a commit-time constraint failure.
    if let Some(extra) = items.get(txn.len()) {
        if let Some(error) = extra.get("error").and_then(Json::as_str) {
            let details = extra.get("details").and_then(Json::as_str).unwrap_or_default();
            return Err(reply_failure(None, error, details));
        }
    }
    Ok(TransactionReply { results, inserted })
}
