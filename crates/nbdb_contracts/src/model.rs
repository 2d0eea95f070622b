#![forbid(unsafe_code)]

//! Descriptor tables mapping typed records onto rows.
//!
//! A model lists its columns once as [`FieldDescriptor`]s; decoding and
//! encoding are interpreted from that list instead of being hand-written per
//! table.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use crate::value::{real_to_integer, ColumnKind, Row, RowUuid, ScalarKind, Value};
use crate::wire::TableColumns;
use crate::ContractViolation;

/// Getter/setter pair for one field of `M`.
pub struct Accessor<M, T> {
    pub get: fn(&M) -> &T,
    pub get_mut: fn(&mut M) -> &mut T,
}

impl<M, T> Accessor<M, T> {
    pub fn new(get: fn(&M) -> &T, get_mut: fn(&mut M) -> &mut T) -> Self {
        Self { get, get_mut }
    }
}

impl<M, T> Clone for Accessor<M, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M, T> Copy for Accessor<M, T> {}

/// `accessor!(Acl, priority)` builds an [`Accessor`] for `Acl::priority`.
#[macro_export]
macro_rules! accessor {
    ($ty:ty, $field:ident) => {
        $crate::model::Accessor::<$ty, _>::new(|m| &m.$field, |m| &mut m.$field)
    };
}

pub enum FieldSlot<M> {
    /// The row identifier; exactly one per model.
    Uuid(Accessor<M, String>),
    String(Accessor<M, String>),
    OptString(Accessor<M, Option<String>>),
    Integer(Accessor<M, i64>),
    OptInteger(Accessor<M, Option<i64>>),
    Boolean(Accessor<M, bool>),
    OptBoolean(Accessor<M, Option<bool>>),
    Real(Accessor<M, f64>),
    Reference(Accessor<M, Option<String>>),
    ReferenceSet(Accessor<M, Vec<String>>),
    StringSet(Accessor<M, Vec<String>>),
    IntegerSet(Accessor<M, Vec<i64>>),
    StringMap(Accessor<M, BTreeMap<String, String>>),
}

impl<M> FieldSlot<M> {
    pub fn column_kind(&self) -> Option<ColumnKind> {
        let kind = match self {
            FieldSlot::Uuid(_) => return None,
            FieldSlot::String(_) => ColumnKind::Scalar(ScalarKind::String),
            FieldSlot::OptString(_) => ColumnKind::Optional(ScalarKind::String),
            FieldSlot::Integer(_) => ColumnKind::Scalar(ScalarKind::Integer),
            FieldSlot::OptInteger(_) => ColumnKind::Optional(ScalarKind::Integer),
            FieldSlot::Boolean(_) => ColumnKind::Scalar(ScalarKind::Boolean),
            FieldSlot::OptBoolean(_) => ColumnKind::Optional(ScalarKind::Boolean),
            FieldSlot::Real(_) => ColumnKind::Scalar(ScalarKind::Real),
            FieldSlot::Reference(_) => ColumnKind::Optional(ScalarKind::Uuid),
            FieldSlot::ReferenceSet(_) => ColumnKind::Set(ScalarKind::Uuid),
            FieldSlot::StringSet(_) => ColumnKind::Set(ScalarKind::String),
            FieldSlot::IntegerSet(_) => ColumnKind::Set(ScalarKind::Integer),
            FieldSlot::StringMap(_) => ColumnKind::Map,
        };
        Some(kind)
    }
}

pub struct FieldDescriptor<M> {
    pub column: &'static str,
    pub slot: FieldSlot<M>,
    pub required: bool,
}

pub struct ModelDescriptor<M> {
    table: &'static str,
    fields: Vec<FieldDescriptor<M>>,
}

fn type_mismatch(column: &'static str) -> ContractViolation {
    ContractViolation::InvalidValue {
        field: column,
        reason: "row value does not match the field's declared kind",
    }
}

/// Scalars may arrive bare or wrapped in a set of at most one element.
fn single(value: &Value) -> Result<Option<&Value>, ()> {
    match value {
        Value::Set(items) => match items.as_slice() {
            [] => Ok(None),
            [v] => Ok(Some(v)),
            _ => Err(()),
        },
        v => Ok(Some(v)),
    }
}

fn elements(value: &Value) -> &[Value] {
    match value {
        Value::Set(items) => items,
        v => std::slice::from_ref(v),
    }
}

fn as_string(v: &Value) -> Option<String> {
    v.as_str().map(str::to_string)
}

fn to_integer(v: &Value) -> Option<i64> {
    match v {
        Value::Integer(i) => Some(*i),
        Value::Real(f) => real_to_integer(*f).ok().and_then(|v| v.as_i64()),
        _ => None,
    }
}

fn to_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Boolean(b) => Some(*b),
        _ => None,
    }
}

fn to_uuid_string(v: &Value) -> Option<String> {
    match v {
        Value::Uuid(u) => Some(u.as_str().to_string()),
        _ => None,
    }
}

fn collect<T>(
    column: &'static str,
    value: &Value,
    f: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<T>, ContractViolation> {
    elements(value)
        .iter()
        .map(|v| f(v).ok_or_else(|| type_mismatch(column)))
        .collect()
}

fn optional<T>(
    column: &'static str,
    value: &Value,
    f: impl Fn(&Value) -> Option<T>,
) -> Result<Option<T>, ContractViolation> {
    match single(value).map_err(|_| type_mismatch(column))? {
        None => Ok(None),
        Some(v) => f(v).map(Some).ok_or_else(|| type_mismatch(column)),
    }
}

fn required<T>(
    column: &'static str,
    value: &Value,
    f: impl Fn(&Value) -> Option<T>,
) -> Result<T, ContractViolation> {
    optional(column, value, f)?.ok_or_else(|| type_mismatch(column))
}

impl<M> ModelDescriptor<M> {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            fields: Vec::new(),
        }
    }

    pub fn uuid(mut self, accessor: Accessor<M, String>) -> Self {
        self.fields.push(FieldDescriptor {
            column: crate::value::UUID_COLUMN,
            slot: FieldSlot::Uuid(accessor),
            required: false,
        });
        self
    }

    pub fn field(mut self, column: &'static str, slot: FieldSlot<M>) -> Self {
        self.fields.push(FieldDescriptor {
            column,
            slot,
            required: false,
        });
        self
    }

    /// Like [`field`](Self::field), but decoding fails when the row lacks it.
    pub fn required(mut self, column: &'static str, slot: FieldSlot<M>) -> Self {
        self.fields.push(FieldDescriptor {
            column,
            slot,
            required: true,
        });
        self
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn fields(&self) -> &[FieldDescriptor<M>] {
        &self.fields
    }

    pub fn uuid_field_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| matches!(f.slot, FieldSlot::Uuid(_)))
            .count()
    }

    pub fn columns(&self) -> TableColumns {
        self.fields
            .iter()
            .filter_map(|f| f.slot.column_kind().map(|k| (f.column.to_string(), k)))
            .collect()
    }

    pub fn uuid_of<'a>(&self, record: &'a M) -> Option<&'a str> {
        self.fields.iter().find_map(|f| match &f.slot {
            FieldSlot::Uuid(a) => Some((a.get)(record).as_str()),
            _ => None,
        })
    }

    /// Assigns every described field from `row`. Absent optional columns keep
    /// the record's current (zero) value.
    pub fn populate(&self, uuid: &RowUuid, row: &Row, record: &mut M) -> Result<(), ContractViolation> {
        for field in &self.fields {
            let column = field.column;
            if let FieldSlot::Uuid(a) = &field.slot {
                *(a.get_mut)(record) = uuid.as_str().to_string();
                continue;
            }
            let Some(value) = row.get(column) else {
                if field.required {
                    return Err(ContractViolation::InvalidValue {
                        field: column,
                        reason: "required column missing from row",
                    });
                }
                continue;
            };
            match &field.slot {
                FieldSlot::Uuid(_) => {}
                FieldSlot::String(a) => *(a.get_mut)(record) = required(column, value, as_string)?,
                FieldSlot::OptString(a) => *(a.get_mut)(record) = optional(column, value, as_string)?,
                FieldSlot::Integer(a) => *(a.get_mut)(record) = required(column, value, to_integer)?,
                FieldSlot::OptInteger(a) => {
                    *(a.get_mut)(record) = optional(column, value, to_integer)?
                }
                FieldSlot::Boolean(a) => *(a.get_mut)(record) = required(column, value, to_bool)?,
                FieldSlot::OptBoolean(a) => *(a.get_mut)(record) = optional(column, value, to_bool)?,
                FieldSlot::Real(a) => {
                    *(a.get_mut)(record) = required(column, value, |v| match v {
                        Value::Real(f) => Some(*f),
                        Value::Integer(i) => Some(*i as f64),
                        _ => None,
                    })?
                }
                FieldSlot::Reference(a) => {
                    *(a.get_mut)(record) = optional(column, value, to_uuid_string)?
                }
                FieldSlot::ReferenceSet(a) => {
                    *(a.get_mut)(record) = collect(column, value, to_uuid_string)?
                }
                FieldSlot::StringSet(a) => *(a.get_mut)(record) = collect(column, value, as_string)?,
                FieldSlot::IntegerSet(a) => *(a.get_mut)(record) = collect(column, value, to_integer)?,
                FieldSlot::StringMap(a) => match value {
                    Value::Map(m) => *(a.get_mut)(record) = m.clone(),
                    Value::Set(items) if items.is_empty() => (a.get_mut)(record).clear(),
                    _ => return Err(type_mismatch(column)),
                },
            }
        }
        Ok(())
    }

    /// Encodes a record into a row for insert/update. The identifier column
    /// and unset optional fields are left out.
    pub fn to_row(&self, record: &M) -> Result<Row, ContractViolation> {
        let mut row = Row::new();
        for field in &self.fields {
            let value = match &field.slot {
                FieldSlot::Uuid(_) => None,
                FieldSlot::String(a) => Some(Value::String((a.get)(record).clone())),
                FieldSlot::OptString(a) => (a.get)(record).clone().map(Value::String),
                FieldSlot::Integer(a) => Some(Value::Integer(*(a.get)(record))),
                FieldSlot::OptInteger(a) => (a.get)(record).map(Value::Integer),
                FieldSlot::Boolean(a) => Some(Value::Boolean(*(a.get)(record))),
                FieldSlot::OptBoolean(a) => (a.get)(record).map(Value::Boolean),
                FieldSlot::Real(a) => {
                    let f = *(a.get)(record);
                    if !f.is_finite() {
                        return Err(ContractViolation::NotFinite {
                            field: field.column,
                        });
                    }
                    Some(Value::Real(f))
                }
                FieldSlot::Reference(a) => match (a.get)(record) {
                    Some(id) => Some(Value::Uuid(RowUuid::new(id.clone())?)),
                    None => None,
                },
                FieldSlot::ReferenceSet(a) => Some(Value::set(
                    (a.get)(record)
                        .iter()
                        .map(|id| RowUuid::new(id.clone()).map(Value::Uuid))
                        .collect::<Result<Vec<_>, _>>()?,
                )),
                FieldSlot::StringSet(a) => Some(Value::set(
                    (a.get)(record).iter().cloned().map(Value::String),
                )),
                FieldSlot::IntegerSet(a) => {
                    Some(Value::set((a.get)(record).iter().copied().map(Value::Integer)))
                }
                FieldSlot::StringMap(a) => Some(Value::Map((a.get)(record).clone())),
            };
            if let Some(v) = value {
                row.insert(field.column.to_string(), v);
            }
        }
        Ok(row)
    }
}

/// A typed record bound to one table.
pub trait Model: Clone + Default + fmt::Debug + Send + Sync + 'static {
    const TABLE: &'static str;

    fn descriptor() -> ModelDescriptor<Self>;
}

/// Type-erased record handed out by the registry when only the table name is
/// known.
pub trait AnyRecord: Any + fmt::Debug + Send + Sync {
    fn table(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn clone_record(&self) -> Box<dyn AnyRecord>;
}

impl<M: Model> AnyRecord for M {
    fn table(&self) -> &'static str {
        M::TABLE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn clone_record(&self) -> Box<dyn AnyRecord> {
        Box::new(self.clone())
    }
}

impl dyn AnyRecord {
    pub fn downcast_ref<M: Model>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    pub fn downcast<M: Model>(self: Box<Self>) -> Option<M> {
        self.into_any().downcast::<M>().ok().map(|b| *b)
    }
}
