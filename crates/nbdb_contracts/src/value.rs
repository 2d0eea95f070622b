#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::{ContractViolation, Validate};

pub const UUID_COLUMN: &str = "_uuid";

/// Server-assigned (or client-proposed) row identifier in canonical
/// 8-4-4-4-12 lowercase hex form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowUuid(String);

impl RowUuid {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into().to_ascii_lowercase());
        v.validate()?;
        Ok(v)
    }

    /// Builds a version-4 style identifier from 128 random bits.
    pub fn from_random_bits(bits: u128) -> Self {
        let bits = (bits & !(0xF << 76) | (0x4 << 76)) & !(0x3 << 62) | (0x2 << 62);
        let hex = format!("{bits:032x}");
        Self(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for RowUuid {
    fn validate(&self) -> Result<(), ContractViolation> {
        let bytes = self.0.as_bytes();
        if bytes.len() != 36 {
            return Err(ContractViolation::InvalidValue {
                field: "row_uuid",
                reason: "must be 36 chars",
            });
        }
        for (i, b) in bytes.iter().enumerate() {
            let ok = match i {
                8 | 13 | 18 | 23 => *b == b'-',
                _ => b.is_ascii_hexdigit(),
            };
            if !ok {
                return Err(ContractViolation::InvalidValue {
                    field: "row_uuid",
                    reason: "must be 8-4-4-4-12 hex",
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for RowUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Integer,
    Boolean,
    Real,
    Uuid,
}

/// Logical type of a column as far as this client cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Scalar(ScalarKind),
    /// A set with at most one element on the wire.
    Optional(ScalarKind),
    Set(ScalarKind),
    Map,
}

impl ColumnKind {
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            ColumnKind::Scalar(k) | ColumnKind::Optional(k) | ColumnKind::Set(k) => Some(*k),
            ColumnKind::Map => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Boolean(bool),
    Real(f64),
    Uuid(RowUuid),
    /// Always kept sorted and deduplicated; build through [`Value::set`].
    Set(Vec<Value>),
    Map(BTreeMap<String, String>),
}

pub type Row = BTreeMap<String, Value>;

pub fn row_of<'a, I>(pairs: I) -> Row
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl Value {
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        let mut items: Vec<Value> = items.into_iter().collect();
        items.sort_by(canonical_cmp);
        items.dedup();
        Value::Set(items)
    }

    pub fn uuid_set<'a>(ids: impl IntoIterator<Item = &'a RowUuid>) -> Self {
        Value::set(ids.into_iter().cloned().map(Value::Uuid))
    }

    pub fn string_map<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Boolean(_) => "boolean",
            Value::Real(_) => "real",
            Value::Uuid(_) => "uuid",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<&RowUuid> {
        match self {
            Value::Uuid(u) => Some(u),
            _ => None,
        }
    }

    /// True when this value is `target` itself or a set holding it.
    pub fn contains_uuid(&self, target: &RowUuid) -> bool {
        match self {
            Value::Uuid(u) => u == target,
            Value::Set(items) => items.iter().any(|v| v.as_uuid() == Some(target)),
            _ => false,
        }
    }

    pub fn is_empty_set(&self) -> bool {
        matches!(self, Value::Set(items) if items.is_empty())
    }

    /// Brings a loosely-typed value in line with its column kind.
    ///
    /// Returns `Ok(None)` when the value is an empty set standing in for an
    /// absent optional column.
    pub fn normalize(self, kind: ColumnKind) -> Result<Option<Value>, ContractViolation> {
        match kind {
            ColumnKind::Scalar(k) | ColumnKind::Optional(k) => match self {
                Value::Set(mut items) => match items.len() {
                    0 => Ok(None),
                    1 => items.remove(0).normalize_scalar(k).map(Some),
                    _ => Err(ContractViolation::InvalidValue {
                        field: "value",
                        reason: "scalar column received a multi-element set",
                    }),
                },
                other => other.normalize_scalar(k).map(Some),
            },
            ColumnKind::Set(k) => {
                let items = match self {
                    Value::Set(items) => items,
                    single => vec![single],
                };
                let items = items
                    .into_iter()
                    .map(|v| v.normalize_scalar(k))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(Value::set(items)))
            }
            ColumnKind::Map => match self {
                Value::Map(m) => Ok(Some(Value::Map(m))),
                Value::Set(items) if items.is_empty() => Ok(Some(Value::Map(BTreeMap::new()))),
                _ => Err(ContractViolation::InvalidValue {
                    field: "value",
                    reason: "map column received a non-map value",
                }),
            },
        }
    }

    fn normalize_scalar(self, kind: ScalarKind) -> Result<Value, ContractViolation> {
        match (kind, self) {
            (ScalarKind::Integer, Value::Real(f)) => real_to_integer(f),
            (ScalarKind::Real, Value::Integer(i)) => Ok(Value::Real(i as f64)),
            (ScalarKind::Real, Value::Real(f)) if !f.is_finite() => {
                Err(ContractViolation::NotFinite { field: "value" })
            }
            (ScalarKind::Uuid, Value::String(s)) => RowUuid::new(s).map(Value::Uuid),
            (ScalarKind::String, v @ Value::String(_))
            | (ScalarKind::Integer, v @ Value::Integer(_))
            | (ScalarKind::Boolean, v @ Value::Boolean(_))
            | (ScalarKind::Real, v @ Value::Real(_))
            | (ScalarKind::Uuid, v @ Value::Uuid(_)) => Ok(v),
            _ => Err(ContractViolation::InvalidValue {
                field: "value",
                reason: "value does not match the column's scalar kind",
            }),
        }
    }
}

/// Rounds a wire float into an integer column value.
pub fn real_to_integer(f: f64) -> Result<Value, ContractViolation> {
    if !f.is_finite() {
        return Err(ContractViolation::NotFinite { field: "value" });
    }
    let r = f.round();
    if r < i64::MIN as f64 || r >= i64::MAX as f64 {
        return Err(ContractViolation::InvalidRange {
            field: "value",
            min: i64::MIN as f64,
            max: i64::MAX as f64,
            got: f,
        });
    }
    Ok(Value::Integer(r as i64))
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Boolean(_) => 0,
        Value::Integer(_) => 1,
        Value::Real(_) => 2,
        Value::String(_) => 3,
        Value::Uuid(_) => 4,
        Value::Set(_) => 5,
        Value::Map(_) => 6,
    }
}

fn canonical_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Real(x), Value::Real(y)) => x.total_cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Uuid(x), Value::Uuid(y)) => x.cmp(y),
        (Value::Set(x), Value::Set(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let o = canonical_cmp(l, r);
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Map(x), Value::Map(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<RowUuid> for Value {
    fn from(v: RowUuid) -> Self {
        Value::Uuid(v)
    }
}
