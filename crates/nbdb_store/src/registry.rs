#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use nbdb_contracts::model::{AnyRecord, Model, ModelDescriptor};
use nbdb_contracts::wire::TableColumns;
use nbdb_contracts::{ContractViolation, NbError, NbResult, Row, RowUuid};

trait ErasedModel: Send + Sync {
    fn table(&self) -> &'static str;
    fn uuid_field_count(&self) -> usize;
    fn columns(&self) -> &TableColumns;
    fn blank(&self) -> Box<dyn AnyRecord>;
    fn populate(
        &self,
        uuid: &RowUuid,
        row: &Row,
        record: &mut dyn AnyRecord,
    ) -> Result<(), ContractViolation>;
    fn to_row(&self, record: &dyn AnyRecord) -> Result<Row, ContractViolation>;
    fn uuid_of(&self, record: &dyn AnyRecord) -> Option<String>;
}

struct TypedModel<M: Model> {
    descriptor: ModelDescriptor<M>,
    columns: TableColumns,
}

const WRONG_RECORD_TYPE: ContractViolation = ContractViolation::InvalidValue {
    field: "record",
    reason: "record type does not belong to this table",
};

impl<M: Model> ErasedModel for TypedModel<M> {
    fn table(&self) -> &'static str {
        self.descriptor.table()
    }

    fn uuid_field_count(&self) -> usize {
        self.descriptor.uuid_field_count()
    }

    fn columns(&self) -> &TableColumns {
        &self.columns
    }

    fn blank(&self) -> Box<dyn AnyRecord> {
        Box::new(M::default())
    }

    fn populate(
        &self,
        uuid: &RowUuid,
        row: &Row,
        record: &mut dyn AnyRecord,
    ) -> Result<(), ContractViolation> {
        let record = record
            .as_any_mut()
            .downcast_mut::<M>()
            .ok_or(WRONG_RECORD_TYPE)?;
        self.descriptor.populate(uuid, row, record)
    }

    fn to_row(&self, record: &dyn AnyRecord) -> Result<Row, ContractViolation> {
        let record = record.downcast_ref::<M>().ok_or(WRONG_RECORD_TYPE)?;
        self.descriptor.to_row(record)
    }

    fn uuid_of(&self, record: &dyn AnyRecord) -> Option<String> {
        let record = record.downcast_ref::<M>()?;
        self.descriptor
            .uuid_of(record)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    }
}

/// One model type, ready for [`ModelRegistry::new`].
pub struct RegisteredModel(Box<dyn ErasedModel>);

impl RegisteredModel {
    pub fn of<M: Model>() -> Self {
        let descriptor = M::descriptor();
        let columns = descriptor.columns();
        Self(Box::new(TypedModel {
            descriptor,
            columns,
        }))
    }
}

/// Table-name to model-type map, fixed at construction.
pub struct ModelRegistry {
    models: BTreeMap<&'static str, Box<dyn ErasedModel>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("tables", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRegistry {
    /// Rejects a model without exactly one identifier field and two models
    /// claiming the same table.
    pub fn new(models: impl IntoIterator<Item = RegisteredModel>) -> NbResult<Self> {
        let mut map: BTreeMap<&'static str, Box<dyn ErasedModel>> = BTreeMap::new();
        for RegisteredModel(model) in models {
            let table = model.table();
            if table.is_empty() {
                return Err(NbError::invalid_option("model.table", "must not be empty"));
            }
            if model.uuid_field_count() != 1 {
                return Err(NbError::invalid_option(
                    "model.uuid",
                    format!("{table}: exactly one identifier field is required"),
                ));
            }
            if map.contains_key(table) {
                return Err(NbError::invalid_option(
                    "model.table",
                    format!("{table}: registered twice"),
                ));
            }
            map.insert(table, model);
        }
        Ok(Self { models: map })
    }

    fn model(&self, table: &str) -> NbResult<&dyn ErasedModel> {
        self.models
            .get(table)
            .map(|m| m.as_ref())
            .ok_or_else(|| NbError::not_found(table, "no model registered"))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.models.contains_key(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.models.keys().copied()
    }

    pub fn columns(&self, table: &str) -> Option<&TableColumns> {
        self.models.get(table).map(|m| m.columns())
    }

    pub fn new_record(&self, table: &str) -> NbResult<Box<dyn AnyRecord>> {
        Ok(self.model(table)?.blank())
    }

    pub fn populate(
        &self,
        table: &str,
        uuid: &RowUuid,
        row: &Row,
        record: &mut dyn AnyRecord,
    ) -> NbResult<()> {
        Ok(self.model(table)?.populate(uuid, row, record)?)
    }

    pub fn decode_any(&self, table: &str, uuid: &RowUuid, row: &Row) -> NbResult<Box<dyn AnyRecord>> {
        let model = self.model(table)?;
        let mut record = model.blank();
        model.populate(uuid, row, record.as_mut())?;
        Ok(record)
    }

    pub fn decode<M: Model>(&self, uuid: &RowUuid, row: &Row) -> NbResult<M> {
        self.decode_any(M::TABLE, uuid, row)?
            .downcast::<M>()
            .ok_or_else(|| NbError::SchemaViolation(WRONG_RECORD_TYPE))
    }

    pub fn to_row(&self, record: &dyn AnyRecord) -> NbResult<Row> {
        Ok(self.model(record.table())?.to_row(record)?)
    }

    pub fn uuid_of(&self, record: &dyn AnyRecord) -> Option<String> {
        self.models.get(record.table())?.uuid_of(record)
    }

    /// Brings a raw row in line with the table's declared column kinds. Columns
    /// the model does not describe pass through unchanged, and so does a value
    /// that does not fit its column; those come back alongside the row.
    pub fn normalize(&self, table: &str, row: Row) -> (Row, Vec<(String, ContractViolation)>) {
        let Some(columns) = self.columns(table) else {
            return (row, Vec::new());
        };
        let mut out = Row::new();
        let mut ill_typed = Vec::new();
        for (column, value) in row {
            let Some(kind) = columns.get(&column) else {
                out.insert(column, value);
                continue;
            };
            match value.clone().normalize(*kind) {
                Ok(Some(v)) => {
                    out.insert(column, v);
                }
                Ok(None) => {}
                Err(err) => {
                    ill_typed.push((column.clone(), err));
                    out.insert(column, value);
                }
            }
        }
        (out, ill_typed)
    }
}
