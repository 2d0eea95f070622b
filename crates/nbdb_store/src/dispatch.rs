#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use nbdb_contracts::model::{AnyRecord, Model};
use nbdb_contracts::{NbError, NbResult, Row, RowUuid};
use tracing::warn;

use crate::registry::ModelRegistry;

pub type RecordCallback = Arc<dyn Fn(Box<dyn AnyRecord>) + Send + Sync>;
pub type UpdateCallback = Arc<dyn Fn(Box<dyn AnyRecord>, Box<dyn AnyRecord>) + Send + Sync>;

/// Callbacks for one table. Callbacks run on the ingest path; they may read
/// the store but must not feed updates back into it.
#[derive(Clone)]
pub struct Listener {
    on_created: RecordCallback,
    on_deleted: RecordCallback,
    on_updated: Option<UpdateCallback>,
}

impl Listener {
    pub fn new(
        on_created: impl Fn(Box<dyn AnyRecord>) + Send + Sync + 'static,
        on_deleted: impl Fn(Box<dyn AnyRecord>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_created: Arc::new(on_created),
            on_deleted: Arc::new(on_deleted),
            on_updated: None,
        }
    }

    /// Listener that receives decoded `M` records.
    pub fn typed<M: Model>(
        on_created: impl Fn(M) + Send + Sync + 'static,
        on_deleted: impl Fn(M) + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            move |rec| {
                if let Some(m) = rec.downcast::<M>() {
                    on_created(m)
                }
            },
            move |rec| {
                if let Some(m) = rec.downcast::<M>() {
                    on_deleted(m)
                }
            },
        )
    }

    pub fn with_updated(
        mut self,
        on_updated: impl Fn(Box<dyn AnyRecord>, Box<dyn AnyRecord>) + Send + Sync + 'static,
    ) -> Self {
        self.on_updated = Some(Arc::new(on_updated));
        self
    }

    /// Adds a typed `(old, new)` modification callback.
    pub fn with_typed_updated<M: Model>(
        self,
        on_updated: impl Fn(M, M) + Send + Sync + 'static,
    ) -> Self {
        self.with_updated(move |old, new| {
            if let (Some(old), Some(new)) = (old.downcast::<M>(), new.downcast::<M>()) {
                on_updated(old, new)
            }
        })
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("on_updated", &self.on_updated.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    NoListener,
    /// The row did not decode; the event was logged and dropped.
    Dropped,
}

/// Turns row transitions into typed listener calls.
#[derive(Debug)]
pub struct NotificationDispatcher {
    registry: Arc<ModelRegistry>,
    listeners: BTreeMap<String, Listener>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            listeners: BTreeMap::new(),
        }
    }

    /// One listener per table, for the dispatcher's whole lifetime.
    pub fn register_listener(&mut self, table: &str, listener: Listener) -> NbResult<()> {
        if !self.registry.contains(table) {
            return Err(NbError::not_found(table, "no model registered for listener"));
        }
        if self.listeners.contains_key(table) {
            return Err(NbError::invalid_option(
                "listener.table",
                format!("{table}: listener already registered"),
            ));
        }
        self.listeners.insert(table.to_string(), listener);
        Ok(())
    }

    pub fn has_listener(&self, table: &str) -> bool {
        self.listeners.contains_key(table)
    }

    fn decode(&self, table: &str, uuid: &RowUuid, row: &Row, event: &'static str) -> Option<Box<dyn AnyRecord>> {
        match self.registry.decode_any(table, uuid, row) {
            Ok(rec) => Some(rec),
            Err(err) => {
                warn!(table = %table, uuid = %uuid, event, error = %err, "dropping undecodable row event");
                None
            }
        }
    }

    pub fn on_create(&self, table: &str, uuid: &RowUuid, row: &Row) -> DispatchOutcome {
        let Some(listener) = self.listeners.get(table) else {
            return DispatchOutcome::NoListener;
        };
        match self.decode(table, uuid, row, "created") {
            Some(rec) => {
                (listener.on_created)(rec);
                DispatchOutcome::Delivered
            }
            None => DispatchOutcome::Dropped,
        }
    }

    pub fn on_update(&self, table: &str, uuid: &RowUuid, old: &Row, new: &Row) -> DispatchOutcome {
        let Some(on_updated) = self.listeners.get(table).and_then(|l| l.on_updated.as_ref()) else {
            return DispatchOutcome::NoListener;
        };
        match (
            self.decode(table, uuid, old, "updated"),
            self.decode(table, uuid, new, "updated"),
        ) {
            (Some(old), Some(new)) => {
                on_updated(old, new);
                DispatchOutcome::Delivered
            }
            _ => DispatchOutcome::Dropped,
        }
    }

    /// `last_known` is the row as it stood before removal.
    pub fn on_delete(&self, table: &str, uuid: &RowUuid, last_known: &Row) -> DispatchOutcome {
        let Some(listener) = self.listeners.get(table) else {
            return DispatchOutcome::NoListener;
        };
        match self.decode(table, uuid, last_known, "deleted") {
            Some(rec) => {
                (listener.on_deleted)(rec);
                DispatchOutcome::Delivered
            }
            None => DispatchOutcome::Dropped,
        }
    }
}
