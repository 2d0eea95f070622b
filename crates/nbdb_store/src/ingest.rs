#![forbid(unsafe_code)]

use std::sync::Arc;

use nbdb_contracts::update::{RowUpdate, UpdateBatch};
use nbdb_contracts::wire::decode_update_batch;
use nbdb_contracts::{NbResult, RowUuid};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::dispatch::{DispatchOutcome, NotificationDispatcher};
use crate::registry::ModelRegistry;
use crate::row_store::RowStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Updates applied to the store whose notification could not be decoded.
    /// A row holding values that do not fit their column kinds is stored raw
    /// and lands here once its listener refuses it.
    pub dropped: usize,
    /// Wire rows that did not decode at all; nothing was stored for them.
    pub rejected: usize,
    /// Updates for tables nobody subscribed to, and deletes of unknown rows.
    pub skipped: usize,
}

impl IngestSummary {
    fn absorb(&mut self, outcome: DispatchOutcome) {
        if outcome == DispatchOutcome::Dropped {
            self.dropped += 1;
        }
    }
}

/// Sole writer of the [`RowStore`]. Batches are applied one at a time, in the
/// order `ingest` is called; listener callbacks fire in entry order.
#[derive(Debug)]
pub struct UpdateIngest {
    store: Arc<RowStore>,
    registry: Arc<ModelRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    serial: Mutex<()>,
}

impl UpdateIngest {
    pub fn new(
        store: Arc<RowStore>,
        registry: Arc<ModelRegistry>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            serial: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<RowStore> {
        &self.store
    }

    pub fn ingest(&self, batch: UpdateBatch) -> IngestSummary {
        let _serial = self.serial.lock();
        let mut summary = IngestSummary::default();
        for (table, updates) in batch.tables {
            if !self.store.is_subscribed(&table) {
                debug!(table = %table, rows = updates.len(), "skipping updates for unsubscribed table");
                summary.skipped += updates.len();
                continue;
            }
            for update in updates {
                self.apply_one(&table, update, &mut summary);
            }
        }
        debug!(
            created = summary.created,
            modified = summary.modified,
            deleted = summary.deleted,
            dropped = summary.dropped,
            skipped = summary.skipped,
            "ingested update batch"
        );
        summary
    }

    /// Decodes an OVSDB table-updates object and ingests it. Rows that do not
    /// decode are logged and skipped; the rest of the notification applies.
    pub fn ingest_wire(&self, json: &serde_json::Value) -> NbResult<IngestSummary> {
        let decoded = decode_update_batch(json)?;
        for rejected in &decoded.rejected {
            warn!(
                table = %rejected.table,
                key = %rejected.key,
                error = %rejected.error,
                "skipping undecodable row in update notification"
            );
        }
        let mut summary = self.ingest(decoded.batch);
        summary.rejected = decoded.rejected.len();
        Ok(summary)
    }

    fn apply_one(&self, table: &str, update: RowUpdate, summary: &mut IngestSummary) {
        let RowUpdate { uuid, new, .. } = update;
        let Some(row) = new else {
            self.delete(table, &uuid, summary);
            return;
        };
        let (row, ill_typed) = self.registry.normalize(table, row);
        for (column, err) in &ill_typed {
            warn!(table = %table, uuid = %uuid, column = %column, error = %err, "caching ill-typed value as received");
        }
        if row.is_empty() {
            self.delete(table, &uuid, summary);
            return;
        }
        match self.store.apply(table, &uuid, Some(row.clone())) {
            None => {
                summary.created += 1;
                summary.absorb(self.dispatcher.on_create(table, &uuid, &row));
            }
            Some(old) => {
                summary.modified += 1;
                summary.absorb(self.dispatcher.on_update(table, &uuid, &old, &row));
            }
        }
    }

    fn delete(&self, table: &str, uuid: &RowUuid, summary: &mut IngestSummary) {
        match self.store.apply(table, uuid, None) {
            Some(last_known) => {
                summary.deleted += 1;
                summary.absorb(self.dispatcher.on_delete(table, uuid, &last_known));
            }
            None => {
                debug!(table = %table, uuid = %uuid, "delete for a row never seen");
                summary.skipped += 1;
            }
        }
    }
}
