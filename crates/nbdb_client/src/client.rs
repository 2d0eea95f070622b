#![forbid(unsafe_code)]

//! The client instance: one cache, one listener set, one submission gate.
//! Several clients may live in one process, each against its own server.

use std::sync::Arc;

use nbdb_contracts::model::{AnyRecord, Model};
use nbdb_contracts::op::{Transaction, TransactionReply};
use nbdb_contracts::update::UpdateBatch;
use nbdb_contracts::{NbError, NbResult, Row, RowUuid, Validate};
use nbdb_store::{
    IngestSummary, Listener, ModelRegistry, NotificationDispatcher, RegisteredModel, RowStore,
    UpdateIngest,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::composer::OperationComposer;
use crate::config::ClientConfig;
use crate::gate::SubmissionGate;
use crate::models::northbound_models;
use crate::sink::TransactionSink;

/// Bounded channel carrying update batches from the transport to ingest.
pub fn feed_channel(config: &ClientConfig) -> (mpsc::Sender<UpdateBatch>, mpsc::Receiver<UpdateBatch>) {
    mpsc::channel(config.feed_buffer)
}

pub struct NbClientBuilder {
    config: ClientConfig,
    models: Vec<RegisteredModel>,
    listeners: Vec<(String, Listener)>,
}

impl NbClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            models: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn model<M: Model>(mut self) -> Self {
        self.models.push(RegisteredModel::of::<M>());
        self
    }

    pub fn northbound_models(mut self) -> Self {
        self.models.extend(northbound_models());
        self
    }

    pub fn listener(mut self, table: &str, listener: Listener) -> Self {
        self.listeners.push((table.to_string(), listener));
        self
    }

    pub fn typed_listener<M: Model>(
        self,
        on_created: impl Fn(M) + Send + Sync + 'static,
        on_deleted: impl Fn(M) + Send + Sync + 'static,
    ) -> Self {
        self.listener(M::TABLE, Listener::typed::<M>(on_created, on_deleted))
    }

    /// Registers every model's table as subscribed. Fails on an invalid
    /// config, a bad model set, or a listener for an unknown table.
    pub fn build(self, sink: Arc<dyn TransactionSink>) -> NbResult<NbClient> {
        self.config.validate()?;
        let registry = Arc::new(ModelRegistry::new(self.models)?);
        let store = Arc::new(RowStore::new());
        for table in registry.tables() {
            store.subscribe(table);
        }
        let mut dispatcher = NotificationDispatcher::new(registry.clone());
        for (table, listener) in self.listeners {
            dispatcher.register_listener(&table, listener)?;
        }
        let ingest = Arc::new(UpdateIngest::new(
            store.clone(),
            registry.clone(),
            Arc::new(dispatcher),
        ));
        info!(
            database = %self.config.database,
            tables = store.subscribed_tables().len(),
            "client ready"
        );
        Ok(NbClient {
            config: self.config,
            store,
            registry,
            ingest,
            gate: SubmissionGate::new(sink),
        })
    }
}

#[derive(Debug)]
pub struct NbClient {
    config: ClientConfig,
    store: Arc<RowStore>,
    registry: Arc<ModelRegistry>,
    ingest: Arc<UpdateIngest>,
    gate: SubmissionGate,
}

impl NbClient {
    pub fn builder(config: ClientConfig) -> NbClientBuilder {
        NbClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &RowStore {
        &self.store
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn ingest(&self, batch: UpdateBatch) -> IngestSummary {
        self.ingest.ingest(batch)
    }

    pub fn ingest_wire(&self, json: &serde_json::Value) -> NbResult<IngestSummary> {
        self.ingest.ingest_wire(json)
    }

    /// Drains `feed` into the cache, batch by batch, until the sender side
    /// closes.
    pub fn spawn_feed(&self, mut feed: mpsc::Receiver<UpdateBatch>) -> JoinHandle<()> {
        let ingest = self.ingest.clone();
        tokio::spawn(async move {
            while let Some(batch) = feed.recv().await {
                ingest.ingest(batch);
            }
            debug!("update feed closed");
        })
    }

    pub fn get<M: Model>(&self, uuid: &RowUuid) -> NbResult<M> {
        let row = self.store.get(M::TABLE, uuid)?;
        self.registry.decode::<M>(uuid, &row)
    }

    /// Every decodable row of `M`'s table. Rows that fail to decode are
    /// logged and left out.
    pub fn list<M: Model>(&self) -> NbResult<Vec<M>> {
        let rows = self.store.get_all(M::TABLE)?;
        Ok(rows
            .iter()
            .filter_map(|(uuid, row)| match self.registry.decode::<M>(uuid, row) {
                Ok(m) => Some(m),
                Err(err) => {
                    warn!(table = M::TABLE, uuid = %uuid, error = %err, "skipping undecodable row");
                    None
                }
            })
            .collect())
    }

    /// The first `M` whose columns equal every column in `partial`.
    pub fn find<M: Model>(&self, partial: &Row) -> NbResult<M> {
        let uuid = self
            .store
            .find_by_fields(M::TABLE, partial)?
            .ok_or_else(|| NbError::not_found(M::TABLE, "no row matches the given columns"))?;
        self.get::<M>(&uuid)
    }

    pub fn find_all<M: Model>(&self, partial: &Row) -> NbResult<Vec<M>> {
        self.store
            .find_all_by_fields(M::TABLE, partial)?
            .iter()
            .map(|uuid| self.get::<M>(uuid))
            .collect()
    }

    pub fn get_record(&self, table: &str, uuid: &RowUuid) -> NbResult<Box<dyn AnyRecord>> {
        let row = self.store.get(table, uuid)?;
        self.registry.decode_any(table, uuid, &row)
    }

    pub fn list_records(&self, table: &str) -> NbResult<Vec<Box<dyn AnyRecord>>> {
        let rows = self.store.get_all(table)?;
        Ok(rows
            .iter()
            .filter_map(|(uuid, row)| match self.registry.decode_any(table, uuid, row) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(table = %table, uuid = %uuid, error = %err, "skipping undecodable row");
                    None
                }
            })
            .collect())
    }

    pub fn composer(&self) -> OperationComposer<'_> {
        OperationComposer::new(&self.store)
    }

    pub async fn submit(&self, txn: Transaction) -> NbResult<TransactionReply> {
        self.gate.submit(txn).await
    }

    /// Concatenates composed transactions and submits them as one.
    pub async fn submit_all(
        &self,
        txns: impl IntoIterator<Item = Transaction>,
    ) -> NbResult<TransactionReply> {
        let merged = Transaction::merge(txns)?;
        self.gate.submit(merged).await
    }
}
