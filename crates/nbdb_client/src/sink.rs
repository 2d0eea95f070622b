#![forbid(unsafe_code)]

use async_trait::async_trait;
use nbdb_contracts::op::{OperationResult, SinkFailure, Transaction};
use nbdb_contracts::wire::{decode_transact_reply, encode_transact_params};
use serde_json::Value as Json;

/// Transport side that applies a whole operation list atomically.
///
/// On success the result list is parallel to `txn.operations()`. On failure
/// nothing from the list was applied.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    async fn transact(&self, txn: &Transaction) -> Result<Vec<OperationResult>, SinkFailure>;
}

/// A JSON-RPC connection owned by the host. Framing, reconnects and
/// subscriptions all live behind this call.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Returns the `result` member of the reply, or the RPC-level error text.
    async fn call(&self, method: &str, params: Json) -> Result<Json, String>;
}

/// [`TransactionSink`] speaking the OVSDB `transact` method over an
/// [`RpcTransport`].
pub struct RpcSink<T> {
    database: String,
    transport: T,
}

impl<T: RpcTransport> RpcSink<T> {
    pub fn new(database: impl Into<String>, transport: T) -> Self {
        Self {
            database: database.into(),
            transport,
        }
    }
}

#[async_trait]
impl<T: RpcTransport> TransactionSink for RpcSink<T> {
    async fn transact(&self, txn: &Transaction) -> Result<Vec<OperationResult>, SinkFailure> {
        let params = encode_transact_params(&self.database, txn);
        let reply = self
            .transport
            .call("transact", params)
            .await
            .map_err(|details| SinkFailure {
                op_index: None,
                error: "rpc error".to_string(),
                details,
            })?;
        Ok(decode_transact_reply(&reply, txn)?.results)
    }
}
