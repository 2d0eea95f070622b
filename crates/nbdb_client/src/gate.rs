#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use nbdb_contracts::op::{Operation, OperationResult, SinkFailure, Transaction, TransactionReply};
use nbdb_contracts::{NbError, NbResult};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::sink::TransactionSink;

/// Serializes submissions: one transaction in flight at a time.
///
/// There is no timeout here; callers that want one wrap `submit` and abandon
/// the wait. The submission itself is not preempted.
pub struct SubmissionGate {
    sink: Arc<dyn TransactionSink>,
    in_flight: Mutex<()>,
}

impl std::fmt::Debug for SubmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionGate").finish_non_exhaustive()
    }
}

fn failed(txn: &Transaction, failure: SinkFailure) -> NbError {
    let operation = failure
        .op_index
        .and_then(|i| txn.operations().get(i))
        .cloned()
        .map(Box::new);
    NbError::TransactionFailed {
        op_index: failure.op_index,
        operation,
        error: failure.error,
        details: failure.details,
    }
}

impl SubmissionGate {
    pub fn new(sink: Arc<dyn TransactionSink>) -> Self {
        Self {
            sink,
            in_flight: Mutex::new(()),
        }
    }

    pub async fn submit(&self, txn: Transaction) -> NbResult<TransactionReply> {
        let _slot = self.in_flight.lock().await;
        debug!(ops = txn.len(), "submitting transaction");
        let results = match self.sink.transact(&txn).await {
            Ok(results) => results,
            Err(failure) => {
                warn!(
                    op_index = ?failure.op_index,
                    error = %failure.error,
                    details = %failure.details,
                    "transaction rejected"
                );
                return Err(failed(&txn, failure));
            }
        };
        if results.len() != txn.len() {
            warn!(
                expected = txn.len(),
                got = results.len(),
                "sink returned a result list of the wrong length"
            );
            return Err(failed(
                &txn,
                SinkFailure {
                    op_index: None,
                    error: "malformed reply".to_string(),
                    details: format!("{} results for {} operations", results.len(), txn.len()),
                },
            ));
        }
        let mut inserted = BTreeMap::new();
        for (op, result) in txn.operations().iter().zip(results.iter()) {
            if let (
                Operation::Insert {
                    uuid_name: Some(name),
                    ..
                },
                OperationResult::Inserted(uuid),
            ) = (op, result)
            {
                inserted.insert(name.clone(), uuid.clone());
            }
        }
        Ok(TransactionReply { results, inserted })
    }
}
