#![forbid(unsafe_code)]

pub mod dispatch;
pub mod ingest;
pub mod lookup;
pub mod registry;
pub mod row_store;

pub use dispatch::{DispatchOutcome, Listener, NotificationDispatcher};
pub use ingest::{IngestSummary, UpdateIngest};
pub use registry::{ModelRegistry, RegisteredModel};
pub use row_store::RowStore;
