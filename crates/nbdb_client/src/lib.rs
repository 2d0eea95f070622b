#![forbid(unsafe_code)]

pub mod client;
pub mod composer;
pub mod config;
pub mod gate;
pub mod memory_server;
pub mod models;
pub mod northbound;
pub mod sink;

pub use client::{feed_channel, NbClient, NbClientBuilder};
pub use composer::{KeyScope, NaturalKey, OperationComposer, ParentRef, ParentSelector};
pub use config::ClientConfig;
pub use gate::SubmissionGate;
pub use memory_server::MemoryServer;
pub use northbound::AclAttach;
pub use sink::TransactionSink;
