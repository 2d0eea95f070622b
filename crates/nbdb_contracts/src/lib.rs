#![forbid(unsafe_code)]

pub mod common;
pub mod error;
pub mod model;
pub mod op;
pub mod update;
pub mod value;
pub mod wire;

pub use common::{ContractViolation, Validate};
pub use error::{NbError, NbResult};
pub use value::{Row, RowUuid, Value};
