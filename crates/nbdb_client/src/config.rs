#![forbid(unsafe_code)]

use nbdb_contracts::common::is_ovsdb_id;
use nbdb_contracts::{ContractViolation, NbError, NbResult, Validate};
use serde::Deserialize;

pub const DEFAULT_FEED_BUFFER: usize = 64;
pub const MAX_FEED_BUFFER: usize = 65_536;

fn default_feed_buffer() -> usize {
    DEFAULT_FEED_BUFFER
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Remote database name, e.g. `OVN_Northbound`.
    pub database: String,
    /// Capacity of the update-feed channel between transport and ingest.
    #[serde(default = "default_feed_buffer")]
    pub feed_buffer: usize,
}

impl ClientConfig {
    pub fn mvp_v1(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            feed_buffer: DEFAULT_FEED_BUFFER,
        }
    }

    pub fn from_json_str(s: &str) -> NbResult<Self> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| NbError::invalid_option("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Validate for ClientConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !is_ovsdb_id(&self.database) {
            return Err(ContractViolation::InvalidValue {
                field: "client_config.database",
                reason: "must be a non-empty [A-Za-z_][A-Za-z0-9_]* name",
            });
        }
        if self.feed_buffer == 0 || self.feed_buffer > MAX_FEED_BUFFER {
            return Err(ContractViolation::InvalidRange {
                field: "client_config.feed_buffer",
                min: 1.0,
                max: MAX_FEED_BUFFER as f64,
                got: self.feed_buffer as f64,
            });
        }
        Ok(())
    }
}
