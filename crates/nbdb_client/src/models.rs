#![forbid(unsafe_code)]

//! Typed records for the northbound tables this client manages.

use std::collections::BTreeMap;

use nbdb_contracts::accessor;
use nbdb_contracts::model::{FieldSlot, Model, ModelDescriptor};
use nbdb_contracts::{ContractViolation, Validate};

use nbdb_store::RegisteredModel;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalSwitch {
    pub uuid: String,
    pub name: String,
    pub ports: Vec<String>,
    pub acls: Vec<String>,
    pub other_config: BTreeMap<String, String>,
    pub external_ids: BTreeMap<String, String>,
}

impl Model for LogicalSwitch {
    const TABLE: &'static str = "Logical_Switch";

    fn descriptor() -> ModelDescriptor<Self> {
        ModelDescriptor::new(Self::TABLE)
            .uuid(accessor!(LogicalSwitch, uuid))
            .required("name", FieldSlot::String(accessor!(LogicalSwitch, name)))
            .field("ports", FieldSlot::ReferenceSet(accessor!(LogicalSwitch, ports)))
            .field("acls", FieldSlot::ReferenceSet(accessor!(LogicalSwitch, acls)))
            .field("other_config", FieldSlot::StringMap(accessor!(LogicalSwitch, other_config)))
            .field("external_ids", FieldSlot::StringMap(accessor!(LogicalSwitch, external_ids)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalSwitchPort {
    pub uuid: String,
    pub name: String,
    pub addresses: Vec<String>,
    pub port_security: Vec<String>,
    /// VLAN tag, 1..=4095 when set.
    pub tag: Option<i64>,
    pub enabled: Option<bool>,
    pub external_ids: BTreeMap<String, String>,
}

impl Model for LogicalSwitchPort {
    const TABLE: &'static str = "Logical_Switch_Port";

    fn descriptor() -> ModelDescriptor<Self> {
        ModelDescriptor::new(Self::TABLE)
            .uuid(accessor!(LogicalSwitchPort, uuid))
            .required("name", FieldSlot::String(accessor!(LogicalSwitchPort, name)))
            .field("addresses", FieldSlot::StringSet(accessor!(LogicalSwitchPort, addresses)))
            .field(
                "port_security",
                FieldSlot::StringSet(accessor!(LogicalSwitchPort, port_security)),
            )
            .field("tag", FieldSlot::OptInteger(accessor!(LogicalSwitchPort, tag)))
            .field("enabled", FieldSlot::OptBoolean(accessor!(LogicalSwitchPort, enabled)))
            .field(
                "external_ids",
                FieldSlot::StringMap(accessor!(LogicalSwitchPort, external_ids)),
            )
    }
}

impl Validate for LogicalSwitchPort {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.name.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "logical_switch_port.name",
                reason: "must not be empty",
            });
        }
        if let Some(tag) = self.tag {
            if !(1..=4095).contains(&tag) {
                return Err(ContractViolation::InvalidRange {
                    field: "logical_switch_port.tag",
                    min: 1.0,
                    max: 4095.0,
                    got: tag as f64,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortGroup {
    pub uuid: String,
    pub name: String,
    pub ports: Vec<String>,
    pub acls: Vec<String>,
    pub external_ids: BTreeMap<String, String>,
}

impl Model for PortGroup {
    const TABLE: &'static str = "Port_Group";

    fn descriptor() -> ModelDescriptor<Self> {
        ModelDescriptor::new(Self::TABLE)
            .uuid(accessor!(PortGroup, uuid))
            .required("name", FieldSlot::String(accessor!(PortGroup, name)))
            .field("ports", FieldSlot::ReferenceSet(accessor!(PortGroup, ports)))
            .field("acls", FieldSlot::ReferenceSet(accessor!(PortGroup, acls)))
            .field("external_ids", FieldSlot::StringMap(accessor!(PortGroup, external_ids)))
    }
}

pub const ACL_PRIORITY_MAX: i64 = 32_767;
pub const ACL_DIRECTIONS: [&str; 2] = ["from-lport", "to-lport"];
pub const ACL_ACTIONS: [&str; 6] = [
    "allow",
    "allow-related",
    "allow-stateless",
    "drop",
    "reject",
    "pass",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    pub uuid: String,
    pub name: Option<String>,
    pub direction: String,
    pub priority: i64,
    pub match_: String,
    pub action: String,
    pub log: bool,
    pub severity: Option<String>,
    pub external_ids: BTreeMap<String, String>,
}

impl Acl {
    pub fn new(direction: &str, priority: i64, match_: &str, action: &str) -> Self {
        Self {
            direction: direction.to_string(),
            priority,
            match_: match_.to_string(),
            action: action.to_string(),
            ..Self::default()
        }
    }
}

impl Model for Acl {
    const TABLE: &'static str = "ACL";

    fn descriptor() -> ModelDescriptor<Self> {
        ModelDescriptor::new(Self::TABLE)
            .uuid(accessor!(Acl, uuid))
            .field("name", FieldSlot::OptString(accessor!(Acl, name)))
            .required("direction", FieldSlot::String(accessor!(Acl, direction)))
            .required("priority", FieldSlot::Integer(accessor!(Acl, priority)))
            .required("match", FieldSlot::String(accessor!(Acl, match_)))
            .required("action", FieldSlot::String(accessor!(Acl, action)))
            .field("log", FieldSlot::Boolean(accessor!(Acl, log)))
            .field("severity", FieldSlot::OptString(accessor!(Acl, severity)))
            .field("external_ids", FieldSlot::StringMap(accessor!(Acl, external_ids)))
    }
}

impl Validate for Acl {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !(0..=ACL_PRIORITY_MAX).contains(&self.priority) {
            return Err(ContractViolation::InvalidRange {
                field: "acl.priority",
                min: 0.0,
                max: ACL_PRIORITY_MAX as f64,
                got: self.priority as f64,
            });
        }
        if !ACL_DIRECTIONS.contains(&self.direction.as_str()) {
            return Err(ContractViolation::InvalidValue {
                field: "acl.direction",
                reason: "must be from-lport or to-lport",
            });
        }
        if !ACL_ACTIONS.contains(&self.action.as_str()) {
            return Err(ContractViolation::InvalidValue {
                field: "acl.action",
                reason: "unknown action",
            });
        }
        if self.match_.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "acl.match",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    pub uuid: String,
    pub name: String,
    pub addresses: Vec<String>,
    pub external_ids: BTreeMap<String, String>,
}

impl Model for AddressSet {
    const TABLE: &'static str = "Address_Set";

    fn descriptor() -> ModelDescriptor<Self> {
        ModelDescriptor::new(Self::TABLE)
            .uuid(accessor!(AddressSet, uuid))
            .required("name", FieldSlot::String(accessor!(AddressSet, name)))
            .field("addresses", FieldSlot::StringSet(accessor!(AddressSet, addresses)))
            .field("external_ids", FieldSlot::StringMap(accessor!(AddressSet, external_ids)))
    }
}

/// Every northbound model, for [`nbdb_store::ModelRegistry::new`].
pub fn northbound_models() -> Vec<RegisteredModel> {
    vec![
        RegisteredModel::of::<LogicalSwitch>(),
        RegisteredModel::of::<LogicalSwitchPort>(),
        RegisteredModel::of::<PortGroup>(),
        RegisteredModel::of::<Acl>(),
        RegisteredModel::of::<AddressSet>(),
    ]
}
