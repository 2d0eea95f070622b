#![forbid(unsafe_code)]

//! Per-table call-throughs for the northbound schema. Each one composes
//! against the cache, submits through the gate, and returns the new row's
//! identifier where one is created.

use nbdb_contracts::model::Model;
use nbdb_contracts::op::{PlaceholderName, TransactionReply};
use nbdb_contracts::value::row_of;
use nbdb_contracts::{NbError, NbResult, Row, RowUuid, Validate, Value};
use tracing::debug;

use crate::client::NbClient;
use crate::composer::{NaturalKey, OperationComposer, ParentRef, ParentSelector};
use crate::models::{Acl, AddressSet, LogicalSwitch, LogicalSwitchPort, PortGroup};

const ACLS: &str = "acls";

/// Where an ACL hangs. ACLs live in the `acls` column of either a logical
/// switch or a port group.
#[derive(Debug, Clone, PartialEq)]
pub enum AclAttach {
    Switch(String),
    PortGroup(String),
    /// Explicit parent row; the table must be `Logical_Switch` or `Port_Group`.
    ByUuid(String, RowUuid),
    /// Resolve by name across both parent tables; must match exactly one row.
    AutoByName(String),
}

impl AclAttach {
    fn parent(&self, composer: &OperationComposer<'_>) -> NbResult<ParentRef> {
        match self {
            AclAttach::Switch(name) => Ok(ParentRef::new(
                LogicalSwitch::TABLE,
                ACLS,
                ParentSelector::Key(by_name(name)),
            )),
            AclAttach::PortGroup(name) => Ok(ParentRef::new(
                PortGroup::TABLE,
                ACLS,
                ParentSelector::Key(by_name(name)),
            )),
            AclAttach::ByUuid(table, uuid) => {
                if table != LogicalSwitch::TABLE && table != PortGroup::TABLE {
                    return Err(NbError::invalid_option(
                        "acl.attach",
                        format!("{table} does not hold ACLs"),
                    ));
                }
                Ok(ParentRef::new(
                    table.clone(),
                    ACLS,
                    ParentSelector::Uuid(uuid.clone()),
                ))
            }
            AclAttach::AutoByName(name) => composer.resolve_among(
                &[(LogicalSwitch::TABLE, ACLS), (PortGroup::TABLE, ACLS)],
                &by_name(name),
            ),
        }
    }
}

fn by_name(name: &str) -> Row {
    row_of([("name", Value::from(name))])
}

fn acl_key() -> NaturalKey {
    NaturalKey::within_parent(["direction", "priority", "match"])
}

fn created(reply: &TransactionReply, name: &PlaceholderName) -> NbResult<RowUuid> {
    reply.uuid_for(name).cloned().ok_or_else(|| NbError::TransactionFailed {
        op_index: None,
        operation: None,
        error: "malformed reply".to_string(),
        details: format!("no identifier assigned to {name}"),
    })
}

impl NbClient {
    pub async fn switch_add(&self, name: &str) -> NbResult<RowUuid> {
        let switch = LogicalSwitch {
            name: name.to_string(),
            ..LogicalSwitch::default()
        };
        let (txn, placeholder) = {
            let composer = self.composer();
            let row = self.registry().to_row(&switch)?;
            composer.create(LogicalSwitch::TABLE, row, &NaturalKey::table(["name"]))?
        };
        let reply = self.submit(txn).await?;
        created(&reply, &placeholder)
    }

    pub async fn switch_del(&self, name: &str) -> NbResult<()> {
        let txn = self.composer().delete(LogicalSwitch::TABLE, &by_name(name))?;
        self.submit(txn).await?;
        Ok(())
    }

    /// Creates `port` and links it into the named switch's `ports`.
    pub async fn switch_port_add(&self, switch: &str, port: LogicalSwitchPort) -> NbResult<RowUuid> {
        port.validate()?;
        let (txn, placeholder) = {
            let composer = self.composer();
            let row = self.registry().to_row(&port)?;
            composer.create_and_link(
                LogicalSwitchPort::TABLE,
                row,
                &NaturalKey::table(["name"]),
                &ParentRef::new(
                    LogicalSwitch::TABLE,
                    "ports",
                    ParentSelector::Key(by_name(switch)),
                ),
            )?
        };
        let reply = self.submit(txn).await?;
        created(&reply, &placeholder)
    }

    /// Unlinks the named port from whichever switch holds it, then deletes it.
    pub async fn switch_port_del(&self, port: &str) -> NbResult<()> {
        let txn = self.composer().delete_and_unlink(
            LogicalSwitchPort::TABLE,
            &by_name(port),
            &ParentRef::new(LogicalSwitch::TABLE, "ports", ParentSelector::Containing),
        )?;
        self.submit(txn).await?;
        Ok(())
    }

    pub async fn port_group_add(&self, name: &str, ports: &[RowUuid]) -> NbResult<RowUuid> {
        let group = PortGroup {
            name: name.to_string(),
            ports: ports.iter().map(|p| p.as_str().to_string()).collect(),
            ..PortGroup::default()
        };
        let (txn, placeholder) = {
            let composer = self.composer();
            let row = self.registry().to_row(&group)?;
            composer.create(PortGroup::TABLE, row, &NaturalKey::table(["name"]))?
        };
        let reply = self.submit(txn).await?;
        created(&reply, &placeholder)
    }

    pub async fn address_set_add(&self, name: &str, addresses: &[&str]) -> NbResult<RowUuid> {
        let set = AddressSet {
            name: name.to_string(),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            ..AddressSet::default()
        };
        let (txn, placeholder) = {
            let composer = self.composer();
            let row = self.registry().to_row(&set)?;
            composer.create(AddressSet::TABLE, row, &NaturalKey::table(["name"]))?
        };
        let reply = self.submit(txn).await?;
        created(&reply, &placeholder)
    }

    pub async fn address_set_del(&self, name: &str) -> NbResult<()> {
        let txn = self.composer().delete(AddressSet::TABLE, &by_name(name))?;
        self.submit(txn).await?;
        Ok(())
    }

    /// Creates `acl` and attaches it, refusing a second ACL with the same
    /// direction, priority and match on the same parent.
    pub async fn acl_add(&self, attach: &AclAttach, acl: Acl) -> NbResult<RowUuid> {
        acl.validate()?;
        let (txn, placeholder) = {
            let composer = self.composer();
            let parent = attach.parent(&composer)?;
            let row = self.registry().to_row(&acl)?;
            composer.create_and_link(Acl::TABLE, row, &acl_key(), &parent)?
        };
        let reply = self.submit(txn).await?;
        created(&reply, &placeholder)
    }

    pub async fn acl_del(
        &self,
        attach: &AclAttach,
        direction: &str,
        priority: i64,
        match_: &str,
    ) -> NbResult<()> {
        let txn = {
            let composer = self.composer();
            let parent = attach.parent(&composer)?;
            let key = row_of([
                ("direction", Value::from(direction)),
                ("priority", Value::Integer(priority)),
                ("match", Value::from(match_)),
            ]);
            composer.delete_and_unlink(Acl::TABLE, &key, &parent)?
        };
        self.submit(txn).await?;
        Ok(())
    }

    /// ACLs currently attached to the parent, in identifier order. A linked
    /// ACL the cache has not seen yet is left out.
    pub fn acl_list(&self, attach: &AclAttach) -> NbResult<Vec<Acl>> {
        let composer = self.composer();
        let parent = attach.parent(&composer)?;
        let parent_uuid = composer.resolve_parent(&parent, None)?;
        let row = self.store().get(&parent.table, &parent_uuid)?;
        let ids: Vec<RowUuid> = match row.get(ACLS) {
            Some(Value::Set(items)) => items.iter().filter_map(Value::as_uuid).cloned().collect(),
            Some(Value::Uuid(u)) => vec![u.clone()],
            _ => Vec::new(),
        };
        let mut acls = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.get::<Acl>(id) {
                Ok(acl) => acls.push(acl),
                Err(err) if err.is_not_found() => {
                    debug!(table = %parent.table, parent = %parent_uuid, acl = %id, "linked ACL not cached yet");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(acls)
    }
}
