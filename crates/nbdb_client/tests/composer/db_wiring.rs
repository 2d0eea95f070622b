#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use nbdb_client::models::{Acl, LogicalSwitch, PortGroup};
use nbdb_client::{AclAttach, ClientConfig, NaturalKey, NbClient, ParentRef, ParentSelector, TransactionSink};
use nbdb_contracts::model::Model;
use nbdb_contracts::op::{
    Mutator, OpValue, Operation, OperationResult, SinkFailure, Transaction, UuidRef,
};
use nbdb_contracts::update::{RowUpdate, UpdateBatch};
use nbdb_contracts::value::row_of;
use nbdb_contracts::{NbError, Row, RowUuid, Value};

struct NullSink;

#[async_trait]
impl TransactionSink for NullSink {
    async fn transact(&self, txn: &Transaction) -> Result<Vec<OperationResult>, SinkFailure> {
        Ok(vec![OperationResult::Count(0); txn.len()])
    }
}

fn uuid(n: u8) -> RowUuid {
    RowUuid::new(format!("5f0c2a91-0000-4000-8000-0000000000{n:02x}")).unwrap()
}

fn client() -> NbClient {
    NbClient::builder(ClientConfig::mvp_v1("OVN_Northbound"))
        .northbound_models()
        .build(Arc::new(NullSink))
        .unwrap()
}

fn acl_row(priority: i64) -> Row {
    row_of([
        ("direction", Value::from("to-lport")),
        ("priority", Value::Integer(priority)),
        ("match", Value::from("ip4.src == 10.0.0.0/8")),
        ("action", Value::from("drop")),
    ])
}

fn named(name: &str) -> Row {
    row_of([("name", Value::from(name))])
}

/// Two port groups; `pg_a` holds ACL 1 (priority 100).
fn seeded() -> NbClient {
    let c = client();
    c.ingest(
        UpdateBatch::new()
            .with("ACL", RowUpdate::insert(uuid(1), acl_row(100)))
            .with(
                "Port_Group",
                RowUpdate::insert(
                    uuid(10),
                    row_of([("name", Value::from("pg_a")), ("acls", Value::uuid_set([&uuid(1)]))]),
                ),
            )
            .with("Port_Group", RowUpdate::insert(uuid(11), named("pg_b"))),
    );
    c
}

fn acl_key() -> NaturalKey {
    NaturalKey::within_parent(["direction", "priority", "match"])
}

#[test]
fn at_compose_01_duplicate_insert_is_already_exists_and_store_unchanged() {
    let c = seeded();
    let before = c.store().get_all("ACL").unwrap();
    let parent = ParentRef::new("Port_Group", "acls", ParentSelector::Key(named("pg_a")));
    let err = c
        .composer()
        .create_and_link("ACL", acl_row(100), &acl_key(), &parent)
        .unwrap_err();
    match err {
        NbError::AlreadyExists { table, uuid: found, .. } => {
            assert_eq!(table, "ACL");
            assert_eq!(found, uuid(1));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(c.store().get_all("ACL").unwrap(), before);

    // Same key on a different parent is a different entity.
    let other = ParentRef::new("Port_Group", "acls", ParentSelector::Key(named("pg_b")));
    assert!(c
        .composer()
        .create_and_link("ACL", acl_row(100), &acl_key(), &other)
        .is_ok());

    let err = c
        .composer()
        .create(PortGroup::TABLE, named("pg_a"), &NaturalKey::table(["name"]))
        .unwrap_err();
    assert!(err.is_already_exists());
}

#[test]
fn at_compose_02_create_and_link_orders_insert_before_mutate() {
    let c = seeded();
    let parent = ParentRef::new("Port_Group", "acls", ParentSelector::Key(named("pg_b")));
    let (txn, placeholder) = c
        .composer()
        .create_and_link("ACL", acl_row(200), &acl_key(), &parent)
        .unwrap();
    let ops = txn.operations();
    assert_eq!(ops.len(), 2);
    match (&ops[0], &ops[1]) {
        (
            Operation::Insert {
                table, uuid_name, ..
            },
            Operation::Mutate {
                table: parent_table,
                column,
                mutator,
                value,
                filter,
            },
        ) => {
            assert_eq!(table, "ACL");
            assert_eq!(uuid_name.as_ref(), Some(&placeholder));
            assert_eq!(parent_table, "Port_Group");
            assert_eq!(column, "acls");
            assert_eq!(*mutator, Mutator::InsertIntoSet);
            assert_eq!(value, &OpValue::Ref(UuidRef::Placeholder(placeholder.clone())));
            assert_eq!(filter[0].value, OpValue::Ref(UuidRef::Resolved(uuid(11))));
        }
        other => panic!("unexpected ops: {other:?}"),
    }
}

#[test]
fn at_compose_03_delete_and_unlink_resolves_child_and_parent() {
    let c = seeded();
    let key = row_of([("priority", Value::Integer(100))]);
    let parent = ParentRef::new("Port_Group", "acls", ParentSelector::Containing);
    let txn = c.composer().delete_and_unlink("ACL", &key, &parent).unwrap();
    let ops = txn.operations();
    assert_eq!(ops.len(), 2);
    assert!(matches!(
        &ops[0],
        Operation::Mutate { table, mutator: Mutator::DeleteFromSet, value, filter, .. }
            if table == "Port_Group"
                && value == &OpValue::Ref(UuidRef::Resolved(uuid(1)))
                && filter[0].value == OpValue::Ref(UuidRef::Resolved(uuid(10)))
    ));
    assert!(matches!(&ops[1], Operation::Delete { table, .. } if table == "ACL"));

    // Searching the wrong parent's links finds nothing to delete.
    let wrong = ParentRef::new("Port_Group", "acls", ParentSelector::Key(named("pg_b")));
    assert!(c
        .composer()
        .delete_and_unlink("ACL", &key, &wrong)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn at_compose_04_missing_targets_are_not_found() {
    let c = seeded();
    let composer = c.composer();
    assert!(composer.delete("ACL", &acl_row(999)).unwrap_err().is_not_found());
    assert!(composer
        .update(PortGroup::TABLE, &named("pg_zzz"), named("renamed"))
        .unwrap_err()
        .is_not_found());
    let missing_parent = ParentRef::new("Port_Group", "acls", ParentSelector::Key(named("nope")));
    assert!(composer
        .create_and_link("ACL", acl_row(1), &acl_key(), &missing_parent)
        .unwrap_err()
        .is_not_found());
    let by_uuid = ParentRef::new("Port_Group", "acls", ParentSelector::Uuid(uuid(99)));
    assert!(composer
        .create_and_link("ACL", acl_row(1), &acl_key(), &by_uuid)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn at_compose_05_name_shared_by_two_parent_tables_is_ambiguous() {
    let c = seeded();
    c.ingest(UpdateBatch::new().with(LogicalSwitch::TABLE, RowUpdate::insert(uuid(20), named("pg_a"))));
    let composer = c.composer();
    let err = composer
        .resolve_among(&[("Logical_Switch", "acls"), ("Port_Group", "acls")], &named("pg_a"))
        .unwrap_err();
    match err {
        NbError::Ambiguous { candidates, .. } => assert_eq!(candidates.len(), 2),
        other => panic!("unexpected: {other:?}"),
    }
    let one = composer
        .resolve_among(&[("Logical_Switch", "acls"), ("Port_Group", "acls")], &named("pg_b"))
        .unwrap();
    assert_eq!(one.table, "Port_Group");
    assert_eq!(one.selector, ParentSelector::Uuid(uuid(11)));
}

#[test]
fn at_compose_06_empty_keys_and_changes_are_rejected() {
    let c = seeded();
    let composer = c.composer();
    assert!(matches!(
        composer.delete("ACL", &Row::new()),
        Err(NbError::InvalidOption { .. })
    ));
    assert!(matches!(
        composer.update(PortGroup::TABLE, &named("pg_a"), Row::new()),
        Err(NbError::InvalidOption { .. })
    ));
    assert!(matches!(
        composer.create(Acl::TABLE, acl_row(5), &acl_key()),
        Err(NbError::InvalidOption { .. })
    ));
}

#[test]
fn at_compose_07_merged_transactions_keep_placeholder_scope() {
    let c = seeded();
    let composer = c.composer();
    let (a, pa) = composer
        .create(LogicalSwitch::TABLE, named("ls1"), &NaturalKey::table(["name"]))
        .unwrap();
    let (b, pb) = composer
        .create(LogicalSwitch::TABLE, named("ls2"), &NaturalKey::table(["name"]))
        .unwrap();
    assert_ne!(pa, pb);
    let merged = Transaction::merge([a, b]).unwrap();
    assert_eq!(merged.placeholders().len(), 2);
}

#[test]
fn at_compose_08_acl_list_leaves_out_links_not_cached_yet() {
    let c = seeded();
    c.ingest(UpdateBatch::new().with(
        "Port_Group",
        RowUpdate::modify(
            uuid(11),
            named("pg_b"),
            row_of([("name", Value::from("pg_b")), ("acls", Value::uuid_set([&uuid(1), &uuid(2)]))]),
        ),
    ));
    let acls = c.acl_list(&AclAttach::PortGroup("pg_b".to_string())).unwrap();
    assert_eq!(acls.len(), 1);
    assert_eq!(acls[0].uuid, uuid(1).as_str());

    c.ingest(UpdateBatch::new().with("ACL", RowUpdate::insert(uuid(2), acl_row(300))));
    let mut priorities: Vec<i64> = c
        .acl_list(&AclAttach::PortGroup("pg_b".to_string()))
        .unwrap()
        .into_iter()
        .map(|acl| acl.priority)
        .collect();
    priorities.sort();
    assert_eq!(priorities, vec![100, 300]);
}
