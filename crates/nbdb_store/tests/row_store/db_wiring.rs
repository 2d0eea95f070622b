#![forbid(unsafe_code)]

use std::sync::Arc;

use nbdb_contracts::accessor;
use nbdb_contracts::model::{FieldSlot, Model, ModelDescriptor};
use nbdb_contracts::update::{RowUpdate, UpdateBatch};
use nbdb_contracts::value::row_of;
use nbdb_contracts::{NbError, RowUuid, Value};
use nbdb_store::{ModelRegistry, NotificationDispatcher, RegisteredModel, RowStore, UpdateIngest};

#[derive(Debug, Clone, Default, PartialEq)]
struct Group {
    uuid: String,
    name: String,
    ports: Vec<String>,
}

impl Model for Group {
    const TABLE: &'static str = "Port_Group";

    fn descriptor() -> ModelDescriptor<Self> {
        ModelDescriptor::new(Self::TABLE)
            .uuid(accessor!(Group, uuid))
            .required("name", FieldSlot::String(accessor!(Group, name)))
            .field("ports", FieldSlot::ReferenceSet(accessor!(Group, ports)))
    }
}

fn uuid(n: u8) -> RowUuid {
    RowUuid::new(format!("9d3e5b70-0000-4000-8000-0000000000{n:02x}")).unwrap()
}

fn wired() -> (Arc<RowStore>, UpdateIngest, Arc<ModelRegistry>) {
    let registry = Arc::new(ModelRegistry::new([RegisteredModel::of::<Group>()]).unwrap());
    let store = Arc::new(RowStore::new());
    store.subscribe(Group::TABLE);
    let ingest = UpdateIngest::new(
        store.clone(),
        registry.clone(),
        Arc::new(NotificationDispatcher::new(registry.clone())),
    );
    (store, ingest, registry)
}

#[test]
fn at_rows_01_containment_lookup_round_trip() {
    let (store, ingest, _) = wired();
    let members: Vec<RowUuid> = (10..20).map(uuid).collect();
    ingest.ingest(
        UpdateBatch::new()
            .with(
                "Port_Group",
                RowUpdate::insert(
                    uuid(1),
                    row_of([
                        ("name", Value::from("pg_web")),
                        ("ports", Value::uuid_set(members.iter())),
                    ]),
                ),
            )
            .with(
                "Port_Group",
                RowUpdate::insert(
                    uuid(2),
                    row_of([("name", Value::from("pg_db")), ("ports", Value::set([]))]),
                ),
            ),
    );
    for m in &members {
        assert_eq!(
            store.find_containing("Port_Group", "ports", m).unwrap(),
            Some(uuid(1))
        );
    }
    for stranger in [uuid(1), uuid(2), uuid(30)] {
        assert_eq!(
            store.find_containing("Port_Group", "ports", &stranger).unwrap(),
            None
        );
    }
}

#[test]
fn at_rows_02_find_by_fields_and_cardinality() {
    let (store, ingest, _) = wired();
    ingest.ingest(
        UpdateBatch::new()
            .with(
                "Port_Group",
                RowUpdate::insert(uuid(1), row_of([("name", Value::from("dup"))])),
            )
            .with(
                "Port_Group",
                RowUpdate::insert(uuid(2), row_of([("name", Value::from("dup"))])),
            ),
    );
    let key = row_of([("name", Value::from("dup"))]);
    assert!(store.find_by_fields("Port_Group", &key).unwrap().is_some());
    assert_eq!(store.find_all_by_fields("Port_Group", &key).unwrap().len(), 2);
    assert_eq!(
        store
            .find_by_fields("Port_Group", &row_of([("name", Value::from("none"))]))
            .unwrap(),
        None
    );
}

#[test]
fn at_rows_03_records_are_copies() {
    let (store, ingest, registry) = wired();
    ingest.ingest(UpdateBatch::new().with(
        "Port_Group",
        RowUpdate::insert(uuid(1), row_of([("name", Value::from("pg"))])),
    ));
    let row = store.get("Port_Group", &uuid(1)).unwrap();
    let mut g: Group = registry.decode(&uuid(1), &row).unwrap();
    g.name = "changed".to_string();
    assert_eq!(
        store.get("Port_Group", &uuid(1)).unwrap().get("name"),
        Some(&Value::from("pg"))
    );
    assert!(g.ports.is_empty());
}

#[test]
fn at_rows_04_unsubscribed_lookup_is_not_found() {
    let (store, _, _) = wired();
    assert!(matches!(
        store.find_by_fields("ACL", &row_of([("name", Value::from("x"))])),
        Err(NbError::NotFound { .. })
    ));
}
