#![forbid(unsafe_code)]

use std::sync::Arc;

use nbdb_contracts::accessor;
use nbdb_contracts::model::{FieldSlot, Model, ModelDescriptor};
use nbdb_contracts::update::{RowUpdate, UpdateBatch};
use nbdb_contracts::value::row_of;
use nbdb_contracts::{Row, RowUuid, Value};
use nbdb_store::{
    IngestSummary, Listener, ModelRegistry, NotificationDispatcher, RegisteredModel, RowStore,
    UpdateIngest,
};
use parking_lot::Mutex;
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq)]
struct Rule {
    uuid: String,
    priority: i64,
    direction: String,
    name: Option<String>,
}

impl Model for Rule {
    const TABLE: &'static str = "ACL";

    fn descriptor() -> ModelDescriptor<Self> {
        ModelDescriptor::new(Self::TABLE)
            .uuid(accessor!(Rule, uuid))
            .required("priority", FieldSlot::Integer(accessor!(Rule, priority)))
            .field("direction", FieldSlot::String(accessor!(Rule, direction)))
            .field("name", FieldSlot::OptString(accessor!(Rule, name)))
    }
}

fn uuid(n: u8) -> RowUuid {
    RowUuid::new(format!("6a1f0c2e-0000-4000-8000-0000000000{n:02x}")).unwrap()
}

fn rule_row(priority: i64) -> Row {
    row_of([
        ("priority", Value::Integer(priority)),
        ("direction", Value::from("to-lport")),
    ])
}

struct Harness {
    ingest: UpdateIngest,
    store: Arc<RowStore>,
    events: Arc<Mutex<Vec<String>>>,
}

fn harness() -> Harness {
    let registry = Arc::new(ModelRegistry::new([RegisteredModel::of::<Rule>()]).unwrap());
    let store = Arc::new(RowStore::new());
    store.subscribe("ACL");
    let events = Arc::new(Mutex::new(Vec::new()));
    let (c, d, u) = (events.clone(), events.clone(), events.clone());
    let mut dispatcher = NotificationDispatcher::new(registry.clone());
    dispatcher
        .register_listener(
            "ACL",
            Listener::typed::<Rule>(
                move |r| c.lock().push(format!("created:{}:{}", r.uuid, r.priority)),
                move |r| d.lock().push(format!("deleted:{}:{}", r.uuid, r.priority)),
            )
            .with_typed_updated::<Rule>(move |old, new| {
                u.lock()
                    .push(format!("updated:{}:{}->{}", new.uuid, old.priority, new.priority))
            }),
        )
        .unwrap();
    let ingest = UpdateIngest::new(store.clone(), registry, Arc::new(dispatcher));
    Harness {
        ingest,
        store,
        events,
    }
}

#[test]
fn at_ingest_01_create_modify_delete_fires_once_each_in_order() {
    let h = harness();
    let id = uuid(1);
    h.ingest
        .ingest(UpdateBatch::new().with("ACL", RowUpdate::insert(id.clone(), rule_row(10))));
    h.ingest.ingest(
        UpdateBatch::new().with("ACL", RowUpdate::modify(id.clone(), rule_row(10), rule_row(20))),
    );
    h.ingest
        .ingest(UpdateBatch::new().with("ACL", RowUpdate::delete(id.clone(), rule_row(20))));

    let events = h.events.lock().clone();
    assert_eq!(
        events,
        vec![
            format!("created:{id}:10"),
            format!("updated:{id}:10->20"),
            format!("deleted:{id}:20"),
        ]
    );
    assert!(h.store.get("ACL", &id).unwrap_err().is_not_found());
}

#[test]
fn at_ingest_02_repeated_insert_and_delete_do_not_double_fire() {
    let h = harness();
    let id = uuid(2);
    let batch = UpdateBatch::new()
        .with("ACL", RowUpdate::insert(id.clone(), rule_row(1)))
        .with("ACL", RowUpdate::insert(id.clone(), rule_row(1)))
        .with("ACL", RowUpdate::delete(id.clone(), rule_row(1)))
        .with("ACL", RowUpdate::delete(id.clone(), rule_row(1)));
    let summary = h.ingest.ingest(batch);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.skipped, 1);
    let events = h.events.lock().clone();
    let created = events.iter().filter(|e| e.starts_with("created")).count();
    let deleted = events.iter().filter(|e| e.starts_with("deleted")).count();
    assert_eq!((created, deleted), (1, 1));
    let first_created = events.iter().position(|e| e.starts_with("created"));
    let first_deleted = events.iter().position(|e| e.starts_with("deleted"));
    assert!(first_created < first_deleted);
}

#[test]
fn at_ingest_03_wire_float_becomes_integer() {
    let h = harness();
    let id = uuid(3);
    let summary = h
        .ingest
        .ingest_wire(&json!({
            "ACL": { id.as_str(): { "new": { "priority": 1001.0, "direction": "from-lport" } } }
        }))
        .unwrap();
    assert_eq!(summary.created, 1);
    let row = h.store.get("ACL", &id).unwrap();
    assert_eq!(row.get("priority"), Some(&Value::Integer(1001)));
    assert_eq!(
        h.events.lock().clone(),
        vec![format!("created:{id}:1001")]
    );
}

#[test]
fn at_ingest_04_undecodable_row_is_cached_but_not_notified() {
    let h = harness();
    let bad = uuid(4);
    let good = uuid(5);
    let batch = UpdateBatch::new()
        .with(
            "ACL",
            RowUpdate::insert(bad.clone(), row_of([("direction", Value::from("to-lport"))])),
        )
        .with("ACL", RowUpdate::insert(good.clone(), rule_row(7)));
    let summary = h.ingest.ingest(batch);
    assert_eq!(
        summary,
        IngestSummary {
            created: 2,
            dropped: 1,
            ..Default::default()
        }
    );
    assert!(h.store.get("ACL", &bad).is_ok());
    assert_eq!(h.events.lock().clone(), vec![format!("created:{good}:7")]);
}

#[test]
fn at_ingest_05_ill_typed_value_is_cached_raw_and_not_notified() {
    let h = harness();
    let batch = UpdateBatch::new()
        .with(
            "ACL",
            RowUpdate::insert(uuid(6), row_of([("priority", Value::from("high"))])),
        )
        .with("ACL", RowUpdate::insert(uuid(7), rule_row(8)));
    let summary = h.ingest.ingest(batch);
    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.created, 2);
    let raw = h.store.get("ACL", &uuid(6)).unwrap();
    assert_eq!(raw.get("priority"), Some(&Value::from("high")));
    assert_eq!(h.store.row_count("ACL").unwrap(), 2);
    assert_eq!(h.events.lock().clone(), vec![format!("created:{}:8", uuid(7))]);
}

#[test]
fn at_ingest_06_unsubscribed_tables_are_skipped() {
    let h = harness();
    let summary = h.ingest.ingest(
        UpdateBatch::new().with("Port_Group", RowUpdate::insert(uuid(8), rule_row(1))),
    );
    assert_eq!(summary.skipped, 1);
    assert!(h.store.get_all("Port_Group").unwrap_err().is_not_found());
    assert!(h.events.lock().is_empty());
}

#[test]
fn at_ingest_07_readers_run_alongside_ingest() {
    let h = Arc::new(harness());
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let h = h.clone();
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..200 {
                    let n = h.store.row_count("ACL").unwrap();
                    assert!(n >= last, "row count went backwards");
                    last = n;
                }
            })
        })
        .collect();
    for n in 0..50u8 {
        h.ingest
            .ingest(UpdateBatch::new().with("ACL", RowUpdate::insert(uuid(n), rule_row(n as i64))));
    }
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(h.store.row_count("ACL").unwrap(), 50);
}

#[test]
fn at_ingest_08_undecodable_wire_row_does_not_block_the_rest() {
    let h = harness();
    let good = uuid(9);
    let summary = h
        .ingest
        .ingest_wire(&json!({
            "ACL": {
                good.as_str(): { "new": { "priority": 5, "direction": "to-lport" } },
                "not-a-uuid": { "new": { "priority": 6, "direction": "to-lport" } },
                uuid(10).as_str(): { "new": { "priority": ["bogus", 1], "direction": "to-lport" } },
            }
        }))
        .unwrap();
    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.created, 1);
    assert_eq!(
        h.store.get("ACL", &good).unwrap().get("priority"),
        Some(&Value::Integer(5))
    );
    assert!(h.store.get("ACL", &uuid(10)).unwrap_err().is_not_found());
    assert_eq!(h.events.lock().clone(), vec![format!("created:{good}:5")]);
}

#[test]
fn at_ingest_09_modify_with_one_ill_typed_column_still_updates_cache() {
    let h = harness();
    let id = uuid(11);
    h.ingest
        .ingest(UpdateBatch::new().with("ACL", RowUpdate::insert(id.clone(), rule_row(5))));
    let summary = h
        .ingest
        .ingest_wire(&json!({
            "ACL": {
                id.as_str(): {
                    "old": { "priority": 5, "direction": "to-lport" },
                    "new": { "priority": "oops", "direction": "from-lport" }
                }
            }
        }))
        .unwrap();
    assert_eq!(
        summary,
        IngestSummary {
            modified: 1,
            dropped: 1,
            ..Default::default()
        }
    );
    let row = h.store.get("ACL", &id).unwrap();
    assert_eq!(row.get("direction"), Some(&Value::from("from-lport")));
    assert_eq!(row.get("priority"), Some(&Value::from("oops")));
    assert_eq!(h.events.lock().clone(), vec![format!("created:{id}:5")]);
}
