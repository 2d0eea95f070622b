#![forbid(unsafe_code)]

use std::sync::Arc;

use nbdb_client::models::{Acl, AddressSet, LogicalSwitch, LogicalSwitchPort, PortGroup};
use nbdb_client::{feed_channel, AclAttach, ClientConfig, MemoryServer, NbClient};
use nbdb_contracts::model::Model;
use nbdb_contracts::update::UpdateBatch;
use nbdb_contracts::value::row_of;
use nbdb_contracts::{NbError, RowUuid, Value};
use parking_lot::Mutex;
use tokio::sync::mpsc;

struct Harness {
    client: NbClient,
    server: Arc<MemoryServer>,
    feed: mpsc::Receiver<UpdateBatch>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new() -> Self {
        let config = ClientConfig::mvp_v1("OVN_Northbound");
        let (tx, feed) = feed_channel(&config);
        let server = Arc::new(MemoryServer::new(tx));
        let events = Arc::new(Mutex::new(Vec::new()));
        let (created, deleted) = (events.clone(), events.clone());
        let client = NbClient::builder(config)
            .northbound_models()
            .typed_listener::<Acl>(
                move |acl| created.lock().push(format!("created:{}", acl.priority)),
                move |acl| deleted.lock().push(format!("deleted:{}", acl.priority)),
            )
            .build(server.clone())
            .unwrap();
        Self {
            client,
            server,
            feed,
            events,
        }
    }

    /// Applies everything the server has published so far.
    fn pump(&mut self) {
        while let Ok(batch) = self.feed.try_recv() {
            self.client.ingest(batch);
        }
    }
}

fn rule(priority: i64) -> Acl {
    Acl::new("to-lport", priority, "ip4.src == 10.0.0.0/8", "drop")
}

#[tokio::test]
async fn at_nb_01_add_then_remove_rule_attach_link() {
    let mut h = Harness::new();
    h.client.port_group_add("pg_web", &[]).await.unwrap();
    h.pump();
    let attach = AclAttach::PortGroup("pg_web".to_string());

    let acl_id = h.client.acl_add(&attach, rule(1001)).await.unwrap();
    h.pump();
    assert_eq!(h.client.list::<Acl>().unwrap().len(), 1);
    let group: PortGroup = h
        .client
        .find(&row_of([("name", Value::from("pg_web"))]))
        .unwrap();
    assert_eq!(group.acls, vec![acl_id.as_str().to_string()]);
    assert_eq!(h.client.acl_list(&attach).unwrap()[0].priority, 1001);

    h.client
        .acl_del(&attach, "to-lport", 1001, "ip4.src == 10.0.0.0/8")
        .await
        .unwrap();
    h.pump();
    assert!(h.client.list::<Acl>().unwrap().is_empty());
    let group: PortGroup = h
        .client
        .find(&row_of([("name", Value::from("pg_web"))]))
        .unwrap();
    assert!(group.acls.is_empty());
    assert_eq!(*h.events.lock(), vec!["created:1001", "deleted:1001"]);
}

#[tokio::test]
async fn at_nb_02_rejected_create_and_link_leaves_neither_row() {
    let mut h = Harness::new();
    h.client.switch_add("ls0").await.unwrap();
    h.pump();
    h.server.fail_next(1, "constraint violation", "injected");
    let err = h
        .client
        .acl_add(&AclAttach::Switch("ls0".to_string()), rule(10))
        .await
        .unwrap_err();
    match err {
        NbError::TransactionFailed {
            op_index, operation, ..
        } => {
            assert_eq!(op_index, Some(1));
            assert_eq!(operation.map(|op| op.table().to_string()), Some("Logical_Switch".to_string()));
        }
        other => panic!("unexpected: {other:?}"),
    }
    h.pump();
    assert!(h.client.list::<Acl>().unwrap().is_empty());
    let ls: LogicalSwitch = h
        .client
        .find(&row_of([("name", Value::from("ls0"))]))
        .unwrap();
    assert!(ls.acls.is_empty());
    assert!(h.server.rows(Acl::TABLE).await.is_empty());
    assert!(h.events.lock().is_empty());
}

#[tokio::test]
async fn at_nb_03_auto_by_name_refuses_to_guess() {
    let mut h = Harness::new();
    h.client.switch_add("shared").await.unwrap();
    h.client.port_group_add("shared", &[]).await.unwrap();
    h.client.port_group_add("only_pg", &[]).await.unwrap();
    h.pump();

    let err = h
        .client
        .acl_add(&AclAttach::AutoByName("shared".to_string()), rule(5))
        .await
        .unwrap_err();
    assert!(err.is_ambiguous());
    assert!(h.server.rows(Acl::TABLE).await.is_empty());

    let err = h
        .client
        .acl_add(&AclAttach::AutoByName("nobody".to_string()), rule(5))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    h.client
        .acl_add(&AclAttach::AutoByName("only_pg".to_string()), rule(5))
        .await
        .unwrap();
    h.pump();
    assert_eq!(
        h.client
            .acl_list(&AclAttach::PortGroup("only_pg".to_string()))
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn at_nb_04_duplicate_acl_on_same_parent_is_already_exists() {
    let mut h = Harness::new();
    h.client.port_group_add("pg", &[]).await.unwrap();
    h.pump();
    let attach = AclAttach::PortGroup("pg".to_string());
    h.client.acl_add(&attach, rule(7)).await.unwrap();
    h.pump();
    let err = h.client.acl_add(&attach, rule(7)).await.unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(h.server.rows(Acl::TABLE).await.len(), 1);

    let err = h.client.acl_add(&attach, rule(40_000)).await.unwrap_err();
    assert!(matches!(err, NbError::SchemaViolation(_)));
}

#[tokio::test]
async fn at_nb_05_switch_ports_link_and_unlink() {
    let mut h = Harness::new();
    h.client.switch_add("ls0").await.unwrap();
    h.pump();
    let port = LogicalSwitchPort {
        name: "lsp0".to_string(),
        addresses: vec!["00:00:00:00:00:01 10.0.0.1".to_string()],
        tag: Some(100),
        ..LogicalSwitchPort::default()
    };
    let port_id = h.client.switch_port_add("ls0", port).await.unwrap();
    h.pump();
    let ls: LogicalSwitch = h
        .client
        .find(&row_of([("name", Value::from("ls0"))]))
        .unwrap();
    assert_eq!(ls.ports, vec![port_id.as_str().to_string()]);
    assert_eq!(h.client.get::<LogicalSwitchPort>(&port_id).unwrap().tag, Some(100));

    h.client.switch_port_del("lsp0").await.unwrap();
    h.pump();
    let ls: LogicalSwitch = h.client.get(&RowUuid::new(ls.uuid).unwrap()).unwrap();
    assert!(ls.ports.is_empty());
    assert!(h.client.list::<LogicalSwitchPort>().unwrap().is_empty());

    assert!(h.client.switch_port_del("lsp0").await.unwrap_err().is_not_found());
    h.client.switch_del("ls0").await.unwrap();
    h.pump();
    assert!(h.client.list::<LogicalSwitch>().unwrap().is_empty());
}

#[tokio::test]
async fn at_nb_06_spawned_feed_converges_cache() {
    let config = ClientConfig::mvp_v1("OVN_Northbound");
    let (tx, feed) = feed_channel(&config);
    let server = Arc::new(MemoryServer::new(tx));
    let client = NbClient::builder(config)
        .northbound_models()
        .build(server.clone())
        .unwrap();
    let handle = client.spawn_feed(feed);

    server
        .seed(PortGroup::TABLE, row_of([("name", Value::from("from_elsewhere"))]))
        .await;
    client.port_group_add("pg_local", &[]).await.unwrap();

    // The client's gate keeps the server (the only sender) alive, so the
    // feed never closes here; poll for convergence.
    for _ in 0..100 {
        if client.list::<PortGroup>().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let mut names: Vec<String> = client
        .list::<PortGroup>()
        .unwrap()
        .into_iter()
        .map(|pg| pg.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["from_elsewhere", "pg_local"]);
    handle.abort();
}

#[tokio::test]
async fn at_nb_07_address_sets_are_unique_by_name() {
    let mut h = Harness::new();
    h.client
        .address_set_add("as_web", &["10.0.0.1", "10.0.0.2"])
        .await
        .unwrap();
    h.pump();
    let set: AddressSet = h
        .client
        .find(&row_of([("name", Value::from("as_web"))]))
        .unwrap();
    assert_eq!(set.addresses, vec!["10.0.0.1", "10.0.0.2"]);
    assert!(h
        .client
        .address_set_add("as_web", &[])
        .await
        .unwrap_err()
        .is_already_exists());

    h.client.address_set_del("as_web").await.unwrap();
    h.pump();
    assert!(h.client.list::<AddressSet>().unwrap().is_empty());
    assert!(h.client.address_set_del("as_web").await.unwrap_err().is_not_found());
}
