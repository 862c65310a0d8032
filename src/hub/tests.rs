use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Hub;
use crate::client::{Client, ClientState};
use crate::config::HubConfig;
use crate::utils::error::{HubError, Result};

fn small_config() -> HubConfig {
    HubConfig {
        send_buffer_size: 2,
        ..HubConfig::default()
    }
}

fn spawn_hub(config: HubConfig) -> (Arc<Hub>, JoinHandle<Result<()>>) {
    let hub = Hub::new(config).unwrap();
    let runner = hub.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    (hub, handle)
}

fn new_client(hub: &Arc<Hub>, user_id: &str, tenant_id: &str) -> Arc<Client> {
    Client::builder(user_id, tenant_id).build(hub)
}

async fn registered(hub: &Arc<Hub>, user_id: &str, tenant_id: &str) -> Arc<Client> {
    let client = new_client(hub, user_id, tenant_id);
    hub.register(client.clone());
    hub.flush().await.unwrap();
    client
}

fn queue_of(client: &Client) -> mpsc::Receiver<Vec<u8>> {
    client.take_queue().expect("queue already taken")
}

fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[tokio::test]
async fn test_register_and_unregister_client() {
    let (hub, _) = spawn_hub(small_config());
    let client = new_client(&hub, "u1", "t1");

    hub.register(client.clone());
    hub.flush().await.unwrap();
    let found = hub.get_client("u1", &client.id).expect("client registered");
    assert!(Arc::ptr_eq(&found, &client));
    assert!(hub.has_active_connection("u1"));

    hub.unregister(&client);
    hub.flush().await.unwrap();
    assert!(hub.get_client("u1", &client.id).is_none());
    assert!(!hub.has_active_connection("u1"));
    assert_eq!(hub.user_count(), 0);
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_unregister_removes_client_from_every_group() {
    let (hub, _) = spawn_hub(small_config());
    let leaving = registered(&hub, "u1", "t1").await;
    let staying = registered(&hub, "u2", "t1").await;

    assert!(hub.join_group("g1", &leaving));
    assert!(hub.join_group("g2", &leaving));
    assert!(hub.join_group("g2", &staying));

    hub.unregister(&leaving);
    hub.flush().await.unwrap();

    assert_eq!(hub.group_count(), 1);
    assert!(hub.get_group_clients("g1").is_empty());
    assert!(!hub.is_group_member("g2", &leaving));
    assert_eq!(hub.get_group_user_ids("g2"), vec!["u2".to_string()]);
    assert!(hub.registry.read().contains(&staying));
}

#[tokio::test]
async fn test_concurrent_registrations_are_not_lost() {
    let (hub, _) = spawn_hub(small_config());

    let tasks: Vec<_> = (0..200)
        .map(|i| {
            let hub = hub.clone();
            tokio::spawn(async move {
                let client = new_client(&hub, &format!("user-{}", i % 10), "t1");
                hub.register(client);
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    hub.flush().await.unwrap();

    assert_eq!(hub.client_count(), 200);
    assert_eq!(hub.user_count(), 10);
    assert_eq!(hub.get_user_clients("user-3").len(), 20);
}

#[tokio::test]
async fn test_send_to_group_reaches_each_client_once() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let a1 = registered(&hub, "a", "t1").await;
    let a2 = registered(&hub, "a", "t1").await;
    let b = registered(&hub, "b", "t1").await;

    for client in [&a1, &a2, &b] {
        assert!(hub.join_group("room", client));
    }
    // joining twice must not create a second path to the same client
    assert!(hub.join_group("room", &a1));

    let mut queues: Vec<_> = [&a1, &a2, &b].iter().map(|c| queue_of(c)).collect();
    assert_eq!(hub.send_to_group("room", b"hi"), 3);
    for rx in queues.iter_mut() {
        assert_eq!(drain(rx), vec![b"hi".to_vec()]);
    }
}

#[tokio::test]
async fn test_group_send_then_backpressure_scenario() {
    let (hub, _) = spawn_hub(small_config());
    let c1 = registered(&hub, "u1", "t1").await;
    let c2 = registered(&hub, "u2", "t1").await;
    hub.join_group("g1", &c1);
    hub.join_group("g1", &c2);

    let mut rx1 = queue_of(&c1);
    assert_eq!(hub.send_to_group("g1", b"m"), 2);
    assert_eq!(drain(&mut rx1).len(), 1);

    assert!(c1.send(b"m".as_slice()));
    assert!(c1.send(b"m".as_slice()));
    assert!(!c1.send(b"m".as_slice()));
    // older messages survive the overflow
    assert_eq!(drain(&mut rx1).len(), 2);
}

#[tokio::test]
async fn test_group_message_counts_toward_queue_capacity() {
    let (hub, _) = spawn_hub(small_config());
    let c1 = registered(&hub, "u1", "t1").await;
    let c2 = registered(&hub, "u2", "t1").await;
    hub.join_group("g1", &c1);
    hub.join_group("g1", &c2);

    let mut rx1 = queue_of(&c1);
    assert_eq!(hub.send_to_group("g1", b"m"), 2);

    // one slot is already taken by the group message
    assert!(c1.send(b"d1".as_slice()));
    assert!(!c1.send(b"d2".as_slice()));
    assert!(!c1.send(b"d3".as_slice()));
    assert_eq!(drain(&mut rx1), vec![b"m".to_vec(), b"d1".to_vec()]);
}

#[tokio::test]
async fn test_send_to_group_except_skips_user() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let sender = registered(&hub, "alice", "t1").await;
    let sender_other_tab = registered(&hub, "alice", "t1").await;
    let peer = registered(&hub, "bob", "t1").await;
    for client in [&sender, &sender_other_tab, &peer] {
        hub.join_group("chat", client);
    }

    let mut peer_rx = queue_of(&peer);
    let mut sender_rx = queue_of(&sender);
    assert_eq!(hub.send_to_group_except("chat", "alice", b"yo"), 1);
    assert_eq!(drain(&mut peer_rx).len(), 1);
    assert!(drain(&mut sender_rx).is_empty());

    assert_eq!(hub.send_to_group_except("missing", "alice", b"yo"), 0);
}

#[tokio::test]
async fn test_send_to_tenant_and_broadcast_all() {
    let (hub, _) = spawn_hub(HubConfig::default());
    registered(&hub, "u1", "acme").await;
    registered(&hub, "u1", "acme").await;
    registered(&hub, "u2", "acme").await;
    registered(&hub, "u3", "globex").await;

    assert_eq!(hub.send_to_tenant("acme", b"x"), 3);
    assert_eq!(hub.send_to_tenant("globex", b"x"), 1);
    assert_eq!(hub.send_to_tenant("nobody", b"x"), 0);
    assert_eq!(hub.broadcast_all(b"x"), 4);
}

#[tokio::test]
async fn test_send_to_user_counts_enqueues() {
    let (hub, _) = spawn_hub(small_config());
    let c1 = registered(&hub, "u1", "t1").await;
    registered(&hub, "u1", "t1").await;

    assert_eq!(hub.send_to_user("u1", b"1"), 2);
    assert_eq!(hub.send_to_user("u1", b"2"), 2);
    // both queues are full now
    assert_eq!(hub.send_to_user("u1", b"3"), 0);
    assert_eq!(c1.pending(), 2);
    assert_eq!(hub.send_to_user("ghost", b"1"), 0);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Notice {
    kind: String,
    count: u32,
    tags: Vec<String>,
}

#[tokio::test]
async fn test_send_to_user_json_round_trip() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let client = registered(&hub, "u1", "t1").await;
    let mut rx = queue_of(&client);

    let notice = Notice {
        kind: "mention".to_string(),
        count: 3,
        tags: vec!["a".to_string(), "b".to_string()],
    };
    assert_eq!(hub.send_to_user_json("u1", &notice).unwrap(), 1);

    let bytes = rx.try_recv().unwrap();
    let decoded: Notice = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded, notice);
}

#[tokio::test]
async fn test_json_variants_fail_before_enqueueing() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let client = registered(&hub, "u1", "t1").await;
    hub.join_group("g", &client);

    // non-string map keys cannot be encoded as JSON
    let bad: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);

    assert!(matches!(hub.send_to_user_json("u1", &bad), Err(HubError::Serialization(_))));
    assert!(matches!(hub.send_to_group_json("g", &bad), Err(HubError::Serialization(_))));
    assert!(hub.send_to_group_except_json("g", "x", &bad).is_err());
    assert!(hub.send_to_tenant_json("t1", &bad).is_err());
    assert!(hub.broadcast_all_json(&bad).is_err());
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_disconnect_user_closes_and_prunes() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let a = registered(&hub, "u1", "t1").await;
    let b = registered(&hub, "u1", "t1").await;
    let other = registered(&hub, "u2", "t1").await;
    hub.join_group("g1", &a);
    hub.join_group("g2", &b);
    hub.join_group("g2", &other);

    assert_eq!(hub.disconnect_user("u1"), 2);

    assert!(!hub.has_active_connection("u1"));
    assert!(a.is_closed() && b.is_closed());
    assert!(!other.is_closed());
    assert_eq!(hub.group_count(), 1);
    assert_eq!(hub.get_group_user_ids("g2"), vec!["u2".to_string()]);
    assert_eq!(hub.disconnect_user("u1"), 0);
}

#[tokio::test]
async fn test_group_membership_management() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let client = registered(&hub, "u1", "t1").await;

    assert!(hub.join_group("g", &client));
    assert!(hub.is_group_member("g", &client));
    assert_eq!(hub.get_group_clients("g").len(), 1);

    assert!(hub.leave_group("g", &client));
    assert!(!hub.leave_group("g", &client));
    assert_eq!(hub.group_count(), 0);
    // leaving a group never closes the client
    assert_eq!(client.state(), ClientState::Open);

    client.close();
    assert!(!hub.join_group("g", &client));
    assert_eq!(hub.group_count(), 0);
}

#[tokio::test]
async fn test_connected_user_ids_with_tenant_filter() {
    let (hub, _) = spawn_hub(HubConfig::default());
    registered(&hub, "u1", "acme").await;
    registered(&hub, "u2", "acme").await;
    registered(&hub, "u3", "globex").await;

    let mut all = hub.get_connected_user_ids(None);
    all.sort();
    assert_eq!(all, vec!["u1", "u2", "u3"]);

    let mut acme = hub.get_connected_user_ids(Some("acme"));
    acme.sort();
    assert_eq!(acme, vec!["u1", "u2"]);
    assert!(hub.get_connected_user_ids(Some("initech")).is_empty());
}

#[tokio::test]
async fn test_run_twice_is_rejected() {
    let (hub, _) = spawn_hub(HubConfig::default());
    hub.flush().await.unwrap();
    assert!(matches!(hub.run().await, Err(HubError::AlreadyRunning)));
}

#[tokio::test]
async fn test_closed_client_is_not_registered() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let client = new_client(&hub, "u1", "t1");
    client.close();

    hub.register(client.clone());
    hub.flush().await.unwrap();
    assert!(hub.get_client("u1", &client.id).is_none());
}

#[tokio::test]
async fn test_reused_id_replaces_previous_connection() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let first = Client::builder("u1", "t1").id("tab-1").build(&hub);
    let second = Client::builder("u1", "t1").id("tab-1").build(&hub);

    hub.register(first.clone());
    hub.register(second.clone());
    hub.flush().await.unwrap();
    assert!(first.is_closed());

    // the stale connection's unregister must not evict its replacement
    hub.unregister(&first);
    hub.flush().await.unwrap();
    let current = hub.get_client("u1", "tab-1").unwrap();
    assert!(Arc::ptr_eq(&current, &second));
}

#[tokio::test]
async fn test_shutdown_closes_everyone_and_stops_loop() {
    let (hub, handle) = spawn_hub(HubConfig::default());
    let a = registered(&hub, "u1", "t1").await;
    let b = registered(&hub, "u2", "t2").await;
    hub.join_group("g", &a);

    hub.shutdown();
    handle.await.unwrap().unwrap();

    assert!(a.is_closed() && b.is_closed());
    assert_eq!(hub.client_count(), 0);
    assert_eq!(hub.group_count(), 0);
    assert!(matches!(hub.flush().await, Err(HubError::HubClosed)));

    let late = new_client(&hub, "u3", "t1");
    hub.register(late.clone());
    assert!(late.is_closed());
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = HubConfig {
        send_buffer_size: 0,
        ..HubConfig::default()
    };
    assert!(matches!(Hub::new(config), Err(HubError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_join_refuses_unregistered_client() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let ghost = new_client(&hub, "ghost", "t1");

    assert!(!hub.join_group("g", &ghost));
    assert_eq!(hub.group_count(), 0);
    assert_eq!(hub.send_to_group("g", b"x"), 0);

    // once the registration is applied the same client may join
    hub.register(ghost.clone());
    hub.flush().await.unwrap();
    assert!(hub.join_group("g", &ghost));
    assert_eq!(hub.send_to_group("g", b"x"), 1);
}

#[tokio::test]
async fn test_close_without_loops_leaves_registry_and_groups() {
    let (hub, _) = spawn_hub(HubConfig::default());
    let client = registered(&hub, "u1", "t1").await;
    let other = registered(&hub, "u2", "t1").await;
    assert!(hub.join_group("g", &client));
    assert!(hub.join_group("g", &other));

    client.close();
    hub.flush().await.unwrap();

    assert!(hub.get_client("u1", &client.id).is_none());
    assert!(!hub.has_active_connection("u1"));
    assert!(!hub.is_group_member("g", &client));
    assert_eq!(hub.get_group_user_ids("g"), vec!["u2".to_string()]);
    assert_eq!(hub.send_to_group("g", b"x"), 1);
}
