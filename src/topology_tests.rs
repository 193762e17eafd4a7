// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use crate::errors::RouterError;
use crate::test_support::{ep, new_store, MockConnector};
use crate::topology::TopologyStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn replica_set(store: &TopologyStore<MockConnector>, group: &str) -> HashSet<String> {
    store
        .snapshot(group)
        .unwrap()
        .replica_endpoints()
        .into_iter()
        .map(|e| e.to_string())
        .collect()
}

fn assert_master_not_replica(store: &TopologyStore<MockConnector>, group: &str) {
    let state = store.snapshot(group).unwrap();
    assert!(
        !state.replica_endpoints().contains(state.master_endpoint()),
        "master {} listed as replica",
        state.master_endpoint()
    );
}

async fn bootstrap_g1(connector: &Arc<MockConnector>) -> Arc<TopologyStore<MockConnector>> {
    let store = new_store(connector.clone());
    store.promote("g1", &ep("10.0.0.1:6379"));
    assert!(store.mark_replica_up("g1", &ep("10.0.0.2:6379")).await.unwrap());
    assert!(store.mark_replica_up("g1", &ep("10.0.0.3:6379")).await.unwrap());
    store
}

#[tokio::test]
async fn test_unknown_group() {
    let store = new_store(MockConnector::new());
    assert!(matches!(store.get_master("nope"), Err(RouterError::GroupNotFound { .. })));
    assert!(matches!(store.get_replica("nope"), Err(RouterError::GroupNotFound { .. })));
    assert!(!store.has_replica("nope"));
    assert!(matches!(
        store.mark_replica_down("nope", &ep("10.0.0.2:6379")),
        Err(RouterError::GroupNotFound { .. })
    ));
}

#[tokio::test]
async fn test_master_only_group() {
    let store = new_store(MockConnector::new());
    assert!(store.promote("g1", &ep("10.0.0.1:6379")));

    assert!(!store.has_replica("g1"));
    assert!(matches!(store.get_replica("g1"), Err(RouterError::NoReplicaAvailable { .. })));
    assert_eq!(store.get_master("g1").unwrap().endpoint(), &ep("10.0.0.1:6379"));
}

#[tokio::test]
async fn test_promote_is_idempotent() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;

    assert!(store.promote("g1", &ep("10.0.0.2:6379")));
    let master = store.get_master("g1").unwrap();
    let replicas = replica_set(&store, "g1");

    assert!(!store.promote("g1", &ep("10.0.0.2:6379")));
    assert!(Arc::ptr_eq(&master, &store.get_master("g1").unwrap()));
    assert_eq!(replicas, replica_set(&store, "g1"));
    assert!(!master.is_closed());
}

#[tokio::test]
async fn test_switch_master_to_replica() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;
    let old_master = store.get_master("g1").unwrap();
    let promoted = store
        .snapshot("g1")
        .unwrap()
        .replicas()
        .iter()
        .find(|p| p.endpoint() == &ep("10.0.0.2:6379"))
        .cloned()
        .unwrap();

    assert!(store.promote("g1", &ep("10.0.0.2:6379")));

    let master = store.get_master("g1").unwrap();
    assert_eq!(master.endpoint(), &ep("10.0.0.2:6379"));
    // The replica's pool is relabelled, not recreated
    assert!(Arc::ptr_eq(&master, &promoted));
    assert!(!master.is_closed());
    assert!(old_master.is_closed());
    assert_eq!(replica_set(&store, "g1"), HashSet::from(["10.0.0.3:6379".to_string()]));
    assert_master_not_replica(&store, "g1");
}

#[tokio::test]
async fn test_promote_unknown_endpoint_opens_new_pool() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;

    assert!(store.promote("g1", &ep("10.0.0.7:6379")));
    assert_eq!(store.get_master("g1").unwrap().endpoint(), &ep("10.0.0.7:6379"));
    assert_eq!(replica_set(&store, "g1").len(), 2);
}

#[tokio::test]
async fn test_replica_down_then_up() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;
    let down = ep("10.0.0.3:6379");
    let pool = store
        .snapshot("g1")
        .unwrap()
        .replicas()
        .iter()
        .find(|p| p.endpoint() == &down)
        .cloned()
        .unwrap();

    assert!(store.mark_replica_down("g1", &down).unwrap());
    assert!(pool.is_closed());
    for _ in 0..100 {
        assert_ne!(store.get_replica("g1").unwrap().endpoint(), &down);
    }
    // Duplicate delivery is a no-op
    assert!(!store.mark_replica_down("g1", &down).unwrap());

    // Back up, but still loading: only admitted once the probe answers
    connector.fail_probes(&down, 3);
    assert!(store.mark_replica_up("g1", &down).await.unwrap());
    assert!(replica_set(&store, "g1").contains("10.0.0.3:6379"));
    assert!(!store.mark_replica_up("g1", &down).await.unwrap());
}

#[tokio::test]
async fn test_evict_only_removes_the_current_pool() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;
    let replica = ep("10.0.0.3:6379");
    let replica_pool = |store: &TopologyStore<MockConnector>| {
        store
            .snapshot("g1")
            .unwrap()
            .replicas()
            .iter()
            .find(|p| p.endpoint() == &replica)
            .cloned()
            .unwrap()
    };
    let stale = replica_pool(&store);

    // The replica goes down and comes back with a new pool
    assert!(store.mark_replica_down("g1", &replica).unwrap());
    assert!(store.mark_replica_up("g1", &replica).await.unwrap());
    let fresh = replica_pool(&store);
    assert!(!Arc::ptr_eq(&stale, &fresh));

    assert!(!store.evict_replica("g1", &stale).unwrap());
    assert!(!fresh.is_closed());
    assert!(replica_set(&store, "g1").contains("10.0.0.3:6379"));

    assert!(store.evict_replica("g1", &fresh).unwrap());
    assert!(fresh.is_closed());
    assert!(!replica_set(&store, "g1").contains("10.0.0.3:6379"));
    assert!(!store.evict_replica("g1", &fresh).unwrap());
}

#[tokio::test]
async fn test_evict_ignores_promoted_replica() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;
    let promoted = ep("10.0.0.2:6379");
    let pool = store
        .snapshot("g1")
        .unwrap()
        .replicas()
        .iter()
        .find(|p| p.endpoint() == &promoted)
        .cloned()
        .unwrap();

    assert!(store.promote("g1", &promoted));
    assert!(!store.evict_replica("g1", &pool).unwrap());
    assert!(!pool.is_closed());
    assert!(Arc::ptr_eq(&store.get_master("g1").unwrap(), &pool));
}

#[tokio::test]
async fn test_warming_replica_is_not_routable() {
    let connector = MockConnector::new();
    let store = new_store(connector.clone());
    store.promote("g1", &ep("10.0.0.1:6379"));
    let replica = ep("10.0.0.2:6379");
    connector.set_unreachable(&replica, true);

    let task = {
        let store = store.clone();
        let replica = replica.clone();
        tokio::spawn(async move { store.mark_replica_up("g1", &replica).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!store.has_replica("g1"));
    // A second up event while warming is a duplicate
    assert!(!store.mark_replica_up("g1", &replica).await.unwrap());

    connector.set_unreachable(&replica, false);
    assert!(task.await.unwrap().unwrap());
    assert!(store.has_replica("g1"));
}

#[tokio::test]
async fn test_down_event_cancels_pending_warmup() {
    let connector = MockConnector::new();
    let store = new_store(connector.clone());
    store.promote("g1", &ep("10.0.0.1:6379"));
    let replica = ep("10.0.0.2:6379");
    connector.set_unreachable(&replica, true);

    let task = {
        let store = store.clone();
        let replica = replica.clone();
        tokio::spawn(async move { store.mark_replica_up("g1", &replica).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!store.mark_replica_down("g1", &replica).unwrap());
    connector.set_unreachable(&replica, false);

    assert!(!task.await.unwrap().unwrap());
    assert!(!store.has_replica("g1"));
}

#[tokio::test]
async fn test_up_event_for_master_is_ignored() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;

    assert!(!store.mark_replica_up("g1", &ep("10.0.0.1:6379")).await.unwrap());
    assert!(!store.mark_replica_down("g1", &ep("10.0.0.1:6379")).unwrap());
    assert_eq!(store.get_master("g1").unwrap().endpoint(), &ep("10.0.0.1:6379"));
    assert!(!store.get_master("g1").unwrap().is_closed());
    assert_master_not_replica(&store, "g1");
}

#[tokio::test]
async fn test_master_never_listed_as_replica() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;
    let nodes: Vec<_> = (1..=4).map(|i| ep(&format!("10.0.0.{i}:6379"))).collect();

    for step in 0..60usize {
        let node = &nodes[(step * 7 + step / 3) % nodes.len()];
        match step % 3 {
            0 => {
                store.promote("g1", node);
            }
            1 => {
                store.mark_replica_down("g1", node).unwrap();
            }
            _ => {
                store.mark_replica_up("g1", node).await.unwrap();
            }
        }
        assert_master_not_replica(&store, "g1");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_keep_master_out_of_replicas() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;
    let nodes: Arc<Vec<_>> = Arc::new((1..=4).map(|i| ep(&format!("10.0.0.{i}:6379"))).collect());

    // Two listeners racing on the same stream of events
    let mut tasks = Vec::new();
    for offset in 0..2usize {
        let store = store.clone();
        let nodes = nodes.clone();
        tasks.push(tokio::spawn(async move {
            for step in 0..200usize {
                let node = &nodes[(step + offset) % nodes.len()];
                match (step + offset) % 3 {
                    0 => {
                        store.promote("g1", node);
                    }
                    1 => {
                        store.mark_replica_down("g1", node).unwrap();
                    }
                    _ => {
                        store.mark_replica_up("g1", node).await.unwrap();
                    }
                }
            }
        }));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let checker = {
        let store = store.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.load(Ordering::Relaxed) {
                assert_master_not_replica(&store, "g1");
                tokio::task::yield_now().await;
            }
        })
    };

    for task in tasks {
        task.await.unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    checker.await.unwrap();
    assert_master_not_replica(&store, "g1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reader_never_sees_torn_master() {
    let store = new_store(MockConnector::new());
    let a = ep("10.0.0.1:6379");
    let b = ep("10.0.0.2:6379");
    store.promote("g1", &a);

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let store = store.clone();
        let done = done.clone();
        let (a, b) = (a.clone(), b.clone());
        tokio::spawn(async move {
            let mut reads = 0u64;
            while !done.load(Ordering::Acquire) {
                let snapshot = store.snapshot("g1").unwrap();
                let master = store.get_master("g1").unwrap();
                assert!(master.endpoint() == &a || master.endpoint() == &b);
                assert!(snapshot.master_endpoint() == &a || snapshot.master_endpoint() == &b);
                assert!(!snapshot.replica_endpoints().contains(snapshot.master_endpoint()));
                reads += 1;
                if reads % 64 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            reads
        })
    };

    for i in 0..1000 {
        let next = if i % 2 == 0 { &b } else { &a };
        assert!(store.promote("g1", next));
        if i % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }
    done.store(true, Ordering::Release);
    assert!(reader.await.unwrap() > 0);

    let final_master = store.get_master("g1").unwrap();
    assert_eq!(final_master.endpoint(), &a);
    assert!(!final_master.is_closed());
    assert!(!store.has_replica("g1"));
}

#[tokio::test]
async fn test_groups_are_independent() {
    let connector = MockConnector::new();
    let store = new_store(connector.clone());
    store.promote("g1", &ep("10.0.0.1:6379"));
    store.promote("g2", &ep("10.0.1.1:6379"));
    store.mark_replica_up("g2", &ep("10.0.1.2:6379")).await.unwrap();

    store.promote("g1", &ep("10.0.0.5:6379"));
    assert_eq!(store.get_master("g2").unwrap().endpoint(), &ep("10.0.1.1:6379"));
    assert!(store.has_replica("g2"));
    assert!(!store.has_replica("g1"));

    let mut groups = store.groups();
    groups.sort();
    assert_eq!(groups, vec!["g1", "g2"]);
}

#[tokio::test]
async fn test_shutdown_closes_pools_and_aborts_warmups() {
    let connector = MockConnector::new();
    let store = bootstrap_g1(&connector).await;
    let warming = ep("10.0.0.4:6379");
    connector.set_unreachable(&warming, true);
    let task = {
        let store = store.clone();
        let warming = warming.clone();
        tokio::spawn(async move { store.mark_replica_up("g1", &warming).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    store.shutdown();
    assert!(matches!(task.await.unwrap(), Err(RouterError::Shutdown)));
    let state = store.snapshot("g1").unwrap();
    assert!(state.master().is_closed());
    assert!(state.replicas().iter().all(|p| p.is_closed()));
}
