// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! In-process stand-ins for data nodes and monitoring nodes.

use crate::connection_pool::{NodeConnector, PoolConfig};
use crate::endpoint::Endpoint;
use crate::sentinel::{MonitoredGroup, Notification, NotificationStream, ReplicaInfo, SentinelTransport};
use crate::topology::TopologyStore;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::{ErrorKind, RedisError, RedisResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn io_error(kind: io::ErrorKind) -> RedisError {
    io::Error::new(kind, "mock connection failure").into()
}

pub fn ep(addr: &str) -> Endpoint {
    addr.parse().unwrap()
}

pub fn fast_pool_config() -> PoolConfig {
    PoolConfig {
        max_size: 4,
        checkout_timeout: Duration::from_millis(200),
        connect_timeout: Duration::from_millis(200),
    }
}

pub fn new_store(connector: Arc<MockConnector>) -> Arc<TopologyStore<MockConnector>> {
    Arc::new(TopologyStore::new(connector, fast_pool_config()).with_probe_interval(Duration::from_millis(10)))
}

/// Polls `cond` every few milliseconds for up to two seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[derive(Debug)]
pub struct MockConnection {
    pub endpoint: Endpoint,
    pub id: u64,
}

#[derive(Default)]
pub struct MockConnector {
    unreachable: Mutex<HashSet<Endpoint>>,
    probe_failures: Mutex<HashMap<Endpoint, usize>>,
    connects: Mutex<HashMap<Endpoint, usize>>,
    next_id: AtomicU64,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unreachable(&self, endpoint: &Endpoint, unreachable: bool) {
        let mut set = self.unreachable.lock();
        if unreachable {
            set.insert(endpoint.clone());
        } else {
            set.remove(endpoint);
        }
    }

    /// The next `count` probes against `endpoint` answer LOADING.
    pub fn fail_probes(&self, endpoint: &Endpoint, count: usize) {
        self.probe_failures.lock().insert(endpoint.clone(), count);
    }

    pub fn connect_count(&self, endpoint: &Endpoint) -> usize {
        self.connects.lock().get(endpoint).copied().unwrap_or(0)
    }

    fn is_unreachable(&self, endpoint: &Endpoint) -> bool {
        self.unreachable.lock().contains(endpoint)
    }
}

#[async_trait]
impl NodeConnector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, endpoint: &Endpoint) -> RedisResult<MockConnection> {
        *self.connects.lock().entry(endpoint.clone()).or_default() += 1;
        if self.is_unreachable(endpoint) {
            return Err(io_error(io::ErrorKind::ConnectionRefused));
        }
        Ok(MockConnection {
            endpoint: endpoint.clone(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    async fn probe(&self, conn: &mut MockConnection) -> RedisResult<()> {
        if self.is_unreachable(&conn.endpoint) {
            return Err(io_error(io::ErrorKind::ConnectionReset));
        }
        let mut failures = self.probe_failures.lock();
        match failures.get_mut(&conn.endpoint) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(RedisError::from((
                    ErrorKind::BusyLoadingError,
                    "LOADING Redis is loading the dataset in memory",
                )))
            }
            _ => Ok(()),
        }
    }
}

enum SentinelAnswer {
    Unreachable,
    Monitors(HashMap<String, MonitoredGroup>),
}

/// Scripted monitoring nodes. Each queued session is consumed by one
/// subscribe call; dropping its sender ends the session.
#[derive(Default)]
pub struct MockTransport {
    answers: Mutex<HashMap<Endpoint, SentinelAnswer>>,
    sessions: Mutex<HashMap<Endpoint, VecDeque<mpsc::UnboundedReceiver<Notification>>>>,
    subscribes: Mutex<HashMap<Endpoint, usize>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unreachable(&self, sentinel: &Endpoint) {
        self.answers
            .lock()
            .insert(sentinel.clone(), SentinelAnswer::Unreachable);
    }

    /// `sentinel` answers queries, knowing no group yet.
    pub fn reachable(&self, sentinel: &Endpoint) {
        self.answers
            .lock()
            .insert(sentinel.clone(), SentinelAnswer::Monitors(HashMap::new()));
    }

    pub fn monitor(&self, sentinel: &Endpoint, group: &str, master: &Endpoint, replicas: Vec<ReplicaInfo>) {
        let mut answers = self.answers.lock();
        let entry = answers
            .entry(sentinel.clone())
            .or_insert_with(|| SentinelAnswer::Monitors(HashMap::new()));
        if let SentinelAnswer::Unreachable = entry {
            *entry = SentinelAnswer::Monitors(HashMap::new());
        }
        if let SentinelAnswer::Monitors(groups) = entry {
            groups.insert(
                group.to_string(),
                MonitoredGroup {
                    master: master.clone(),
                    replicas,
                },
            );
        }
    }

    /// Queues one subscription session and returns its publisher side.
    pub fn session(&self, sentinel: &Endpoint) -> mpsc::UnboundedSender<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .lock()
            .entry(sentinel.clone())
            .or_default()
            .push_back(rx);
        tx
    }

    pub fn subscribe_count(&self, sentinel: &Endpoint) -> usize {
        self.subscribes.lock().get(sentinel).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SentinelTransport for MockTransport {
    async fn query_group(&self, sentinel: &Endpoint, group: &str) -> RedisResult<Option<MonitoredGroup>> {
        match self.answers.lock().get(sentinel) {
            Some(SentinelAnswer::Monitors(groups)) => Ok(groups.get(group).cloned()),
            Some(SentinelAnswer::Unreachable) | None => Err(io_error(io::ErrorKind::ConnectionRefused)),
        }
    }

    async fn subscribe(&self, sentinel: &Endpoint, _channels: &[&str]) -> RedisResult<NotificationStream> {
        *self.subscribes.lock().entry(sentinel.clone()).or_default() += 1;
        let session = self
            .sessions
            .lock()
            .get_mut(sentinel)
            .and_then(|queue| queue.pop_front());
        match session {
            Some(rx) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|notification| (notification, rx))
            })
            .boxed()),
            None => Err(io_error(io::ErrorKind::ConnectionRefused)),
        }
    }
}
