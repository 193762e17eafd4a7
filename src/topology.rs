// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! In-memory routing table: group name to live master/replica pools.
//!
//! Every group is published as an immutable [`GroupState`] snapshot behind an
//! `ArcSwap`. Readers load the snapshot without locking, so they always see a
//! complete (master, replicas) pair and never wait on a topology change.
//! Writers serialize per group on a small mutex, build the next snapshot and
//! swap it in, and only then close the pools that left the topology.

use crate::connection_pool::{NodeConnector, NodePool, PoolConfig};
use crate::endpoint::Endpoint;
use crate::errors::{RouterError, RouterResult};
use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type PoolRef<C> = Arc<NodePool<C>>;

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshot of one group. Never mutated once published.
pub struct GroupState<C: NodeConnector> {
    master: PoolRef<C>,
    replicas: Vec<PoolRef<C>>,
}

impl<C: NodeConnector> GroupState<C> {
    pub fn master(&self) -> &PoolRef<C> {
        &self.master
    }

    pub fn replicas(&self) -> &[PoolRef<C>] {
        &self.replicas
    }

    pub fn master_endpoint(&self) -> &Endpoint {
        self.master.endpoint()
    }

    pub fn replica_endpoints(&self) -> Vec<Endpoint> {
        self.replicas.iter().map(|p| p.endpoint().clone()).collect()
    }

    fn replica_index(&self, endpoint: &Endpoint) -> Option<usize> {
        self.replicas.iter().position(|p| p.endpoint() == endpoint)
    }

    fn pool_index(&self, pool: &PoolRef<C>) -> Option<usize> {
        self.replicas.iter().position(|p| Arc::ptr_eq(p, pool))
    }

    fn is_live(&self, endpoint: &Endpoint) -> bool {
        self.master.endpoint() == endpoint || self.replica_index(endpoint).is_some()
    }
}

/// Replicas currently warming up, keyed by endpoint. A ticket is invalidated
/// by any later down or promote event for the same endpoint.
#[derive(Default)]
struct PendingWarmups {
    tickets: HashMap<Endpoint, u64>,
    next_ticket: u64,
}

impl PendingWarmups {
    fn issue(&mut self, endpoint: Endpoint) -> u64 {
        self.next_ticket += 1;
        self.tickets.insert(endpoint, self.next_ticket);
        self.next_ticket
    }

    fn cancel(&mut self, endpoint: &Endpoint) -> bool {
        self.tickets.remove(endpoint).is_some()
    }

    fn is_pending(&self, endpoint: &Endpoint) -> bool {
        self.tickets.contains_key(endpoint)
    }

    fn is_current(&self, endpoint: &Endpoint, ticket: u64) -> bool {
        self.tickets.get(endpoint) == Some(&ticket)
    }
}

struct GroupSlot<C: NodeConnector> {
    state: ArcSwap<GroupState<C>>,
    // Serializes mutations of this group; never taken by readers.
    mutation: Mutex<PendingWarmups>,
}

/// Withdraws a warm-up ticket if `mark_replica_up` is dropped mid-probe, so
/// later up events for the endpoint are not mistaken for duplicates.
struct WarmupTicket<C: NodeConnector> {
    slot: Arc<GroupSlot<C>>,
    endpoint: Endpoint,
    ticket: u64,
    armed: bool,
}

impl<C: NodeConnector> Drop for WarmupTicket<C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut mutation = self.slot.mutation.lock();
        if mutation.is_current(&self.endpoint, self.ticket) {
            mutation.cancel(&self.endpoint);
        }
    }
}

pub struct TopologyStore<C: NodeConnector> {
    groups: DashMap<String, Arc<GroupSlot<C>>>,
    connector: Arc<C>,
    pool_config: PoolConfig,
    probe_interval: Duration,
    shutdown: CancellationToken,
}

impl<C: NodeConnector> TopologyStore<C> {
    pub fn new(connector: Arc<C>, pool_config: PoolConfig) -> Self {
        Self {
            groups: DashMap::new(),
            connector,
            pool_config,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            shutdown: CancellationToken::new(),
        }
    }

    /// Delay between two failed liveness probes of a warming replica.
    pub fn with_probe_interval(mut self, probe_interval: Duration) -> Self {
        self.probe_interval = probe_interval;
        self
    }

    /// Token whose cancellation aborts pending warm-ups.
    pub fn with_shutdown_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    pub fn groups(&self) -> Vec<String> {
        self.groups.iter().map(|e| e.key().clone()).collect()
    }

    /// Current snapshot of a group.
    pub fn snapshot(&self, group: &str) -> RouterResult<Arc<GroupState<C>>> {
        Ok(self.slot(group)?.state.load_full())
    }

    pub fn get_master(&self, group: &str) -> RouterResult<PoolRef<C>> {
        Ok(self.slot(group)?.state.load().master.clone())
    }

    /// Picks a live replica uniformly at random.
    pub fn get_replica(&self, group: &str) -> RouterResult<PoolRef<C>> {
        let slot = self.slot(group)?;
        let state = slot.state.load();
        if state.replicas.is_empty() {
            return Err(RouterError::NoReplicaAvailable {
                group: group.to_string(),
            });
        }
        let idx = rand::rng().random_range(0..state.replicas.len());
        Ok(state.replicas[idx].clone())
    }

    /// False for unknown groups as well as for master-only ones.
    pub fn has_replica(&self, group: &str) -> bool {
        self.slot(group)
            .map(|slot| !slot.state.load().replicas.is_empty())
            .unwrap_or(false)
    }

    /// Makes `new_master` the master of `group`, registering the group if it
    /// is new. A replica being promoted keeps its pool; the old master's pool
    /// is closed and the old master is not kept as a replica. Returns false
    /// when `new_master` already is the master.
    pub fn promote(&self, group: &str, new_master: &Endpoint) -> bool {
        let slot = match self.groups.entry(group.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let state = GroupState {
                    master: self.new_pool(new_master),
                    replicas: Vec::new(),
                };
                entry.insert(Arc::new(GroupSlot {
                    state: ArcSwap::from_pointee(state),
                    mutation: Mutex::new(PendingWarmups::default()),
                }));
                info!(group, master = %new_master, "registered group");
                return true;
            }
        };

        let mut mutation = slot.mutation.lock();
        mutation.cancel(new_master);

        let current = slot.state.load_full();
        if current.master_endpoint() == new_master {
            debug!(group, master = %new_master, "master unchanged");
            return false;
        }

        let mut replicas = current.replicas.clone();
        let master = match current.replica_index(new_master) {
            Some(idx) => replicas.remove(idx),
            None => self.new_pool(new_master),
        };
        slot.state.store(Arc::new(GroupState { master, replicas }));
        drop(mutation);

        current.master.close();
        info!(
            group,
            old_master = %current.master_endpoint(),
            new_master = %new_master,
            "switched master"
        );
        true
    }

    /// Removes a replica and closes its pool. Down notifications naming the
    /// master are ignored: master changes only arrive through [`promote`].
    ///
    /// [`promote`]: TopologyStore::promote
    pub fn mark_replica_down(&self, group: &str, endpoint: &Endpoint) -> RouterResult<bool> {
        let slot = self.slot(group)?;
        let mut mutation = slot.mutation.lock();
        if mutation.cancel(endpoint) {
            debug!(group, endpoint = %endpoint, "cancelled pending replica warm-up");
        }

        let current = slot.state.load_full();
        if current.master_endpoint() == endpoint {
            debug!(group, endpoint = %endpoint, "ignoring down event for the master");
            return Ok(false);
        }
        let Some(idx) = current.replica_index(endpoint) else {
            return Ok(false);
        };

        let mut replicas = current.replicas.clone();
        let removed = replicas.remove(idx);
        slot.state.store(Arc::new(GroupState {
            master: current.master.clone(),
            replicas,
        }));
        drop(mutation);

        removed.close();
        info!(group, replica = %endpoint, "removed replica");
        Ok(true)
    }

    /// Removes `pool` from the replicas of `group` and closes it, if it is
    /// still the pool serving that replica. A pool that was already replaced,
    /// for example by a down/up cycle of the same endpoint, is left alone
    /// together with its replacement.
    pub fn evict_replica(&self, group: &str, pool: &PoolRef<C>) -> RouterResult<bool> {
        let slot = self.slot(group)?;
        let mutation = slot.mutation.lock();
        let current = slot.state.load_full();
        let Some(idx) = current.pool_index(pool) else {
            debug!(group, replica = %pool.endpoint(), "replica pool already replaced");
            return Ok(false);
        };

        let mut replicas = current.replicas.clone();
        let removed = replicas.remove(idx);
        slot.state.store(Arc::new(GroupState {
            master: current.master.clone(),
            replicas,
        }));
        drop(mutation);

        removed.close();
        info!(group, replica = %pool.endpoint(), "evicted replica");
        Ok(true)
    }

    /// Adds a replica once it answers a liveness probe.
    ///
    /// Probing is retried until it succeeds, the warm-up is superseded by a
    /// later down/promote event for the same endpoint, or the store shuts
    /// down. No lock is held while probing.
    pub async fn mark_replica_up(&self, group: &str, endpoint: &Endpoint) -> RouterResult<bool> {
        let slot = self.slot(group)?;
        let ticket = {
            let mut mutation = slot.mutation.lock();
            if slot.state.load().is_live(endpoint) {
                debug!(group, endpoint = %endpoint, "endpoint already live");
                return Ok(false);
            }
            if mutation.is_pending(endpoint) {
                debug!(group, endpoint = %endpoint, "replica already warming up");
                return Ok(false);
            }
            mutation.issue(endpoint.clone())
        };

        let mut guard = WarmupTicket {
            slot: slot.clone(),
            endpoint: endpoint.clone(),
            ticket,
            armed: true,
        };
        let pool = self.new_pool(endpoint);
        debug!(group, replica = %endpoint, "warming up replica");
        let ready = self.warm_up(&slot, &pool, ticket).await;

        let mut mutation = slot.mutation.lock();
        guard.armed = false;
        let current_ticket = mutation.is_current(endpoint, ticket);
        if current_ticket {
            mutation.cancel(endpoint);
        }
        let current = slot.state.load_full();
        if !ready || !current_ticket || current.is_live(endpoint) {
            drop(mutation);
            pool.close();
            if self.shutdown.is_cancelled() {
                return Err(RouterError::Shutdown);
            }
            debug!(group, replica = %endpoint, "replica warm-up superseded");
            return Ok(false);
        }

        let mut replicas = current.replicas.clone();
        replicas.push(pool);
        slot.state.store(Arc::new(GroupState {
            master: current.master.clone(),
            replicas,
        }));
        drop(mutation);

        info!(group, replica = %endpoint, "added replica");
        Ok(true)
    }

    /// Aborts pending warm-ups and closes every pool. Snapshots stay in place
    /// so late callers get a pool error rather than a missing group.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.groups.iter() {
            let slot = entry.value();
            slot.mutation.lock().tickets.clear();
            let state = slot.state.load();
            state.master.close();
            for replica in &state.replicas {
                replica.close();
            }
        }
        info!(groups = self.groups.len(), "topology store shut down");
    }

    async fn warm_up(&self, slot: &GroupSlot<C>, pool: &PoolRef<C>, ticket: u64) -> bool {
        let mut attempt: u64 = 0;
        loop {
            let current = slot.mutation.lock().is_current(pool.endpoint(), ticket);
            if !current {
                return false;
            }

            let probe = tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                probe = pool.probe() => probe,
            };
            match probe {
                Ok(()) => return true,
                Err(err) => {
                    attempt += 1;
                    if attempt % 10 == 0 {
                        warn!(replica = %pool.endpoint(), attempt, error = %err, "replica still not answering probes");
                    } else {
                        debug!(replica = %pool.endpoint(), attempt, error = %err, "replica not ready");
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.probe_interval) => {}
            }
        }
    }

    fn slot(&self, group: &str) -> RouterResult<Arc<GroupSlot<C>>> {
        self.groups
            .get(group)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RouterError::GroupNotFound {
                group: group.to_string(),
            })
    }

    fn new_pool(&self, endpoint: &Endpoint) -> PoolRef<C> {
        Arc::new(NodePool::new(
            endpoint.clone(),
            self.connector.clone(),
            self.pool_config.clone(),
        ))
    }
}
