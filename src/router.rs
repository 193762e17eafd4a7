// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use crate::config::RouterConfig;
use crate::connection_pool::NodeConnector;
use crate::endpoint::Endpoint;
use crate::errors::{is_connection_error, RouterError, RouterResult};
use crate::shard::ShardRing;
use crate::topology::{PoolRef, TopologyStore};
use futures::future::BoxFuture;
use redis::RedisResult;
use std::sync::Arc;
use tracing::{debug, error, warn};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Client-facing entry point: picks a pool for every call, runs the caller's
/// operation on one of its connections and retries failures a bounded number
/// of times.
pub struct Router<C: NodeConnector> {
    store: Arc<TopologyStore<C>>,
    read_from_replica: bool,
    max_attempts: u32,
    readmit_evicted: bool,
    shards: Option<ShardRing>,
}

/// Pool picked for one attempt, and whether it was picked as a replica.
struct Target<C: NodeConnector> {
    pool: PoolRef<C>,
    replica: bool,
}

impl<C: NodeConnector> Router<C> {
    pub fn new(store: Arc<TopologyStore<C>>) -> Self {
        Self {
            store,
            read_from_replica: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            readmit_evicted: true,
            shards: None,
        }
    }

    /// Router with the routing knobs of `config` and a shard ring over its
    /// groups.
    pub fn from_config(store: Arc<TopologyStore<C>>, config: &RouterConfig) -> Self {
        let ring = ShardRing::new(config.groups.iter().map(|g| (g.name.clone(), g.weight)));
        Self::new(store)
            .with_read_from_replica(config.read_from_replica)
            .with_max_attempts(config.max_attempts)
            .with_readmit_evicted(config.readmit_evicted)
            .with_shards(ring)
    }

    pub fn with_read_from_replica(mut self, enabled: bool) -> Self {
        self.read_from_replica = enabled;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_readmit_evicted(mut self, enabled: bool) -> Self {
        self.readmit_evicted = enabled;
        self
    }

    pub fn with_shards(mut self, shards: ShardRing) -> Self {
        self.shards = Some(shards);
        self
    }

    pub fn store(&self) -> &Arc<TopologyStore<C>> {
        &self.store
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[doc(alias = "has_slave")]
    pub fn has_replica(&self, group: &str) -> bool {
        self.store.has_replica(group)
    }

    /// Group that owns `key` on the shard ring.
    pub fn group_for(&self, key: &[u8]) -> RouterResult<&str> {
        let shards = self
            .shards
            .as_ref()
            .ok_or_else(|| RouterError::Config("key routing needs a shard ring".into()))?;
        shards
            .group_for(key)
            .ok_or_else(|| RouterError::Config("shard ring has no groups".into()))
    }

    /// Runs `operation` against a connection of `group`.
    ///
    /// Read-only calls go to a random replica when replica reads are enabled
    /// and the group has one, to the master otherwise. Every failure consumes
    /// one attempt. A connection-level failure against a replica also evicts
    /// that replica from the group. Writes are retried like reads: the
    /// operation must be safe to run more than once.
    pub async fn execute<T, F>(&self, group: &str, read_only: bool, mut operation: F) -> RouterResult<T>
    where
        F: for<'a> FnMut(&'a mut C::Connection) -> BoxFuture<'a, RedisResult<T>> + Send,
        T: Send,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let target = self.select(group, read_only)?;

            let err = match target.pool.checkout().await {
                Ok(mut conn) => {
                    let result = operation(&mut *conn).await;
                    match result {
                        Ok(value) => return Ok(value),
                        Err(err) => {
                            if is_connection_error(&err) {
                                conn.mark_unhealthy();
                            }
                            err
                        }
                    }
                }
                Err(err) => err,
            };

            if target.replica && is_connection_error(&err) {
                self.evict(group, &target.pool);
            }

            if attempts >= self.max_attempts {
                error!(
                    group,
                    endpoint = %target.pool.endpoint(),
                    attempts,
                    error = %err,
                    "giving up on command"
                );
                return Err(RouterError::RetryExhausted {
                    group: group.to_string(),
                    attempts,
                    source: err,
                });
            }
            warn!(
                group,
                endpoint = %target.pool.endpoint(),
                attempt = attempts,
                read_only,
                error = %err,
                "command failed, retrying"
            );
        }
    }

    /// [`execute`](Router::execute) against the group owning `key`.
    pub async fn execute_keyed<T, F>(&self, key: &[u8], read_only: bool, operation: F) -> RouterResult<T>
    where
        F: for<'a> FnMut(&'a mut C::Connection) -> BoxFuture<'a, RedisResult<T>> + Send,
        T: Send,
    {
        let group = self.group_for(key)?;
        self.execute(group, read_only, operation).await
    }

    fn select(&self, group: &str, read_only: bool) -> RouterResult<Target<C>> {
        if read_only && self.read_from_replica {
            match self.store.get_replica(group) {
                Ok(pool) => return Ok(Target { pool, replica: true }),
                Err(RouterError::NoReplicaAvailable { .. }) => {
                    debug!(group, "no live replica, reading from master");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Target {
            pool: self.store.get_master(group)?,
            replica: false,
        })
    }

    // The monitoring nodes may take seconds to notice a dead replica; stop
    // routing to it now. Only the pool that failed is removed: the store
    // ignores it once it was promoted or replaced by a newer pool.
    fn evict(&self, group: &str, pool: &PoolRef<C>) {
        let endpoint = pool.endpoint();
        match self.store.evict_replica(group, pool) {
            Ok(true) => {
                warn!(group, replica = %endpoint, "evicted unreachable replica");
                if self.readmit_evicted {
                    self.readmit(group, endpoint);
                }
            }
            Ok(false) => {}
            Err(err) => debug!(group, replica = %endpoint, error = %err, "cannot evict replica"),
        }
    }

    fn readmit(&self, group: &str, endpoint: &Endpoint) {
        let store = self.store.clone();
        let group = group.to_string();
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            match store.mark_replica_up(&group, &endpoint).await {
                Ok(true) => debug!(group, replica = %endpoint, "re-admitted evicted replica"),
                Ok(false) => {}
                Err(err) => debug!(group, replica = %endpoint, error = %err, "stopped re-admitting replica"),
            }
        });
    }
}
