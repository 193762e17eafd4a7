// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Explicit owner of one router instance: the topology store, the router on
//! top of it and the listener tasks feeding it. Several contexts can live in
//! one process; each is torn down with [`RouterContext::shutdown`].

use crate::config::RouterConfig;
use crate::connection_pool::{NodeConnector, RedisConnector};
use crate::errors::RouterResult;
use crate::router::Router;
use crate::sentinel::{bootstrap, ListenerHandle, RedisSentinelTransport, SentinelTransport, TopologyListener};
use crate::topology::TopologyStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct RouterContext<C: NodeConnector> {
    store: Arc<TopologyStore<C>>,
    router: Router<C>,
    listeners: Vec<ListenerHandle>,
    shutdown: CancellationToken,
}

impl RouterContext<RedisConnector> {
    /// Connects to the deployment described by `config` using the redis
    /// client for both data nodes and monitoring nodes.
    pub async fn start(config: RouterConfig) -> RouterResult<Self> {
        let connector = Arc::new(RedisConnector::new(&config.auth));
        let transport = Arc::new(RedisSentinelTransport::new(
            config.sentinel.as_ref().and_then(|s| s.password.clone()),
            config.pool.connect_timeout,
        ));
        Self::start_with(config, connector, transport).await
    }
}

impl<C: NodeConnector> RouterContext<C> {
    /// Builds the store, populates it and, for sentinel deployments, starts
    /// one listener per monitoring node. Fails if any group cannot be
    /// discovered; nothing is left running in that case.
    pub async fn start_with<T: SentinelTransport>(
        config: RouterConfig,
        connector: Arc<C>,
        transport: Arc<T>,
    ) -> RouterResult<Self> {
        config.validate()?;
        let shutdown = CancellationToken::new();
        let mut store = TopologyStore::new(connector, config.pool.clone().into())
            .with_shutdown_token(shutdown.child_token());
        if let Some(sentinel) = &config.sentinel {
            store = store.with_probe_interval(sentinel.probe_interval);
        }
        let store = Arc::new(store);
        let router = Router::from_config(store.clone(), &config);
        let group_names = config.group_names();

        let listeners = match &config.sentinel {
            Some(sentinel) => {
                info!(
                    groups = ?group_names,
                    sentinels = sentinel.nodes.len(),
                    "bootstrapping from sentinels"
                );
                if let Err(err) = bootstrap(
                    &store,
                    transport.as_ref(),
                    &sentinel.nodes,
                    &group_names,
                    sentinel.warmup_timeout,
                )
                .await
                {
                    shutdown.cancel();
                    store.shutdown();
                    return Err(err);
                }

                let watched: Arc<HashSet<String>> = Arc::new(group_names.iter().cloned().collect());
                sentinel
                    .nodes
                    .iter()
                    .map(|node| {
                        TopologyListener::new(
                            node.clone(),
                            watched.clone(),
                            store.clone(),
                            transport.clone(),
                            sentinel.subscribe_retry_wait,
                        )
                        .spawn(&shutdown)
                    })
                    .collect()
            }
            None => {
                info!(groups = ?group_names, "starting with static topology");
                for group in &config.groups {
                    // validate() guarantees a master without a sentinel section
                    if let Some(master) = &group.master {
                        store.promote(&group.name, master);
                    }
                    for replica in &group.replicas {
                        let store = store.clone();
                        let name = group.name.clone();
                        let replica = replica.clone();
                        tokio::spawn(async move {
                            if let Err(err) = store.mark_replica_up(&name, &replica).await {
                                warn!(group = %name, replica = %replica, error = %err, "replica warm-up failed");
                            }
                        });
                    }
                }
                Vec::new()
            }
        };

        Ok(Self {
            store,
            router,
            listeners,
            shutdown,
        })
    }

    pub fn router(&self) -> &Router<C> {
        &self.router
    }

    pub fn store(&self) -> &Arc<TopologyStore<C>> {
        &self.store
    }

    pub fn listeners(&self) -> &[ListenerHandle] {
        &self.listeners
    }

    /// Stops every listener, waits for them to exit, then closes all pools.
    pub async fn shutdown(self) {
        info!(listeners = self.listeners.len(), "shutting down router context");
        self.shutdown.cancel();
        futures::future::join_all(self.listeners.into_iter().map(ListenerHandle::shutdown)).await;
        self.store.shutdown();
    }
}
