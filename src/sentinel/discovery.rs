// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use super::transport::SentinelTransport;
use crate::connection_pool::NodeConnector;
use crate::endpoint::Endpoint;
use crate::errors::{RouterError, RouterResult};
use crate::topology::TopologyStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Master and healthy replicas of one group, as answered by the first
/// sentinel that knew it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub sentinel: Endpoint,
    pub master: Endpoint,
    pub replicas: Vec<Endpoint>,
}

/// Asks each sentinel in turn until one answers for `group`.
///
/// Distinguishes "no sentinel reachable" from "reachable, but none monitors
/// the group": the first is a connectivity problem, the second a
/// configuration problem.
pub async fn discover_group<T>(transport: &T, sentinels: &[Endpoint], group: &str) -> RouterResult<Discovered>
where
    T: SentinelTransport + ?Sized,
{
    let mut sentinel_available = false;

    info!(group, "trying to find master from available sentinels");
    for sentinel in sentinels {
        match transport.query_group(sentinel, group).await {
            Ok(Some(monitored)) => {
                let replicas: Vec<Endpoint> = monitored
                    .replicas
                    .into_iter()
                    .filter(|r| r.is_healthy())
                    .map(|r| r.endpoint)
                    .filter(|ep| *ep != monitored.master)
                    .collect();
                info!(
                    group,
                    sentinel = %sentinel,
                    master = %monitored.master,
                    replicas = replicas.len(),
                    "found master"
                );
                return Ok(Discovered {
                    sentinel: sentinel.clone(),
                    master: monitored.master,
                    replicas,
                });
            }
            Ok(None) => {
                sentinel_available = true;
                warn!(group, sentinel = %sentinel, "sentinel does not monitor group");
            }
            Err(err) => {
                warn!(sentinel = %sentinel, error = %err, "cannot connect to sentinel, trying next one");
            }
        }
    }

    let group = group.to_string();
    if sentinel_available {
        Err(RouterError::GroupNotMonitored { group })
    } else {
        Err(RouterError::SentinelsUnreachable { group })
    }
}

/// Populates the store for every group: master first, then each replica
/// once it answers its liveness probe.
///
/// Waits up to `warmup_timeout` for replicas; warm-ups still running after
/// that keep going in the background and join the group when ready.
pub async fn bootstrap<C, T>(
    store: &Arc<TopologyStore<C>>,
    transport: &T,
    sentinels: &[Endpoint],
    groups: &[String],
    warmup_timeout: Duration,
) -> RouterResult<()>
where
    C: NodeConnector,
    T: SentinelTransport + ?Sized,
{
    let mut warmups = Vec::new();
    for group in groups {
        let discovered = discover_group(transport, sentinels, group).await?;
        store.promote(group, &discovered.master);

        for replica in discovered.replicas {
            let store = store.clone();
            let group = group.clone();
            warmups.push(tokio::spawn(async move {
                store.mark_replica_up(&group, &replica).await
            }));
        }
    }

    match tokio::time::timeout(warmup_timeout, futures::future::join_all(warmups)).await {
        Ok(results) => {
            for result in results {
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => warn!(error = %err, "replica warm-up failed"),
                    Err(err) => warn!(error = %err, "replica warm-up task panicked"),
                }
            }
        }
        Err(_) => {
            warn!(
                timeout_ms = warmup_timeout.as_millis() as u64,
                "replicas still warming up, continuing in background"
            );
        }
    }
    Ok(())
}
