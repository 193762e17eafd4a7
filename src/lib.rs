// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Replica-aware connection routing for Redis deployments managed by Sentinel.
//!
//! The crate keeps an in-memory routing table of every logical group (one
//! master, zero or more replicas, one connection pool per live endpoint),
//! keeps it current from Sentinel notifications, and routes each command to
//! the right pool with bounded retry and read/write splitting.

pub mod commands;
pub mod config;
pub mod connection_pool;
pub mod context;
pub mod endpoint;
pub mod errors;
pub mod router;
pub mod sentinel;
pub mod shard;
pub mod topology;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod topology_tests;

pub use config::RouterConfig;
pub use connection_pool::{NodeConnector, NodePool, PoolConfig, PooledConnection, RedisConnector};
pub use context::RouterContext;
pub use endpoint::Endpoint;
pub use errors::{RouterError, RouterResult};
pub use router::Router;
pub use sentinel::{ListenerHandle, ListenerState, RedisSentinelTransport, SentinelTransport};
pub use topology::TopologyStore;
