// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use crate::config;
use crate::endpoint::Endpoint;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{
    Client as RedisClient, ConnectionAddr, ConnectionInfo, ErrorKind, RedisConnectionInfo, RedisError, RedisResult,
};
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

const POOL_EXHAUSTED: &str = "connection pool exhausted";
const POOL_CLOSED: &str = "connection pool closed";

/// Opens connections to a node and answers liveness probes on them.
///
/// The pool and the topology store only ever talk to nodes through this
/// trait, so the routing logic can be exercised without a live server.
#[async_trait]
pub trait NodeConnector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self, endpoint: &Endpoint) -> RedisResult<Self::Connection>;

    /// Trivial query used to decide that a replica finished loading and can
    /// take reads.
    async fn probe(&self, conn: &mut Self::Connection) -> RedisResult<()>;
}

/// Connector backed by `redis::Client`. Every endpoint gets the same
/// credentials: master and replicas of a group must share them.
#[derive(Clone, Debug, Default)]
pub struct RedisConnector {
    redis: RedisConnectionInfo,
}

impl RedisConnector {
    pub fn new(auth: &config::Auth) -> Self {
        Self {
            redis: RedisConnectionInfo {
                db: auth.db,
                username: auth.username.clone(),
                password: auth.password.clone(),
                ..Default::default()
            },
        }
    }

    pub fn connection_info(&self, endpoint: &Endpoint) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(endpoint.host().to_string(), endpoint.port()),
            redis: self.redis.clone(),
        }
    }
}

#[async_trait]
impl NodeConnector for RedisConnector {
    type Connection = MultiplexedConnection;

    async fn connect(&self, endpoint: &Endpoint) -> RedisResult<MultiplexedConnection> {
        let client = RedisClient::open(self.connection_info(endpoint))?;
        client.get_multiplexed_async_connection().await
    }

    async fn probe(&self, conn: &mut MultiplexedConnection) -> RedisResult<()> {
        let _: Option<String> = redis::cmd("RANDOMKEY").query_async(conn).await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_size: usize,
    pub checkout_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        config::Pool::default().into()
    }
}

impl From<config::Pool> for PoolConfig {
    fn from(pool: config::Pool) -> Self {
        Self {
            max_size: pool.max_size,
            checkout_timeout: pool.checkout_timeout,
            connect_timeout: pool.connect_timeout,
        }
    }
}

/// Bounded pool of connections to a single endpoint.
///
/// Connections are opened lazily. Closing the pool drains it: idle
/// connections are dropped at once, checked-out ones are dropped when they
/// come back instead of being reused.
pub struct NodePool<C: NodeConnector> {
    endpoint: Endpoint,
    connector: Arc<C>,
    config: PoolConfig,
    available: Mutex<Vec<C::Connection>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl<C: NodeConnector> NodePool<C> {
    pub fn new(endpoint: Endpoint, connector: Arc<C>, config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_size));
        Self {
            endpoint,
            connector,
            config,
            available: Mutex::new(Vec::new()),
            permits,
            closed: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.available.lock().len()
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.config
            .max_size
            .saturating_sub(self.permits.available_permits())
    }

    /// Checks out a connection, waiting up to the checkout timeout for a free
    /// slot. The connection goes back to the pool when the guard is dropped.
    ///
    /// A full or closed pool is reported as a client error, which says nothing
    /// about the node. Only a failed connect surfaces as an I/O error.
    pub async fn checkout(self: &Arc<Self>) -> RedisResult<PooledConnection<C>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let permit = match tokio::time::timeout(
            self.config.checkout_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.closed_error()),
            Err(_) => {
                return Err(RedisError::from((
                    ErrorKind::ClientError,
                    POOL_EXHAUSTED,
                    format!(
                        "no free connection to {} within {:?}",
                        self.endpoint, self.config.checkout_timeout
                    ),
                )))
            }
        };

        // Try to reuse an idle connection
        let reused = self.available.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.open().await?,
        };

        Ok(PooledConnection {
            pool: self.clone(),
            conn: Some(conn),
            healthy: true,
            _permit: permit,
        })
    }

    /// Checks out a connection and runs the connector's liveness probe on it.
    pub async fn probe(self: &Arc<Self>) -> RedisResult<()> {
        let mut conn = self.checkout().await?;
        let result = self.connector.probe(&mut *conn).await;
        if result.is_err() {
            conn.mark_unhealthy();
        }
        result
    }

    /// Stops handing out connections. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();
        let drained = std::mem::take(&mut *self.available.lock());
        let in_flight = self.config.max_size - self.permits.available_permits().min(self.config.max_size);
        info!(
            endpoint = %self.endpoint,
            idle = drained.len(),
            in_flight,
            "closed connection pool"
        );
    }

    async fn open(&self) -> RedisResult<C::Connection> {
        debug!(endpoint = %self.endpoint, "opening connection");
        match tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&self.endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out connecting to {}", self.endpoint),
            )
            .into()),
        }
    }

    fn release(&self, conn: C::Connection, healthy: bool) {
        let mut available = self.available.lock();
        if healthy && !self.is_closed() {
            available.push(conn);
        }
        // Unhealthy connections, and anything returned after close, are dropped
    }

    fn closed_error(&self) -> RedisError {
        RedisError::from((
            ErrorKind::ClientError,
            POOL_CLOSED,
            format!("pool for {} no longer hands out connections", self.endpoint),
        ))
    }
}

/// A checked-out connection. Returned to its pool on drop, on every exit path.
pub struct PooledConnection<C: NodeConnector> {
    pool: Arc<NodePool<C>>,
    conn: Option<C::Connection>,
    healthy: bool,
    _permit: OwnedSemaphorePermit,
}

impl<C: NodeConnector> PooledConnection<C> {
    pub fn endpoint(&self) -> &Endpoint {
        self.pool.endpoint()
    }

    /// The connection is discarded instead of being reused.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }
}

impl<C: NodeConnector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &C::Connection {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<C: NodeConnector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C::Connection {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<C: NodeConnector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.healthy);
        }
    }
}
