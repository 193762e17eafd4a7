// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Typed helpers for the handful of key commands applications reach for most.
//! Everything else goes through [`Router::execute`] with a hand-built
//! [`redis::Cmd`].

use crate::connection_pool::RedisConnector;
use crate::errors::RouterResult;
use crate::router::Router;
use futures::FutureExt;
use redis::{Cmd, FromRedisValue, ToRedisArgs};

impl Router<RedisConnector> {
    /// Runs a prepared command on the group owning `key`.
    pub async fn query_keyed<T>(&self, key: &[u8], read_only: bool, cmd: &Cmd) -> RouterResult<T>
    where
        T: FromRedisValue + Send,
    {
        self.execute_keyed(key, read_only, |conn| {
            let cmd = cmd.clone();
            async move { cmd.query_async(conn).await }.boxed()
        })
        .await
    }

    pub async fn get<K, V>(&self, key: K) -> RouterResult<V>
    where
        K: ToRedisArgs + AsRef<[u8]> + Send + Sync,
        V: FromRedisValue + Send,
    {
        let cmd = redis::cmd("GET").arg(&key).to_owned();
        self.query_keyed(key.as_ref(), true, &cmd).await
    }

    pub async fn exists<K>(&self, key: K) -> RouterResult<bool>
    where
        K: ToRedisArgs + AsRef<[u8]> + Send + Sync,
    {
        let cmd = redis::cmd("EXISTS").arg(&key).to_owned();
        self.query_keyed(key.as_ref(), true, &cmd).await
    }

    /// Remaining time to live in seconds; -1 without expiry, -2 when missing.
    pub async fn ttl<K>(&self, key: K) -> RouterResult<i64>
    where
        K: ToRedisArgs + AsRef<[u8]> + Send + Sync,
    {
        let cmd = redis::cmd("TTL").arg(&key).to_owned();
        self.query_keyed(key.as_ref(), true, &cmd).await
    }

    pub async fn set<K, V>(&self, key: K, value: V) -> RouterResult<()>
    where
        K: ToRedisArgs + AsRef<[u8]> + Send + Sync,
        V: ToRedisArgs + Send + Sync,
    {
        let cmd = redis::cmd("SET").arg(&key).arg(value).to_owned();
        self.query_keyed(key.as_ref(), false, &cmd).await
    }

    /// Returns the number of keys removed.
    pub async fn del<K>(&self, key: K) -> RouterResult<u64>
    where
        K: ToRedisArgs + AsRef<[u8]> + Send + Sync,
    {
        let cmd = redis::cmd("DEL").arg(&key).to_owned();
        self.query_keyed(key.as_ref(), false, &cmd).await
    }

    /// False when the key does not exist.
    pub async fn expire<K>(&self, key: K, seconds: i64) -> RouterResult<bool>
    where
        K: ToRedisArgs + AsRef<[u8]> + Send + Sync,
    {
        let cmd = redis::cmd("EXPIRE").arg(&key).arg(seconds).to_owned();
        self.query_keyed(key.as_ref(), false, &cmd).await
    }
}
