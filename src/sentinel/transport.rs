// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use crate::endpoint::Endpoint;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::{Client as RedisClient, ConnectionAddr, ConnectionInfo, ErrorKind, RedisConnectionInfo, RedisError, RedisResult};
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tracing::warn;

/// One message read from a sentinel's pub/sub stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Ends when the subscription connection is lost.
pub type NotificationStream = BoxStream<'static, Notification>;

/// A replica as reported by `SENTINEL slaves`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaInfo {
    pub endpoint: Endpoint,
    pub flags: Vec<String>,
    pub s_down_time: u64,
}

impl ReplicaInfo {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            flags: vec!["slave".to_string()],
            s_down_time: 0,
        }
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let endpoint = Endpoint::from_parts(fields.get("ip")?, fields.get("port")?).ok()?;
        let flags = fields
            .get("flags")
            .map(|f| f.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        let s_down_time = fields
            .get("s-down-time")
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        Some(Self {
            endpoint,
            flags,
            s_down_time,
        })
    }

    /// Sentinel lists replicas it believes are down too; those are skipped.
    pub fn is_healthy(&self) -> bool {
        self.s_down_time == 0
            && !self
                .flags
                .iter()
                .any(|f| matches!(f.as_str(), "s_down" | "o_down" | "disconnected"))
    }
}

/// What one sentinel knows about a monitored group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredGroup {
    pub master: Endpoint,
    pub replicas: Vec<ReplicaInfo>,
}

/// Everything the router needs from a monitoring node.
#[async_trait]
pub trait SentinelTransport: Send + Sync + 'static {
    /// `Ok(None)` when the sentinel answered but does not monitor `group`.
    async fn query_group(&self, sentinel: &Endpoint, group: &str) -> RedisResult<Option<MonitoredGroup>>;

    async fn subscribe(&self, sentinel: &Endpoint, channels: &[&str]) -> RedisResult<NotificationStream>;
}

#[derive(Clone, Debug)]
pub struct RedisSentinelTransport {
    password: Option<String>,
    connect_timeout: Duration,
}

impl RedisSentinelTransport {
    pub fn new(password: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            password,
            connect_timeout,
        }
    }

    fn client(&self, sentinel: &Endpoint) -> RedisResult<RedisClient> {
        RedisClient::open(ConnectionInfo {
            addr: ConnectionAddr::Tcp(sentinel.host().to_string(), sentinel.port()),
            redis: RedisConnectionInfo {
                password: self.password.clone(),
                ..Default::default()
            },
        })
    }

    fn timed_out(sentinel: &Endpoint) -> RedisError {
        io::Error::new(
            io::ErrorKind::TimedOut,
            format!("timed out connecting to sentinel {sentinel}"),
        )
        .into()
    }
}

#[async_trait]
impl SentinelTransport for RedisSentinelTransport {
    async fn query_group(&self, sentinel: &Endpoint, group: &str) -> RedisResult<Option<MonitoredGroup>> {
        let client = self.client(sentinel)?;
        let mut conn = tokio::time::timeout(self.connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| Self::timed_out(sentinel))??;

        let addr: Option<Vec<String>> = redis::cmd("SENTINEL")
            .arg("get-master-addr-by-name")
            .arg(group)
            .query_async(&mut conn)
            .await?;
        let addr = match addr {
            Some(addr) if addr.len() == 2 => addr,
            _ => {
                warn!(sentinel = %sentinel, group, "cannot get master addr");
                return Ok(None);
            }
        };
        let master = Endpoint::from_parts(&addr[0], &addr[1]).map_err(|e| {
            RedisError::from((ErrorKind::ResponseError, "invalid master address", e.to_string()))
        })?;

        let entries: Vec<HashMap<String, String>> = redis::cmd("SENTINEL")
            .arg("slaves")
            .arg(group)
            .query_async(&mut conn)
            .await?;
        let replicas = entries.iter().filter_map(ReplicaInfo::from_fields).collect();

        Ok(Some(MonitoredGroup { master, replicas }))
    }

    async fn subscribe(&self, sentinel: &Endpoint, channels: &[&str]) -> RedisResult<NotificationStream> {
        let client = self.client(sentinel)?;
        let mut pubsub = tokio::time::timeout(self.connect_timeout, client.get_async_pubsub())
            .await
            .map_err(|_| Self::timed_out(sentinel))??;
        pubsub.subscribe(channels.to_vec()).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            Some(Notification::new(msg.get_channel_name(), payload))
        });
        Ok(stream.boxed())
    }
}
