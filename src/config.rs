// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use crate::endpoint::Endpoint;
use crate::errors::{RouterError, RouterResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Route read-only commands to replicas when the group has any.
    #[serde(default = "default_true")]
    pub read_from_replica: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Re-probe replicas evicted by the router so they can rejoin once healthy.
    #[serde(default = "default_true")]
    pub readmit_evicted: bool,
    #[serde(default)]
    pub pool: Pool,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub sentinel: Option<Sentinel>,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pool {
    #[serde(default = "default_pool_size")]
    pub max_size: usize,
    #[serde(default = "default_checkout_timeout", with = "duration")]
    pub checkout_timeout: Duration,
    #[serde(default = "default_connect_timeout", with = "duration")]
    pub connect_timeout: Duration,
}

impl Default for Pool {
    fn default() -> Self {
        Self {
            max_size: default_pool_size(),
            checkout_timeout: default_checkout_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Credentials shared by the master and every replica of every group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Auth {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sentinel {
    pub nodes: Vec<Endpoint>,
    #[serde(default = "default_subscribe_retry_wait", with = "duration")]
    pub subscribe_retry_wait: Duration,
    #[serde(default = "default_probe_interval", with = "duration")]
    pub probe_interval: Duration,
    #[serde(default = "default_warmup_timeout", with = "duration")]
    pub warmup_timeout: Duration,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Static deployments only; sentinel deployments discover the master.
    #[serde(default)]
    pub master: Option<Endpoint>,
    #[serde(default)]
    pub replicas: Vec<Endpoint>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: default_weight(),
            master: None,
            replicas: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_pool_size() -> usize {
    8
}

fn default_checkout_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_subscribe_retry_wait() -> Duration {
    Duration::from_millis(5000)
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_warmup_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_weight() -> u32 {
    1
}

impl RouterConfig {
    /// Config for the given groups with every other knob at its default.
    pub fn new(groups: Vec<Group>) -> Self {
        Self {
            read_from_replica: true,
            max_attempts: default_max_attempts(),
            readmit_evicted: true,
            pool: Pool::default(),
            auth: Auth::default(),
            sentinel: None,
            groups,
        }
    }

    pub fn from_toml_str(s: &str) -> RouterResult<Self> {
        let config: RouterConfig =
            toml::from_str(s).map_err(|e| RouterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> RouterResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> RouterResult<()> {
        if self.groups.is_empty() {
            return Err(RouterError::Config("at least one group is required".into()));
        }
        if self.max_attempts == 0 {
            return Err(RouterError::Config("max_attempts must be at least 1".into()));
        }
        if self.pool.max_size == 0 {
            return Err(RouterError::Config("pool.max_size must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            if !seen.insert(group.name.as_str()) {
                return Err(RouterError::Config(format!(
                    "group `{}` is configured twice",
                    group.name
                )));
            }
            if group.weight == 0 {
                return Err(RouterError::Config(format!(
                    "group `{}` has zero weight",
                    group.name
                )));
            }
            if self.sentinel.is_none() && group.master.is_none() {
                return Err(RouterError::Config(format!(
                    "group `{}` has no master and no sentinel section is configured",
                    group.name
                )));
            }
        }

        if let Some(sentinel) = &self.sentinel {
            if sentinel.nodes.is_empty() {
                return Err(RouterError::Config("sentinel.nodes must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name.clone()).collect()
    }
}

/// Durations written as `<n>ms`, `<n>s` or `<n>m`; a bare number is seconds.
mod duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let (digits, millis_per_unit) = if let Some(n) = text.strip_suffix("ms") {
            (n, 1)
        } else if let Some(n) = text.strip_suffix('s') {
            (n, 1_000)
        } else if let Some(n) = text.strip_suffix('m') {
            (n, 60_000)
        } else {
            (text, 1_000)
        };
        let value: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration `{text}`"))?;
        value
            .checked_mul(millis_per_unit)
            .map(Duration::from_millis)
            .ok_or_else(|| format!("duration `{text}` is out of range"))
    }
}
