// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use crate::errors::RouterError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Host/port identity of one Redis node.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Deserialize)]
#[serde(try_from = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Builds an endpoint from separate host and port tokens, as found in
    /// Sentinel replies and notification payloads.
    pub fn from_parts(host: &str, port: &str) -> Result<Self, RouterError> {
        if host.is_empty() {
            return Err(RouterError::Config(format!("empty host for port `{port}`")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| RouterError::Config(format!("invalid port `{port}` for host {host}")))?;
        Ok(Self::new(host, port))
    }
}

impl FromStr for Endpoint {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| RouterError::Config(format!("expected host:port, got `{s}`")))?;
        Self::from_parts(host, port)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = RouterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
