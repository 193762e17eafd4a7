// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use redis::RedisError;
use thiserror::Error;

pub type RouterResult<T> = Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("group `{group}` is not known to the topology store")]
    GroupNotFound { group: String },

    #[error("group `{group}` has no live replica")]
    NoReplicaAvailable { group: String },

    #[error("gave up on group `{group}` after {attempts} attempts: {source}")]
    RetryExhausted {
        group: String,
        attempts: u32,
        #[source]
        source: RedisError,
    },

    #[error("all sentinels down, cannot determine where the master of `{group}` is running")]
    SentinelsUnreachable { group: String },

    #[error("sentinels reachable, but `{group}` does not seem to be monitored")]
    GroupNotMonitored { group: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Redis(#[from] RedisError),

    #[error("router is shutting down")]
    Shutdown,
}

/// True when the error means the connection itself is unusable, as opposed to
/// the server rejecting the command.
pub fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}
