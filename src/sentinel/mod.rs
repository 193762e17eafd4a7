// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Sentinel integration: startup discovery and one notification listener per
//! monitoring node.

pub mod discovery;
pub mod event;
pub mod listener;
pub mod transport;


pub use discovery::{bootstrap, discover_group, Discovered};
pub use event::{parse_event, TopologyEvent};
pub use listener::{ListenerHandle, ListenerState, TopologyListener};
pub use transport::{MonitoredGroup, Notification, NotificationStream, RedisSentinelTransport, ReplicaInfo, SentinelTransport};
