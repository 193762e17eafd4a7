// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Sentinel notification payloads.
//!
//! Field positions are fixed by the Sentinel protocol:
//!
//! ```text
//! +switch-master  <group> <old-ip> <old-port> <new-ip> <new-port>
//! +sdown / -sdown <instance-type> <name> <ip> <port> @ <group> <master-ip> <master-port>
//! ```
//!
//! Down/up events for a master carry no `@ ...` suffix.

use crate::endpoint::Endpoint;
use thiserror::Error;

pub const SWITCH_MASTER: &str = "+switch-master";
pub const SUBJECTIVE_DOWN: &str = "+sdown";
pub const SUBJECTIVE_UP: &str = "-sdown";

pub const CHANNELS: [&str; 3] = [SWITCH_MASTER, SUBJECTIVE_DOWN, SUBJECTIVE_UP];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    SwitchMaster { group: String, new_master: Endpoint },
    ReplicaDown { group: String, replica: Endpoint },
    ReplicaUp { group: String, replica: Endpoint },
}

impl TopologyEvent {
    pub fn group(&self) -> &str {
        match self {
            TopologyEvent::SwitchMaster { group, .. }
            | TopologyEvent::ReplicaDown { group, .. }
            | TopologyEvent::ReplicaUp { group, .. } => group,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("unexpected channel `{0}`")]
    UnknownChannel(String),

    #[error("malformed `{channel}` payload `{payload}`: {reason}")]
    Malformed {
        channel: String,
        payload: String,
        reason: String,
    },
}

/// Parses one notification. `Ok(None)` means a well-formed event that does
/// not concern replica routing (a master or sentinel changing state).
pub fn parse_event(channel: &str, payload: &str) -> Result<Option<TopologyEvent>, EventParseError> {
    let fields: Vec<&str> = payload.split_whitespace().collect();
    let malformed = |reason: &str| EventParseError::Malformed {
        channel: channel.to_string(),
        payload: payload.to_string(),
        reason: reason.to_string(),
    };

    match channel {
        SWITCH_MASTER => {
            if fields.len() < 5 {
                return Err(malformed("expected 5 fields"));
            }
            let new_master =
                Endpoint::from_parts(fields[3], fields[4]).map_err(|e| malformed(&e.to_string()))?;
            Ok(Some(TopologyEvent::SwitchMaster {
                group: fields[0].to_string(),
                new_master,
            }))
        }
        SUBJECTIVE_DOWN | SUBJECTIVE_UP => {
            let Some(role) = fields.first() else {
                return Err(malformed("empty payload"));
            };
            match *role {
                "master" | "sentinel" => return Ok(None),
                "slave" | "replica" => {}
                other => return Err(malformed(&format!("unknown instance type `{other}`"))),
            }
            if fields.len() < 6 || fields[4] != "@" {
                return Err(malformed("expected `<type> <name> <ip> <port> @ <group> ...`"));
            }
            let replica =
                Endpoint::from_parts(fields[2], fields[3]).map_err(|e| malformed(&e.to_string()))?;
            let group = fields[5].to_string();
            if channel == SUBJECTIVE_DOWN {
                Ok(Some(TopologyEvent::ReplicaDown { group, replica }))
            } else {
                Ok(Some(TopologyEvent::ReplicaUp { group, replica }))
            }
        }
        other => Err(EventParseError::UnknownChannel(other.to_string())),
    }
}
