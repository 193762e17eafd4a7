// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Ketama-style consistent hashing of keys onto groups.

use sha1_smol::Sha1;
use std::collections::BTreeMap;

/// Virtual nodes placed on the ring per unit of group weight.
pub const POINTS_PER_WEIGHT: u32 = 160;

#[derive(Debug, Clone)]
pub struct ShardRing {
    points: BTreeMap<u64, usize>,
    groups: Vec<String>,
}

impl ShardRing {
    /// Builds the ring from `(group, weight)` pairs. Groups with zero weight
    /// get no points and are never selected.
    pub fn new<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut points = BTreeMap::new();
        let mut names = Vec::new();
        for (idx, (name, weight)) in groups.into_iter().enumerate() {
            let name = name.into();
            for n in 0..POINTS_PER_WEIGHT * weight {
                let point = hash(format!("SHARD-{idx}-NODE-{n}").as_bytes());
                points.entry(point).or_insert(idx);
            }
            names.push(name);
        }
        Self {
            points,
            groups: names,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Group owning `key`: the first point at or after the key's hash,
    /// wrapping around to the start of the ring.
    pub fn group_for(&self, key: &[u8]) -> Option<&str> {
        let h = hash(key);
        let (_, idx) = self
            .points
            .range(h..)
            .next()
            .or_else(|| self.points.iter().next())?;
        Some(self.groups[*idx].as_str())
    }
}

fn hash(data: &[u8]) -> u64 {
    let digest = Sha1::from(data).digest().bytes();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
