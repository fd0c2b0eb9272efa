// Copyright 2024 BlockSCM Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Network topology index
//!
//! Nodes live at the leaves of a slash-delimited hierarchy such as
//! `/dc1/rack7/node42`. The index answers "how far apart are these two
//! positions" and is read by every block-location request, so it is published
//! as an immutable snapshot and replaced wholesale (copy-on-write) whenever a
//! node joins, moves or is purged. In-flight readers keep the snapshot they
//! loaded.

use arc_swap::ArcSwap;
use hashbrown::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Separator between levels of a topology path
pub const PATH_SEPARATOR: char = '/';

/// Rack assigned to nodes with no resolvable location
pub const DEFAULT_RACK: &str = "/default-rack";

/// A validated, normalized topology path such as `/dc1/rack7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkLocation {
    path: String,
}

impl NetworkLocation {
    /// Parse a location string.
    ///
    /// Returns `None` for anything that is not an absolute path with at least
    /// one non-empty level: empty strings, relative paths, the bare root,
    /// empty levels (`/a//b`) and levels containing whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if !trimmed.starts_with(PATH_SEPARATOR) {
            return None;
        }

        let body = trimmed.trim_end_matches(PATH_SEPARATOR);
        if body.is_empty() {
            return None;
        }

        let valid = body[1..]
            .split(PATH_SEPARATOR)
            .all(|level| !level.is_empty() && level != "." && level != ".." && !level.contains(char::is_whitespace));

        valid.then(|| Self { path: body.to_string() })
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Levels of the path, outermost first
    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.path[1..].split(PATH_SEPARATOR)
    }

    /// Path levels of a leaf named `leaf` placed under this location
    pub fn leaf_path(&self, leaf: &str) -> Arc<[String]> {
        self.levels()
            .map(str::to_string)
            .chain(std::iter::once(leaf.to_string()))
            .collect()
    }

    /// Path levels of this location itself
    pub fn path(&self) -> Arc<[String]> {
        self.levels().map(str::to_string).collect()
    }
}

impl fmt::Display for NetworkLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Distance rank between two positions in the hierarchy.
///
/// 0 for the same position, 1 for siblings (same rack), 2 when the closest
/// common ancestor is one level further up (same datacenter, different rack),
/// and so on. Positions of different depth are measured from the deeper one.
pub fn distance(a: &[String], b: &[String]) -> u32 {
    let common = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    (a.len().max(b.len()) - common) as u32
}

/// Maps a host name or address to a rack path when a node does not declare one
pub trait TopologyResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

impl std::fmt::Debug for dyn TopologyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TopologyResolver")
    }
}

/// Resolver backed by a fixed host → rack table
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapping(mut self, host: impl Into<String>, rack: impl Into<String>) -> Self {
        self.table.insert(host.into(), rack.into());
        self
    }
}

impl TopologyResolver for StaticResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        self.table.get(name).cloned()
    }
}

/// Immutable view of the topology at one point in time
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    /// network name -> full path levels (rack levels followed by the name)
    leaves: HashMap<String, Arc<[String]>>,
    /// rack path -> number of leaves under it
    racks: HashMap<String, usize>,
}

impl TopologySnapshot {
    /// Path levels of the leaf registered under `network_name`
    pub fn path_of(&self, network_name: &str) -> Option<&Arc<[String]>> {
        self.leaves.get(network_name)
    }

    pub fn contains(&self, network_name: &str) -> bool {
        self.leaves.contains_key(network_name)
    }

    pub fn node_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn rack_count(&self) -> usize {
        self.racks.len()
    }

    /// Number of leaves under the rack `rack`
    pub fn nodes_in_rack(&self, rack: &str) -> usize {
        self.racks.get(rack).copied().unwrap_or(0)
    }

    /// Stable sort of positioned `items` by distance from `reader`.
    ///
    /// Items with equal distance keep their input order.
    pub fn sort_by_distance<T>(&self, reader: &[String], items: Vec<(T, Arc<[String]>)>) -> Vec<T> {
        let mut ranked: Vec<(u32, T)> = items
            .into_iter()
            .map(|(item, path)| (distance(reader, &path), item))
            .collect();
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, item)| item).collect()
    }

    fn insert(&mut self, network_name: &str, location: &NetworkLocation) {
        self.remove(network_name);
        self.leaves.insert(network_name.to_string(), location.leaf_path(network_name));
        *self.racks.entry(location.as_str().to_string()).or_insert(0) += 1;
    }

    fn remove(&mut self, network_name: &str) -> bool {
        let Some(path) = self.leaves.remove(network_name) else {
            return false;
        };

        let rack = rack_of(&path);
        if let Some(count) = self.racks.get_mut(&rack) {
            *count -= 1;
            if *count == 0 {
                self.racks.remove(&rack);
            }
        }
        true
    }
}

fn rack_of(path: &[String]) -> String {
    let levels = &path[..path.len().saturating_sub(1)];
    let mut rack = String::new();
    for level in levels {
        rack.push(PATH_SEPARATOR);
        rack.push_str(level);
    }
    rack
}

/// Copy-on-write topology index shared by the registry and the sorting path
#[derive(Debug)]
pub struct NetworkTopology {
    default_rack: NetworkLocation,
    current: ArcSwap<TopologySnapshot>,
}

impl NetworkTopology {
    /// Create an empty index. An invalid `default_rack` falls back to [`DEFAULT_RACK`].
    pub fn new(default_rack: &str) -> Self {
        let default_rack = NetworkLocation::parse(default_rack).unwrap_or_else(|| NetworkLocation {
            path: DEFAULT_RACK.to_string(),
        });

        Self {
            default_rack,
            current: ArcSwap::from_pointee(TopologySnapshot::default()),
        }
    }

    pub fn default_rack(&self) -> &NetworkLocation {
        &self.default_rack
    }

    /// The current snapshot; stays valid and unchanged for as long as it is held
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.current.load_full()
    }

    /// Place `network_name` under `location`, replacing any previous position
    pub fn add(&self, network_name: &str, location: &NetworkLocation) {
        self.current.rcu(|current| {
            let mut next = TopologySnapshot::clone(current);
            next.insert(network_name, location);
            next
        });
        debug!(network_name = %network_name, location = %location, "Topology leaf placed");
    }

    /// Remove `network_name`; returns false if it was not present
    pub fn remove(&self, network_name: &str) -> bool {
        if !self.current.load().contains(network_name) {
            return false;
        }

        self.current.rcu(|current| {
            let mut next = TopologySnapshot::clone(current);
            next.remove(network_name);
            next
        });
        debug!(network_name = %network_name, "Topology leaf removed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(path: &str) -> Vec<String> {
        path.trim_start_matches('/').split('/').map(str::to_string).collect()
    }

    #[test]
    fn test_location_parsing() {
        assert_eq!(NetworkLocation::parse("/rack1").unwrap().as_str(), "/rack1");
        assert_eq!(NetworkLocation::parse(" /dc1/rack2/ ").unwrap().as_str(), "/dc1/rack2");

        for bad in ["", "   ", "/", "//", "rack1", "/a//b", "/a/../b", "/rack 1"] {
            assert!(NetworkLocation::parse(bad).is_none(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_distance_ranks() {
        let a = levels("/dc1/rack1/n1");
        assert_eq!(distance(&a, &a), 0);
        assert_eq!(distance(&a, &levels("/dc1/rack1/n2")), 1);
        assert_eq!(distance(&a, &levels("/dc1/rack2/n3")), 2);
        assert_eq!(distance(&a, &levels("/dc2/rack9/n4")), 3);

        // A rack-level reader sees every node in its rack at distance 1
        assert_eq!(distance(&levels("/dc1/rack1"), &a), 1);
    }

    #[test]
    fn test_sort_is_stable_for_ties() {
        let topology = NetworkTopology::new(DEFAULT_RACK);
        let rack1 = NetworkLocation::parse("/rack1").unwrap();
        let rack2 = NetworkLocation::parse("/rack2").unwrap();
        topology.add("a", &rack2);
        topology.add("b", &rack1);
        topology.add("c", &rack2);
        topology.add("d", &rack1);

        let snapshot = topology.snapshot();
        let reader = snapshot.path_of("b").unwrap().clone();
        let items = ["a", "b", "c", "d"]
            .into_iter()
            .map(|name| (name, snapshot.path_of(name).unwrap().clone()))
            .collect();
        let sorted = snapshot.sort_by_distance(&reader, items);

        assert_eq!(sorted, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let topology = NetworkTopology::new(DEFAULT_RACK);
        let rack = NetworkLocation::parse("/rack1").unwrap();
        topology.add("n1", &rack);

        let before = topology.snapshot();
        topology.add("n2", &rack);
        assert!(topology.remove("n1"));

        assert_eq!(before.node_count(), 1);
        assert!(before.contains("n1"));

        let after = topology.snapshot();
        assert_eq!(after.node_count(), 1);
        assert!(after.contains("n2"));
        assert_eq!(after.nodes_in_rack("/rack1"), 1);
    }

    #[test]
    fn test_moving_a_leaf_updates_rack_counts() {
        let topology = NetworkTopology::new(DEFAULT_RACK);
        topology.add("n1", &NetworkLocation::parse("/rack1").unwrap());
        topology.add("n1", &NetworkLocation::parse("/rack2").unwrap());

        let snapshot = topology.snapshot();
        assert_eq!(snapshot.node_count(), 1);
        assert_eq!(snapshot.rack_count(), 1);
        assert_eq!(snapshot.nodes_in_rack("/rack2"), 1);
        assert!(!topology.remove("missing"));
    }

    #[test]
    fn test_invalid_default_rack_falls_back() {
        let topology = NetworkTopology::new("not-a-path");
        assert_eq!(topology.default_rack().as_str(), DEFAULT_RACK);
    }

    #[test]
    fn test_static_resolver() {
        let resolver = StaticResolver::new().with_mapping("dn1.example.com", "/dc1/rack3");
        assert_eq!(resolver.resolve("dn1.example.com").as_deref(), Some("/dc1/rack3"));
        assert_eq!(resolver.resolve("dn2.example.com"), None);
    }
}
