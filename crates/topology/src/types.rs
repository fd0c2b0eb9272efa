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

//! Core data types for the node registry

use blockscm_common::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RegistryError;

/// Health and administrative state of a storage node.
///
/// The first four variants are driven by heartbeat timing. The remaining four
/// are entered only through explicit administrative commands and are never
/// touched by the liveness timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Heartbeating within the stale interval
    Healthy,

    /// Heartbeating, but running a metadata layout older than the cluster's.
    /// Serves reads, not eligible for new writes until finalized.
    HealthyReadonly,

    /// No heartbeat for at least the stale interval
    Stale,

    /// No heartbeat for at least the dead interval
    Dead,

    /// Replicas are being drained off the node
    Decommissioning,

    /// Drained; may be purged from the registry
    Decommissioned,

    /// Preparing to go down for maintenance
    EnteringMaintenance,

    /// Down for maintenance; replicas are kept
    InMaintenance,
}

/// Input to the node state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStateEvent {
    /// A heartbeat or re-registration arrived
    Heartbeat { readonly: bool },
    /// The stale interval elapsed without a heartbeat
    StaleTimeout,
    /// The dead interval elapsed without a heartbeat
    DeadTimeout,
    StartDecommission,
    CompleteDecommission,
    /// Return a decommissioning or decommissioned node to service in `resume`
    Recommission { resume: NodeState },
    StartMaintenance,
    CompleteMaintenance,
    /// Return a node in maintenance to service in `resume`
    EndMaintenance { resume: NodeState },
}

impl NodeState {
    /// Returns true if the node may be handed to clients for placement or reads
    #[inline]
    pub fn is_placement_eligible(&self) -> bool {
        matches!(self, NodeState::Healthy | NodeState::HealthyReadonly)
    }

    /// Returns true for the heartbeat-driven states
    #[inline]
    pub fn is_liveness(&self) -> bool {
        matches!(
            self,
            NodeState::Healthy | NodeState::HealthyReadonly | NodeState::Stale | NodeState::Dead
        )
    }

    /// Returns true for the states owned by administrative commands
    #[inline]
    pub fn is_administrative(&self) -> bool {
        !self.is_liveness()
    }

    /// Apply `event` to this state.
    ///
    /// Returns `None` when the move is not allowed from the current state.
    /// Repeating the event that led into the current state is a no-op and
    /// returns the current state.
    pub fn transition(self, event: NodeStateEvent) -> Option<NodeState> {
        use NodeState::*;
        use NodeStateEvent as E;

        match (self, event) {
            (Healthy | HealthyReadonly | Stale | Dead, E::Heartbeat { readonly }) => {
                Some(if readonly { HealthyReadonly } else { Healthy })
            }
            // Administrative states only refresh the heartbeat timestamp
            (state, E::Heartbeat { .. }) => Some(state),

            (Healthy | HealthyReadonly | Stale, E::StaleTimeout) => Some(Stale),
            (Healthy | HealthyReadonly | Stale | Dead, E::DeadTimeout) => Some(Dead),

            (Healthy | HealthyReadonly | Stale | Dead | Decommissioning, E::StartDecommission) => {
                Some(Decommissioning)
            }
            (Decommissioning | Decommissioned, E::CompleteDecommission) => Some(Decommissioned),
            (Decommissioning | Decommissioned, E::Recommission { resume }) if resume.is_liveness() => Some(resume),

            (Healthy | HealthyReadonly | Stale | Dead | EnteringMaintenance, E::StartMaintenance) => {
                Some(EnteringMaintenance)
            }
            (EnteringMaintenance | InMaintenance, E::CompleteMaintenance) => Some(InMaintenance),
            (EnteringMaintenance | InMaintenance, E::EndMaintenance { resume }) if resume.is_liveness() => Some(resume),

            _ => None,
        }
    }
}

/// A named port a node listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePort {
    pub name: String,
    pub port: u16,
}

impl NodePort {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self { name: name.into(), port }
    }
}

/// Identity and addressing a node declares when it registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDetails {
    pub id: NodeId,
    pub hostname: String,
    pub ip_address: String,
    /// Name used by clients to refer to the node; defaults to the id
    pub network_name: Option<String>,
    /// Declared slash-delimited rack path, e.g. `/dc1/rack7`
    pub network_location: Option<String>,
    pub ports: Vec<NodePort>,
}

impl NodeDetails {
    /// Details with only an identity and addresses; name and location are resolved by the registry
    pub fn new(id: NodeId, hostname: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            ip_address: ip_address.into(),
            network_name: None,
            network_location: None,
            ports: Vec::new(),
        }
    }

    pub fn with_network_name(mut self, name: impl Into<String>) -> Self {
        self.network_name = Some(name.into());
        self
    }

    pub fn with_network_location(mut self, location: impl Into<String>) -> Self {
        self.network_location = Some(location.into());
        self
    }

    pub fn with_port(mut self, name: impl Into<String>, port: u16) -> Self {
        self.ports.push(NodePort::new(name, port));
        self
    }

    /// The network name the node will be known by
    pub fn effective_network_name(&self) -> String {
        match self.network_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.id.to_string(),
        }
    }
}

/// Capacity counters reported by a node; opaque to the control plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub remaining_bytes: u64,
    pub container_count: u64,
}

/// Layout versions a node reports about its own persisted metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutReport {
    pub metadata_layout_version: u32,
    pub software_layout_version: u32,
}

/// Payload of a heartbeat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatInfo {
    pub usage: Option<NodeUsage>,
    pub layout: Option<LayoutReport>,
}

impl HeartbeatInfo {
    pub fn with_usage(mut self, usage: NodeUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_layout(mut self, metadata_layout_version: u32, software_layout_version: u32) -> Self {
        self.layout = Some(LayoutReport {
            metadata_layout_version,
            software_layout_version,
        });
        self
    }
}

/// Everything the registry knows about one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub network_name: String,
    pub hostname: String,
    pub ip_address: String,
    pub ports: Vec<NodePort>,

    /// Resolved rack path; never empty
    pub network_location: String,

    pub state: NodeState,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub usage: NodeUsage,
    pub layout: Option<LayoutReport>,
}

impl NodeRecord {
    /// Full topology path of the node: its rack path followed by its network name
    pub fn network_path(&self) -> String {
        format!("{}/{}", self.network_location.trim_end_matches('/'), self.network_name)
    }

    /// Time since the last heartbeat as seen at `now`
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or(Duration::ZERO)
    }
}

/// State change published by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub node_id: NodeId,
    /// `None` on first registration
    pub previous: Option<NodeState>,
    pub current: NodeState,
}

impl NodeEvent {
    /// True for a first-time registration
    pub fn is_registration(&self) -> bool {
        self.previous.is_none()
    }
}

/// Configuration for the registry and its background services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Seconds without a heartbeat before a node is marked stale
    pub stale_node_interval_secs: u64,

    /// Seconds without a heartbeat before a node is marked dead
    pub dead_node_interval_secs: u64,

    /// Interval of the liveness sweep
    pub health_check_interval_secs: u64,

    /// Rack assigned to nodes whose location cannot be resolved
    pub default_rack: String,

    /// Interval of the metrics collector
    pub metrics_interval_secs: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            stale_node_interval_secs: 300,
            dead_node_interval_secs: 600,
            health_check_interval_secs: 3,
            default_rack: String::from("/default-rack"),
            metrics_interval_secs: 15,
        }
    }
}

impl TopologyConfig {
    pub fn stale_interval(&self) -> Duration {
        Duration::from_secs(self.stale_node_interval_secs)
    }

    pub fn dead_interval(&self) -> Duration {
        Duration::from_secs(self.dead_node_interval_secs)
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.stale_node_interval_secs == 0 {
            return Err(RegistryError::InvalidConfig {
                reason: "stale_node_interval_secs must be positive".to_string(),
            });
        }
        if self.dead_node_interval_secs <= self.stale_node_interval_secs {
            return Err(RegistryError::InvalidConfig {
                reason: format!(
                    "dead_node_interval_secs ({}) must exceed stale_node_interval_secs ({})",
                    self.dead_node_interval_secs, self.stale_node_interval_secs
                ),
            });
        }
        if self.health_check_interval_secs == 0 {
            return Err(RegistryError::InvalidConfig {
                reason: "health_check_interval_secs must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Cluster-wide node statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub healthy_readonly_nodes: usize,
    pub stale_nodes: usize,
    pub dead_nodes: usize,
    pub decommissioning_nodes: usize,
    pub decommissioned_nodes: usize,
    pub maintenance_nodes: usize,

    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub remaining_bytes: u64,
}

impl ClusterStats {
    /// Nodes that may be handed to clients
    pub fn eligible_nodes(&self) -> usize {
        self.healthy_nodes + self.healthy_readonly_nodes
    }

    pub(crate) fn record(&mut self, record: &NodeRecord) {
        self.total_nodes += 1;
        match record.state {
            NodeState::Healthy => self.healthy_nodes += 1,
            NodeState::HealthyReadonly => self.healthy_readonly_nodes += 1,
            NodeState::Stale => self.stale_nodes += 1,
            NodeState::Dead => self.dead_nodes += 1,
            NodeState::Decommissioning => self.decommissioning_nodes += 1,
            NodeState::Decommissioned => self.decommissioned_nodes += 1,
            NodeState::EnteringMaintenance | NodeState::InMaintenance => self.maintenance_nodes += 1,
        }
        self.capacity_bytes = self.capacity_bytes.saturating_add(record.usage.capacity_bytes);
        self.used_bytes = self.used_bytes.saturating_add(record.usage.used_bytes);
        self.remaining_bytes = self.remaining_bytes.saturating_add(record.usage.remaining_bytes);
    }
}
