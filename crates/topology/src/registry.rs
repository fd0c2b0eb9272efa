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

//! NodeRegistry implementation - authoritative node membership and health

use crate::error::RegistryError;
use crate::network::{NetworkLocation, NetworkTopology, TopologyResolver};
use crate::types::*;
use blockscm_common::NodeId;
use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Outcome of one liveness sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub checked: usize,
    pub marked_stale: usize,
    pub marked_dead: usize,
}

#[derive(Debug, Default)]
struct NodeTable {
    by_id: HashMap<NodeId, Arc<RwLock<NodeRecord>>>,
    by_name: HashMap<String, NodeId>,
}

/// Registry of every storage node the control plane knows about.
///
/// The table lock is only held to look up or insert per-node handles; each
/// record has its own lock, so heartbeats for different nodes never wait on
/// each other and readers always see a fully written record.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    config: TopologyConfig,

    /// Metadata layout version of the control plane; nodes reporting an older
    /// one are marked readonly
    layout_version: Option<u32>,

    resolver: Option<Arc<dyn TopologyResolver>>,

    nodes: Arc<RwLock<NodeTable>>,

    topology: Arc<NetworkTopology>,

    /// Cached statistics, recomputed on every state change
    stats: Arc<RwLock<ClusterStats>>,

    events: broadcast::Sender<NodeEvent>,
}

impl NodeRegistry {
    /// Create an empty registry
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use blockscm_topology::{NodeRegistry, TopologyConfig};
    ///
    /// # fn main() -> Result<(), blockscm_topology::RegistryError> {
    /// let registry = NodeRegistry::new(TopologyConfig::default())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: TopologyConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        info!(
            stale_secs = config.stale_node_interval_secs,
            dead_secs = config.dead_node_interval_secs,
            default_rack = %config.default_rack,
            "Initializing NodeRegistry"
        );

        let topology = Arc::new(NetworkTopology::new(&config.default_rack));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            layout_version: None,
            resolver: None,
            nodes: Arc::new(RwLock::new(NodeTable::default())),
            topology,
            stats: Arc::new(RwLock::new(ClusterStats::default())),
            events,
        })
    }

    /// Use `resolver` for nodes that register without a usable location
    pub fn with_resolver(mut self, resolver: Arc<dyn TopologyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Compare reported node layouts against `metadata_layout_version`
    pub fn with_layout_version(mut self, metadata_layout_version: u32) -> Self {
        self.layout_version = Some(metadata_layout_version);
        self
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// The topology index populated by this registry
    pub fn topology(&self) -> &Arc<NetworkTopology> {
        &self.topology
    }

    /// Receive every node state change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Register a node, or refresh it if its identity is already known.
    ///
    /// Returns the resulting record. A state-change event is published on
    /// first registration and when a dead node comes back.
    pub async fn register(&self, details: NodeDetails, usage: Option<NodeUsage>) -> Result<NodeRecord, RegistryError> {
        self.register_at(details, usage, Utc::now()).await
    }

    pub async fn register_at(
        &self,
        details: NodeDetails,
        usage: Option<NodeUsage>,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, RegistryError> {
        let network_name = details.effective_network_name();
        let location = self.resolve_location(&details);

        let mut table = self.nodes.write().await;

        if let Some(owner) = table.by_name.get(&network_name)
            && *owner != details.id
        {
            warn!(node_id = %details.id, network_name = %network_name, existing = %owner, "Network name already taken");
            return Err(RegistryError::NetworkNameConflict {
                name: network_name,
                existing: *owner,
            });
        }

        let (snapshot, event) = match table.by_id.get(&details.id).cloned() {
            Some(handle) => {
                let mut record = handle.write().await;
                let previous = record.state;

                if record.network_name != network_name {
                    table.by_name.remove(&record.network_name);
                    self.topology.remove(&record.network_name);
                    table.by_name.insert(network_name.clone(), details.id);
                }
                if record.network_name != network_name || record.network_location != location.as_str() {
                    self.topology.add(&network_name, &location);
                }

                record.network_name = network_name;
                record.hostname = details.hostname;
                record.ip_address = details.ip_address;
                record.ports = details.ports;
                record.network_location = location.to_string();
                record.last_heartbeat = now;
                if let Some(usage) = usage {
                    record.usage = usage;
                }

                let readonly = self.is_readonly(record.layout.as_ref());
                if let Some(next) = previous.transition(NodeStateEvent::Heartbeat { readonly }) {
                    record.state = next;
                }

                debug!(node_id = %record.id, state = ?record.state, "Node re-registered");
                let event = (previous == NodeState::Dead && record.state != previous).then(|| NodeEvent {
                    node_id: record.id,
                    previous: Some(previous),
                    current: record.state,
                });
                (record.clone(), event)
            }
            None => {
                let record = NodeRecord {
                    id: details.id,
                    network_name: network_name.clone(),
                    hostname: details.hostname,
                    ip_address: details.ip_address,
                    ports: details.ports,
                    network_location: location.to_string(),
                    state: NodeState::Healthy,
                    last_heartbeat: now,
                    registered_at: now,
                    usage: usage.unwrap_or_default(),
                    layout: None,
                };

                info!(
                    node_id = %record.id,
                    network_name = %record.network_name,
                    location = %record.network_location,
                    "Registering new node"
                );
                self.topology.add(&network_name, &location);
                table.by_name.insert(network_name, record.id);
                table.by_id.insert(record.id, Arc::new(RwLock::new(record.clone())));

                let event = NodeEvent {
                    node_id: record.id,
                    previous: None,
                    current: record.state,
                };
                (record, Some(event))
            }
        };
        drop(table);

        if let Some(event) = event {
            self.publish(event);
        }
        self.update_cluster_stats().await;
        Ok(snapshot)
    }

    /// Record a heartbeat. Heartbeats from unknown nodes are ignored.
    pub async fn heartbeat(&self, node_id: &NodeId, info: HeartbeatInfo) {
        self.heartbeat_at(node_id, info, Utc::now()).await
    }

    pub async fn heartbeat_at(&self, node_id: &NodeId, info: HeartbeatInfo, now: DateTime<Utc>) {
        let Some(handle) = self.node_handle(node_id).await else {
            debug!(node_id = %node_id, "Ignoring heartbeat from unregistered node");
            return;
        };

        let mut record = handle.write().await;
        record.last_heartbeat = now;
        let mut usage_changed = false;
        if let Some(usage) = info.usage
            && usage != record.usage
        {
            record.usage = usage;
            usage_changed = true;
        }
        if info.layout.is_some() {
            record.layout = info.layout;
        }

        let previous = record.state;
        let readonly = self.is_readonly(record.layout.as_ref());
        let changed = Self::apply_transition(&mut record, NodeStateEvent::Heartbeat { readonly });
        drop(record);

        let state_changed = changed.is_some();
        if let Some(current) = changed {
            self.publish(NodeEvent {
                node_id: *node_id,
                previous: Some(previous),
                current,
            });
        }
        if state_changed || usage_changed {
            self.update_cluster_stats().await;
        }
    }

    /// Move nodes whose heartbeats stopped to STALE or DEAD, as seen at `now`
    pub async fn check_liveness(&self, now: DateTime<Utc>) -> LivenessReport {
        let stale_after = self.config.stale_interval();
        let dead_after = self.config.dead_interval();
        let mut report = LivenessReport::default();

        for handle in self.all_handles().await {
            let mut record = handle.write().await;
            report.checked += 1;

            let age = record.heartbeat_age(now);
            let event = if age >= dead_after {
                NodeStateEvent::DeadTimeout
            } else if age >= stale_after {
                NodeStateEvent::StaleTimeout
            } else {
                continue;
            };

            let previous = record.state;
            if let Some(current) = Self::apply_transition(&mut record, event) {
                match current {
                    NodeState::Stale => report.marked_stale += 1,
                    NodeState::Dead => report.marked_dead += 1,
                    _ => {}
                }
                let node_id = record.id;
                drop(record);
                self.publish(NodeEvent {
                    node_id,
                    previous: Some(previous),
                    current,
                });
            }
        }

        if report.marked_stale > 0 || report.marked_dead > 0 {
            info!(
                stale = report.marked_stale,
                dead = report.marked_dead,
                "Liveness sweep changed node states"
            );
            self.update_cluster_stats().await;
        }

        report
    }

    /// Begin draining a node
    pub async fn start_decommission(&self, node_id: &NodeId) -> Result<NodeState, RegistryError> {
        self.apply_admin(node_id, |_| NodeStateEvent::StartDecommission).await
    }

    pub async fn complete_decommission(&self, node_id: &NodeId) -> Result<NodeState, RegistryError> {
        self.apply_admin(node_id, |_| NodeStateEvent::CompleteDecommission).await
    }

    /// Return a decommissioning or decommissioned node to service
    pub async fn recommission(&self, node_id: &NodeId) -> Result<NodeState, RegistryError> {
        let resume = self.resume_state_fn(Utc::now());
        self.apply_admin(node_id, |record| NodeStateEvent::Recommission { resume: resume(record) })
            .await
    }

    pub async fn start_maintenance(&self, node_id: &NodeId) -> Result<NodeState, RegistryError> {
        self.apply_admin(node_id, |_| NodeStateEvent::StartMaintenance).await
    }

    pub async fn complete_maintenance(&self, node_id: &NodeId) -> Result<NodeState, RegistryError> {
        self.apply_admin(node_id, |_| NodeStateEvent::CompleteMaintenance).await
    }

    pub async fn end_maintenance(&self, node_id: &NodeId) -> Result<NodeState, RegistryError> {
        let resume = self.resume_state_fn(Utc::now());
        self.apply_admin(node_id, |record| NodeStateEvent::EndMaintenance { resume: resume(record) })
            .await
    }

    /// Remove a decommissioned node from the registry and the topology
    pub async fn purge(&self, node_id: &NodeId) -> Result<NodeRecord, RegistryError> {
        let mut table = self.nodes.write().await;
        let handle = table
            .by_id
            .get(node_id)
            .cloned()
            .ok_or(RegistryError::NodeNotFound { node_id: *node_id })?;

        let record = handle.read().await.clone();
        if record.state != NodeState::Decommissioned {
            warn!(node_id = %node_id, state = ?record.state, "Refusing to purge node");
            return Err(RegistryError::NotDecommissioned {
                node_id: *node_id,
                state: record.state,
            });
        }

        table.by_id.remove(node_id);
        table.by_name.remove(&record.network_name);
        self.topology.remove(&record.network_name);
        drop(table);

        info!(node_id = %node_id, network_name = %record.network_name, "Purged decommissioned node");
        self.update_cluster_stats().await;
        Ok(record)
    }

    /// Snapshot of one node
    pub async fn get_node(&self, node_id: &NodeId) -> Option<NodeRecord> {
        let handle = self.node_handle(node_id).await?;
        Some(handle.read().await.clone())
    }

    /// Snapshot of the node registered under `network_name`
    pub async fn get_node_by_network_name(&self, network_name: &str) -> Result<Option<NodeRecord>, RegistryError> {
        let handle = {
            let table = self.nodes.read().await;
            match table.by_name.get(network_name) {
                Some(id) => Some(Self::indexed_handle(&table, id, network_name)?),
                None => None,
            }
        };

        match handle {
            Some(handle) => Ok(Some(handle.read().await.clone())),
            None => Ok(None),
        }
    }

    /// Resolve `network_names` in order, dropping names that match no
    /// placement-eligible node. Duplicates are kept.
    pub async fn resolve_network_names(&self, network_names: &[String]) -> Result<Vec<NodeRecord>, RegistryError> {
        let handles = {
            let table = self.nodes.read().await;
            let mut handles = Vec::with_capacity(network_names.len());
            for name in network_names {
                match table.by_name.get(name.as_str()) {
                    Some(id) => handles.push(Self::indexed_handle(&table, id, name)?),
                    None => debug!(network_name = %name, "Dropping unknown network name"),
                }
            }
            handles
        };

        let mut resolved = Vec::with_capacity(handles.len());
        for handle in handles {
            let record = handle.read().await;
            if record.state.is_placement_eligible() {
                resolved.push(record.clone());
            } else {
                debug!(node_id = %record.id, state = ?record.state, "Dropping ineligible node");
            }
        }
        Ok(resolved)
    }

    /// Find the node a client string refers to: by network name, then
    /// hostname, then IP address
    pub async fn find_client_node(&self, client: &str) -> Result<Option<NodeRecord>, RegistryError> {
        if let Some(record) = self.get_node_by_network_name(client).await? {
            return Ok(Some(record));
        }

        let matches = self
            .collect_nodes_matching(|record| record.hostname == client || record.ip_address == client)
            .await;
        Ok(matches.into_iter().min_by_key(|record| record.registered_at))
    }

    /// All known nodes in any state; order is unspecified
    pub async fn get_all_nodes(&self) -> Vec<NodeRecord> {
        self.collect_nodes_matching(|_| true).await
    }

    /// Nodes eligible for placement (HEALTHY and HEALTHY_READONLY)
    pub async fn get_healthy_nodes(&self) -> Vec<NodeRecord> {
        self.collect_nodes_matching(|record| record.state.is_placement_eligible())
            .await
    }

    pub async fn get_nodes_in_state(&self, state: NodeState) -> Vec<NodeRecord> {
        self.collect_nodes_matching(|record| record.state == state).await
    }

    pub async fn node_count(&self) -> usize {
        self.nodes.read().await.by_id.len()
    }

    /// Current cluster statistics
    pub async fn get_cluster_stats(&self) -> ClusterStats {
        self.stats.read().await.clone()
    }

    /// Recalculate cluster statistics from all records
    ///
    /// The stats lock is held across the recompute so concurrent updates
    /// publish in order. Callers must not hold a record lock.
    pub async fn update_cluster_stats(&self) {
        let mut published = self.stats.write().await;
        let mut stats = ClusterStats::default();
        for handle in self.all_handles().await {
            stats.record(&*handle.read().await);
        }

        debug!(
            total = stats.total_nodes,
            healthy = stats.healthy_nodes,
            stale = stats.stale_nodes,
            dead = stats.dead_nodes,
            "Cluster statistics updated"
        );
        *published = stats;
    }

    async fn apply_admin<F>(&self, node_id: &NodeId, event_for: F) -> Result<NodeState, RegistryError>
    where
        F: Fn(&NodeRecord) -> NodeStateEvent,
    {
        let handle = self
            .node_handle(node_id)
            .await
            .ok_or(RegistryError::NodeNotFound { node_id: *node_id })?;

        let mut record = handle.write().await;
        let previous = record.state;
        let event = event_for(&record);
        let Some(next) = previous.transition(event) else {
            warn!(node_id = %node_id, state = ?previous, event = ?event, "Rejected administrative command");
            return Err(RegistryError::InvalidTransition {
                node_id: *node_id,
                from: previous,
                to: format!("{event:?}"),
            });
        };

        record.state = next;
        drop(record);

        if next != previous {
            info!(node_id = %node_id, old = ?previous, new = ?next, "Node administrative state changed");
            self.publish(NodeEvent {
                node_id: *node_id,
                previous: Some(previous),
                current: next,
            });
            self.update_cluster_stats().await;
        }
        Ok(next)
    }

    /// Liveness state a node returns to when leaving an administrative state
    fn resume_state_fn(&self, now: DateTime<Utc>) -> impl Fn(&NodeRecord) -> NodeState + '_ {
        move |record| {
            let age = record.heartbeat_age(now);
            if age >= self.config.dead_interval() {
                NodeState::Dead
            } else if age >= self.config.stale_interval() {
                NodeState::Stale
            } else if self.is_readonly(record.layout.as_ref()) {
                NodeState::HealthyReadonly
            } else {
                NodeState::Healthy
            }
        }
    }

    fn is_readonly(&self, layout: Option<&LayoutReport>) -> bool {
        match (self.layout_version, layout) {
            (Some(cluster), Some(report)) => report.metadata_layout_version < cluster,
            _ => false,
        }
    }

    fn resolve_location(&self, details: &NodeDetails) -> NetworkLocation {
        if let Some(location) = details.network_location.as_deref().and_then(NetworkLocation::parse) {
            return location;
        }

        if let Some(resolver) = &self.resolver {
            for name in [details.hostname.as_str(), details.ip_address.as_str()] {
                if let Some(location) = resolver.resolve(name).as_deref().and_then(NetworkLocation::parse) {
                    return location;
                }
            }
        }

        if details.network_location.is_some() {
            debug!(
                node_id = %details.id,
                declared = ?details.network_location,
                "Unusable network location, using default rack"
            );
        }
        self.topology.default_rack().clone()
    }

    fn apply_transition(record: &mut NodeRecord, event: NodeStateEvent) -> Option<NodeState> {
        let next = record.state.transition(event)?;
        if next == record.state {
            return None;
        }

        info!(node_id = %record.id, old = ?record.state, new = ?next, "Node state transition");
        record.state = next;
        Some(next)
    }

    fn publish(&self, event: NodeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn indexed_handle(table: &NodeTable, id: &NodeId, network_name: &str) -> Result<Arc<RwLock<NodeRecord>>, RegistryError> {
        table.by_id.get(id).cloned().ok_or_else(|| {
            RegistryError::fault(format!("network name {network_name} indexes node {id} which has no record"))
        })
    }

    async fn node_handle(&self, node_id: &NodeId) -> Option<Arc<RwLock<NodeRecord>>> {
        self.nodes.read().await.by_id.get(node_id).cloned()
    }

    async fn all_handles(&self) -> Vec<Arc<RwLock<NodeRecord>>> {
        self.nodes.read().await.by_id.values().cloned().collect()
    }

    async fn collect_nodes_matching<F>(&self, predicate: F) -> Vec<NodeRecord>
    where
        F: Fn(&NodeRecord) -> bool,
    {
        let handles = self.all_handles().await;

        let mut gathered = Vec::with_capacity(handles.len());
        for handle in handles {
            let record = handle.read().await;
            if predicate(&record) {
                gathered.push(record.clone());
            }
        }
        gathered
    }
}
