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

//! Cluster Manager - composition root of the control plane
//!
//! Owns the node registry, the safe mode controller and the block location
//! service, and runs the background services around them:
//! - liveness sweep over registered nodes
//! - metrics snapshots
//! - forwarding of registry events to safe mode

use crate::block_location::BlockLocationService;
use crate::config::ScmConfig;
use crate::error::ScmError;
use blockscm_common::NodeId;
use blockscm_layout::LayoutVersionManager;
use blockscm_safemode::{ExpectedInventory, SafeModeController, SafeModeEvent, SafeModeStatus};
use blockscm_topology::{
    ClusterStats, HealthMonitor, HeartbeatInfo, MetricsCollector, NodeDetails, NodeEvent, NodeRecord, NodeRegistry,
    NodeState, NodeUsage, TopologyResolver,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Optional collaborators supplied at construction
#[derive(Default)]
pub struct ClusterOptions {
    /// What the cluster held before the restart, for the safe mode rules
    pub inventory: ExpectedInventory,

    /// Rack lookup for nodes that do not declare a location
    pub resolver: Option<Arc<dyn TopologyResolver>>,
}

/// Cluster manager coordinating membership, safe mode and placement
pub struct ClusterManager {
    registry: Arc<NodeRegistry>,

    safe_mode: SafeModeController,

    block_location: BlockLocationService,

    layout: LayoutVersionManager,

    health_monitor: HealthMonitor,

    metrics: MetricsCollector,

    /// Forwards registry events to safe mode
    event_task: Option<JoinHandle<()>>,

    cluster_id: String,
}

impl ClusterManager {
    /// Build every component and start the background services.
    ///
    /// `layout` is the result of the startup layout check, which must have
    /// passed before anything here is constructed.
    pub async fn initialize(config: &ScmConfig, layout: LayoutVersionManager) -> Result<Self, ScmError> {
        Self::initialize_with(config, layout, ClusterOptions::default()).await
    }

    pub async fn initialize_with(
        config: &ScmConfig,
        layout: LayoutVersionManager,
        options: ClusterOptions,
    ) -> Result<Self, ScmError> {
        info!(cluster_id = %config.cluster_id, mlv = layout.metadata_layout_version(), "Initializing Cluster Manager");
        config.validate()?;

        let mut registry =
            NodeRegistry::new(config.topology.clone())?.with_layout_version(layout.metadata_layout_version());
        if let Some(resolver) = options.resolver {
            registry = registry.with_resolver(resolver);
        }
        let registry = Arc::new(registry);
        debug!("Node registry initialized");

        let safe_mode = SafeModeController::new(&config.safemode, options.inventory)?;
        debug!(phase = ?safe_mode.phase(), "Safe mode controller initialized");

        // Subscribe before anything can register
        let events = registry.subscribe();
        let event_task = tokio::spawn(Self::forward_events(events, Arc::clone(&registry), safe_mode.clone()));

        let block_location = BlockLocationService::new(Arc::clone(&registry), safe_mode.clone());

        let mut health_monitor = HealthMonitor::new(Arc::clone(&registry));
        health_monitor.start();

        let mut metrics = MetricsCollector::new(Arc::clone(&registry)).await;
        metrics.start();

        info!("Cluster Manager initialized successfully");
        Ok(Self {
            registry,
            safe_mode,
            block_location,
            layout,
            health_monitor,
            metrics,
            event_task: Some(event_task),
            cluster_id: config.cluster_id.clone(),
        })
    }

    async fn forward_events(
        mut events: broadcast::Receiver<NodeEvent>,
        registry: Arc<NodeRegistry>,
        safe_mode: SafeModeController,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let returned = event.previous == Some(NodeState::Dead) && event.current.is_placement_eligible();
                    if event.is_registration() || returned {
                        safe_mode.handle_event(&SafeModeEvent::NodeRegistered { node_id: event.node_id });
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Node event stream lagged, replaying registered nodes into safe mode");
                    for record in registry.get_healthy_nodes().await {
                        safe_mode.handle_event(&SafeModeEvent::NodeRegistered { node_id: record.id });
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Node event forwarding stopped");
    }

    pub async fn register_node(&self, details: NodeDetails, usage: Option<NodeUsage>) -> Result<NodeRecord, ScmError> {
        Ok(self.registry.register(details, usage).await?)
    }

    pub async fn heartbeat(&self, node_id: &NodeId, info: HeartbeatInfo) {
        self.registry.heartbeat(node_id, info).await
    }

    /// Containers a node reported holding
    pub fn process_container_report(&self, node_id: NodeId, container_ids: Vec<u64>) {
        self.safe_mode
            .handle_event(&SafeModeEvent::ContainerReport { node_id, container_ids });
    }

    /// A node reported membership in a pipeline
    pub fn process_pipeline_report(&self, node_id: NodeId, pipeline_id: u64, replication_factor: u8) {
        self.safe_mode.handle_event(&SafeModeEvent::PipelineReport {
            pipeline_id,
            node_id,
            replication_factor,
        });
    }

    /// Administrative safe mode override
    pub fn force_exit_safe_mode(&self) {
        self.safe_mode.force_exit();
    }

    pub fn is_in_safe_mode(&self) -> bool {
        self.safe_mode.is_in_safe_mode()
    }

    pub fn safe_mode_status(&self) -> SafeModeStatus {
        self.safe_mode.status()
    }

    /// Resolves once block locations are being served
    pub async fn wait_for_safe_mode_exit(&self) {
        let mut phases = self.safe_mode.subscribe();
        // The sender lives as long as the controller we hold
        let _ = phases.wait_for(|phase| !phase.is_in_safe_mode()).await;
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn safe_mode(&self) -> &SafeModeController {
        &self.safe_mode
    }

    pub fn block_location(&self) -> &BlockLocationService {
        &self.block_location
    }

    pub fn layout(&self) -> &LayoutVersionManager {
        &self.layout
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub async fn get_cluster_stats(&self) -> ClusterStats {
        self.registry.get_cluster_stats().await
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down Cluster Manager");

        self.health_monitor.stop();
        self.metrics.stop();
        if let Some(handle) = self.event_task.take() {
            handle.abort();
            debug!("Node event forwarding stopped");
        }

        info!("Cluster Manager shutdown complete");
    }
}

impl Drop for ClusterManager {
    fn drop(&mut self) {
        if let Some(handle) = self.event_task.take() {
            handle.abort();
        }
    }
}
