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

//! Metrics collection for the node registry
//!
//! Every snapshot is pushed through a watch channel and also reported as
//! gauges through the `metrics` crate so any installed recorder can export it.

use crate::registry::NodeRegistry;
use crate::types::{ClusterStats, NodeState};
use chrono::{DateTime, Utc};
use metrics::gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

/// Snapshot produced by the metrics collector loop.
#[derive(Debug, Clone)]
pub struct ClusterMetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub stats: ClusterStats,
    /// Racks known to the topology index
    pub racks: usize,
}

/// Periodic metrics collector that streams snapshots through a watch channel.
#[derive(Debug)]
pub struct MetricsCollector {
    registry: Arc<NodeRegistry>,
    interval: Duration,
    sender: watch::Sender<ClusterMetricsSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl MetricsCollector {
    /// Build a collector and seed it with an initial snapshot.
    pub async fn new(registry: Arc<NodeRegistry>) -> Self {
        let interval_secs = registry.config().metrics_interval_secs;
        let snapshot = Self::capture_snapshot(&registry).await;
        let (sender, _) = watch::channel(snapshot);

        Self {
            registry,
            interval: Duration::from_secs(interval_secs.max(1)),
            sender,
            task: None,
        }
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        info!(interval = self.interval.as_secs(), "Starting metrics collector");
        let registry = Arc::clone(&self.registry);
        let interval = self.interval;
        let sender = self.sender.clone();

        let handle = tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let snapshot = Self::capture_snapshot(&registry).await;
                debug!(total_nodes = snapshot.stats.total_nodes, "Captured cluster metrics");
                // Gauges must keep updating with no watch subscribers.
                sender.send_replace(snapshot);
            }
        });

        self.task = Some(handle);
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.task.take() {
            info!("Stopping metrics collector");
            handle.abort();
        }
    }

    /// Subscribe to the watch channel and receive future snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ClusterMetricsSnapshot> {
        self.sender.subscribe()
    }

    async fn capture_snapshot(registry: &NodeRegistry) -> ClusterMetricsSnapshot {
        let stats = registry.get_cluster_stats().await;
        let racks = registry.topology().snapshot().rack_count();

        gauge!("blockscm_nodes_total").set(stats.total_nodes as f64);
        for (state, count) in [
            (NodeState::Healthy, stats.healthy_nodes),
            (NodeState::HealthyReadonly, stats.healthy_readonly_nodes),
            (NodeState::Stale, stats.stale_nodes),
            (NodeState::Dead, stats.dead_nodes),
            (NodeState::Decommissioning, stats.decommissioning_nodes),
            (NodeState::Decommissioned, stats.decommissioned_nodes),
        ] {
            gauge!("blockscm_nodes", "state" => state_label(state)).set(count as f64);
        }
        gauge!("blockscm_nodes", "state" => "MAINTENANCE").set(stats.maintenance_nodes as f64);
        gauge!("blockscm_racks_total").set(racks as f64);
        gauge!("blockscm_capacity_bytes").set(stats.capacity_bytes as f64);
        gauge!("blockscm_used_bytes").set(stats.used_bytes as f64);
        gauge!("blockscm_remaining_bytes").set(stats.remaining_bytes as f64);

        ClusterMetricsSnapshot {
            captured_at: Utc::now(),
            stats,
            racks,
        }
    }
}

fn state_label(state: NodeState) -> &'static str {
    match state {
        NodeState::Healthy => "HEALTHY",
        NodeState::HealthyReadonly => "HEALTHY_READONLY",
        NodeState::Stale => "STALE",
        NodeState::Dead => "DEAD",
        NodeState::Decommissioning => "DECOMMISSIONING",
        NodeState::Decommissioned => "DECOMMISSIONED",
        NodeState::EnteringMaintenance => "ENTERING_MAINTENANCE",
        NodeState::InMaintenance => "IN_MAINTENANCE",
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeDetails, TopologyConfig};
    use blockscm_common::NodeId;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_metrics_collector_streams_snapshots() {
        let config = TopologyConfig {
            metrics_interval_secs: 1,
            ..TopologyConfig::default()
        };
        let registry = Arc::new(NodeRegistry::new(config).unwrap());
        registry
            .register(
                NodeDetails::new(NodeId::random(), "h1", "10.0.0.1").with_network_location("/rack1"),
                None,
            )
            .await
            .unwrap();

        let mut collector = MetricsCollector::new(registry.clone()).await;
        collector.start();

        let mut rx = collector.subscribe();
        timeout(Duration::from_secs(3), rx.changed())
            .await
            .expect("collector did not emit snapshot")
            .unwrap();

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.stats.total_nodes, 1);
        assert_eq!(snapshot.racks, 1);

        collector.stop();
    }

    #[tokio::test]
    async fn test_metrics_collector_keeps_running_without_subscribers() {
        let config = TopologyConfig {
            metrics_interval_secs: 1,
            ..TopologyConfig::default()
        };
        let registry = Arc::new(NodeRegistry::new(config).unwrap());

        let mut collector = MetricsCollector::new(registry.clone()).await;
        collector.start();

        // Let at least one tick pass with nobody listening.
        sleep(Duration::from_millis(1500)).await;
        assert!(collector.task.as_ref().is_some_and(|handle| !handle.is_finished()));

        registry
            .register(
                NodeDetails::new(NodeId::random(), "h1", "10.0.0.1").with_network_location("/rack1"),
                None,
            )
            .await
            .unwrap();

        let mut rx = collector.subscribe();
        timeout(Duration::from_secs(3), rx.changed())
            .await
            .expect("collector stopped after the first tick")
            .unwrap();

        assert_eq!(rx.borrow().stats.total_nodes, 1);
        collector.stop();
    }
}
