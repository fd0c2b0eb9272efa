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

//! Liveness monitor for registered nodes
//!
//! Periodically sweeps the registry and moves nodes whose heartbeats stopped
//! to STALE and then DEAD. Nodes in administrative states are never touched.

use crate::registry::{LivenessReport, NodeRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Background liveness sweep over a [`NodeRegistry`]
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,

    check_interval: Duration,

    task_handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Create a monitor that sweeps at the registry's configured interval
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use blockscm_topology::{HealthMonitor, NodeRegistry, TopologyConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let registry = Arc::new(NodeRegistry::new(TopologyConfig::default())?);
    ///     let mut monitor = HealthMonitor::new(registry);
    ///     monitor.start();
    ///     Ok(())
    /// }
    /// ```
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        let check_interval = Duration::from_secs(registry.config().health_check_interval_secs.max(1));

        Self {
            registry,
            check_interval,
            task_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Spawn the sweep loop. Calling this twice is a no-op.
    pub fn start(&mut self) {
        if self.task_handle.is_some() {
            return;
        }
        info!(interval_secs = self.check_interval.as_secs(), "Starting health monitor service");

        let registry = Arc::clone(&self.registry);
        let check_interval = self.check_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(check_interval).await;

                let report = Self::perform_health_check(&registry).await;
                debug!(
                    nodes_checked = report.checked,
                    stale = report.marked_stale,
                    dead = report.marked_dead,
                    "Health check cycle completed"
                );
            }
        });

        self.task_handle = Some(handle);
    }

    /// Run one sweep now
    pub async fn perform_health_check(registry: &NodeRegistry) -> LivenessReport {
        registry.check_liveness(Utc::now()).await
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            info!("Stopping health monitor service");
            handle.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeDetails, NodeState, TopologyConfig};
    use blockscm_common::NodeId;
    use chrono::Duration as ChronoDuration;

    fn registry() -> Arc<NodeRegistry> {
        Arc::new(NodeRegistry::new(TopologyConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_health_monitor_start_stop() {
        let mut monitor = HealthMonitor::new(registry());
        assert!(!monitor.is_running());

        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_health_check_cycle_leaves_fresh_nodes() {
        let registry = registry();
        registry
            .register(NodeDetails::new(NodeId::random(), "h1", "10.0.0.1"), None)
            .await
            .unwrap();
        registry
            .register(NodeDetails::new(NodeId::random(), "h2", "10.0.0.2"), None)
            .await
            .unwrap();

        let report = HealthMonitor::perform_health_check(&registry).await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.marked_stale + report.marked_dead, 0);
    }

    #[tokio::test]
    async fn test_health_check_cycle_marks_silent_nodes_dead() {
        let registry = registry();
        let long_ago = Utc::now() - ChronoDuration::seconds(3_600);
        let record = registry
            .register_at(NodeDetails::new(NodeId::random(), "h1", "10.0.0.1"), None, long_ago)
            .await
            .unwrap();

        let report = HealthMonitor::perform_health_check(&registry).await;
        assert_eq!(report.marked_dead, 1);
        assert_eq!(registry.get_node(&record.id).await.unwrap().state, NodeState::Dead);
    }
}
