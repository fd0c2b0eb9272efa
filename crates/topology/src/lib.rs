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

//! # BlockSCM Node Registry
//!
//! Membership, liveness and rack topology of the storage nodes managed by
//! the control plane.
//!
//! - **Node registry**: idempotent registration, heartbeats and the node
//!   state machine, including administrative decommission and maintenance
//! - **Liveness**: a background sweep demotes silent nodes to STALE and DEAD
//! - **Network topology**: copy-on-write rack index with distance ranking
//! - **Metrics**: per-state node gauges exported through `metrics`
//!
//! ## Example
//!
//! ```rust,no_run
//! use blockscm_common::NodeId;
//! use blockscm_topology::{NodeDetails, NodeRegistry, TopologyConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = NodeRegistry::new(TopologyConfig::default())?;
//!     let details = NodeDetails::new(NodeId::random(), "dn1.example.com", "10.0.0.1")
//!         .with_network_location("/rack1");
//!     registry.register(details, None).await?;
//!
//!     let healthy_nodes = registry.get_healthy_nodes().await;
//!     println!("Healthy nodes: {}", healthy_nodes.len());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod health_monitor;
pub mod metrics_collector;
pub mod network;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use health_monitor::HealthMonitor;
pub use metrics_collector::{ClusterMetricsSnapshot, MetricsCollector};
pub use network::{DEFAULT_RACK, NetworkLocation, NetworkTopology, StaticResolver, TopologyResolver, TopologySnapshot};
pub use registry::{LivenessReport, NodeRegistry};
pub use types::*;
