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

//! Integration tests for the cluster manager
//!
//! Registration, liveness and safe mode exercised through the composed
//! control plane.

use blockscm::{ClusterManager, ScmConfig};
use blockscm_common::NodeId;
use blockscm_layout::LayoutVersionManager;
use blockscm_safemode::SafeModePhase;
use blockscm_topology::{HeartbeatInfo, NodeDetails, NodeState, NodeUsage};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::time::{Duration, timeout};

async fn manager(min_datanodes: usize) -> ClusterManager {
    let mut config = ScmConfig::default();
    config.cluster_id = "integration".to_string();
    config.safemode.min_datanodes = min_datanodes;
    ClusterManager::initialize(&config, LayoutVersionManager::new(5, 5))
        .await
        .expect("Failed to initialize cluster manager")
}

fn node(i: usize) -> NodeDetails {
    NodeDetails::new(NodeId::random(), format!("node{i}"), format!("192.168.1.{i}"))
        .with_network_location(format!("/dc1/rack{}", i % 2))
        .with_port("RATIS", 9858)
}

/// Test basic cluster initialization
#[tokio::test]
async fn test_cluster_initialization() {
    let mut manager = manager(1).await;

    assert_eq!(manager.cluster_id(), "integration");
    let stats = manager.get_cluster_stats().await;
    assert_eq!(stats.total_nodes, 0);
    assert_eq!(manager.safe_mode_status().phase, SafeModePhase::PreCheck);

    manager.shutdown();
}

/// Re-registering the same identity updates instead of duplicating
#[tokio::test]
async fn test_registration_idempotence() {
    let manager = manager(1).await;
    let details = node(1);

    manager.register_node(details.clone(), None).await.unwrap();
    let usage = NodeUsage {
        capacity_bytes: 1 << 40,
        used_bytes: 1 << 30,
        remaining_bytes: (1 << 40) - (1 << 30),
        container_count: 12,
    };
    let record = manager.register_node(details, Some(usage)).await.unwrap();

    assert_eq!(manager.registry().get_all_nodes().await.len(), 1);
    assert_eq!(record.usage, usage);
    // Network name defaults to the node id
    assert_eq!(record.network_name, record.id.to_string());
    assert_eq!(manager.get_cluster_stats().await.capacity_bytes, 1 << 40);
}

/// Nodes register concurrently without serializing on each other
#[tokio::test]
async fn test_concurrent_registration_and_heartbeats() {
    let manager = Arc::new(manager(16).await);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            let record = manager.register_node(node(i), None).await.unwrap();
            for _ in 0..5 {
                manager.heartbeat(&record.id, HeartbeatInfo::default()).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    timeout(Duration::from_secs(5), manager.wait_for_safe_mode_exit())
        .await
        .expect("safe mode exit");
    assert_eq!(manager.registry().get_healthy_nodes().await.len(), 16);
    assert_eq!(manager.registry().topology().snapshot().rack_count(), 2);
}

/// Silent nodes go stale then dead; a heartbeat brings them back
#[tokio::test]
async fn test_liveness_and_recovery() {
    let manager = manager(1).await;
    let record = manager.register_node(node(1), None).await.unwrap();
    let registry = manager.registry();
    let start = record.last_heartbeat;

    registry.check_liveness(start + ChronoDuration::seconds(301)).await;
    assert_eq!(registry.get_node(&record.id).await.unwrap().state, NodeState::Stale);
    assert!(registry.get_healthy_nodes().await.is_empty());

    registry.check_liveness(start + ChronoDuration::seconds(601)).await;
    assert_eq!(registry.get_node(&record.id).await.unwrap().state, NodeState::Dead);

    registry
        .heartbeat_at(&record.id, HeartbeatInfo::default(), Utc::now())
        .await;
    assert_eq!(registry.get_node(&record.id).await.unwrap().state, NodeState::Healthy);
}

/// Once out of safe mode the cluster stays out, even if every node dies
#[tokio::test]
async fn test_safe_mode_exit_never_reverts() {
    let manager = manager(2).await;
    let a = manager.register_node(node(1), None).await.unwrap();
    manager.register_node(node(2), None).await.unwrap();

    timeout(Duration::from_secs(5), manager.wait_for_safe_mode_exit())
        .await
        .expect("safe mode exit");

    manager
        .registry()
        .check_liveness(a.last_heartbeat + ChronoDuration::seconds(3_600))
        .await;
    assert_eq!(manager.get_cluster_stats().await.dead_nodes, 2);
    assert!(!manager.is_in_safe_mode());
    assert_eq!(manager.safe_mode_status().phase, SafeModePhase::OutOfSafeMode);
}

/// Force exit is one-way and idempotent
#[tokio::test]
async fn test_force_exit() {
    let manager = manager(100).await;
    assert!(manager.is_in_safe_mode());

    manager.force_exit_safe_mode();
    manager.force_exit_safe_mode();
    assert!(!manager.is_in_safe_mode());
    assert_eq!(manager.safe_mode_status().phase, SafeModePhase::ForcedExit);

    manager.register_node(node(1), None).await.unwrap();
    assert_eq!(manager.safe_mode_status().phase, SafeModePhase::ForcedExit);
}

/// Decommission is administrative and ends in purge
#[tokio::test]
async fn test_decommission_and_purge() {
    let manager = manager(1).await;
    let record = manager.register_node(node(1), None).await.unwrap();
    let registry = manager.registry();

    registry.start_decommission(&record.id).await.unwrap();
    manager.heartbeat(&record.id, HeartbeatInfo::default()).await;
    assert_eq!(registry.get_node(&record.id).await.unwrap().state, NodeState::Decommissioning);

    registry.complete_decommission(&record.id).await.unwrap();
    registry.purge(&record.id).await.unwrap();
    assert!(registry.get_all_nodes().await.is_empty());

    // A late heartbeat after purge is ignored
    manager.heartbeat(&record.id, HeartbeatInfo::default()).await;
    assert!(registry.get_node(&record.id).await.is_none());
}
