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

//! Block location service: ranks replica holders by proximity to a client

use crate::error::BlockLocationError;
use blockscm_safemode::SafeModeController;
use blockscm_topology::{NodePort, NodeRecord, NodeRegistry, NodeState, TopologySnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Client-facing request: candidate nodes by network name, and who is asking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDatanodesRequest {
    pub node_network_names: Vec<String>,
    pub client: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatanodeInfo {
    pub uuid: String,
    pub network_name: String,
    pub hostname: String,
    pub ip_address: String,
    pub network_location: String,
    pub state: NodeState,
    pub ports: Vec<NodePort>,
}

impl From<NodeRecord> for DatanodeInfo {
    fn from(record: NodeRecord) -> Self {
        Self {
            uuid: record.id.to_string(),
            network_name: record.network_name,
            hostname: record.hostname,
            ip_address: record.ip_address,
            network_location: record.network_location,
            state: record.state,
            ports: record.ports,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortDatanodesResponse {
    pub nodes: Vec<DatanodeInfo>,
}

/// Answers block location queries once the cluster is out of safe mode
#[derive(Debug, Clone)]
pub struct BlockLocationService {
    registry: Arc<NodeRegistry>,
    safe_mode: SafeModeController,
}

impl BlockLocationService {
    pub fn new(registry: Arc<NodeRegistry>, safe_mode: SafeModeController) -> Self {
        Self { registry, safe_mode }
    }

    /// Order the nodes named in `network_names` by distance from `client`.
    ///
    /// Names matching no placement-eligible node are dropped. A client that
    /// matches no registered node is placed in the default rack. Ties keep
    /// their input order and duplicates are kept.
    pub async fn sort_datanodes(&self, network_names: &[String], client: &str) -> Result<Vec<NodeRecord>, BlockLocationError> {
        if self.safe_mode.is_in_safe_mode() {
            debug!(client, "Rejecting block location request during safe mode");
            return Err(BlockLocationError::InSafeMode);
        }

        // Paths come from one snapshot so a concurrent registration cannot
        // mix two views of the topology into one ordering
        let snapshot = self.registry.topology().snapshot();
        let reader = self.client_path(&snapshot, client).await?;

        let candidates = self.registry.resolve_network_names(network_names).await?;
        let mut positioned = Vec::with_capacity(candidates.len());
        for record in candidates {
            match snapshot.path_of(&record.network_name) {
                Some(path) => {
                    let path = Arc::clone(path);
                    positioned.push((record, path));
                }
                None => debug!(node_id = %record.id, "Dropping node added or removed during the request"),
            }
        }

        let sorted = snapshot.sort_by_distance(&reader, positioned);
        debug!(
            client,
            requested = network_names.len(),
            returned = sorted.len(),
            "Sorted datanodes for client"
        );
        Ok(sorted)
    }

    pub async fn sort(&self, request: SortDatanodesRequest) -> Result<SortDatanodesResponse, BlockLocationError> {
        let nodes = self
            .sort_datanodes(&request.node_network_names, &request.client)
            .await?;
        Ok(SortDatanodesResponse {
            nodes: nodes.into_iter().map(DatanodeInfo::from).collect(),
        })
    }

    async fn client_path(&self, snapshot: &TopologySnapshot, client: &str) -> Result<Arc<[String]>, BlockLocationError> {
        if let Some(record) = self.registry.find_client_node(client).await?
            && let Some(path) = snapshot.path_of(&record.network_name)
        {
            return Ok(Arc::clone(path));
        }

        debug!(client, "Client is not a registered node, using default rack");
        Ok(self.registry.topology().default_rack().path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockscm_common::NodeId;
    use blockscm_safemode::{ExpectedInventory, SafeModeConfig};
    use blockscm_topology::{NodeDetails, TopologyConfig};

    async fn service(safe_mode_enabled: bool) -> BlockLocationService {
        let registry = Arc::new(NodeRegistry::new(TopologyConfig::default()).unwrap());
        let config = SafeModeConfig {
            enabled: safe_mode_enabled,
            ..SafeModeConfig::default()
        };
        let safe_mode = SafeModeController::new(&config, ExpectedInventory::default()).unwrap();

        for (name, rack) in [("a1", "/r1"), ("a2", "/r1"), ("b1", "/r2"), ("b2", "/r2")] {
            let details = NodeDetails::new(NodeId::random(), format!("{name}.host"), "10.1.1.1")
                .with_network_name(name)
                .with_network_location(rack);
            registry.register(details, None).await.unwrap();
        }
        BlockLocationService::new(registry, safe_mode)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn network_names(records: &[NodeRecord]) -> Vec<&str> {
        records.iter().map(|r| r.network_name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_client_node_then_rack_then_rest() {
        let service = service(false).await;
        let sorted = service
            .sort_datanodes(&names(&["b2", "a2", "b1", "a1"]), "b1")
            .await
            .unwrap();
        assert_eq!(network_names(&sorted), vec!["b1", "b2", "a2", "a1"]);
    }

    #[tokio::test]
    async fn test_client_by_hostname() {
        let service = service(false).await;
        let sorted = service
            .sort_datanodes(&names(&["b1", "a1", "a2"]), "a2.host")
            .await
            .unwrap();
        assert_eq!(network_names(&sorted), vec!["a2", "a1", "b1"]);
    }

    #[tokio::test]
    async fn test_unknown_client_keeps_input_order() {
        let service = service(false).await;
        let input = names(&["b2", "a1", "a1", "b1"]);
        let sorted = service.sort_datanodes(&input, "/default-rack").await.unwrap();
        assert_eq!(network_names(&sorted), vec!["b2", "a1", "a1", "b1"]);
    }

    #[tokio::test]
    async fn test_rejected_in_safe_mode() {
        let service = service(true).await;
        // Nothing forwarded registrations to the controller
        let result = service.sort_datanodes(&names(&["a1"]), "a1").await;
        assert!(matches!(result, Err(BlockLocationError::InSafeMode)));
    }

    #[tokio::test]
    async fn test_response_shape() {
        let service = service(false).await;
        let response = service
            .sort(SortDatanodesRequest {
                node_network_names: names(&["a1", "ghost"]),
                client: "a1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response.nodes.len(), 1);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["nodes"][0]["network_name"], "a1");
        assert_eq!(json["nodes"][0]["network_location"], "/r1");
        assert_eq!(json["nodes"][0]["state"], "HEALTHY");
    }
}
