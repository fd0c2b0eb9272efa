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

use crate::types::NodeState;
use blockscm_common::NodeId;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Internal invariant of the registry or topology index was violated
    #[error("Registry fault: {reason}")]
    Fault { reason: String },

    /// Administrative command named a node the registry does not know
    #[error("Node {node_id} is not registered")]
    NodeNotFound { node_id: NodeId },

    /// Administrative command is not allowed from the node's current state
    #[error("Node {node_id} cannot move from {from:?} to {to}")]
    InvalidTransition { node_id: NodeId, from: NodeState, to: String },

    /// Purge requested for a node that has not finished decommissioning
    #[error("Node {node_id} is {state:?}; only decommissioned nodes can be purged")]
    NotDecommissioned { node_id: NodeId, state: NodeState },

    /// Another node already owns the requested network name
    #[error("Network name {name} is already registered to node {existing}")]
    NetworkNameConflict { name: String, existing: NodeId },

    #[error("Invalid topology configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl RegistryError {
    pub(crate) fn fault(reason: impl Into<String>) -> Self {
        RegistryError::Fault { reason: reason.into() }
    }
}
