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

//! Kinds of processes that persist metadata

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a process in the cluster.
///
/// Each role keeps its persisted metadata (and its layout version) in its own
/// subdirectory of the metadata directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// The storage control plane itself
    Scm,
    /// A storage node holding block replicas
    Datanode,
    /// The namespace service
    Om,
    /// The offline analysis service
    Recon,
}

impl NodeType {
    /// Subdirectory of the metadata directory owned by this role
    pub fn dir_name(&self) -> &'static str {
        match self {
            NodeType::Scm => "scm",
            NodeType::Datanode => "hdds",
            NodeType::Om => "om",
            NodeType::Recon => "recon",
        }
    }

    /// Name stamped into the `nodeType` field of the VERSION file
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Scm => "SCM",
            NodeType::Datanode => "DATANODE",
            NodeType::Om => "OM",
            NodeType::Recon => "RECON",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SCM" => Ok(NodeType::Scm),
            "DATANODE" => Ok(NodeType::Datanode),
            "OM" => Ok(NodeType::Om),
            "RECON" => Ok(NodeType::Recon),
            other => Err(format!("unknown node type '{other}'")),
        }
    }
}
