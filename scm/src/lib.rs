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

//! # BlockSCM
//!
//! Control plane of a block storage cluster: tracks which storage nodes
//! exist and are healthy, holds the cluster in safe mode after a restart,
//! ranks replica holders by network distance for clients, and refuses to
//! start on metadata written by newer software.

pub mod block_location;
pub mod cluster_manager;
pub mod config;
pub mod error;
pub mod startup;

pub use block_location::{BlockLocationService, DatanodeInfo, SortDatanodesRequest, SortDatanodesResponse};
pub use cluster_manager::{ClusterManager, ClusterOptions};
pub use config::ScmConfig;
pub use error::{BlockLocationError, ScmError};
pub use startup::{start, start_with};
