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

//! Startup sequencing

use crate::cluster_manager::{ClusterManager, ClusterOptions};
use crate::config::ScmConfig;
use crate::error::ScmError;
use blockscm_common::NodeType;
use blockscm_layout::check_startup_compatible;
use tracing::info;

/// Check the metadata layout, then bring up the control plane.
///
/// Nothing is constructed when the layout check fails.
pub async fn start(config: &ScmConfig) -> Result<ClusterManager, ScmError> {
    start_with(config, ClusterOptions::default()).await
}

pub async fn start_with(config: &ScmConfig, options: ClusterOptions) -> Result<ClusterManager, ScmError> {
    config.validate()?;
    info!(metadata_dir = %config.metadata_dir.display(), "Checking metadata layout version");
    let layout = check_startup_compatible(&config.metadata_dir, NodeType::Scm)?;

    ClusterManager::initialize_with(config, layout, options).await
}
