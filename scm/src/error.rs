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

use blockscm_layout::LayoutError;
use blockscm_safemode::SafeModeError;
use blockscm_topology::RegistryError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the control plane as a whole
#[derive(Debug, Error)]
pub enum ScmError {
    #[error("Failed to read config {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// Startup refused by the layout gate; the message is shown verbatim
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    SafeMode(#[from] SafeModeError),
}

/// Failures of a block location request
#[derive(Debug, Clone, Error)]
pub enum BlockLocationError {
    #[error("Cluster is in safe mode, block locations are not served yet")]
    InSafeMode,

    #[error("Block location lookup failed: {0}")]
    Registry(#[from] RegistryError),
}
