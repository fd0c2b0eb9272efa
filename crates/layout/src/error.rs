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

use blockscm_common::NodeType;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while checking the on-disk metadata layout
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Persisted metadata was written by newer software than this build
    #[error("Metadata layout version ({mlv}) > software layout version ({slv})")]
    MetadataNewerThanSoftware { mlv: u32, slv: u32 },

    #[error("Failed to read version file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt version file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Version file belongs to node type {found}, expected {expected}")]
    NodeTypeMismatch { expected: NodeType, found: String },
}

impl LayoutError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        LayoutError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
