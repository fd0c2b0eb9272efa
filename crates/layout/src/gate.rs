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

//! Startup compatibility gate

use crate::error::LayoutError;
use crate::feature::{LayoutFeature, software_layout_version};
use crate::version_file::{VersionFile, version_file_path};
use blockscm_common::NodeType;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Read-only view of the layout versions in effect for this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutVersionManager {
    metadata_layout_version: u32,
    software_layout_version: u32,
}

impl LayoutVersionManager {
    pub fn new(metadata_layout_version: u32, software_layout_version: u32) -> Self {
        Self {
            metadata_layout_version,
            software_layout_version,
        }
    }

    pub fn metadata_layout_version(&self) -> u32 {
        self.metadata_layout_version
    }

    pub fn software_layout_version(&self) -> u32 {
        self.software_layout_version
    }

    /// True when the software supports features the metadata has not been
    /// upgraded to yet
    pub fn needs_finalization(&self) -> bool {
        self.metadata_layout_version < self.software_layout_version
    }

    /// A feature may be used once the persisted metadata has reached it
    pub fn is_allowed(&self, feature: LayoutFeature) -> bool {
        feature.layout_version() <= self.metadata_layout_version
    }

    /// Features the software has but the metadata has not been finalized for
    pub fn unfinalized_features(&self) -> Vec<LayoutFeature> {
        LayoutFeature::ALL
            .into_iter()
            .filter(|f| !self.is_allowed(*f) && f.layout_version() <= self.software_layout_version)
            .collect()
    }
}

/// Check that the metadata persisted for `node_type` under `metadata_dir` is
/// not newer than this build.
///
/// A missing VERSION file or a missing `layoutVersion` key means a fresh
/// node at layout version 0.
pub fn check_startup_compatible(metadata_dir: &Path, node_type: NodeType) -> Result<LayoutVersionManager, LayoutError> {
    check_startup_compatible_with(metadata_dir, node_type, software_layout_version())
}

/// Like [`check_startup_compatible`], against an explicit software layout version
pub fn check_startup_compatible_with(
    metadata_dir: &Path,
    node_type: NodeType,
    slv: u32,
) -> Result<LayoutVersionManager, LayoutError> {
    let path = version_file_path(metadata_dir, node_type);

    let mlv = match VersionFile::load(&path)? {
        Some(file) => {
            if let Some(found) = file.node_type()
                && !found.eq_ignore_ascii_case(node_type.as_str())
            {
                return Err(LayoutError::NodeTypeMismatch {
                    expected: node_type,
                    found: found.to_string(),
                });
            }
            file.layout_version(&path)?.unwrap_or(0)
        }
        None => {
            debug!(path = %path.display(), "No version file, treating metadata as layout version 0");
            0
        }
    };

    if mlv > slv {
        let err = LayoutError::MetadataNewerThanSoftware { mlv, slv };
        error!(node_type = %node_type, mlv, slv, "{err}");
        return Err(err);
    }

    let manager = LayoutVersionManager::new(mlv, slv);
    if manager.needs_finalization() {
        warn!(
            node_type = %node_type,
            mlv,
            slv,
            pending = ?manager.unfinalized_features(),
            "Metadata layout is behind software, upgrade pending finalization"
        );
    } else {
        info!(node_type = %node_type, mlv, slv, "Metadata layout version is current");
    }
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_feature_gating() {
        let manager = LayoutVersionManager::new(2, 5);
        assert!(manager.needs_finalization());
        assert!(manager.is_allowed(LayoutFeature::ScmHa));
        assert!(!manager.is_allowed(LayoutFeature::ErasureCodedStorageSupport));
        assert_eq!(manager.unfinalized_features().len(), 3);

        let current = LayoutVersionManager::new(5, 5);
        assert!(!current.needs_finalization());
        assert!(current.unfinalized_features().is_empty());
    }
}
