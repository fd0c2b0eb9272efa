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

//! Control plane configuration

use crate::error::ScmError;
use blockscm_safemode::SafeModeConfig;
use blockscm_topology::TopologyConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration, usually read from a TOML file
///
/// ```toml
/// cluster_id = "prod-east"
/// metadata_dir = "/data/scm"
///
/// [topology]
/// stale_node_interval_secs = 90
/// dead_node_interval_secs = 600
///
/// [safemode]
/// min_datanodes = 3
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScmConfig {
    pub cluster_id: String,

    /// Root of the persisted metadata, one subdirectory per node type
    pub metadata_dir: PathBuf,

    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,

    pub topology: TopologyConfig,

    pub safemode: SafeModeConfig,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            cluster_id: "default-cluster".to_string(),
            metadata_dir: PathBuf::from("/var/lib/blockscm"),
            log_level: "info".to_string(),
            topology: TopologyConfig::default(),
            safemode: SafeModeConfig::default(),
        }
    }
}

impl ScmConfig {
    /// Read and validate `path`
    pub fn load(path: &Path) -> Result<Self, ScmError> {
        let text = fs::read_to_string(path).map_err(|source| ScmError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ScmConfig = toml::from_str(&text).map_err(|source| ScmError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScmError> {
        if self.cluster_id.trim().is_empty() {
            return Err(ScmError::InvalidConfig {
                reason: "cluster_id must not be empty".to_string(),
            });
        }
        self.topology.validate()?;
        self.safemode.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scm.toml");
        fs::write(
            &path,
            "cluster_id = \"c1\"\n[topology]\nstale_node_interval_secs = 30\ndead_node_interval_secs = 90\n[safemode]\nmin_datanodes = 3\n",
        )
        .unwrap();

        let config = ScmConfig::load(&path).unwrap();
        assert_eq!(config.cluster_id, "c1");
        assert_eq!(config.topology.stale_node_interval_secs, 30);
        assert_eq!(config.topology.default_rack, "/default-rack");
        assert_eq!(config.safemode.min_datanodes, 3);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_rejects_dead_before_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scm.toml");
        fs::write(&path, "[topology]\nstale_node_interval_secs = 600\ndead_node_interval_secs = 60\n").unwrap();

        assert!(matches!(ScmConfig::load(&path), Err(ScmError::Registry(_))));
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ScmConfig::load(&dir.path().join("absent.toml")),
            Err(ScmError::ConfigIo { .. })
        ));

        let path = dir.path().join("bad.toml");
        fs::write(&path, "cluster_id = [").unwrap();
        assert!(matches!(ScmConfig::load(&path), Err(ScmError::ConfigParse { .. })));
    }
}
