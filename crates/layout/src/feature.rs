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

//! Layout features known to this build

use serde::{Deserialize, Serialize};
use std::fmt;

/// A change to the persisted metadata format, in the order it was introduced.
///
/// The numeric value is the layout version at which the feature becomes
/// available. The software layout version of a build is the highest value
/// listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutFeature {
    InitialVersion,
    DatanodeSchemaV2,
    ScmHa,
    ErasureCodedStorageSupport,
    DatanodeSchemaV3,
    RatisDatastreamPortInDatanodedetails,
}

impl LayoutFeature {
    pub const ALL: [LayoutFeature; 6] = [
        LayoutFeature::InitialVersion,
        LayoutFeature::DatanodeSchemaV2,
        LayoutFeature::ScmHa,
        LayoutFeature::ErasureCodedStorageSupport,
        LayoutFeature::DatanodeSchemaV3,
        LayoutFeature::RatisDatastreamPortInDatanodedetails,
    ];

    pub fn layout_version(&self) -> u32 {
        match self {
            LayoutFeature::InitialVersion => 0,
            LayoutFeature::DatanodeSchemaV2 => 1,
            LayoutFeature::ScmHa => 2,
            LayoutFeature::ErasureCodedStorageSupport => 3,
            LayoutFeature::DatanodeSchemaV3 => 4,
            LayoutFeature::RatisDatastreamPortInDatanodedetails => 5,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            LayoutFeature::InitialVersion => "Initial layout version",
            LayoutFeature::DatanodeSchemaV2 => "Datanode RocksDB schema version 2 (one DB per disk)",
            LayoutFeature::ScmHa => "Replicated control plane metadata",
            LayoutFeature::ErasureCodedStorageSupport => "Erasure coded containers",
            LayoutFeature::DatanodeSchemaV3 => "Datanode RocksDB schema version 3 (one DB per volume)",
            LayoutFeature::RatisDatastreamPortInDatanodedetails => "Streaming data port published in node details",
        }
    }

    /// Feature introduced at `version`, if any
    pub fn from_version(version: u32) -> Option<LayoutFeature> {
        Self::ALL.into_iter().find(|f| f.layout_version() == version)
    }
}

impl fmt::Display for LayoutFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.layout_version())
    }
}

/// Highest layout version this build understands
pub fn software_layout_version() -> u32 {
    LayoutFeature::ALL
        .iter()
        .map(LayoutFeature::layout_version)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_dense_and_ordered() {
        for (index, feature) in LayoutFeature::ALL.iter().enumerate() {
            assert_eq!(feature.layout_version() as usize, index);
            assert_eq!(LayoutFeature::from_version(index as u32), Some(*feature));
        }
        assert_eq!(software_layout_version(), 5);
        assert_eq!(LayoutFeature::from_version(6), None);
    }
}
