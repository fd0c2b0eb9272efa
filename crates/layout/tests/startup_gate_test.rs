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
use blockscm_layout::{
    LayoutError, LayoutFeature, VersionFile, check_startup_compatible, software_layout_version, version_file_path,
};
use tempfile::TempDir;

fn write_version(dir: &TempDir, node_type: NodeType, mlv: u32) -> anyhow::Result<()> {
    VersionFile::new(node_type, mlv).store(&version_file_path(dir.path(), node_type))?;
    Ok(())
}

#[test]
fn test_mlv_above_slv_fails_with_exact_message() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let slv = software_layout_version();
    write_version(&dir, NodeType::Scm, slv + 1)?;

    let err = check_startup_compatible(dir.path(), NodeType::Scm).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Metadata layout version ({}) > software layout version ({})", slv + 1, slv)
    );
    Ok(())
}

#[test]
fn test_mlv_at_or_below_slv_succeeds() -> anyhow::Result<()> {
    let slv = software_layout_version();
    for mlv in [0, slv - 1, slv] {
        let dir = tempfile::tempdir()?;
        write_version(&dir, NodeType::Scm, mlv)?;

        let manager = check_startup_compatible(dir.path(), NodeType::Scm)?;
        assert_eq!(manager.metadata_layout_version(), mlv);
        assert_eq!(manager.software_layout_version(), slv);
        assert_eq!(manager.needs_finalization(), mlv < slv);
    }
    Ok(())
}

#[test]
fn test_missing_version_file_is_fresh_node() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let manager = check_startup_compatible(dir.path(), NodeType::Datanode)?;
    assert_eq!(manager.metadata_layout_version(), 0);
    assert!(manager.is_allowed(LayoutFeature::InitialVersion));
    assert!(!manager.is_allowed(LayoutFeature::DatanodeSchemaV2));
    Ok(())
}

#[test]
fn test_only_matching_node_type_directory_is_read() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_version(&dir, NodeType::Datanode, software_layout_version() + 7)?;

    // The datanode metadata does not affect the control plane
    let manager = check_startup_compatible(dir.path(), NodeType::Scm)?;
    assert_eq!(manager.metadata_layout_version(), 0);
    Ok(())
}

#[test]
fn test_node_type_mismatch_and_corruption() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = version_file_path(dir.path(), NodeType::Scm);

    VersionFile::new(NodeType::Om, 1).store(&path)?;
    assert!(matches!(
        check_startup_compatible(dir.path(), NodeType::Scm),
        Err(LayoutError::NodeTypeMismatch { .. })
    ));

    std::fs::write(&path, "nodeType=SCM\nlayoutVersion=not-a-number\n")?;
    assert!(matches!(
        check_startup_compatible(dir.path(), NodeType::Scm),
        Err(LayoutError::Corrupt { .. })
    ));
    Ok(())
}
