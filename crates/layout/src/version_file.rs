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

//! The per node type `current/VERSION` properties file

use crate::error::LayoutError;
use blockscm_common::NodeType;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const VERSION_FILE_NAME: &str = "VERSION";
pub const CURRENT_DIR: &str = "current";

pub const LAYOUT_VERSION_KEY: &str = "layoutVersion";
pub const NODE_TYPE_KEY: &str = "nodeType";
pub const CLUSTER_ID_KEY: &str = "clusterID";

/// Location of the version file for `node_type` under `metadata_dir`
pub fn version_file_path(metadata_dir: &Path, node_type: NodeType) -> PathBuf {
    metadata_dir
        .join(node_type.dir_name())
        .join(CURRENT_DIR)
        .join(VERSION_FILE_NAME)
}

/// Parsed contents of a VERSION file.
///
/// Lines are `key=value` pairs; blank lines and lines starting with `#` or
/// `!` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionFile {
    properties: BTreeMap<String, String>,
}

impl VersionFile {
    /// A fresh file stamped with `node_type` and `layout_version`
    pub fn new(node_type: NodeType, layout_version: u32) -> Self {
        let mut file = Self::default();
        file.set(NODE_TYPE_KEY, node_type.as_str());
        file.set(LAYOUT_VERSION_KEY, layout_version.to_string());
        file
    }

    /// Read `path`. Returns `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, LayoutError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(path, &text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(LayoutError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn parse(path: &Path, text: &str) -> Result<Self, LayoutError> {
        let mut properties = BTreeMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let Some((key, value)) = line.split_once(['=', ':']) else {
                return Err(LayoutError::corrupt(path, format!("line {} is not a key=value pair", index + 1)));
            };
            properties.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self { properties })
    }

    /// Write the file, creating parent directories as needed
    pub fn store(&self, path: &Path) -> Result<(), LayoutError> {
        let io_err = |source| LayoutError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut text = String::new();
        for (key, value) in &self.properties {
            text.push_str(key);
            text.push('=');
            text.push_str(value);
            text.push('\n');
        }
        fs::write(path, text).map_err(io_err)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// The persisted metadata layout version, or `None` if the key is absent
    pub fn layout_version(&self, path: &Path) -> Result<Option<u32>, LayoutError> {
        self.get(LAYOUT_VERSION_KEY)
            .map(|raw| {
                raw.parse::<u32>()
                    .map_err(|_| LayoutError::corrupt(path, format!("{LAYOUT_VERSION_KEY} '{raw}' is not a version number")))
            })
            .transpose()
    }

    pub fn node_type(&self) -> Option<&str> {
        self.get(NODE_TYPE_KEY)
    }
}
