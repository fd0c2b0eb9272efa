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

//! # BlockSCM Layout Version Gate
//!
//! Refuses to start a node whose persisted metadata was written by a newer
//! software build than the one running.
//!
//! ```rust,no_run
//! use blockscm_common::NodeType;
//! use std::path::Path;
//!
//! let layout = blockscm_layout::check_startup_compatible(Path::new("/var/lib/blockscm"), NodeType::Scm)?;
//! println!("MLV {} / SLV {}", layout.metadata_layout_version(), layout.software_layout_version());
//! # Ok::<(), blockscm_layout::LayoutError>(())
//! ```

pub mod error;
pub mod feature;
pub mod gate;
pub mod version_file;

pub use error::LayoutError;
pub use feature::{LayoutFeature, software_layout_version};
pub use gate::{LayoutVersionManager, check_startup_compatible, check_startup_compatible_with};
pub use version_file::{VersionFile, version_file_path};
