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

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafeModeError {
    #[error("Unknown safe mode rule: {name}")]
    UnknownRule { name: String },

    #[error("Safe mode rule {name} is already registered")]
    DuplicateRule { name: String },

    #[error("Invalid safe mode configuration: {reason}")]
    InvalidConfig { reason: String },
}
