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

//! # BlockSCM Safe Mode
//!
//! Keeps the cluster from answering block location queries after a restart
//! until enough of it has reported back. Rules are pluggable predicates; the
//! controller folds them into a monotonic phase that is cheap to read.

pub mod config;
pub mod controller;
pub mod error;
pub mod rules;

pub use config::SafeModeConfig;
pub use controller::{RuleReport, SafeModeController, SafeModePhase, SafeModeStatus};
pub use error::SafeModeError;
pub use rules::{
    CONTAINER_RULE, ContainerRule, DATANODE_RULE, DataNodeRule, ExpectedInventory, HEALTHY_PIPELINE_RULE,
    ONE_REPLICA_PIPELINE_RULE, PipelineRule, RuleStatus, SafeModeEvent, SafeModeRule, stock_rules,
};
