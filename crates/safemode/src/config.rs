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

use crate::error::SafeModeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Safe mode thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeModeConfig {
    /// Start in safe mode at all
    pub enabled: bool,

    /// Registered datanodes required before rule evaluation starts
    pub min_datanodes: usize,

    /// Fraction of known containers that must have a reported replica
    pub container_threshold_pct: f64,

    /// Gate on pipeline availability as well
    pub pipeline_availability_check: bool,

    /// Fraction of known pipelines that must be fully reported
    pub healthy_pipeline_threshold_pct: f64,

    /// Fraction of known pipelines with at least one reported replica
    pub one_replica_pipeline_threshold_pct: f64,

    /// Time between satisfying every mandatory rule and leaving safe mode
    pub exit_delay_secs: u64,

    /// Rules that are reported but do not hold the cluster in safe mode
    pub optional_rules: Vec<String>,
}

impl Default for SafeModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_datanodes: 1,
            container_threshold_pct: 0.99,
            pipeline_availability_check: true,
            healthy_pipeline_threshold_pct: 0.10,
            one_replica_pipeline_threshold_pct: 0.90,
            exit_delay_secs: 0,
            optional_rules: Vec::new(),
        }
    }
}

impl SafeModeConfig {
    pub fn exit_delay(&self) -> Duration {
        Duration::from_secs(self.exit_delay_secs)
    }

    pub fn is_mandatory(&self, rule: &str) -> bool {
        !self.optional_rules.iter().any(|name| name == rule)
    }

    pub fn validate(&self) -> Result<(), SafeModeError> {
        for (name, value) in [
            ("container_threshold_pct", self.container_threshold_pct),
            ("healthy_pipeline_threshold_pct", self.healthy_pipeline_threshold_pct),
            ("one_replica_pipeline_threshold_pct", self.one_replica_pipeline_threshold_pct),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SafeModeError::InvalidConfig {
                    reason: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }
        Ok(())
    }
}
