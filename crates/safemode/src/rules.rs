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

//! Safe mode rules
//!
//! A rule is a named predicate over what the control plane has heard from the
//! cluster since startup. Rules consume [`SafeModeEvent`]s and report whether
//! they are satisfied together with a status line for operators.

use crate::config::SafeModeConfig;
use blockscm_common::NodeId;
use hashbrown::{HashMap, HashSet};
use serde::Serialize;

pub const DATANODE_RULE: &str = "DataNodeSafeModeRule";
pub const CONTAINER_RULE: &str = "ContainerSafeModeRule";
pub const HEALTHY_PIPELINE_RULE: &str = "HealthyPipelineSafeModeRule";
pub const ONE_REPLICA_PIPELINE_RULE: &str = "OneReplicaPipelineSafeModeRule";

/// Something the cluster reported that a rule may care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeModeEvent {
    /// A node registered, or came back after being declared dead
    NodeRegistered { node_id: NodeId },

    /// A node reported the containers it holds
    ContainerReport { node_id: NodeId, container_ids: Vec<u64> },

    /// A node reported its membership in a pipeline
    PipelineReport {
        pipeline_id: u64,
        node_id: NodeId,
        replication_factor: u8,
    },
}

/// Outcome of evaluating a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStatus {
    pub satisfied: bool,
    pub status: String,
}

impl RuleStatus {
    pub fn new(satisfied: bool, status: impl Into<String>) -> Self {
        Self {
            satisfied,
            status: status.into(),
        }
    }
}

/// A pluggable safe mode predicate
pub trait SafeModeRule: Send {
    fn name(&self) -> &str;

    /// Whether this rule holds the cluster in safe mode
    fn mandatory(&self) -> bool {
        true
    }

    /// Pre-check rules must pass before the cluster leaves PRE_CHECK
    fn pre_check(&self) -> bool {
        false
    }

    /// Fold `event` into the rule's state. Returns true if the event was
    /// relevant and the rule should be evaluated again.
    fn on_event(&mut self, event: &SafeModeEvent) -> bool;

    fn evaluate(&self) -> RuleStatus;
}

fn required_count(total: usize, pct: f64) -> usize {
    (total as f64 * pct).ceil() as usize
}

/// Enough distinct datanodes have registered
#[derive(Debug)]
pub struct DataNodeRule {
    required: usize,
    registered: HashSet<NodeId>,
    mandatory: bool,
}

impl DataNodeRule {
    pub fn new(required: usize) -> Self {
        Self {
            required,
            registered: HashSet::new(),
            mandatory: true,
        }
    }
}

impl SafeModeRule for DataNodeRule {
    fn name(&self) -> &str {
        DATANODE_RULE
    }

    fn mandatory(&self) -> bool {
        self.mandatory
    }

    fn pre_check(&self) -> bool {
        true
    }

    fn on_event(&mut self, event: &SafeModeEvent) -> bool {
        match event {
            SafeModeEvent::NodeRegistered { node_id } => self.registered.insert(*node_id),
            _ => false,
        }
    }

    fn evaluate(&self) -> RuleStatus {
        RuleStatus::new(
            self.registered.len() >= self.required,
            format!(
                "registered datanodes ({}) >= required datanodes ({})",
                self.registered.len(),
                self.required
            ),
        )
    }
}

/// Enough known containers have at least one reported replica
#[derive(Debug)]
pub struct ContainerRule {
    threshold_pct: f64,
    expected: usize,
    reported: HashSet<u64>,
    mandatory: bool,
}

impl ContainerRule {
    pub fn new(threshold_pct: f64, expected: usize) -> Self {
        Self {
            threshold_pct,
            expected,
            reported: HashSet::new(),
            mandatory: true,
        }
    }

    fn reported_fraction(&self) -> f64 {
        if self.expected == 0 {
            return 1.0;
        }
        self.reported.len().min(self.expected) as f64 / self.expected as f64
    }
}

impl SafeModeRule for ContainerRule {
    fn name(&self) -> &str {
        CONTAINER_RULE
    }

    fn mandatory(&self) -> bool {
        self.mandatory
    }

    fn on_event(&mut self, event: &SafeModeEvent) -> bool {
        match event {
            SafeModeEvent::ContainerReport { container_ids, .. } => {
                let before = self.reported.len();
                self.reported.extend(container_ids.iter().copied());
                self.reported.len() != before
            }
            _ => false,
        }
    }

    fn evaluate(&self) -> RuleStatus {
        let fraction = self.reported_fraction();
        RuleStatus::new(
            fraction >= self.threshold_pct,
            format!(
                "containers with at least one reported replica ({fraction:.2}) >= threshold ({:.2})",
                self.threshold_pct
            ),
        )
    }
}

/// How the pipeline rules count a pipeline as available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineCriterion {
    /// Every member of the pipeline has reported
    AllReplicas,
    /// At least one member has reported
    OneReplica,
}

/// Enough known pipelines are available, by one of two criteria
#[derive(Debug)]
pub struct PipelineRule {
    criterion: PipelineCriterion,
    threshold_pct: f64,
    expected: usize,
    members: HashMap<u64, (u8, HashSet<NodeId>)>,
    mandatory: bool,
}

impl PipelineRule {
    /// Pipelines with every replica reported
    pub fn healthy(threshold_pct: f64, expected: usize) -> Self {
        Self::new(PipelineCriterion::AllReplicas, threshold_pct, expected)
    }

    /// Pipelines with at least one replica reported
    pub fn one_replica(threshold_pct: f64, expected: usize) -> Self {
        Self::new(PipelineCriterion::OneReplica, threshold_pct, expected)
    }

    fn new(criterion: PipelineCriterion, threshold_pct: f64, expected: usize) -> Self {
        Self {
            criterion,
            threshold_pct,
            expected,
            members: HashMap::new(),
            mandatory: true,
        }
    }

    fn available(&self) -> usize {
        self.members
            .values()
            .filter(|(factor, reported)| match self.criterion {
                PipelineCriterion::AllReplicas => reported.len() >= usize::from(*factor),
                PipelineCriterion::OneReplica => !reported.is_empty(),
            })
            .count()
    }
}

impl SafeModeRule for PipelineRule {
    fn name(&self) -> &str {
        match self.criterion {
            PipelineCriterion::AllReplicas => HEALTHY_PIPELINE_RULE,
            PipelineCriterion::OneReplica => ONE_REPLICA_PIPELINE_RULE,
        }
    }

    fn mandatory(&self) -> bool {
        self.mandatory
    }

    fn on_event(&mut self, event: &SafeModeEvent) -> bool {
        match event {
            SafeModeEvent::PipelineReport {
                pipeline_id,
                node_id,
                replication_factor,
            } => {
                let (factor, reported) = self
                    .members
                    .entry(*pipeline_id)
                    .or_insert_with(|| (*replication_factor, HashSet::new()));
                *factor = (*factor).max(*replication_factor);
                reported.insert(*node_id)
            }
            _ => false,
        }
    }

    fn evaluate(&self) -> RuleStatus {
        let required = required_count(self.expected, self.threshold_pct);
        let available = self.available();
        let label = match self.criterion {
            PipelineCriterion::AllReplicas => "healthy pipelines",
            PipelineCriterion::OneReplica => "pipelines with one reported replica",
        };
        RuleStatus::new(
            available >= required,
            format!("{label} ({available}) >= required ({required})"),
        )
    }
}

/// Counts of what the control plane expects to hear about after a restart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpectedInventory {
    pub containers: usize,
    pub pipelines: usize,
}

/// The stock rule set for `config`
pub fn stock_rules(config: &SafeModeConfig, inventory: ExpectedInventory) -> Vec<Box<dyn SafeModeRule>> {
    let mut datanodes = DataNodeRule::new(config.min_datanodes);
    datanodes.mandatory = config.is_mandatory(DATANODE_RULE);

    let mut containers = ContainerRule::new(config.container_threshold_pct, inventory.containers);
    containers.mandatory = config.is_mandatory(CONTAINER_RULE);

    let mut rules: Vec<Box<dyn SafeModeRule>> = vec![Box::new(datanodes), Box::new(containers)];

    if config.pipeline_availability_check {
        for mut rule in [
            PipelineRule::healthy(config.healthy_pipeline_threshold_pct, inventory.pipelines),
            PipelineRule::one_replica(config.one_replica_pipeline_threshold_pct, inventory.pipelines),
        ] {
            rule.mandatory = config.is_mandatory(rule.name());
            rules.push(Box::new(rule));
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datanode_rule_counts_distinct_nodes() {
        let mut rule = DataNodeRule::new(2);
        let node = NodeId::random();

        assert!(rule.on_event(&SafeModeEvent::NodeRegistered { node_id: node }));
        assert!(!rule.on_event(&SafeModeEvent::NodeRegistered { node_id: node }));
        assert!(!rule.evaluate().satisfied);

        rule.on_event(&SafeModeEvent::NodeRegistered { node_id: NodeId::random() });
        let status = rule.evaluate();
        assert!(status.satisfied);
        assert_eq!(status.status, "registered datanodes (2) >= required datanodes (2)");
    }

    #[test]
    fn test_container_rule_threshold() {
        let mut rule = ContainerRule::new(0.5, 4);
        rule.on_event(&SafeModeEvent::ContainerReport {
            node_id: NodeId::random(),
            container_ids: vec![1],
        });
        assert!(!rule.evaluate().satisfied);

        rule.on_event(&SafeModeEvent::ContainerReport {
            node_id: NodeId::random(),
            container_ids: vec![1, 2],
        });
        assert!(rule.evaluate().satisfied);

        assert!(ContainerRule::new(0.99, 0).evaluate().satisfied);
    }

    #[test]
    fn test_pipeline_rules_by_criterion() {
        let mut healthy = PipelineRule::healthy(1.0, 1);
        let mut one = PipelineRule::one_replica(1.0, 1);
        let report = |node_id| SafeModeEvent::PipelineReport {
            pipeline_id: 7,
            node_id,
            replication_factor: 3,
        };

        for node in [NodeId::random(), NodeId::random()] {
            healthy.on_event(&report(node));
            one.on_event(&report(node));
        }
        assert!(one.evaluate().satisfied);
        assert!(!healthy.evaluate().satisfied);

        healthy.on_event(&report(NodeId::random()));
        assert!(healthy.evaluate().satisfied);
    }

    #[test]
    fn test_stock_rules_follow_config() {
        let config = SafeModeConfig {
            pipeline_availability_check: false,
            optional_rules: vec![CONTAINER_RULE.to_string()],
            ..SafeModeConfig::default()
        };
        let rules = stock_rules(&config, ExpectedInventory::default());
        let names: Vec<_> = rules.iter().map(|r| (r.name().to_string(), r.mandatory(), r.pre_check())).collect();
        assert_eq!(
            names,
            vec![
                (DATANODE_RULE.to_string(), true, true),
                (CONTAINER_RULE.to_string(), false, false),
            ]
        );
    }
}
