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

//! Safe mode controller
//!
//! Aggregates the rules into a single phase. Writers serialize on a mutex;
//! readers only touch atomics, so request handlers never wait on rule
//! evaluation.

use crate::config::SafeModeConfig;
use crate::error::SafeModeError;
use crate::rules::{ExpectedInventory, RuleStatus, SafeModeEvent, SafeModeRule, stock_rules};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where the cluster is in its startup gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum SafeModePhase {
    /// Waiting for the pre-check rules
    PreCheck = 0,
    /// Waiting for every mandatory rule
    InSafeMode = 1,
    /// All mandatory rules passed; serving, exit listeners being notified
    Exiting = 2,
    OutOfSafeMode = 3,
    /// Left by administrative override
    ForcedExit = 4,
}

impl SafeModePhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SafeModePhase::PreCheck,
            1 => SafeModePhase::InSafeMode,
            2 => SafeModePhase::Exiting,
            3 => SafeModePhase::OutOfSafeMode,
            _ => SafeModePhase::ForcedExit,
        }
    }

    pub fn is_in_safe_mode(&self) -> bool {
        matches!(self, SafeModePhase::PreCheck | SafeModePhase::InSafeMode)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SafeModePhase::OutOfSafeMode | SafeModePhase::ForcedExit)
    }
}

/// One rule as shown to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub name: String,
    pub satisfied: bool,
    pub status: String,
    pub mandatory: bool,
    pub pre_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafeModeStatus {
    pub phase: SafeModePhase,
    pub in_safe_mode: bool,
    pub pre_check_complete: bool,
    pub rules: Vec<RuleReport>,
}

struct RuleSlot {
    rule: Box<dyn SafeModeRule>,
    satisfied: bool,
    status: String,
}

impl RuleSlot {
    fn new(rule: Box<dyn SafeModeRule>) -> Self {
        let RuleStatus { satisfied, status } = rule.evaluate();
        Self { rule, satisfied, status }
    }

    /// Record a result. A satisfied rule stays satisfied.
    fn apply(&mut self, result: RuleStatus) -> bool {
        self.status = result.status;
        let newly = result.satisfied && !self.satisfied;
        self.satisfied |= result.satisfied;
        newly
    }
}

struct Shared {
    phase: AtomicU8,
    in_safe_mode: AtomicBool,
    pre_check_complete: AtomicBool,
    rules: Mutex<Vec<RuleSlot>>,
    phase_tx: watch::Sender<SafeModePhase>,
    exit_delay: Duration,
}

/// Startup safe mode gate shared by every component that consults it
#[derive(Clone)]
pub struct SafeModeController {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SafeModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeModeController")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SafeModeController {
    /// Build a controller with the stock rules for `config`
    pub fn new(config: &SafeModeConfig, inventory: ExpectedInventory) -> Result<Self, SafeModeError> {
        config.validate()?;
        if !config.enabled {
            info!("Safe mode disabled by configuration");
            return Ok(Self::disabled());
        }
        Self::with_rules(stock_rules(config, inventory), config.exit_delay())
    }

    /// Build a controller over an explicit rule set
    pub fn with_rules(rules: Vec<Box<dyn SafeModeRule>>, exit_delay: Duration) -> Result<Self, SafeModeError> {
        let mut slots: Vec<RuleSlot> = Vec::with_capacity(rules.len());
        for rule in rules {
            if slots.iter().any(|slot| slot.rule.name() == rule.name()) {
                return Err(SafeModeError::DuplicateRule {
                    name: rule.name().to_string(),
                });
            }
            slots.push(RuleSlot::new(rule));
        }

        let controller = Self::build(SafeModePhase::PreCheck, slots, exit_delay);
        info!(rules = controller.rule_count(), "Cluster entering safe mode");
        let guard = controller.lock_rules();
        controller.recompute(&guard);
        drop(guard);
        Ok(controller)
    }

    fn disabled() -> Self {
        Self::build(SafeModePhase::OutOfSafeMode, Vec::new(), Duration::ZERO)
    }

    fn build(phase: SafeModePhase, slots: Vec<RuleSlot>, exit_delay: Duration) -> Self {
        let (phase_tx, _) = watch::channel(phase);
        Self {
            shared: Arc::new(Shared {
                phase: AtomicU8::new(phase as u8),
                in_safe_mode: AtomicBool::new(phase.is_in_safe_mode()),
                pre_check_complete: AtomicBool::new(phase != SafeModePhase::PreCheck),
                rules: Mutex::new(slots),
                phase_tx,
                exit_delay,
            }),
        }
    }

    /// O(1), lock free
    pub fn is_in_safe_mode(&self) -> bool {
        self.shared.in_safe_mode.load(Ordering::Acquire)
    }

    pub fn is_pre_check_complete(&self) -> bool {
        self.shared.pre_check_complete.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SafeModePhase {
        SafeModePhase::from_u8(self.shared.phase.load(Ordering::Acquire))
    }

    /// Receive every phase change
    pub fn subscribe(&self) -> watch::Receiver<SafeModePhase> {
        self.shared.phase_tx.subscribe()
    }

    /// Record an externally computed result for `rule_name`
    pub fn evaluate(&self, rule_name: &str, satisfied: bool, status: impl Into<String>) -> Result<(), SafeModeError> {
        let mut rules = self.lock_rules();
        let slot = rules
            .iter_mut()
            .find(|slot| slot.rule.name() == rule_name)
            .ok_or_else(|| SafeModeError::UnknownRule {
                name: rule_name.to_string(),
            })?;

        if slot.apply(RuleStatus::new(satisfied, status)) {
            info!(rule = rule_name, status = %slot.status, "Safe mode rule satisfied");
        }
        self.recompute(&rules);
        Ok(())
    }

    /// Feed a cluster event to every rule
    pub fn handle_event(&self, event: &SafeModeEvent) {
        if self.phase().is_terminal() {
            return;
        }

        let mut rules = self.lock_rules();
        let mut changed = false;
        for slot in rules.iter_mut() {
            if slot.satisfied || !slot.rule.on_event(event) {
                continue;
            }
            let result = slot.rule.evaluate();
            changed = true;
            if slot.apply(result) {
                info!(rule = slot.rule.name(), status = %slot.status, "Safe mode rule satisfied");
            }
        }

        if changed {
            self.recompute(&rules);
        }
    }

    /// Leave safe mode regardless of rule state. Repeated calls are no-ops.
    ///
    /// Accepted from PRE_CHECK as well as IN_SAFE_MODE and EXITING.
    pub fn force_exit(&self) {
        let _rules = self.lock_rules();
        let phase = self.phase();
        if phase.is_terminal() {
            debug!(phase = ?phase, "Safe mode force exit ignored, already out of safe mode");
            return;
        }

        warn!(phase = ?phase, "Safe mode exit forced by administrator");
        self.set_phase(SafeModePhase::ForcedExit);
    }

    pub fn status(&self) -> SafeModeStatus {
        let rules = self.lock_rules();
        let phase = self.phase();
        SafeModeStatus {
            phase,
            in_safe_mode: phase.is_in_safe_mode(),
            pre_check_complete: self.is_pre_check_complete(),
            rules: rules
                .iter()
                .map(|slot| RuleReport {
                    name: slot.rule.name().to_string(),
                    satisfied: slot.satisfied,
                    status: slot.status.clone(),
                    mandatory: slot.rule.mandatory(),
                    pre_check: slot.rule.pre_check(),
                })
                .collect(),
        }
    }

    fn rule_count(&self) -> usize {
        self.lock_rules().len()
    }

    fn lock_rules(&self) -> MutexGuard<'_, Vec<RuleSlot>> {
        self.shared.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the phase from the rule table. Callers hold the rule lock.
    fn recompute(&self, rules: &[RuleSlot]) {
        let mut phase = self.phase();

        if phase == SafeModePhase::PreCheck {
            if rules.iter().filter(|s| s.rule.pre_check()).any(|s| !s.satisfied) {
                return;
            }
            info!("Safe mode pre-check complete");
            phase = SafeModePhase::InSafeMode;
            self.set_phase(phase);
        }

        if phase != SafeModePhase::InSafeMode {
            return;
        }
        if rules.iter().filter(|s| s.rule.mandatory()).any(|s| !s.satisfied) {
            return;
        }

        info!(exit_delay_secs = self.shared.exit_delay.as_secs(), "All mandatory safe mode rules satisfied, exiting safe mode");
        self.set_phase(SafeModePhase::Exiting);
        self.schedule_exit();
    }

    fn schedule_exit(&self) {
        let delay = self.shared.exit_delay;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !delay.is_zero() => {
                let controller = self.clone();
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    controller.finish_exit();
                });
            }
            _ => self.finish_exit_locked(),
        }
    }

    fn finish_exit(&self) {
        let _rules = self.lock_rules();
        self.finish_exit_locked();
    }

    fn finish_exit_locked(&self) {
        if self.phase() == SafeModePhase::Exiting {
            self.set_phase(SafeModePhase::OutOfSafeMode);
        }
    }

    fn set_phase(&self, phase: SafeModePhase) {
        let previous = SafeModePhase::from_u8(self.shared.phase.swap(phase as u8, Ordering::AcqRel));
        if previous == phase {
            return;
        }
        if phase != SafeModePhase::PreCheck {
            self.shared.pre_check_complete.store(true, Ordering::Release);
        }
        self.shared.in_safe_mode.store(phase.is_in_safe_mode(), Ordering::Release);
        self.shared.phase_tx.send_replace(phase);
        info!(old = ?previous, new = ?phase, "Safe mode phase changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DATANODE_RULE, DataNodeRule};
    use blockscm_common::NodeId;

    /// Satisfied only through `evaluate`
    struct ManualRule {
        name: &'static str,
        mandatory: bool,
    }

    impl SafeModeRule for ManualRule {
        fn name(&self) -> &str {
            self.name
        }

        fn mandatory(&self) -> bool {
            self.mandatory
        }

        fn on_event(&mut self, _event: &SafeModeEvent) -> bool {
            false
        }

        fn evaluate(&self) -> RuleStatus {
            RuleStatus::new(false, "waiting")
        }
    }

    fn manual(name: &'static str, mandatory: bool) -> Box<dyn SafeModeRule> {
        Box::new(ManualRule { name, mandatory })
    }

    #[test]
    fn test_exits_only_when_all_mandatory_rules_pass() {
        let controller = SafeModeController::with_rules(
            vec![manual("a", true), manual("b", true), manual("advisory", false)],
            Duration::ZERO,
        )
        .unwrap();
        assert!(controller.is_in_safe_mode());
        // No pre-check rules
        assert!(controller.is_pre_check_complete());

        controller.evaluate("a", true, "ok").unwrap();
        assert!(controller.is_in_safe_mode());

        controller.evaluate("b", true, "ok").unwrap();
        assert!(!controller.is_in_safe_mode());
        assert_eq!(controller.phase(), SafeModePhase::OutOfSafeMode);
    }

    #[test]
    fn test_exit_never_reverts() {
        let controller = SafeModeController::with_rules(vec![manual("a", true)], Duration::ZERO).unwrap();
        controller.evaluate("a", true, "ok").unwrap();
        controller.evaluate("a", false, "condition lost").unwrap();

        assert!(!controller.is_in_safe_mode());
        let status = controller.status();
        assert!(status.rules[0].satisfied);
        assert_eq!(status.rules[0].status, "condition lost");
    }

    #[test]
    fn test_evaluate_is_idempotent_and_order_independent() {
        let controller = SafeModeController::with_rules(vec![manual("a", true), manual("b", true)], Duration::ZERO).unwrap();
        controller.evaluate("b", true, "ok").unwrap();
        controller.evaluate("b", true, "ok").unwrap();
        assert!(controller.is_in_safe_mode());
        controller.evaluate("a", true, "ok").unwrap();
        assert!(!controller.is_in_safe_mode());
    }

    #[test]
    fn test_unknown_and_duplicate_rules() {
        let controller = SafeModeController::with_rules(vec![manual("a", true)], Duration::ZERO).unwrap();
        assert_eq!(
            controller.evaluate("zzz", true, ""),
            Err(SafeModeError::UnknownRule { name: "zzz".to_string() })
        );

        let result = SafeModeController::with_rules(vec![manual("a", true), manual("a", false)], Duration::ZERO);
        assert!(matches!(result, Err(SafeModeError::DuplicateRule { .. })));
    }

    #[test]
    fn test_pre_check_gates_other_rules() {
        let controller = SafeModeController::with_rules(
            vec![Box::new(DataNodeRule::new(1)), manual("a", true)],
            Duration::ZERO,
        )
        .unwrap();

        controller.evaluate("a", true, "ok").unwrap();
        assert_eq!(controller.phase(), SafeModePhase::PreCheck);
        assert!(!controller.is_pre_check_complete());

        controller.handle_event(&SafeModeEvent::NodeRegistered { node_id: NodeId::random() });
        assert!(controller.is_pre_check_complete());
        assert_eq!(controller.phase(), SafeModePhase::OutOfSafeMode);
        assert!(controller.status().rules.iter().any(|r| r.name == DATANODE_RULE && r.satisfied));
    }

    #[test]
    fn test_force_exit_is_one_way_and_idempotent() {
        let controller = SafeModeController::with_rules(vec![manual("a", true)], Duration::ZERO).unwrap();
        controller.force_exit();
        controller.force_exit();
        assert_eq!(controller.phase(), SafeModePhase::ForcedExit);
        assert!(!controller.is_in_safe_mode());

        controller.evaluate("a", false, "still waiting").unwrap();
        assert!(!controller.is_in_safe_mode());
    }

    #[test]
    fn test_disabled_starts_out_of_safe_mode() {
        let config = SafeModeConfig {
            enabled: false,
            ..SafeModeConfig::default()
        };
        let controller = SafeModeController::new(&config, ExpectedInventory::default()).unwrap();
        assert!(!controller.is_in_safe_mode());
        assert!(controller.status().rules.is_empty());
    }

    #[tokio::test]
    async fn test_exit_delay_passes_through_exiting() {
        let controller = SafeModeController::with_rules(vec![manual("a", true)], Duration::from_millis(50)).unwrap();
        let mut phases = controller.subscribe();

        controller.evaluate("a", true, "ok").unwrap();
        assert_eq!(controller.phase(), SafeModePhase::Exiting);
        assert!(!controller.is_in_safe_mode());

        while *phases.borrow_and_update() != SafeModePhase::OutOfSafeMode {
            phases.changed().await.unwrap();
        }
        assert_eq!(controller.phase(), SafeModePhase::OutOfSafeMode);
    }
}
