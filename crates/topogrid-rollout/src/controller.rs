//! Deployment controller: drives the blue/green state machine.
//!
//! An external controller polls alarms at the shift interval and calls
//! `advance` with the time elapsed since the previous poll. A poll that
//! covers several intervals applies all of their steps at once. Only one
//! rollout can be in flight: `begin` is accepted from `Idle` or
//! `Finalized` and nowhere else.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{RolloutError, RolloutResult};
use crate::strategy::RolloutPolicy;

/// Current phase of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeploymentPhase {
    /// No rollout in progress; blue serves everything.
    Idle,
    /// Green receives `percent` of production traffic.
    ShiftingTraffic { percent: u8 },
    /// Green serves everything; blue is kept for manual rollback.
    Baking,
    /// Blue released; green is now the live group.
    Finalized,
    /// Traffic reverted to blue.
    RolledBack { reason: String },
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentPhase::Idle => f.write_str("idle"),
            DeploymentPhase::ShiftingTraffic { percent } => write!(f, "shifting traffic ({percent}%)"),
            DeploymentPhase::Baking => f.write_str("baking"),
            DeploymentPhase::Finalized => f.write_str("finalized"),
            DeploymentPhase::RolledBack { .. } => f.write_str("rolled back"),
        }
    }
}

/// Production listener weights. Always sums to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TrafficSplit {
    pub blue: u8,
    pub green: u8,
}

impl TrafficSplit {
    /// Green receives `percent` (capped at 100), blue the remainder.
    pub fn green(percent: u8) -> Self {
        let green = percent.min(100);
        Self {
            blue: 100 - green,
            green,
        }
    }

    pub fn all_blue() -> Self {
        Self::green(0)
    }
}

/// Names of the two target groups behind the production listener.
///
/// `blue` is whichever group is live; the roles swap on finalization.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TargetGroupPair {
    pub blue: String,
    pub green: String,
}

/// Alarm state observed at a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmStatus {
    Ok,
    Firing { alarm: String },
}

/// What the controller must do to the load balancer after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShiftAction {
    /// Reweight the production listener.
    Shift(TrafficSplit),
    /// Send everything back to blue.
    Revert,
    /// Bake finished; the named (old blue) group can be drained.
    Release { target_group: String },
}

/// The staged-rollout descriptor of one deployment group.
#[derive(Debug, Clone)]
pub struct DeploymentState {
    deployment_group: String,
    policy: RolloutPolicy,
    target_groups: TargetGroupPair,
    phase: DeploymentPhase,
    in_phase: Duration,
    revision: Option<String>,
}

impl DeploymentState {
    pub fn new(deployment_group: &str, target_groups: TargetGroupPair, policy: RolloutPolicy) -> Self {
        Self {
            deployment_group: deployment_group.to_string(),
            policy,
            target_groups,
            phase: DeploymentPhase::Idle,
            in_phase: Duration::ZERO,
            revision: None,
        }
    }

    pub fn deployment_group(&self) -> &str {
        &self.deployment_group
    }

    pub fn phase(&self) -> &DeploymentPhase {
        &self.phase
    }

    pub fn policy(&self) -> &RolloutPolicy {
        &self.policy
    }

    pub fn target_groups(&self) -> &TargetGroupPair {
        &self.target_groups
    }

    /// Revision being rolled out (or last rolled out).
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Whether a new rollout may start now.
    pub fn can_begin(&self) -> bool {
        matches!(self.phase, DeploymentPhase::Idle | DeploymentPhase::Finalized)
    }

    /// Current production listener weights.
    pub fn split(&self) -> TrafficSplit {
        match self.phase {
            DeploymentPhase::ShiftingTraffic { percent } => TrafficSplit::green(percent),
            DeploymentPhase::Baking => TrafficSplit::green(100),
            DeploymentPhase::Idle
            | DeploymentPhase::Finalized
            | DeploymentPhase::RolledBack { .. } => TrafficSplit::all_blue(),
        }
    }

    /// Start rolling out `revision`: the first traffic step happens now.
    pub fn begin(&mut self, revision: &str) -> RolloutResult<ShiftAction> {
        if !self.can_begin() {
            return Err(RolloutError::InProgress(self.phase.to_string()));
        }
        self.revision = Some(revision.to_string());
        let first = self.policy.shift.next_percent(0);
        info!(
            deployment_group = %self.deployment_group,
            revision,
            percent = first,
            "starting traffic shift"
        );
        Ok(self.shift_to(first))
    }

    /// Account for `elapsed` time and the alarms seen at this poll.
    ///
    /// Returns the load-balancer change to apply, if any.
    pub fn advance(&mut self, elapsed: Duration, alarms: &AlarmStatus) -> Option<ShiftAction> {
        match self.phase.clone() {
            DeploymentPhase::Idle | DeploymentPhase::Finalized | DeploymentPhase::RolledBack { .. } => {
                None
            }

            DeploymentPhase::ShiftingTraffic { percent } => {
                if let AlarmStatus::Firing { alarm } = alarms {
                    return Some(self.revert(format!("alarm {alarm} fired at {percent}%")));
                }
                self.in_phase += elapsed;
                let interval = self.policy.shift.interval();
                let mut percent = percent;
                let mut action = None;
                // A late poll catches up every interval it covers. The bake
                // clock starts with whatever is left after the final step.
                while self.in_phase >= interval {
                    let carry = self.in_phase - interval;
                    let next = self.policy.shift.next_percent(percent);
                    debug!(
                        deployment_group = %self.deployment_group,
                        from = percent,
                        to = next,
                        "interval elapsed without alarms"
                    );
                    action = Some(self.shift_to(next));
                    self.in_phase = carry;
                    if next >= 100 || next <= percent {
                        break;
                    }
                    percent = next;
                }
                action
            }

            DeploymentPhase::Baking => {
                if let AlarmStatus::Firing { alarm } = alarms {
                    return Some(self.revert(format!("alarm {alarm} fired while baking")));
                }
                self.in_phase += elapsed;
                if self.in_phase < self.policy.termination_wait() {
                    return None;
                }
                Some(self.finalize())
            }
        }
    }

    /// Manual rollback, allowed while shifting or baking.
    pub fn rollback(&mut self, reason: &str) -> RolloutResult<ShiftAction> {
        match self.phase {
            DeploymentPhase::ShiftingTraffic { .. } | DeploymentPhase::Baking => {
                Ok(self.revert(reason.to_string()))
            }
            _ => Err(RolloutError::InvalidTransition {
                action: "roll back",
                phase: self.phase.to_string(),
            }),
        }
    }

    /// External abort of an in-flight shift.
    pub fn abort(&mut self) -> RolloutResult<ShiftAction> {
        match self.phase {
            DeploymentPhase::ShiftingTraffic { .. } => Ok(self.revert("aborted".to_string())),
            _ => Err(RolloutError::InvalidTransition {
                action: "abort",
                phase: self.phase.to_string(),
            }),
        }
    }

    /// Re-arm after a rollback so the next revision can be rolled out.
    pub fn acknowledge(&mut self) -> RolloutResult<()> {
        match self.phase {
            DeploymentPhase::RolledBack { .. } => {
                self.phase = DeploymentPhase::Idle;
                self.in_phase = Duration::ZERO;
                Ok(())
            }
            _ => Err(RolloutError::InvalidTransition {
                action: "acknowledge",
                phase: self.phase.to_string(),
            }),
        }
    }

    fn shift_to(&mut self, percent: u8) -> ShiftAction {
        self.in_phase = Duration::ZERO;
        if percent >= 100 {
            self.phase = DeploymentPhase::Baking;
            info!(
                deployment_group = %self.deployment_group,
                wait_secs = self.policy.termination_wait().as_secs(),
                "full shift complete, baking"
            );
        } else {
            self.phase = DeploymentPhase::ShiftingTraffic { percent };
        }
        ShiftAction::Shift(self.split())
    }

    fn revert(&mut self, reason: String) -> ShiftAction {
        warn!(
            deployment_group = %self.deployment_group,
            revision = ?self.revision,
            %reason,
            "rolling back to blue"
        );
        self.phase = DeploymentPhase::RolledBack { reason };
        self.in_phase = Duration::ZERO;
        ShiftAction::Revert
    }

    fn finalize(&mut self) -> ShiftAction {
        let released = self.target_groups.blue.clone();
        std::mem::swap(&mut self.target_groups.blue, &mut self.target_groups.green);
        self.phase = DeploymentPhase::Finalized;
        self.in_phase = Duration::ZERO;
        info!(
            deployment_group = %self.deployment_group,
            live = %self.target_groups.blue,
            released = %released,
            "deployment finalized"
        );
        ShiftAction::Release {
            target_group: released,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ShiftPolicy;

    const MIN: Duration = Duration::from_secs(60);

    fn pair() -> TargetGroupPair {
        TargetGroupPair {
            blue: "api-tg".to_string(),
            green: "api-canary".to_string(),
        }
    }

    fn state(policy: RolloutPolicy) -> DeploymentState {
        DeploymentState::new("api-dg", pair(), policy)
    }

    fn firing() -> AlarmStatus {
        AlarmStatus::Firing {
            alarm: "api-canary-5xx".to_string(),
        }
    }

    #[test]
    fn starts_idle_with_all_traffic_on_blue() {
        let s = state(RolloutPolicy::default());
        assert_eq!(s.phase(), &DeploymentPhase::Idle);
        assert_eq!(s.split(), TrafficSplit { blue: 100, green: 0 });
        assert!(s.can_begin());
    }

    #[test]
    fn linear_rollout_walks_to_finalized() {
        let mut s = state(RolloutPolicy::default());
        assert_eq!(
            s.begin("rev-2").unwrap(),
            ShiftAction::Shift(TrafficSplit { blue: 90, green: 10 })
        );

        for expected in (20..=90).step_by(10) {
            // Part of an interval does nothing.
            assert_eq!(s.advance(2 * MIN, &AlarmStatus::Ok), None);
            let action = s.advance(3 * MIN, &AlarmStatus::Ok).unwrap();
            assert_eq!(action, ShiftAction::Shift(TrafficSplit::green(expected as u8)));
            assert_eq!(
                s.phase(),
                &DeploymentPhase::ShiftingTraffic {
                    percent: expected as u8
                }
            );
        }

        let action = s.advance(5 * MIN, &AlarmStatus::Ok).unwrap();
        assert_eq!(action, ShiftAction::Shift(TrafficSplit { blue: 0, green: 100 }));
        assert_eq!(s.phase(), &DeploymentPhase::Baking);
        assert!(!s.can_begin());

        assert_eq!(s.advance(4 * MIN, &AlarmStatus::Ok), None);
        let action = s.advance(MIN, &AlarmStatus::Ok).unwrap();
        assert_eq!(
            action,
            ShiftAction::Release {
                target_group: "api-tg".to_string()
            }
        );
        assert_eq!(s.phase(), &DeploymentPhase::Finalized);
        // Roles swapped: the former green group is now live.
        assert_eq!(s.target_groups().blue, "api-canary");
        assert_eq!(s.split(), TrafficSplit::all_blue());
        assert!(s.can_begin());
    }

    #[test]
    fn late_poll_catches_up_missed_intervals() {
        let mut s = state(RolloutPolicy::default());
        s.begin("rev").unwrap();

        // 17 minutes covers three intervals with two minutes left over.
        let action = s.advance(17 * MIN, &AlarmStatus::Ok).unwrap();
        assert_eq!(action, ShiftAction::Shift(TrafficSplit::green(40)));
        assert_eq!(s.phase(), &DeploymentPhase::ShiftingTraffic { percent: 40 });
        assert_eq!(s.advance(3 * MIN, &AlarmStatus::Ok), Some(ShiftAction::Shift(TrafficSplit::green(50))));

        // A very late poll stops at the bake and carries the remainder.
        let action = s.advance(40 * MIN, &AlarmStatus::Ok).unwrap();
        assert_eq!(action, ShiftAction::Shift(TrafficSplit::green(100)));
        assert_eq!(s.phase(), &DeploymentPhase::Baking);
        assert!(matches!(
            s.advance(MIN, &AlarmStatus::Ok),
            Some(ShiftAction::Release { .. })
        ));
    }

    #[test]
    fn split_always_sums_to_hundred() {
        let mut s = state(RolloutPolicy {
            shift: ShiftPolicy::Linear {
                step_percent: 7,
                interval_minutes: 1,
            },
            termination_wait_minutes: 1,
        });
        s.begin("rev").unwrap();
        while s.phase() != &DeploymentPhase::Finalized {
            let split = s.split();
            assert_eq!(u16::from(split.blue) + u16::from(split.green), 100);
            if let DeploymentPhase::ShiftingTraffic { percent } = s.phase() {
                assert_eq!(split, TrafficSplit { blue: 100 - percent, green: *percent });
            }
            s.advance(MIN, &AlarmStatus::Ok);
        }
    }

    #[test]
    fn alarm_during_any_shift_rolls_back() {
        for steps in 0..9 {
            let mut s = state(RolloutPolicy::default());
            s.begin("rev").unwrap();
            for _ in 0..steps {
                s.advance(5 * MIN, &AlarmStatus::Ok);
            }
            assert!(matches!(s.phase(), DeploymentPhase::ShiftingTraffic { percent } if *percent < 100));

            assert_eq!(s.advance(Duration::ZERO, &firing()), Some(ShiftAction::Revert));
            assert!(matches!(s.phase(), DeploymentPhase::RolledBack { .. }));
            assert_eq!(s.split(), TrafficSplit { blue: 100, green: 0 });
        }
    }

    #[test]
    fn rolled_back_is_terminal_until_acknowledged() {
        let mut s = state(RolloutPolicy::default());
        s.begin("rev").unwrap();
        s.advance(MIN, &firing());
        assert!(!s.can_begin());
        assert!(matches!(s.begin("rev-2"), Err(RolloutError::InProgress(_))));
        assert_eq!(s.advance(10 * MIN, &AlarmStatus::Ok), None);

        s.acknowledge().unwrap();
        assert_eq!(s.phase(), &DeploymentPhase::Idle);
        assert!(s.begin("rev-2").is_ok());
    }

    #[test]
    fn no_concurrent_rollouts() {
        let mut s = state(RolloutPolicy::default());
        s.begin("rev-1").unwrap();
        let err = s.begin("rev-2").unwrap_err();
        assert_eq!(err, RolloutError::InProgress("shifting traffic (10%)".to_string()));
        assert_eq!(s.revision(), Some("rev-1"));
    }

    #[test]
    fn manual_rollback_during_bake() {
        let mut s = state(RolloutPolicy {
            shift: ShiftPolicy::AllAtOnce,
            termination_wait_minutes: 5,
        });
        assert_eq!(
            s.begin("rev").unwrap(),
            ShiftAction::Shift(TrafficSplit { blue: 0, green: 100 })
        );
        assert_eq!(s.phase(), &DeploymentPhase::Baking);

        assert_eq!(s.rollback("bad latency").unwrap(), ShiftAction::Revert);
        assert_eq!(
            s.phase(),
            &DeploymentPhase::RolledBack {
                reason: "bad latency".to_string()
            }
        );
        // Blue never changed roles.
        assert_eq!(s.target_groups(), &pair());
    }

    #[test]
    fn canary_policy_jumps_to_full_after_interval() {
        let mut s = state(RolloutPolicy {
            shift: ShiftPolicy::canary_10_percent_5_minutes(),
            termination_wait_minutes: 5,
        });
        s.begin("rev").unwrap();
        assert_eq!(s.split(), TrafficSplit { blue: 90, green: 10 });
        s.advance(5 * MIN, &AlarmStatus::Ok);
        assert_eq!(s.phase(), &DeploymentPhase::Baking);
    }

    #[test]
    fn abort_only_while_shifting() {
        let mut s = state(RolloutPolicy::default());
        assert!(s.abort().is_err());
        s.begin("rev").unwrap();
        assert_eq!(s.abort().unwrap(), ShiftAction::Revert);
        assert!(s.rollback("again").is_err());
        assert!(s.acknowledge().is_ok());
        assert!(s.acknowledge().is_err());
    }

    #[test]
    fn new_rollout_after_finalize_uses_swapped_groups() {
        let mut s = state(RolloutPolicy {
            shift: ShiftPolicy::AllAtOnce,
            termination_wait_minutes: 1,
        });
        s.begin("rev-1").unwrap();
        s.advance(MIN, &AlarmStatus::Ok);
        assert_eq!(s.phase(), &DeploymentPhase::Finalized);

        s.begin("rev-2").unwrap();
        s.advance(MIN, &AlarmStatus::Ok);
        // Back to the original roles after two full rollouts.
        assert_eq!(s.target_groups(), &pair());
    }
}
