//! Autoscaler: applies a `ScalingPolicySet` to live signals.
//!
//! The policy set says how many instances the signals demand; the
//! autoscaler adds cooldown windows so that a scale-out is not followed
//! immediately by a scale-in (or another scale-out) while the new
//! instances are still warming up.

use std::time::Duration;

use tracing::debug;

use crate::policy::{ScalingPolicySet, ScalingSignals};

/// A scaling decision for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the specified instance count.
    ScaleTo(u32),
    /// No change needed (or a cooldown is still running).
    NoChange,
}

/// Minimum time between consecutive scaling actions in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldowns {
    pub scale_out: Duration,
    pub scale_in: Duration,
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self {
            scale_out: Duration::from_secs(60),
            scale_in: Duration::from_secs(300),
        }
    }
}

/// Stateful evaluator for one service.
///
/// Time is passed in by the caller (seconds on any monotonic clock), so
/// the evaluator never reads a wall clock itself.
#[derive(Debug, Clone)]
pub struct Autoscaler {
    policy: ScalingPolicySet,
    cooldowns: Cooldowns,
    last_scale_out: Option<u64>,
    last_scale_in: Option<u64>,
}

impl Autoscaler {
    pub fn new(policy: ScalingPolicySet) -> Self {
        Self {
            policy,
            cooldowns: Cooldowns::default(),
            last_scale_out: None,
            last_scale_in: None,
        }
    }

    pub fn with_cooldowns(mut self, cooldowns: Cooldowns) -> Self {
        self.cooldowns = cooldowns;
        self
    }

    pub fn policy(&self) -> &ScalingPolicySet {
        &self.policy
    }

    /// Evaluate at time `now` (seconds).
    pub fn evaluate(&mut self, now: u64, signals: &ScalingSignals) -> ScaleDecision {
        let cpu_demand = self.policy.cpu.demand(signals);
        let request_demand = self.policy.request_rate.demand(signals);
        let desired = self.policy.combine(cpu_demand, request_demand);
        let current = signals.current_instances;

        if desired > current {
            if !elapsed(self.last_scale_out, now, self.cooldowns.scale_out) {
                debug!(current, desired, "scale-out suppressed by cooldown");
                return ScaleDecision::NoChange;
            }
            self.last_scale_out = Some(now);
            debug!(
                from = current,
                to = desired,
                cpu_demand,
                request_demand,
                "scaling out"
            );
            return ScaleDecision::ScaleTo(desired);
        }

        if desired < current {
            // A recent scale-out also blocks scale-in.
            if !elapsed(self.last_scale_in, now, self.cooldowns.scale_in)
                || !elapsed(self.last_scale_out, now, self.cooldowns.scale_in)
            {
                debug!(current, desired, "scale-in suppressed by cooldown");
                return ScaleDecision::NoChange;
            }
            self.last_scale_in = Some(now);
            debug!(
                from = current,
                to = desired,
                cpu_demand,
                request_demand,
                "scaling in"
            );
            return ScaleDecision::ScaleTo(desired);
        }

        ScaleDecision::NoChange
    }
}

fn elapsed(last: Option<u64>, now: u64, window: Duration) -> bool {
    match last {
        Some(at) => now.saturating_sub(at) >= window.as_secs(),
        None => true,
    }
}
